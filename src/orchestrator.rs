//! Build orchestrator.
//!
//! Executes a [`BuildPlan`] against a [`RemoteLabApi`], one call at a time,
//! and records the outcome of every entity in a [`BuildResult`].
//!
//! Failures stay local: a call that fails marks its own entity and the phase
//! carries on with the siblings. Later phases skip anything whose prerequisite
//! was never created and record it as [`BuildError::DependencyUnresolved`], so
//! the result always covers every entity in the topology. Nothing is retried.

use crate::plan::{BuildPlan, EntityKey, EntityKind, Operation, Phase};
use crate::remote::{LabHandle, RemoteCallError, RemoteId, RemoteLabApi};
use crate::render::{RenderError, TemplateRenderer};
use crate::topology::{Configuration, NetworkLink, Node, NodeLink, Topology};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of one entity during a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Pending,
    Creating,
    Created,
    Failed,
    Linking,
    Linked,
    LinkFailed,
    Configuring,
    Configured,
    ConfigFailed,
}

impl EntityState {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::LinkFailed | Self::ConfigFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Failed => "failed",
            Self::Linking => "linking",
            Self::Linked => "linked",
            Self::LinkFailed => "link failed",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::ConfigFailed => "config failed",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one entity did not reach its final state.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Remote(#[from] RemoteCallError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("{entity} was not created")]
    DependencyUnresolved { entity: EntityKey },

    #[error("Failed to read configuration file {}: {source}", path.display())]
    ConfigSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Final record for one entity.
#[derive(Debug)]
pub struct EntityReport {
    pub key: EntityKey,
    /// Human-readable form; for links the `src:label -> dst` text.
    pub label: String,
    pub state: EntityState,
    pub remote_id: Option<RemoteId>,
    pub error: Option<BuildError>,
}

/// Outcome of a build: one report per lab, network, node and link, in plan order.
#[derive(Debug)]
pub struct BuildResult {
    lab: Option<LabHandle>,
    entities: Vec<EntityReport>,
}

impl EntityReport {
    /// Key plus label, e.g. `link 'links.node[0]' (r1:Eth1 -> r2:Eth1)`.
    pub fn title(&self) -> String {
        if self.label == self.key.name {
            self.key.to_string()
        } else {
            format!("{} ({})", self.key, self.label)
        }
    }
}

impl BuildResult {
    /// Handle of the lab, if it was created.
    pub fn lab(&self) -> Option<&LabHandle> {
        self.lab.as_ref()
    }

    pub fn entities(&self) -> &[EntityReport] {
        &self.entities
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&EntityReport> {
        self.entities
            .iter()
            .find(|report| report.key.kind == kind && report.key.name == name)
    }

    pub fn state_of(&self, kind: EntityKind, name: &str) -> Option<EntityState> {
        self.get(kind, name).map(|report| report.state)
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntityReport> {
        self.entities.iter().filter(|report| report.state.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failures().count();
        writeln!(
            f,
            "Build {}: {} entities, {} failed",
            if failed == 0 { "succeeded" } else { "failed" },
            self.entities.len(),
            failed
        )?;

        for report in &self.entities {
            write!(f, "  {:<48} {}", report.title(), report.state)?;
            if let Some(id) = report.remote_id {
                write!(f, " (id {})", id)?;
            }
            if let Some(error) = &report.error {
                write!(f, ": {}", error)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Read or render the startup configuration text for a node.
pub fn resolve_configuration(
    configuration: &Configuration,
    renderer: &TemplateRenderer,
) -> Result<String, BuildError> {
    match configuration {
        Configuration::File(path) => std::fs::read_to_string(path).map_err(|source| BuildError::ConfigSource {
            path: path.clone(),
            source,
        }),
        Configuration::Template { template, vars } => Ok(renderer.render(template, vars)?),
    }
}

/// Build `topology` on the lab server behind `api`.
pub fn build<A: RemoteLabApi + ?Sized>(
    topology: &Topology,
    api: &mut A,
    renderer: &TemplateRenderer,
) -> BuildResult {
    let plan = BuildPlan::new(topology);
    execute(&plan, api, renderer)
}

/// Execute an already computed plan.
pub fn execute<A: RemoteLabApi + ?Sized>(
    plan: &BuildPlan<'_>,
    api: &mut A,
    renderer: &TemplateRenderer,
) -> BuildResult {
    let mut run = BuildRun::new(plan.topology(), api, renderer);

    for (number, phase) in Phase::ALL.into_iter().enumerate() {
        let count = plan.phase(phase).count();
        if count == 0 {
            continue;
        }
        info!("Phase {}/{}: {} ({} operations)", number + 1, Phase::ALL.len(), phase, count);

        for op in plan.phase(phase) {
            run.apply(op);
        }
    }

    let result = run.finish();
    if result.is_success() {
        info!("Build of {} completed", plan.topology().lab_path());
    } else {
        warn!(
            "Build of {} finished with {} failed entities",
            plan.topology().lab_path(),
            result.failures().count()
        );
    }
    result
}

/// State of one build run. The name to id maps live only as long as the run.
struct BuildRun<'t, 'a, A: RemoteLabApi + ?Sized> {
    topology: &'t Topology,
    api: &'a mut A,
    renderer: &'a TemplateRenderer,
    lab: Option<LabHandle>,
    reports: Vec<EntityReport>,
    index: HashMap<EntityKey, usize>,
    networks: HashMap<&'t str, RemoteId>,
    nodes: HashMap<&'t str, RemoteId>,
}

impl<'t, 'a, A: RemoteLabApi + ?Sized> BuildRun<'t, 'a, A> {
    fn new(topology: &'t Topology, api: &'a mut A, renderer: &'a TemplateRenderer) -> Self {
        let mut run = Self {
            topology,
            api,
            renderer,
            lab: None,
            reports: Vec::new(),
            index: HashMap::new(),
            networks: HashMap::new(),
            nodes: HashMap::new(),
        };

        let lab = EntityKey::lab(topology);
        run.register(lab.name.clone(), lab);
        for network in &topology.networks {
            run.register(network.name.clone(), EntityKey::network(&network.name));
        }
        for node in &topology.nodes {
            run.register(node.name.clone(), EntityKey::node(&node.name));
        }
        for (i, link) in topology.links.network.iter().enumerate() {
            run.register(link.to_string(), EntityKey::network_link(i));
        }
        for (i, link) in topology.links.node.iter().enumerate() {
            run.register(link.to_string(), EntityKey::node_link(i));
        }
        run
    }

    fn register(&mut self, label: String, key: EntityKey) {
        self.index.insert(key.clone(), self.reports.len());
        self.reports.push(EntityReport {
            key,
            label,
            state: EntityState::Pending,
            remote_id: None,
            error: None,
        });
    }

    fn report(&mut self, key: &EntityKey) -> Option<&mut EntityReport> {
        let i = *self.index.get(key)?;
        self.reports.get_mut(i)
    }

    fn state(&self, key: &EntityKey) -> Option<EntityState> {
        let i = *self.index.get(key)?;
        self.reports.get(i).map(|report| report.state)
    }

    fn set_state(&mut self, key: &EntityKey, state: EntityState) {
        if let Some(report) = self.report(key) {
            report.state = state;
        }
    }

    fn succeed(&mut self, key: &EntityKey, state: EntityState, remote_id: Option<RemoteId>) {
        if let Some(report) = self.report(key) {
            report.state = state;
            report.remote_id = remote_id.or(report.remote_id);
        }
    }

    fn fail(&mut self, key: &EntityKey, state: EntityState, error: BuildError) {
        if let Some(report) = self.report(key) {
            warn!("{} {}: {}", report.title(), state, error);
            report.state = state;
            report.error = Some(error);
        }
    }

    fn lab_or_fail(&mut self, key: &EntityKey, state: EntityState) -> Option<LabHandle> {
        if self.lab.is_none() {
            let entity = EntityKey::lab(self.topology);
            self.fail(key, state, BuildError::DependencyUnresolved { entity });
        }
        self.lab.clone()
    }

    fn apply(&mut self, op: &Operation<'t>) {
        match *op {
            Operation::CreateLab => self.create_lab(),
            Operation::CreateNetwork(network) => {
                let key = EntityKey::network(&network.name);
                let Some(lab) = self.lab_or_fail(&key, EntityState::Failed) else {
                    return;
                };
                self.set_state(&key, EntityState::Creating);
                debug!("add_lab_network {} ({})", network.name, network.network_type);
                match self.api.add_lab_network(&lab, network) {
                    Ok(id) => {
                        self.networks.insert(&network.name, id);
                        self.succeed(&key, EntityState::Created, Some(id));
                    }
                    Err(e) => self.fail(&key, EntityState::Failed, e.into()),
                }
            }
            Operation::CreateNode(node) => self.create_node(node),
            Operation::ConnectNodeToNetwork { index, link } => self.connect_to_network(index, link),
            Operation::ConnectNodeToNode { index, link } => self.connect_nodes(index, link),
            Operation::ApplyConfiguration { node, configuration } => self.configure(node, configuration),
        }
    }

    fn create_lab(&mut self) {
        let key = EntityKey::lab(self.topology);
        self.set_state(&key, EntityState::Creating);
        debug!("create_lab {}", key.name);
        match self.api.create_lab(self.topology) {
            Ok(lab) => {
                info!("Created lab {}", lab);
                self.lab = Some(lab);
                self.succeed(&key, EntityState::Created, None);
            }
            Err(e) => self.fail(&key, EntityState::Failed, e.into()),
        }
    }

    fn create_node(&mut self, node: &'t Node) {
        let key = EntityKey::node(&node.name);
        let Some(lab) = self.lab_or_fail(&key, EntityState::Failed) else {
            return;
        };
        self.set_state(&key, EntityState::Creating);
        debug!("add_node {} ({} / {})", node.name, node.template, node.image);
        match self.api.add_node(&lab, node) {
            Ok(id) => {
                self.nodes.insert(&node.name, id);
                self.succeed(&key, EntityState::Created, Some(id));
            }
            Err(e) => self.fail(&key, EntityState::Failed, e.into()),
        }
    }

    fn node_id(&self, name: &str) -> Result<RemoteId, BuildError> {
        self.nodes.get(name).copied().ok_or_else(|| BuildError::DependencyUnresolved {
            entity: EntityKey::node(name),
        })
    }

    fn network_id(&self, name: &str) -> Result<RemoteId, BuildError> {
        self.networks.get(name).copied().ok_or_else(|| BuildError::DependencyUnresolved {
            entity: EntityKey::network(name),
        })
    }

    fn connect_to_network(&mut self, index: usize, link: &NetworkLink) {
        let key = EntityKey::network_link(index);
        let Some(lab) = self.lab_or_fail(&key, EntityState::LinkFailed) else {
            return;
        };
        let ids = self.node_id(&link.src).and_then(|node| Ok((node, self.network_id(&link.dst)?)));
        let (node, network) = match ids {
            Ok(ids) => ids,
            Err(e) => return self.fail(&key, EntityState::LinkFailed, e),
        };

        let participants = [EntityKey::node(&link.src), EntityKey::network(&link.dst)];
        self.begin_link(&key, &participants);
        debug!("connect_node_to_cloud {} (node {} -> network {})", link, node, network);
        let outcome = self.api.connect_node_to_cloud(&lab, node, &link.src_label, network);
        self.finish_link(&key, &participants, outcome);
    }

    fn connect_nodes(&mut self, index: usize, link: &NodeLink) {
        let key = EntityKey::node_link(index);
        let Some(lab) = self.lab_or_fail(&key, EntityState::LinkFailed) else {
            return;
        };
        let ids = self.node_id(&link.src).and_then(|src| Ok((src, self.node_id(&link.dst)?)));
        let (src, dst) = match ids {
            Ok(ids) => ids,
            Err(e) => return self.fail(&key, EntityState::LinkFailed, e),
        };

        let participants = [EntityKey::node(&link.src), EntityKey::node(&link.dst)];
        self.begin_link(&key, &participants);
        debug!("connect_node_to_node {} (node {} -> node {})", link, src, dst);
        let outcome = self
            .api
            .connect_node_to_node(&lab, src, &link.src_label, dst, &link.dst_label, link.media);
        self.finish_link(&key, &participants, outcome);
    }

    fn begin_link(&mut self, key: &EntityKey, participants: &[EntityKey]) {
        self.set_state(key, EntityState::Linking);
        for participant in participants {
            if self.state(participant) == Some(EntityState::Created) {
                self.set_state(participant, EntityState::Linking);
            }
        }
    }

    /// A participant that already lost one link stays `LinkFailed`.
    fn finish_link(&mut self, key: &EntityKey, participants: &[EntityKey], outcome: Result<(), RemoteCallError>) {
        match outcome {
            Ok(()) => {
                self.set_state(key, EntityState::Linked);
                for participant in participants {
                    if self.state(participant) != Some(EntityState::LinkFailed) {
                        self.set_state(participant, EntityState::Linked);
                    }
                }
            }
            Err(e) => {
                self.fail(key, EntityState::LinkFailed, e.into());
                for participant in participants {
                    self.set_state(participant, EntityState::LinkFailed);
                }
            }
        }
    }

    fn configure(&mut self, node: &Node, configuration: &Configuration) {
        let key = EntityKey::node(&node.name);
        let (Some(lab), Ok(id)) = (self.lab.clone(), self.node_id(&node.name)) else {
            debug!("Skipping configuration of {}: node was not created", key);
            return;
        };

        self.set_state(&key, EntityState::Configuring);
        let text = match resolve_configuration(configuration, self.renderer) {
            Ok(text) => text,
            Err(e) => return self.fail(&key, EntityState::ConfigFailed, e),
        };

        debug!("upload_node_config {} ({} bytes)", node.name, text.len());
        match self.api.upload_node_config(&lab, id, &text) {
            Ok(()) => self.succeed(&key, EntityState::Configured, None),
            Err(e) => self.fail(&key, EntityState::ConfigFailed, e.into()),
        }
    }

    fn finish(self) -> BuildResult {
        BuildResult {
            lab: self.lab,
            entities: self.reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{DryRunLab, RecordedCall};
    use crate::topology::{Links, Media, Network, Placement, VarSource};
    use std::fs;
    use tempfile::TempDir;

    fn network(name: &str) -> Network {
        Network {
            name: name.to_string(),
            network_type: "pnet0".to_string(),
            visible: true,
            placement: Placement::default(),
        }
    }

    fn node_link(src: &str, dst: &str) -> NodeLink {
        NodeLink {
            src: src.to_string(),
            src_label: "Eth1".to_string(),
            dst: dst.to_string(),
            dst_label: "Eth1".to_string(),
            media: Media::Ethernet,
        }
    }

    fn topology(nodes: Vec<Node>, networks: Vec<Network>, links: Links) -> Topology {
        Topology {
            name: "unit".to_string(),
            path: "/".to_string(),
            description: None,
            author: None,
            version: None,
            script_timeout: None,
            body: None,
            tasks: None,
            nodes,
            networks,
            links,
        }
    }

    #[test]
    fn test_empty_topology_creates_only_lab() {
        let topology = topology(Vec::new(), Vec::new(), Links::default());
        let mut api = DryRunLab::new();

        let result = build(&topology, &mut api, &TemplateRenderer::default());
        assert!(result.is_success());
        assert_eq!(result.entities().len(), 1);
        assert_eq!(result.lab().map(LabHandle::path), Some("/unit.unl"));
        assert_eq!(api.call_kinds(), vec!["create_lab"]);
    }

    #[test]
    fn test_lab_failure_blocks_everything() {
        let topology = topology(
            vec![Node::new("r1", "vios", "vios-15")],
            vec![network("wan")],
            Links {
                network: vec![NetworkLink {
                    src: "r1".to_string(),
                    src_label: "Gi0/0".to_string(),
                    dst: "wan".to_string(),
                }],
                node: Vec::new(),
            },
        );
        let mut api = DryRunLab::new().reject_when(|call| matches!(call, RecordedCall::CreateLab { .. }));

        let result = build(&topology, &mut api, &TemplateRenderer::default());
        assert!(!result.is_success());
        assert_eq!(api.call_kinds(), vec!["create_lab"]);
        assert_eq!(result.failures().count(), 4);

        let node = result.get(EntityKind::Node, "r1").unwrap();
        assert_eq!(node.state, EntityState::Failed);
        match &node.error {
            Some(BuildError::DependencyUnresolved { entity }) => assert_eq!(entity.kind, EntityKind::Lab),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            result.state_of(EntityKind::Link, "links.network[0]"),
            Some(EntityState::LinkFailed)
        );
    }

    #[test]
    fn test_link_to_failed_node_is_unresolved() {
        let topology = topology(
            vec![
                Node::new("r1", "vios", "vios-15"),
                Node::new("r2", "vios", "vios-15"),
                Node::new("r3", "vios", "vios-15"),
            ],
            Vec::new(),
            Links {
                network: Vec::new(),
                node: vec![node_link("r1", "r2"), node_link("r2", "r3")],
            },
        );
        let mut api = DryRunLab::new()
            .reject_when(|call| matches!(call, RecordedCall::AddNode { name, .. } if name == "r1"));

        let result = build(&topology, &mut api, &TemplateRenderer::default());
        assert_eq!(result.state_of(EntityKind::Node, "r1"), Some(EntityState::Failed));
        assert_eq!(result.state_of(EntityKind::Node, "r2"), Some(EntityState::Linked));
        assert_eq!(result.state_of(EntityKind::Node, "r3"), Some(EntityState::Linked));

        let broken = result.get(EntityKind::Link, "links.node[0]").unwrap();
        assert_eq!(broken.state, EntityState::LinkFailed);
        assert!(matches!(broken.error, Some(BuildError::DependencyUnresolved { .. })));
        assert_eq!(
            result.state_of(EntityKind::Link, "links.node[1]"),
            Some(EntityState::Linked)
        );

        // only the link between created nodes reached the server
        let links: Vec<&RecordedCall> = api
            .calls()
            .iter()
            .filter(|c| c.kind() == "connect_node_to_node")
            .collect();
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_failed_link_marks_participants() {
        let topology = topology(
            vec![Node::new("r1", "vios", "vios-15"), Node::new("r2", "vios", "vios-15")],
            Vec::new(),
            Links {
                network: Vec::new(),
                node: vec![node_link("r1", "r2")],
            },
        );
        let mut api = DryRunLab::new().reject_when(|call| call.kind() == "connect_node_to_node");

        let result = build(&topology, &mut api, &TemplateRenderer::default());
        assert_eq!(result.state_of(EntityKind::Node, "r1"), Some(EntityState::LinkFailed));
        assert_eq!(result.state_of(EntityKind::Node, "r2"), Some(EntityState::LinkFailed));
        let link = result.get(EntityKind::Link, "links.node[0]").unwrap();
        assert!(matches!(link.error, Some(BuildError::Remote(RemoteCallError::Rejected(_)))));
        assert_eq!(link.label, "r1:Eth1 -> r2:Eth1");
    }

    #[test]
    fn test_links_with_same_text_are_reported_apart() {
        // "a:b" port "c" and "a" port "b:c" both read "a:b:c -> n1"
        let network_link = |src: &str, src_label: &str| NetworkLink {
            src: src.to_string(),
            src_label: src_label.to_string(),
            dst: "n1".to_string(),
        };
        let topology = topology(
            vec![Node::new("a:b", "vios", "vios-15"), Node::new("a", "vios", "vios-15")],
            vec![network("n1")],
            Links {
                network: vec![network_link("a:b", "c"), network_link("a", "b:c")],
                node: Vec::new(),
            },
        );
        let mut api = DryRunLab::new().reject_when(
            |call| matches!(call, RecordedCall::ConnectNodeToCloud { label, .. } if label == "c"),
        );

        let result = build(&topology, &mut api, &TemplateRenderer::default());
        let first = result.get(EntityKind::Link, "links.network[0]").unwrap();
        let second = result.get(EntityKind::Link, "links.network[1]").unwrap();
        assert_eq!(first.label, second.label);
        assert_eq!(first.state, EntityState::LinkFailed);
        assert!(matches!(first.error, Some(BuildError::Remote(_))));
        assert_eq!(second.state, EntityState::Linked);
        assert!(second.error.is_none());
        assert_eq!(result.entities().len(), 6);
    }

    #[test]
    fn test_configuration_failures_are_per_node() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("base.j2"), "hostname {{ hostname }}\n").unwrap();

        let mut good = Node::new("good", "vios", "vios-15");
        good.configuration = Some(Configuration::Template {
            template: "base.j2".to_string(),
            vars: VarSource::Inline([("hostname".to_string(), "good".into())].into_iter().collect()),
        });
        let mut typo = Node::new("typo", "vios", "vios-15");
        typo.configuration = Some(Configuration::Template {
            template: "base.j2".to_string(),
            vars: VarSource::Inline([("hostnme".to_string(), "typo".into())].into_iter().collect()),
        });
        let mut missing = Node::new("missing", "vios", "vios-15");
        missing.configuration = Some(Configuration::File(dir.path().join("missing.cfg")));

        let topology = topology(vec![good, typo, missing], Vec::new(), Links::default());
        let mut api = DryRunLab::new();
        let renderer = TemplateRenderer::new(dir.path());

        let result = build(&topology, &mut api, &renderer);
        assert_eq!(result.state_of(EntityKind::Node, "good"), Some(EntityState::Configured));

        let typo = result.get(EntityKind::Node, "typo").unwrap();
        assert_eq!(typo.state, EntityState::ConfigFailed);
        assert!(matches!(typo.error, Some(BuildError::Render(_))));
        assert_eq!(typo.remote_id, Some(2));

        let missing = result.get(EntityKind::Node, "missing").unwrap();
        assert!(matches!(missing.error, Some(BuildError::ConfigSource { .. })));

        assert_eq!(
            api.calls().last(),
            Some(&RecordedCall::UploadNodeConfig {
                node: 1,
                config: "hostname good\n".to_string()
            })
        );
    }

    #[test]
    fn test_no_upload_for_failed_node() {
        let mut r1 = Node::new("r1", "vios", "vios-15");
        r1.configuration = Some(Configuration::File(PathBuf::from("/nonexistent/r1.cfg")));
        let topology = topology(vec![r1], Vec::new(), Links::default());
        let mut api = DryRunLab::new().reject_when(|call| call.kind() == "add_node");

        let result = build(&topology, &mut api, &TemplateRenderer::default());
        let r1 = result.get(EntityKind::Node, "r1").unwrap();
        assert_eq!(r1.state, EntityState::Failed);
        assert!(matches!(r1.error, Some(BuildError::Remote(_))));
        assert_eq!(api.call_kinds(), vec!["create_lab", "add_node"]);
    }

    #[test]
    fn test_result_display() {
        let topology = topology(vec![Node::new("r1", "vios", "vios-15")], Vec::new(), Links::default());
        let mut api = DryRunLab::new();

        let summary = build(&topology, &mut api, &TemplateRenderer::default()).to_string();
        assert!(summary.starts_with("Build succeeded: 2 entities, 0 failed"));
        assert!(summary.contains("node 'r1'"));
        assert!(!summary.contains("(r1)"));
        assert!(summary.contains("created (id 1)"));
    }
}
