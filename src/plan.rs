//! Build plan.
//!
//! A [`BuildPlan`] is the ordered list of remote operations a validated
//! [`Topology`] turns into. Operations are grouped by [`Phase`] and phases
//! always come in the same order, because every phase after the first uses
//! identifiers the server hands out in an earlier one:
//!
//! 1. create the lab
//! 2. create networks
//! 3. create nodes
//! 4. attach node interfaces to networks
//! 5. wire node interfaces together
//! 6. apply node configurations
//!
//! Inside a phase operations follow document declaration order.

use crate::topology::{Configuration, Network, NetworkLink, Node, NodeLink, Topology};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    CreateLab,
    CreateNetworks,
    CreateNodes,
    NetworkLinks,
    NodeLinks,
    ApplyConfiguration,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::CreateLab,
        Phase::CreateNetworks,
        Phase::CreateNodes,
        Phase::NetworkLinks,
        Phase::NodeLinks,
        Phase::ApplyConfiguration,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            Self::CreateLab => "create lab",
            Self::CreateNetworks => "create networks",
            Self::CreateNodes => "create nodes",
            Self::NetworkLinks => "connect nodes to networks",
            Self::NodeLinks => "connect nodes to nodes",
            Self::ApplyConfiguration => "apply node configurations",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Kind of object a build result is tracked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Lab,
    Network,
    Node,
    Link,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lab => "lab",
            Self::Network => "network",
            Self::Node => "node",
            Self::Link => "link",
        }
    }
}

/// Identifies one entity of a build. Links are named by their position in
/// the document, e.g. `links.node[1]`, since two different links can share
/// the same `src:label -> dst:label` text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }

    pub fn lab(topology: &Topology) -> Self {
        Self::new(EntityKind::Lab, topology.lab_path())
    }

    pub fn network(name: &str) -> Self {
        Self::new(EntityKind::Network, name)
    }

    pub fn node(name: &str) -> Self {
        Self::new(EntityKind::Node, name)
    }

    /// Key of `links.network[index]`.
    pub fn network_link(index: usize) -> Self {
        Self::new(EntityKind::Link, format!("links.network[{}]", index))
    }

    /// Key of `links.node[index]`.
    pub fn node_link(index: usize) -> Self {
        Self::new(EntityKind::Link, format!("links.node[{}]", index))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind.as_str(), self.name)
    }
}

/// One remote operation, borrowing the entity it acts on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation<'a> {
    CreateLab,
    CreateNetwork(&'a Network),
    CreateNode(&'a Node),
    ConnectNodeToNetwork { index: usize, link: &'a NetworkLink },
    ConnectNodeToNode { index: usize, link: &'a NodeLink },
    ApplyConfiguration {
        node: &'a Node,
        configuration: &'a Configuration,
    },
}

impl Operation<'_> {
    pub fn phase(&self) -> Phase {
        match self {
            Self::CreateLab => Phase::CreateLab,
            Self::CreateNetwork(_) => Phase::CreateNetworks,
            Self::CreateNode(_) => Phase::CreateNodes,
            Self::ConnectNodeToNetwork { .. } => Phase::NetworkLinks,
            Self::ConnectNodeToNode { .. } => Phase::NodeLinks,
            Self::ApplyConfiguration { .. } => Phase::ApplyConfiguration,
        }
    }

    /// Short human-readable form used in plan listings.
    pub fn describe(&self, topology: &Topology) -> String {
        match self {
            Self::CreateLab => format!("create lab {}", topology.lab_path()),
            Self::CreateNetwork(network) => {
                format!("create network {} ({})", network.name, network.network_type)
            }
            Self::CreateNode(node) => {
                format!("create node {} ({} / {})", node.name, node.template, node.image)
            }
            Self::ConnectNodeToNetwork { link, .. } => format!("connect {}", link),
            Self::ConnectNodeToNode { link, .. } => format!("connect {} ({})", link, link.media.as_str()),
            Self::ApplyConfiguration { node, configuration } => match configuration {
                Configuration::File(path) => {
                    format!("upload {} to node {}", path.display(), node.name)
                }
                Configuration::Template { template, .. } => {
                    format!("render {} and upload to node {}", template, node.name)
                }
            },
        }
    }
}

/// Ordered operations for one topology.
#[derive(Debug, Clone)]
pub struct BuildPlan<'a> {
    topology: &'a Topology,
    operations: Vec<Operation<'a>>,
}

impl<'a> BuildPlan<'a> {
    pub fn new(topology: &'a Topology) -> Self {
        let mut operations = vec![Operation::CreateLab];
        operations.extend(topology.networks.iter().map(Operation::CreateNetwork));
        operations.extend(topology.nodes.iter().map(Operation::CreateNode));
        operations.extend(
            topology
                .links
                .network
                .iter()
                .enumerate()
                .map(|(index, link)| Operation::ConnectNodeToNetwork { index, link }),
        );
        operations.extend(
            topology
                .links
                .node
                .iter()
                .enumerate()
                .map(|(index, link)| Operation::ConnectNodeToNode { index, link }),
        );
        operations.extend(topology.nodes.iter().filter_map(|node| {
            node.configuration
                .as_ref()
                .map(|configuration| Operation::ApplyConfiguration { node, configuration })
        }));

        Self { topology, operations }
    }

    pub fn topology(&self) -> &'a Topology {
        self.topology
    }

    pub fn operations(&self) -> &[Operation<'a>] {
        &self.operations
    }

    /// Operations belonging to `phase`, in order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &Operation<'a>> {
        self.operations.iter().filter(move |op| op.phase() == phase)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Display for BuildPlan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build plan for {} ({} operations)", self.topology.lab_path(), self.len())?;
        let mut step = 1;
        for phase in Phase::ALL {
            let mut ops = self.phase(phase).peekable();
            if ops.peek().is_none() {
                continue;
            }
            writeln!(f, "{}:", phase)?;
            for op in ops {
                writeln!(f, "  {:>3}. {}", step, op.describe(self.topology))?;
                step += 1;
            }
        }
        Ok(())
    }
}
