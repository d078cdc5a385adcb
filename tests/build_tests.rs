//! End-to-end builds of topology documents against the recording lab API.

use evetopo::catalog::Catalog;
use evetopo::config_loader::load_topology;
use evetopo::plan::{BuildPlan, EntityKind};
use evetopo::remote::{DryRunLab, RecordedCall};
use evetopo::render::TemplateRenderer;
use evetopo::{build, BuildError, EntityState, Topology, ValidationErrors};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// A scratch lab directory holding the document, configs and templates.
struct LabDir {
    dir: TempDir,
}

impl LabDir {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("configs")).unwrap();
        fs::create_dir_all(dir.path().join("templates")).unwrap();
        Self { dir }
    }

    fn write(&self, relative: &str, content: &str) -> &Self {
        fs::write(self.dir.path().join(relative), content).unwrap();
        self
    }

    fn load(&self, document: &str) -> Topology {
        self.write("lab.yml", document);
        load_topology(&self.dir.path().join("lab.yml"), &Catalog::default()).unwrap()
    }

    fn renderer(&self) -> TemplateRenderer {
        TemplateRenderer::new(self.dir.path().join("templates"))
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

const LEAF_PAIR: &str = r#"
name: leaf pair
nodes:
  - name: leaf01
    template: veos
    image: veos-4.22.0F
    configuration:
      file: configs/leaf01.cfg
  - name: leaf02
    template: veos
    image: veos-4.22.0F
    configuration:
      template: leaf.j2
      vars:
        hostname: leaf02
links:
  node:
    - src: leaf01
      src_label: Eth1
      dst: leaf02
      dst_label: Eth1
"#;

#[test]
fn test_leaf_pair_round_trip() {
    let lab = LabDir::new();
    lab.write("configs/leaf01.cfg", "hostname leaf01\n")
        .write("templates/leaf.j2", "hostname {{ hostname }}\n");
    let topology = lab.load(LEAF_PAIR);

    let mut api = DryRunLab::new();
    let result = build(&topology, &mut api, &lab.renderer());

    assert!(result.is_success(), "{}", result);
    assert_eq!(
        api.call_kinds(),
        vec![
            "create_lab",
            "add_node",
            "add_node",
            "connect_node_to_node",
            "upload_node_config",
            "upload_node_config",
        ]
    );
    assert_eq!(result.state_of(EntityKind::Node, "leaf01"), Some(EntityState::Configured));
    assert_eq!(result.state_of(EntityKind::Node, "leaf02"), Some(EntityState::Configured));
    assert_eq!(result.lab().unwrap().path(), "/leaf_pair.unl");

    let uploads: Vec<&str> = api
        .calls()
        .iter()
        .filter_map(|call| match call {
            RecordedCall::UploadNodeConfig { config, .. } => Some(config.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(uploads, vec!["hostname leaf01\n", "hostname leaf02\n"]);
    assert!(uploads.iter().all(|text| !text.contains("{{")));
}

const FABRIC: &str = r#"
name: fabric
path: /dc1
nodes:
  - name: spine01
    template: veos
    image: veos-4.22.0F
  - name: leaf01
    template: veos
    image: veos-4.22.0F
  - name: leaf02
    template: veos
    image: veos-4.22.0F
  - name: leaf03
    template: veos
    image: veos-4.22.0F
networks:
  - name: mgmt
    network_type: pnet0
  - name: internet
    network_type: pnet1
links:
  network:
    - {src: spine01, src_label: Mgmt1, dst: mgmt}
    - {src: leaf01, src_label: Mgmt1, dst: mgmt}
    - {src: leaf02, src_label: Mgmt1, dst: mgmt}
    - {src: spine01, src_label: Eth9, dst: internet}
  node:
    - {src: spine01, src_label: Eth1, dst: leaf01, dst_label: Eth1}
    - {src: spine01, src_label: Eth2, dst: leaf02, dst_label: Eth1}
    - {src: spine01, src_label: Eth3, dst: leaf03, dst_label: Eth1}
"#;

#[test]
fn test_objects_created_before_links() {
    let lab = LabDir::new();
    let topology = lab.load(FABRIC);

    let mut api = DryRunLab::new();
    let result = build(&topology, &mut api, &lab.renderer());
    assert!(result.is_success(), "{}", result);

    let kinds = api.call_kinds();
    let last_create = kinds
        .iter()
        .rposition(|k| *k == "add_node" || *k == "add_lab_network")
        .unwrap();
    let first_link = kinds.iter().position(|k| k.starts_with("connect_")).unwrap();
    assert!(last_create < first_link);

    // all network links come before any node link
    let last_cloud = kinds.iter().rposition(|k| *k == "connect_node_to_cloud").unwrap();
    let first_wire = kinds.iter().position(|k| *k == "connect_node_to_node").unwrap();
    assert!(last_cloud < first_wire);

    assert_eq!(result.lab().unwrap().path(), "/dc1/fabric.unl");
    assert_eq!(result.state_of(EntityKind::Network, "mgmt"), Some(EntityState::Linked));
    assert_eq!(result.state_of(EntityKind::Node, "leaf03"), Some(EntityState::Linked));
}

#[test]
fn test_plan_matches_build_order() {
    let lab = LabDir::new();
    let topology = lab.load(FABRIC);
    let plan = BuildPlan::new(&topology);

    let mut api = DryRunLab::new();
    build(&topology, &mut api, &lab.renderer());

    // one remote call per planned operation when nothing has configuration
    assert_eq!(plan.len(), api.calls().len());
}

#[test]
fn test_one_failed_node_is_contained() {
    let lab = LabDir::new();
    lab.write("templates/leaf.j2", "hostname {{ hostname }}\n");
    let document = FABRIC.replace(
        "  - name: leaf02\n    template: veos\n    image: veos-4.22.0F\n",
        "  - name: leaf02\n    template: veos\n    image: veos-4.22.0F\n    configuration:\n      template: leaf.j2\n      vars: {hostname: leaf02}\n",
    );
    let topology = lab.load(&document);

    let mut api = DryRunLab::new()
        .reject_when(|call| matches!(call, RecordedCall::AddNode { name, .. } if name == "leaf02"));
    let result = build(&topology, &mut api, &lab.renderer());

    assert!(!result.is_success());
    assert_eq!(result.state_of(EntityKind::Node, "leaf02"), Some(EntityState::Failed));
    for sibling in ["spine01", "leaf01", "leaf03"] {
        let state = result.state_of(EntityKind::Node, sibling).unwrap();
        assert!(!state.is_failure(), "{} ended {}", sibling, state);
    }
    assert_eq!(result.state_of(EntityKind::Network, "mgmt"), Some(EntityState::Linked));

    // only the links touching leaf02 failed
    let failed: Vec<String> = result.failures().map(|r| r.title()).collect();
    assert_eq!(
        failed,
        vec![
            "node 'leaf02'",
            "link 'links.network[2]' (leaf02:Mgmt1 -> mgmt)",
            "link 'links.node[1]' (spine01:Eth2 -> leaf02:Eth1)",
        ]
    );
    let link = result.get(EntityKind::Link, "links.network[2]").unwrap();
    match &link.error {
        Some(BuildError::DependencyUnresolved { entity }) => assert_eq!(entity.name, "leaf02"),
        other => panic!("unexpected error {:?}", other),
    }

    // no configuration upload for the node that was never created
    assert!(api.calls().iter().all(|call| call.kind() != "upload_node_config"));
}

#[test]
fn test_failed_network_only_blocks_its_links() {
    let lab = LabDir::new();
    let topology = lab.load(FABRIC);

    let mut api = DryRunLab::new()
        .reject_when(|call| matches!(call, RecordedCall::AddLabNetwork { name, .. } if name == "internet"));
    let result = build(&topology, &mut api, &lab.renderer());

    assert!(!result.is_success());
    assert_eq!(result.state_of(EntityKind::Network, "internet"), Some(EntityState::Failed));
    assert_eq!(result.state_of(EntityKind::Network, "mgmt"), Some(EntityState::Linked));

    let failed: Vec<&str> = result.failures().map(|r| r.key.name.as_str()).collect();
    assert_eq!(failed, vec!["internet", "links.network[3]"]);
    let link = result.get(EntityKind::Link, "links.network[3]").unwrap();
    assert_eq!(link.label, "spine01:Eth9 -> internet");
    match &link.error {
        Some(BuildError::DependencyUnresolved { entity }) => {
            assert_eq!(entity.kind, EntityKind::Network);
            assert_eq!(entity.name, "internet");
        }
        other => panic!("unexpected error {:?}", other),
    }

    // the three mgmt attachments still reached the server
    let attached = api.calls().iter().filter(|c| c.kind() == "connect_node_to_cloud").count();
    assert_eq!(attached, 3);
    // spine01 keeps its other links
    assert_eq!(result.state_of(EntityKind::Node, "spine01"), Some(EntityState::Linked));
}

#[test]
fn test_invalid_document_reports_every_problem() {
    let lab = LabDir::new();
    lab.write(
        "lab.yml",
        r#"
nodes:
  - name: r1
    template: vios
    image: vios-15
    configuration:
      file: r1.cfg
      template: base.j2
  - name: r1
    template: vios
    image: vios-15
links:
  node:
    - {src: r1, src_label: Gi0/0, dst: r9, dst_label: Gi0/0}
"#,
    );

    let err = load_topology(&lab.path().join("lab.yml"), &Catalog::default()).unwrap_err();
    let errors = err.downcast_ref::<ValidationErrors>().unwrap();

    let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
    assert!(paths.contains(&"name"));
    assert!(paths.contains(&"nodes[0].configuration"));
    assert!(paths.contains(&"nodes[1].name"));
    assert!(errors.iter().any(|e| e.actual.contains("r9")));
}

#[test]
fn test_vars_file_next_to_document() {
    let lab = LabDir::new();
    lab.write("templates/router.j2", "hostname {{ hostname }}\nrouter bgp {{ asn }}\n")
        .write("configs/r1.yml", "hostname: r1\nasn: 65001\n");
    let topology = lab.load(
        r#"
name: vars
nodes:
  - name: r1
    template: vios
    image: vios-15
    configuration:
      template: router
      vars: configs/r1.yml
"#,
    );

    let mut api = DryRunLab::new();
    let result = build(&topology, &mut api, &lab.renderer());

    assert!(result.is_success(), "{}", result);
    assert_eq!(
        api.calls().last(),
        Some(&RecordedCall::UploadNodeConfig {
            node: 1,
            config: "hostname r1\nrouter bgp 65001\n".to_string(),
        })
    );
}
