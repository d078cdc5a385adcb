//! Topology document model.
//!
//! These types are only ever built by [`crate::utils::validation::validate`],
//! so every value here already satisfies the document rules: names are unique,
//! enumerations are known, link endpoints resolve, and each node carries at
//! most one configuration source.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default folder a lab is created in.
pub const DEFAULT_LAB_FOLDER: &str = "/";

/// Lower-case a lab name and replace spaces, the way EVE-NG names lab files.
pub fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Full path of the lab file for `name` inside `folder`, e.g. `/labs/demo.unl`.
pub fn lab_file_path(folder: &str, name: &str) -> String {
    let stem = name.strip_suffix(".unl").unwrap_or(name);
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        format!("/{}.unl", slugify(stem))
    } else {
        format!("/{}/{}.unl", folder, slugify(stem))
    }
}

/// Emulation engine for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeType {
    #[default]
    Qemu,
    Dynamips,
    Iol,
}

impl NodeType {
    pub const ALL: &'static [&'static str] = &["qemu", "dynamips", "iol"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "qemu" => Some(Self::Qemu),
            "dynamips" => Some(Self::Dynamips),
            "iol" => Some(Self::Iol),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qemu => "qemu",
            Self::Dynamips => "dynamips",
            Self::Iol => "iol",
        }
    }
}

/// Console protocol exposed by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleType {
    Telnet,
    Vnc,
}

impl ConsoleType {
    pub const ALL: &'static [&'static str] = &["telnet", "vnc"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "telnet" => Some(Self::Telnet),
            "vnc" => Some(Self::Vnc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telnet => "telnet",
            Self::Vnc => "vnc",
        }
    }
}

/// Interface family used by a point-to-point link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Media {
    #[default]
    Ethernet,
    Serial,
}

impl Media {
    pub const ALL: &'static [&'static str] = &["ethernet", "serial"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ethernet" => Some(Self::Ethernet),
            "serial" => Some(Self::Serial),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ethernet => "ethernet",
            Self::Serial => "serial",
        }
    }
}

/// Position on the lab canvas, as offsets from the left and top edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Placement {
    pub left: Option<u32>,
    pub top: Option<u32>,
}

/// Where a templated configuration takes its variables from.
#[derive(Debug, Clone, PartialEq)]
pub enum VarSource {
    /// Variables written directly in the topology document.
    Inline(BTreeMap<String, serde_yaml::Value>),
    /// A separate YAML (or JSON) document holding a mapping of variables.
    File(PathBuf),
}

/// Startup configuration for a node. Exactly one source is ever active.
#[derive(Debug, Clone, PartialEq)]
pub enum Configuration {
    /// Upload the file contents as they are.
    File(PathBuf),
    /// Render `template` from the template directory with `vars`.
    Template { template: String, vars: VarSource },
}

/// An emulated device.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub template: String,
    pub image: String,
    pub node_type: NodeType,
    pub placement: Placement,
    pub console: Option<ConsoleType>,
    pub cpu: Option<u32>,
    pub ram: Option<u32>,
    pub ethernet: Option<u32>,
    pub serial: Option<u32>,
    pub delay: Option<u32>,
    pub icon: Option<String>,
    pub configuration: Option<Configuration>,
}

impl Node {
    /// Minimal node with defaults for every optional attribute.
    pub fn new(name: impl Into<String>, template: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            image: image.into(),
            node_type: NodeType::default(),
            placement: Placement::default(),
            console: None,
            cpu: None,
            ram: None,
            ethernet: None,
            serial: None,
            delay: None,
            icon: None,
            configuration: None,
        }
    }
}

/// A virtual network or cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct Network {
    pub name: String,
    pub network_type: String,
    pub visible: bool,
    pub placement: Placement,
}

/// Node interface attached to a network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkLink {
    pub src: String,
    pub src_label: String,
    pub dst: String,
}

impl fmt::Display for NetworkLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}", self.src, self.src_label, self.dst)
    }
}

/// Point-to-point link between two node interfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLink {
    pub src: String,
    pub src_label: String,
    pub dst: String,
    pub dst_label: String,
    pub media: Media,
}

impl fmt::Display for NodeLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} -> {}:{}", self.src, self.src_label, self.dst, self.dst_label)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Links {
    pub network: Vec<NetworkLink>,
    pub node: Vec<NodeLink>,
}

/// A validated lab topology.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub name: String,
    pub path: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub script_timeout: Option<u32>,
    pub body: Option<String>,
    pub tasks: Option<String>,
    pub nodes: Vec<Node>,
    pub networks: Vec<Network>,
    pub links: Links,
}

impl Topology {
    /// Path of the lab file on the server, e.g. `/demo/leaf_spine.unl`.
    pub fn lab_path(&self) -> String {
        lab_file_path(&self.path, &self.name)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Anchor relative configuration and variable paths at `base`.
    ///
    /// Called by the loader with the directory of the topology document, so a
    /// document can refer to `configs/leaf01.cfg` wherever it is run from.
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        for node in &mut self.nodes {
            match &mut node.configuration {
                Some(Configuration::File(path)) => anchor(path),
                Some(Configuration::Template {
                    vars: VarSource::File(path),
                    ..
                }) => anchor(path),
                _ => {}
            }
        }
    }
}
