//! Lab topology model.
//!
//! This module contains the in-memory representation of a validated topology
//! document: lab metadata, nodes, networks and the two kinds of links.

pub mod types;

// Re-export key types for easier access
pub use types::{
    lab_file_path, slugify, Configuration, ConsoleType, Links, Media, Network, NetworkLink, Node,
    NodeLink, NodeType, Placement, Topology, VarSource, DEFAULT_LAB_FOLDER,
};
