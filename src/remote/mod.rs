//! Remote lab API.
//!
//! The orchestrator talks to the lab server only through [`RemoteLabApi`],
//! which has one method per object it creates. Two implementations live here:
//!
//! - `http`: the EVE-NG REST API client, with login/logout and cookie session
//! - `dry_run`: an in-memory server that records calls and hands out ids,
//!   used by `build --dry-run` and by the tests
//!
//! Every method returns the server's answer as a `Result`: a non-success status
//! is a [`RemoteCallError`] for the one object being created, never a panic.

pub mod dry_run;
pub mod http;

pub use dry_run::{DryRunLab, RecordedCall};
pub use http::{ClientSettings, EveClient, Protocol};

use crate::topology::{Media, Network, Node, Topology};
use std::fmt;

/// Identifier the server assigns to a node or network inside a lab.
pub type RemoteId = u32;

/// A lab that exists on the server, addressed by its file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabHandle {
    path: String,
}

impl LabHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the lab file, e.g. `/dc1/leaf_spine.unl`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path split into its non-empty segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for LabHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteCallError {
    #[error("{endpoint}: server answered {code} {status}: {message}")]
    Status {
        endpoint: String,
        code: u16,
        status: String,
        message: String,
    },

    #[error("{endpoint}: request failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint}: unexpected response: {detail}")]
    Decode { endpoint: String, detail: String },

    #[error("Interface '{label}' not found on node {node_id}")]
    InterfaceNotFound { node_id: RemoteId, label: String },

    #[error("Not logged in to the lab server")]
    NoSession,

    #[error("{0}")]
    Rejected(String),
}

/// Calls the build needs from the lab server.
///
/// Calls are issued one at a time; later calls use the handle and ids returned
/// by earlier ones.
pub trait RemoteLabApi {
    /// Create the lab described by the topology metadata.
    fn create_lab(&mut self, topology: &Topology) -> Result<LabHandle, RemoteCallError>;

    fn add_lab_network(&mut self, lab: &LabHandle, network: &Network) -> Result<RemoteId, RemoteCallError>;

    /// Create a node. Configuration content is uploaded separately.
    fn add_node(&mut self, lab: &LabHandle, node: &Node) -> Result<RemoteId, RemoteCallError>;

    /// Attach the interface labelled `label` on `node` to `network`.
    fn connect_node_to_cloud(
        &mut self,
        lab: &LabHandle,
        node: RemoteId,
        label: &str,
        network: RemoteId,
    ) -> Result<(), RemoteCallError>;

    /// Wire two node interfaces together.
    fn connect_node_to_node(
        &mut self,
        lab: &LabHandle,
        src: RemoteId,
        src_label: &str,
        dst: RemoteId,
        dst_label: &str,
        media: Media,
    ) -> Result<(), RemoteCallError>;

    /// Replace the startup configuration of `node`.
    fn upload_node_config(&mut self, lab: &LabHandle, node: RemoteId, config: &str) -> Result<(), RemoteCallError>;
}
