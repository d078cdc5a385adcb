//! In-memory lab server.
//!
//! `DryRunLab` accepts every call, hands out sequential node and network ids
//! the way EVE-NG does, and keeps the calls in order so a build can be
//! inspected without a server. A predicate can be installed to reject chosen
//! calls, which is how partial failures are exercised.

use super::{LabHandle, RemoteCallError, RemoteId, RemoteLabApi};
use crate::topology::{Media, Network, Node, Topology};
use log::{debug, info};
use std::fmt;

/// One call received by the dry-run server.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    CreateLab { path: String },
    AddLabNetwork { name: String, network_type: String },
    AddNode { name: String, template: String, image: String },
    ConnectNodeToCloud { node: RemoteId, label: String, network: RemoteId },
    ConnectNodeToNode {
        src: RemoteId,
        src_label: String,
        dst: RemoteId,
        dst_label: String,
        media: Media,
    },
    UploadNodeConfig { node: RemoteId, config: String },
}

impl RecordedCall {
    /// Name of the API call, e.g. `add_node`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateLab { .. } => "create_lab",
            Self::AddLabNetwork { .. } => "add_lab_network",
            Self::AddNode { .. } => "add_node",
            Self::ConnectNodeToCloud { .. } => "connect_node_to_cloud",
            Self::ConnectNodeToNode { .. } => "connect_node_to_node",
            Self::UploadNodeConfig { .. } => "upload_node_config",
        }
    }
}

impl fmt::Display for RecordedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateLab { path } => write!(f, "create_lab {}", path),
            Self::AddLabNetwork { name, network_type } => {
                write!(f, "add_lab_network {} ({})", name, network_type)
            }
            Self::AddNode { name, template, image } => {
                write!(f, "add_node {} ({} / {})", name, template, image)
            }
            Self::ConnectNodeToCloud { node, label, network } => {
                write!(f, "connect_node_to_cloud node {}:{} -> network {}", node, label, network)
            }
            Self::ConnectNodeToNode { src, src_label, dst, dst_label, media } => write!(
                f,
                "connect_node_to_node node {}:{} -> node {}:{} ({})",
                src,
                src_label,
                dst,
                dst_label,
                media.as_str()
            ),
            Self::UploadNodeConfig { node, config } => {
                write!(f, "upload_node_config node {} ({} bytes)", node, config.len())
            }
        }
    }
}

type RejectFn = Box<dyn Fn(&RecordedCall) -> bool>;

pub struct DryRunLab {
    calls: Vec<RecordedCall>,
    next_node_id: RemoteId,
    next_network_id: RemoteId,
    reject: Option<RejectFn>,
}

impl Default for DryRunLab {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunLab {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            next_node_id: 1,
            next_network_id: 1,
            reject: None,
        }
    }

    /// Fail every call for which `predicate` returns true.
    pub fn reject_when(mut self, predicate: impl Fn(&RecordedCall) -> bool + 'static) -> Self {
        self.reject = Some(Box::new(predicate));
        self
    }

    /// Calls received so far, rejected ones included.
    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    pub fn call_kinds(&self) -> Vec<&'static str> {
        self.calls.iter().map(RecordedCall::kind).collect()
    }

    fn record(&mut self, call: RecordedCall) -> Result<(), RemoteCallError> {
        let rejected = self.reject.as_ref().is_some_and(|reject| reject(&call));
        if rejected {
            debug!("[dry-run] rejecting {}", call);
        } else {
            info!("[dry-run] {}", call);
        }

        let message = format!("dry run rejected {}", call);
        self.calls.push(call);

        if rejected {
            Err(RemoteCallError::Rejected(message))
        } else {
            Ok(())
        }
    }
}

impl RemoteLabApi for DryRunLab {
    fn create_lab(&mut self, topology: &Topology) -> Result<LabHandle, RemoteCallError> {
        let path = topology.lab_path();
        self.record(RecordedCall::CreateLab { path: path.clone() })?;
        Ok(LabHandle::new(path))
    }

    fn add_lab_network(&mut self, _lab: &LabHandle, network: &Network) -> Result<RemoteId, RemoteCallError> {
        self.record(RecordedCall::AddLabNetwork {
            name: network.name.clone(),
            network_type: network.network_type.clone(),
        })?;
        let id = self.next_network_id;
        self.next_network_id += 1;
        Ok(id)
    }

    fn add_node(&mut self, _lab: &LabHandle, node: &Node) -> Result<RemoteId, RemoteCallError> {
        self.record(RecordedCall::AddNode {
            name: node.name.clone(),
            template: node.template.clone(),
            image: node.image.clone(),
        })?;
        let id = self.next_node_id;
        self.next_node_id += 1;
        Ok(id)
    }

    fn connect_node_to_cloud(
        &mut self,
        _lab: &LabHandle,
        node: RemoteId,
        label: &str,
        network: RemoteId,
    ) -> Result<(), RemoteCallError> {
        self.record(RecordedCall::ConnectNodeToCloud {
            node,
            label: label.to_string(),
            network,
        })
    }

    fn connect_node_to_node(
        &mut self,
        _lab: &LabHandle,
        src: RemoteId,
        src_label: &str,
        dst: RemoteId,
        dst_label: &str,
        media: Media,
    ) -> Result<(), RemoteCallError> {
        self.record(RecordedCall::ConnectNodeToNode {
            src,
            src_label: src_label.to_string(),
            dst,
            dst_label: dst_label.to_string(),
            media,
        })
    }

    fn upload_node_config(&mut self, _lab: &LabHandle, node: RemoteId, config: &str) -> Result<(), RemoteCallError> {
        self.record(RecordedCall::UploadNodeConfig {
            node,
            config: config.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_per_kind() {
        let mut lab = DryRunLab::new();
        let handle = LabHandle::new("/demo.unl");
        let node = Node::new("r1", "vios", "vios-15");
        let network = Network {
            name: "wan".to_string(),
            network_type: "pnet0".to_string(),
            visible: true,
            placement: Default::default(),
        };

        assert_eq!(lab.add_node(&handle, &node).unwrap(), 1);
        assert_eq!(lab.add_lab_network(&handle, &network).unwrap(), 1);
        assert_eq!(lab.add_node(&handle, &node).unwrap(), 2);
        assert_eq!(lab.call_kinds(), vec!["add_node", "add_lab_network", "add_node"]);
    }

    #[test]
    fn test_rejected_calls_are_recorded() {
        let mut lab = DryRunLab::new().reject_when(|call| {
            matches!(call, RecordedCall::AddNode { name, .. } if name == "bad")
        });
        let handle = LabHandle::new("/demo.unl");

        let err = lab.add_node(&handle, &Node::new("bad", "vios", "vios-15")).unwrap_err();
        assert!(err.to_string().contains("add_node bad"));
        assert_eq!(lab.add_node(&handle, &Node::new("good", "vios", "vios-15")).unwrap(), 1);
        assert_eq!(lab.calls().len(), 2);
    }
}
