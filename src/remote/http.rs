//! EVE-NG REST API client.
//!
//! Blocking client over `reqwest`; one request is in flight at a time. The
//! session is cookie based: [`EveClient::login`] posts the credentials and the
//! cookie store carries the session for the following calls.
//!
//! Every response is wrapped in an envelope:
//!
//! ```json
//! {"code": 201, "status": "success", "message": "Lab has been saved (60023).", "data": {"id": 3}}
//! ```
//!
//! Anything other than an HTTP 2xx with `status: success` becomes a
//! [`RemoteCallError::Status`] carrying the server message.

use super::{LabHandle, RemoteCallError, RemoteId, RemoteLabApi};
use crate::topology::{slugify, Media, Network, Node, Topology};
use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Longest response excerpt quoted in an error.
const MAX_SNIPPET: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

/// Connection settings for an EVE-NG server.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub host: String,
    /// Defaults to the protocol's well-known port.
    pub port: Option<u16>,
    pub protocol: Protocol,
    pub username: String,
    pub password: String,
    /// Verify the server certificate (self-signed certificates are common).
    pub ssl_verify: bool,
    pub timeout: Duration,
}

impl ClientSettings {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    /// Root of the API, e.g. `https://eve.example.com/api/`.
    pub fn base_url(&self) -> Result<Url, RemoteCallError> {
        let raw = format!("{}://{}:{}/api/", self.protocol.scheme(), self.host, self.port());
        Url::parse(&raw).map_err(|e| RemoteCallError::Decode {
            endpoint: raw.clone(),
            detail: format!("invalid server address: {}", e),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: Option<String>,
    message: Option<String>,
    data: Option<Value>,
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_SNIPPET) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

/// Unwrap a response envelope, returning its `data` member.
pub(crate) fn parse_envelope(endpoint: &str, http_status: u16, body: &str) -> Result<Value, RemoteCallError> {
    let http_ok = (200..300).contains(&http_status);

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => {
            let status = envelope
                .status
                .unwrap_or_else(|| if http_ok { "success" } else { "fail" }.to_string());
            if http_ok && status == "success" {
                Ok(envelope.data.unwrap_or(Value::Null))
            } else {
                Err(RemoteCallError::Status {
                    endpoint: endpoint.to_string(),
                    code: http_status,
                    status,
                    message: envelope.message.unwrap_or_default(),
                })
            }
        }
        Err(_) if http_ok && body.trim().is_empty() => Ok(Value::Null),
        Err(e) if http_ok => Err(RemoteCallError::Decode {
            endpoint: endpoint.to_string(),
            detail: format!("{} in {:?}", e, snippet(body)),
        }),
        Err(_) => Err(RemoteCallError::Status {
            endpoint: endpoint.to_string(),
            code: http_status,
            status: "fail".to_string(),
            message: snippet(body),
        }),
    }
}

/// Read the `id` the server assigned to a new object.
pub(crate) fn extract_id(endpoint: &str, data: &Value) -> Result<RemoteId, RemoteCallError> {
    let id = match data.get("id") {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| RemoteId::try_from(n).ok()),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    id.ok_or_else(|| RemoteCallError::Decode {
        endpoint: endpoint.to_string(),
        detail: format!("no object id in {}", data),
    })
}

/// Find the index of the interface called `label` in a node's interface listing.
///
/// The server lists interfaces per media either as an array (index is the
/// position) or as an object keyed by index.
pub(crate) fn find_interface_index(interfaces: &Value, media: Media, label: &str) -> Option<String> {
    let has_label = |intf: &Value| intf.get("name").and_then(Value::as_str) == Some(label);

    match interfaces.get(media.as_str()) {
        Some(Value::Array(list)) => list.iter().position(has_label).map(|i| i.to_string()),
        Some(Value::Object(map)) => map
            .iter()
            .find(|(_, intf)| has_label(intf))
            .map(|(index, _)| index.clone()),
        _ => None,
    }
}

fn insert_opt<T: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        body.insert(key.to_string(), value.into());
    }
}

/// Session with an EVE-NG server.
pub struct EveClient {
    settings: ClientSettings,
    client: Client,
    base: Url,
    logged_in: bool,
}

impl EveClient {
    pub fn new(settings: ClientSettings) -> Result<Self, RemoteCallError> {
        let base = settings.base_url()?;
        let client = Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!settings.ssl_verify)
            .timeout(settings.timeout)
            .build()
            .map_err(|source| RemoteCallError::Transport {
                endpoint: base.to_string(),
                source,
            })?;

        Ok(Self {
            settings,
            client,
            base,
            logged_in: false,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn login(&mut self) -> Result<(), RemoteCallError> {
        let url = self.endpoint(&["auth", "login"]);
        let credentials = json!({
            "username": self.settings.username,
            "password": self.settings.password,
            "html5": -1,
        });

        self.send(Method::POST, url, Some(credentials))?;
        self.logged_in = true;
        info!(
            "Logged in to {} as {}",
            self.base.host_str().unwrap_or_default(),
            self.settings.username
        );
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), RemoteCallError> {
        if !self.logged_in {
            return Ok(());
        }
        let url = self.endpoint(&["auth", "logout"]);
        self.send(Method::GET, url, None)?;
        self.logged_in = false;
        debug!("Logged out");
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// URL below a lab, e.g. `/api/labs/dc1/fabric.unl/nodes`.
    fn lab_endpoint(&self, lab: &LabHandle, rest: &[&str]) -> Url {
        let segments: Vec<&str> = std::iter::once("labs")
            .chain(lab.segments())
            .chain(rest.iter().copied())
            .collect();
        self.endpoint(&segments)
    }

    fn send(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value, RemoteCallError> {
        let endpoint = url.path().to_string();
        debug!("{} {}", method, endpoint);

        let mut request = self.client.request(method, url).header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let transport = |source| RemoteCallError::Transport {
            endpoint: endpoint.clone(),
            source,
        };
        let response = request.send().map_err(transport)?;
        let status = response.status().as_u16();
        let text = response.text().map_err(transport)?;

        parse_envelope(&endpoint, status, &text)
    }

    /// Like `send`, but only once logged in.
    fn call(&self, method: Method, url: Url, body: Option<Value>) -> Result<Value, RemoteCallError> {
        if !self.logged_in {
            return Err(RemoteCallError::NoSession);
        }
        self.send(method, url, body)
    }

    fn interface_index(
        &self,
        lab: &LabHandle,
        node: RemoteId,
        media: Media,
        label: &str,
    ) -> Result<String, RemoteCallError> {
        let node_id = node.to_string();
        let url = self.lab_endpoint(lab, &["nodes", &node_id, "interfaces"]);
        let interfaces = self.call(Method::GET, url, None)?;

        find_interface_index(&interfaces, media, label).ok_or_else(|| {
            RemoteCallError::InterfaceNotFound {
                node_id: node,
                label: label.to_string(),
            }
        })
    }

    fn attach_interface(
        &self,
        lab: &LabHandle,
        node: RemoteId,
        index: &str,
        network: RemoteId,
    ) -> Result<(), RemoteCallError> {
        let node_id = node.to_string();
        let url = self.lab_endpoint(lab, &["nodes", &node_id, "interfaces"]);
        let mut body = Map::new();
        body.insert(index.to_string(), Value::String(network.to_string()));
        self.call(Method::PUT, url, Some(Value::Object(body)))?;
        Ok(())
    }

    fn post_network(&self, lab: &LabHandle, body: Value) -> Result<RemoteId, RemoteCallError> {
        let url = self.lab_endpoint(lab, &["networks"]);
        let endpoint = url.path().to_string();
        let data = self.call(Method::POST, url, Some(body))?;
        extract_id(&endpoint, &data)
    }
}

impl RemoteLabApi for EveClient {
    fn create_lab(&mut self, topology: &Topology) -> Result<LabHandle, RemoteCallError> {
        let folder = format!("/{}", topology.path.trim_matches('/'));
        let stem = topology.name.strip_suffix(".unl").unwrap_or(&topology.name);

        let mut body = Map::new();
        body.insert("path".to_string(), Value::String(folder));
        body.insert("name".to_string(), Value::String(slugify(stem)));
        body.insert(
            "version".to_string(),
            Value::String(topology.version.clone().unwrap_or_else(|| "1".to_string())),
        );
        insert_opt(&mut body, "author", topology.author.clone());
        insert_opt(&mut body, "description", topology.description.clone());
        insert_opt(&mut body, "body", topology.body.clone());
        insert_opt(&mut body, "scripttimeout", topology.script_timeout);

        let url = self.endpoint(&["labs"]);
        self.call(Method::POST, url, Some(Value::Object(body)))?;
        Ok(LabHandle::new(topology.lab_path()))
    }

    fn add_lab_network(&mut self, lab: &LabHandle, network: &Network) -> Result<RemoteId, RemoteCallError> {
        let mut body = Map::new();
        body.insert("type".to_string(), Value::String(network.network_type.clone()));
        body.insert("name".to_string(), Value::String(network.name.clone()));
        body.insert("visibility".to_string(), Value::from(u8::from(network.visible)));
        insert_opt(&mut body, "left", network.placement.left);
        insert_opt(&mut body, "top", network.placement.top);

        self.post_network(lab, Value::Object(body))
    }

    fn add_node(&mut self, lab: &LabHandle, node: &Node) -> Result<RemoteId, RemoteCallError> {
        let mut body = Map::new();
        body.insert("type".to_string(), Value::String(node.node_type.as_str().to_string()));
        body.insert("template".to_string(), Value::String(node.template.clone()));
        body.insert("image".to_string(), Value::String(node.image.clone()));
        body.insert("name".to_string(), Value::String(node.name.clone()));
        body.insert("config".to_string(), Value::String("Unconfigured".to_string()));
        insert_opt(&mut body, "left", node.placement.left);
        insert_opt(&mut body, "top", node.placement.top);
        insert_opt(&mut body, "console", node.console.map(|c| c.as_str()));
        insert_opt(&mut body, "cpu", node.cpu);
        insert_opt(&mut body, "ram", node.ram);
        insert_opt(&mut body, "ethernet", node.ethernet);
        insert_opt(&mut body, "serial", node.serial);
        insert_opt(&mut body, "delay", node.delay);
        insert_opt(&mut body, "icon", node.icon.clone());

        let url = self.lab_endpoint(lab, &["nodes"]);
        let endpoint = url.path().to_string();
        let data = self.call(Method::POST, url, Some(Value::Object(body)))?;
        extract_id(&endpoint, &data)
    }

    fn connect_node_to_cloud(
        &mut self,
        lab: &LabHandle,
        node: RemoteId,
        label: &str,
        network: RemoteId,
    ) -> Result<(), RemoteCallError> {
        let index = self.interface_index(lab, node, Media::Ethernet, label)?;
        self.attach_interface(lab, node, &index, network)
    }

    /// The server has no direct node-to-node call: a hidden bridge network is
    /// created and both interfaces are attached to it. If an attach fails the
    /// bridge is deleted again.
    fn connect_node_to_node(
        &mut self,
        lab: &LabHandle,
        src: RemoteId,
        src_label: &str,
        dst: RemoteId,
        dst_label: &str,
        media: Media,
    ) -> Result<(), RemoteCallError> {
        let src_index = self.interface_index(lab, src, media, src_label)?;
        let dst_index = self.interface_index(lab, dst, media, dst_label)?;

        let bridge = self.post_network(
            lab,
            json!({
                "type": "bridge",
                "name": format!("link-{}-{}", src, dst),
                "visibility": 1,
            }),
        )?;
        let bridge_id = bridge.to_string();
        let attached = self
            .attach_interface(lab, src, &src_index, bridge)
            .and_then(|()| self.attach_interface(lab, dst, &dst_index, bridge));
        if let Err(e) = attached {
            let url = self.lab_endpoint(lab, &["networks", &bridge_id]);
            if let Err(cleanup) = self.call(Method::DELETE, url, None) {
                warn!("Bridge network {} left behind in {}: {}", bridge, lab, cleanup);
            }
            return Err(e);
        }

        let url = self.lab_endpoint(lab, &["networks", &bridge_id]);
        self.call(Method::PUT, url, Some(json!({ "visibility": 0 })))?;
        Ok(())
    }

    fn upload_node_config(&mut self, lab: &LabHandle, node: RemoteId, config: &str) -> Result<(), RemoteCallError> {
        let node_id = node.to_string();
        let url = self.lab_endpoint(lab, &["configs", &node_id]);
        self.call(Method::PUT, url, Some(json!({ "id": node, "data": config })))?;
        Ok(())
    }
}
