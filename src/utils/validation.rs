//! Topology document validation.
//!
//! [`validate`] walks a parsed YAML document and either produces a
//! [`Topology`] or reports every problem it found. Each field is checked once
//! and a bad field does not stop the walk, so a single run lists all the
//! violations in the document.
//!
//! Checks performed:
//! - Required fields are present and have the right type
//! - Enumerated values (templates, node types, consoles, network types,
//!   media) are known
//! - Node and network names are unique within their collection
//! - A node configuration uses exactly one of `file` or `template`, and a
//!   template comes with variables
//! - Every link endpoint names a declared node or network of the right kind
//! - No node interface is wired by more than one link

use crate::catalog::Catalog;
use crate::topology::{
    Configuration, ConsoleType, Links, Media, Network, NetworkLink, Node, NodeLink, NodeType,
    Placement, Topology, VarSource, DEFAULT_LAB_FOLDER,
};
use log::warn;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Longest lab name the server accepts.
const MAX_NAME_LEN: usize = 255;

/// Top-level keys understood by the validator.
const TOPOLOGY_KEYS: &[&str] = &[
    "name", "path", "author", "description", "version", "tasks", "scripttimeout", "body",
    "nodes", "networks", "links",
];

/// A single violation: where it is, what was expected, what was found.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path}: expected {expected}, found {actual}")]
pub struct ValidationError {
    pub path: String,
    pub expected: String,
    pub actual: String,
}

/// Every violation found in one document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationError> {
        self.0.iter()
    }

    /// Returns the violations reported at `path` or below it.
    pub fn at<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a ValidationError> + 'a {
        self.0.iter().filter(move |e| {
            e.path == path
                || e.path.starts_with(&format!("{}.", path))
                || e.path.starts_with(&format!("{}[", path))
        })
    }

    pub fn into_inner(self) -> Vec<ValidationError> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "topology document has {} problem(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = std::slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Validate a parsed topology document against `catalog`.
///
/// Pure function of its inputs: validating the same document twice yields the
/// same result.
pub fn validate(document: &Value, catalog: &Catalog) -> Result<Topology, ValidationErrors> {
    let mut validator = Validator::new(catalog);
    let topology = validator.topology(document);

    match topology {
        Some(topology) if validator.errors.is_empty() => Ok(topology),
        _ => Err(ValidationErrors(validator.errors)),
    }
}

/// Short description of a document value for error messages.
fn describe(value: Option<&Value>) -> String {
    match value {
        None => "nothing (field is missing)".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => format!("{:?}", s),
        Some(Value::Sequence(items)) => format!("a list of {} item(s)", items.len()),
        Some(Value::Mapping(_)) => "a mapping".to_string(),
        Some(Value::Tagged(tagged)) => format!("a value tagged {}", tagged.tag),
    }
}

fn one_of(allowed: &[&str]) -> String {
    format!("one of: {}", allowed.join(", "))
}

struct Validator<'a> {
    catalog: &'a Catalog,
    errors: Vec<ValidationError>,
    /// Declared node name -> path of the declaration
    node_names: HashMap<String, String>,
    /// Declared network name -> path of the declaration
    network_names: HashMap<String, String>,
    /// (node, interface label) -> path of the link already using it
    wired_interfaces: HashMap<(String, String), String>,
}

impl<'a> Validator<'a> {
    fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            errors: Vec::new(),
            node_names: HashMap::new(),
            network_names: HashMap::new(),
            wired_interfaces: HashMap::new(),
        }
    }

    fn push(&mut self, path: &str, expected: impl Into<String>, actual: Option<&Value>) {
        self.push_actual(path, expected, describe(actual));
    }

    fn push_actual(&mut self, path: &str, expected: impl Into<String>, actual: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        });
    }

    fn mapping<'v>(&mut self, value: &'v Value, path: &str) -> Option<&'v Mapping> {
        match value {
            Value::Mapping(map) => Some(map),
            other => {
                self.push(path, "a mapping", Some(other));
                None
            }
        }
    }

    fn list<'v>(&mut self, map: &'v Mapping, key: &str, path: &str) -> &'v [Value] {
        match map.get(key) {
            None | Some(Value::Null) => &[],
            Some(Value::Sequence(items)) => items.as_slice(),
            other => {
                self.push(path, "a list", other);
                &[]
            }
        }
    }

    fn required_string(&mut self, map: &Mapping, key: &str, path: &str) -> Option<String> {
        match map.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            other => {
                self.push(path, "a non-empty string", other);
                None
            }
        }
    }

    fn optional_string(&mut self, map: &Mapping, key: &str, path: &str) -> Option<String> {
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            other => {
                self.push(path, "a string", other);
                None
            }
        }
    }

    /// Strings and numbers are both accepted and kept as text.
    fn optional_text(&mut self, map: &Mapping, key: &str, path: &str) -> Option<String> {
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            other => {
                self.push(path, "a string or number", other);
                None
            }
        }
    }

    fn optional_u32(&mut self, map: &Mapping, key: &str, path: &str) -> Option<u32> {
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(value @ Value::Number(n)) => match n.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(n) => Some(n),
                None => {
                    self.push(path, "a non-negative integer", Some(value));
                    None
                }
            },
            other => {
                self.push(path, "a non-negative integer", other);
                None
            }
        }
    }

    fn optional_enum<T>(
        &mut self,
        map: &Mapping,
        key: &str,
        path: &str,
        parse: fn(&str) -> Option<T>,
        allowed: &[&str],
    ) -> Option<T> {
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(value @ Value::String(s)) => {
                let parsed = parse(s);
                if parsed.is_none() {
                    self.push(path, one_of(allowed), Some(value));
                }
                parsed
            }
            other => {
                self.push(path, one_of(allowed), other);
                None
            }
        }
    }

    fn placement(&mut self, map: &Mapping, path: &str) -> Placement {
        Placement {
            left: self.optional_u32(map, "left", &format!("{}.left", path)),
            top: self.optional_u32(map, "top", &format!("{}.top", path)),
        }
    }

    fn topology(&mut self, document: &Value) -> Option<Topology> {
        let map = match document {
            Value::Mapping(map) => map,
            other => {
                self.push("<document>", "a mapping at the top level", Some(other));
                return None;
            }
        };

        for key in map.keys() {
            match key.as_str() {
                Some(k) if TOPOLOGY_KEYS.contains(&k) => {}
                _ => warn!("Ignoring unknown top-level key {}", describe(Some(key))),
            }
        }

        let name = self.required_string(map, "name", "name").unwrap_or_default();
        let name_len = name.chars().count();
        if name_len > MAX_NAME_LEN {
            self.push_actual(
                "name",
                format!("at most {} characters", MAX_NAME_LEN),
                format!("{} characters", name_len),
            );
        }
        // the name becomes the lab file name inside `path`
        if name.contains('/') {
            self.push_actual("name", "a name without '/'", format!("{:?}", name));
        }

        let path = self
            .optional_string(map, "path", "path")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LAB_FOLDER.to_string());
        let description = self.optional_string(map, "description", "description");
        let author = self.optional_string(map, "author", "author");
        let version = self.optional_text(map, "version", "version");
        let script_timeout = self.optional_u32(map, "scripttimeout", "scripttimeout");
        let body = self.optional_string(map, "body", "body");
        let tasks = self.optional_string(map, "tasks", "tasks");

        // Nodes and networks come first so links can be checked against them
        let mut nodes = Vec::new();
        for (i, value) in self.list(map, "nodes", "nodes").iter().enumerate() {
            if let Some(node) = self.node(value, &format!("nodes[{}]", i)) {
                nodes.push(node);
            }
        }

        let mut networks = Vec::new();
        for (i, value) in self.list(map, "networks", "networks").iter().enumerate() {
            if let Some(network) = self.network(value, &format!("networks[{}]", i)) {
                networks.push(network);
            }
        }

        let links = match map.get("links") {
            None | Some(Value::Null) => Links::default(),
            Some(value) => self.links(value, "links"),
        };

        Some(Topology {
            name,
            path,
            description,
            author,
            version,
            script_timeout,
            body,
            tasks,
            nodes,
            networks,
            links,
        })
    }

    /// Record a declared name, reporting duplicates within the same collection.
    fn declare(&mut self, is_node: bool, name: &str, path: &str) {
        let (names, what) = if is_node {
            (&mut self.node_names, "node")
        } else {
            (&mut self.network_names, "network")
        };

        match names.get(name).cloned() {
            Some(first) => {
                let actual = format!("{:?} (already declared at {})", name, first);
                self.push_actual(
                    &format!("{}.name", path),
                    format!("a {} name unique within the topology", what),
                    actual,
                );
            }
            None => {
                names.insert(name.to_string(), path.to_string());
            }
        }
    }

    fn node(&mut self, value: &Value, path: &str) -> Option<Node> {
        let map = self.mapping(value, path)?;
        let before = self.errors.len();

        let name = self.required_string(map, "name", &format!("{}.name", path));
        if let Some(name) = &name {
            self.declare(true, name, path);
        }

        let template_path = format!("{}.template", path);
        let template = self.required_string(map, "template", &template_path);
        if let Some(template) = &template {
            if !self.catalog.is_template(template) {
                self.push(&template_path, "a supported node template", map.get("template"));
            }
        }

        let image = self.required_string(map, "image", &format!("{}.image", path));
        let node_type = self.optional_enum(
            map,
            "node_type",
            &format!("{}.node_type", path),
            NodeType::parse,
            NodeType::ALL,
        );
        let console = self.optional_enum(
            map,
            "console",
            &format!("{}.console", path),
            ConsoleType::parse,
            ConsoleType::ALL,
        );
        let placement = self.placement(map, path);
        let cpu = self.optional_u32(map, "cpu", &format!("{}.cpu", path));
        let ram = self.optional_u32(map, "ram", &format!("{}.ram", path));
        let ethernet = self.optional_u32(map, "ethernet", &format!("{}.ethernet", path));
        let serial = self.optional_u32(map, "serial", &format!("{}.serial", path));
        let delay = self.optional_u32(map, "delay", &format!("{}.delay", path));
        let icon = self.optional_string(map, "icon", &format!("{}.icon", path));

        let configuration = match map.get("configuration") {
            None => None,
            Some(value) => self.configuration(value, &format!("{}.configuration", path)),
        };

        if self.errors.len() > before {
            return None;
        }

        Some(Node {
            name: name?,
            template: template?,
            image: image?,
            node_type: node_type.unwrap_or_default(),
            placement,
            console,
            cpu,
            ram,
            ethernet,
            serial,
            delay,
            icon,
            configuration,
        })
    }

    fn configuration(&mut self, value: &Value, path: &str) -> Option<Configuration> {
        const EXPECTED: &str = "exactly one of `file` or `template`";

        let map = match value {
            Value::Mapping(map) => map,
            other => {
                self.push(path, format!("a mapping with {}", EXPECTED), Some(other));
                return None;
            }
        };

        let has_file = map.contains_key("file");
        let has_template = map.contains_key("template");

        match (has_file, has_template) {
            (true, true) => {
                self.push_actual(path, EXPECTED, "both `file` and `template`");
                None
            }
            (false, false) => {
                self.push_actual(path, EXPECTED, "neither `file` nor `template`");
                None
            }
            (true, false) => {
                let file = self.required_string(map, "file", &format!("{}.file", path))?;
                Some(Configuration::File(PathBuf::from(file)))
            }
            (false, true) => {
                let template = self.required_string(map, "template", &format!("{}.template", path));
                let vars = self.var_source(map, path);
                Some(Configuration::Template {
                    template: template?,
                    vars: vars?,
                })
            }
        }
    }

    /// `vars` holds an inline mapping or a path; `vars_file` always holds a path.
    fn var_source(&mut self, map: &Mapping, path: &str) -> Option<VarSource> {
        const EXPECTED: &str = "a non-empty mapping of variables or a path to a variables file";
        let vars_path = format!("{}.vars", path);

        match (map.get("vars"), map.get("vars_file")) {
            (Some(_), Some(_)) => {
                self.push_actual(path, "only one of `vars` or `vars_file`", "both");
                None
            }
            (None, Some(_)) => {
                let file = self.required_string(map, "vars_file", &format!("{}.vars_file", path))?;
                Some(VarSource::File(PathBuf::from(file)))
            }
            (Some(Value::String(file)), None) if !file.trim().is_empty() => {
                Some(VarSource::File(PathBuf::from(file)))
            }
            (Some(Value::Mapping(vars)), None) if !vars.is_empty() => {
                let mut inline = BTreeMap::new();
                for (key, value) in vars {
                    match key.as_str() {
                        Some(k) => {
                            inline.insert(k.to_string(), value.clone());
                        }
                        None => self.push(&vars_path, "variable names to be strings", Some(key)),
                    }
                }
                Some(VarSource::Inline(inline))
            }
            (other, None) => {
                self.push(&vars_path, EXPECTED, other);
                None
            }
        }
    }

    fn network(&mut self, value: &Value, path: &str) -> Option<Network> {
        let map = self.mapping(value, path)?;
        let before = self.errors.len();

        let name = self.required_string(map, "name", &format!("{}.name", path));
        if let Some(name) = &name {
            self.declare(false, name, path);
        }

        let catalog = self.catalog;
        let type_path = format!("{}.network_type", path);
        let network_type = match map.get("network_type") {
            None | Some(Value::Null) => "bridge".to_string(),
            Some(Value::String(t)) if catalog.is_network_type(t) => t.clone(),
            other => {
                let allowed: Vec<&str> = catalog.network_types().collect();
                let expected = one_of(&allowed);
                self.push(&type_path, expected, other);
                String::new()
            }
        };

        let visible = match map.get("visibility") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(value @ Value::Number(n)) => match n.as_u64() {
                Some(0) => false,
                Some(1) => true,
                _ => {
                    self.push(&format!("{}.visibility", path), "0 or 1", Some(value));
                    true
                }
            },
            other => {
                self.push(&format!("{}.visibility", path), "0 or 1", other);
                true
            }
        };

        let placement = self.placement(map, path);

        if self.errors.len() > before {
            return None;
        }

        Some(Network {
            name: name?,
            network_type,
            visible,
            placement,
        })
    }

    fn links(&mut self, value: &Value, path: &str) -> Links {
        let Some(map) = self.mapping(value, path) else {
            return Links::default();
        };

        let mut links = Links::default();

        let network_path = format!("{}.network", path);
        for (i, value) in self.list(map, "network", &network_path).iter().enumerate() {
            if let Some(link) = self.network_link(value, &format!("{}[{}]", network_path, i)) {
                links.network.push(link);
            }
        }

        let node_path = format!("{}.node", path);
        for (i, value) in self.list(map, "node", &node_path).iter().enumerate() {
            if let Some(link) = self.node_link(value, &format!("{}[{}]", node_path, i)) {
                links.node.push(link);
            }
        }

        links
    }

    /// Check that `name` refers to a declared node (or network when `want_node` is false).
    fn endpoint(&mut self, map: &Mapping, key: &str, path: &str, want_node: bool) -> Option<String> {
        let field_path = format!("{}.{}", path, key);
        let name = self.required_string(map, key, &field_path)?;

        let (wanted, other, what, other_what) = if want_node {
            (&self.node_names, &self.network_names, "node", "network")
        } else {
            (&self.network_names, &self.node_names, "network", "node")
        };

        if wanted.contains_key(&name) {
            return Some(name);
        }

        let actual = if other.contains_key(&name) {
            format!("{:?} (a {}, not a {})", name, other_what, what)
        } else {
            format!("{:?} (no {} with that name is declared)", name, what)
        };
        self.push_actual(&field_path, format!("the name of a declared {}", what), actual);
        None
    }

    /// Record that `node:label` is wired, reporting a second use of the same interface.
    fn wire(&mut self, node: &str, label: &str, path: &str) -> bool {
        let key = (node.to_string(), label.to_string());
        if let Some(first) = self.wired_interfaces.get(&key) {
            let actual = format!("{}:{} (already wired by {})", node, label, first);
            self.push_actual(path, "an interface not used by another link", actual);
            false
        } else {
            self.wired_interfaces.insert(key, path.to_string());
            true
        }
    }

    fn network_link(&mut self, value: &Value, path: &str) -> Option<NetworkLink> {
        let map = self.mapping(value, path)?;
        let before = self.errors.len();

        let src = self.endpoint(map, "src", path, true);
        let src_label = self.required_string(map, "src_label", &format!("{}.src_label", path));
        let dst = self.endpoint(map, "dst", path, false);

        if let (Some(src), Some(label)) = (&src, &src_label) {
            self.wire(src, label, path);
        }

        if self.errors.len() > before {
            return None;
        }

        Some(NetworkLink {
            src: src?,
            src_label: src_label?,
            dst: dst?,
        })
    }

    fn node_link(&mut self, value: &Value, path: &str) -> Option<NodeLink> {
        let map = self.mapping(value, path)?;
        let before = self.errors.len();

        let src = self.endpoint(map, "src", path, true);
        let src_label = self.required_string(map, "src_label", &format!("{}.src_label", path));
        let dst = self.endpoint(map, "dst", path, true);
        let dst_label = self.required_string(map, "dst_label", &format!("{}.dst_label", path));
        let media = self.optional_enum(
            map,
            "media",
            &format!("{}.media", path),
            Media::parse,
            Media::ALL,
        );

        if let (Some(src), Some(src_label), Some(dst), Some(dst_label)) =
            (&src, &src_label, &dst, &dst_label)
        {
            if src == dst && src_label == dst_label {
                self.push_actual(
                    path,
                    "two different interfaces",
                    format!("{}:{} on both ends", src, src_label),
                );
            } else {
                self.wire(src, src_label, path);
                self.wire(dst, dst_label, path);
            }
        }

        if self.errors.len() > before {
            return None;
        }

        Some(NodeLink {
            src: src?,
            src_label: src_label?,
            dst: dst?,
            dst_label: dst_label?,
            media: media.unwrap_or_default(),
        })
    }
}
