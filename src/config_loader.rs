use crate::catalog::Catalog;
use crate::topology::Topology;
use crate::utils::validation::validate;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{debug, info};
use std::path::Path;

/// Load, parse and validate a topology document.
///
/// YAML is read, so JSON documents are accepted as well. On validation failure
/// the returned report wraps [`crate::utils::ValidationErrors`] with every
/// violation found. Relative configuration and variable file paths are
/// anchored at the directory holding the document.
pub fn load_topology(path: &Path, catalog: &Catalog) -> Result<Topology> {
    info!("Loading topology from: {:?}", path);

    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read topology document {}", path.display()))?;
    let document: serde_yaml::Value = serde_yaml::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse topology document {}", path.display()))?;

    let mut topology = validate(&document, catalog)?;

    if let Some(base) = path.parent() {
        topology.resolve_relative_paths(base);
    }

    debug!(
        "Topology '{}': {} nodes, {} networks, {} network links, {} node links",
        topology.name,
        topology.nodes.len(),
        topology.networks.len(),
        topology.links.network.len(),
        topology.links.node.len()
    );
    Ok(topology)
}

/// Catalog from `path`, or the built-in one.
pub fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(path) => Ok(Catalog::load(path)?),
        None => Ok(Catalog::default()),
    }
}
