//! Supported node templates and network types.
//!
//! The validator rejects any `template` or `network_type` value that is not
//! listed here. The built-in lists match a stock EVE-NG installation; a YAML
//! file with the same shape can replace them for hosts with extra images or
//! additional cloud interfaces:
//!
//! ```yaml
//! templates: [veos, vios, linux]
//! network_types: [bridge, ovs, pnet0, pnet1]
//! ```

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Node templates shipped with EVE-NG.
const DEFAULT_TEMPLATES: &[&str] = &[
    "a10", "acs", "aruba", "asa", "asav", "barracuda", "bigip", "brocadevadx",
    "c1710", "c3725", "c7200", "cda", "cips", "clearpass", "cpsg", "csr1000v",
    "csr1000vng", "cue", "cumulus", "docker", "esxi", "extremexos", "fortinet",
    "hpvsr", "huaweiusg6kv", "iol", "ise", "junipervrr", "linux", "mikrotik",
    "nsvpx", "nxosv9k", "olive", "ostinato", "paloalto", "pfsense", "radware",
    "riverbed", "sonicwall", "sophosutm", "sterra", "timos", "titanium",
    "veloedge", "velogw", "veos", "vios", "viosl2", "vmx", "vmxvcp", "vmxvfp",
    "vnam", "vpcs", "vqfx", "vqfxpfe", "vqfxre", "vsrx", "vsrxng", "vwaas",
    "vwlc", "win", "winserver", "xrv", "xrv9k",
];

/// Plain network types; the `pnetN` cloud interfaces are added separately.
const DEFAULT_NETWORK_TYPES: &[&str] = &["bridge", "ovs"];

/// Number of `pnetN` cloud interfaces on a stock host.
const VIRTUAL_CLOUD_COUNT: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Catalog {} lists no {what}", path.display())]
    Empty { path: PathBuf, what: &'static str },
}

/// The closed sets of values accepted for node templates and network types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    templates: BTreeSet<String>,
    network_types: BTreeSet<String>,
}

impl Default for Catalog {
    fn default() -> Self {
        let templates = DEFAULT_TEMPLATES.iter().map(|t| t.to_string()).collect();
        let network_types = DEFAULT_NETWORK_TYPES
            .iter()
            .map(|t| t.to_string())
            .chain((0..VIRTUAL_CLOUD_COUNT).map(|n| format!("pnet{}", n)))
            .collect();
        Self {
            templates,
            network_types,
        }
    }
}

impl Catalog {
    pub fn new<T, N>(templates: T, network_types: N) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self {
            templates: templates.into_iter().map(Into::into).collect(),
            network_types: network_types.into_iter().map(Into::into).collect(),
        }
    }

    /// Load a catalog from a YAML file, replacing the built-in lists.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog: Catalog =
            serde_yaml::from_str(&content).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if catalog.templates.is_empty() {
            return Err(CatalogError::Empty {
                path: path.to_path_buf(),
                what: "templates",
            });
        }
        if catalog.network_types.is_empty() {
            return Err(CatalogError::Empty {
                path: path.to_path_buf(),
                what: "network_types",
            });
        }

        info!(
            "Loaded catalog from {:?}: {} templates, {} network types",
            path,
            catalog.templates.len(),
            catalog.network_types.len()
        );
        Ok(catalog)
    }

    pub fn is_template(&self, name: &str) -> bool {
        self.templates.contains(name)
    }

    pub fn is_network_type(&self, name: &str) -> bool {
        self.network_types.contains(name)
    }

    pub fn templates(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(String::as_str)
    }

    pub fn network_types(&self) -> impl Iterator<Item = &str> {
        self.network_types.iter().map(String::as_str)
    }
}
