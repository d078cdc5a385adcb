//! # evetopo - Declarative lab builder for EVE-NG
//!
//! This library turns a YAML description of a network lab (nodes, networks,
//! links and startup configurations) into a running lab on an EVE-NG server.
//!
//! ## Overview
//!
//! A topology document is validated in full before anything touches the
//! server, so every mistake in a document is reported at once. A valid
//! document becomes a build plan, which the orchestrator executes one remote
//! call at a time, in phases: lab, networks, nodes, network links, node links,
//! configurations. A failure is recorded against the entity it belongs to and
//! the build carries on with everything that does not depend on it.
//!
//! ## Architecture
//!
//! - `topology`: the validated topology document model
//! - `catalog`: node templates and network types the validator accepts
//! - `utils::validation`: document validator producing a typed error list
//! - `config_loader`: reading documents from disk
//! - `render`: Jinja2 templating for node configurations
//! - `plan`: the ordered list of remote operations for a topology
//! - `remote`: the lab server API, with an HTTP client and a dry-run recorder
//! - `orchestrator`: executes a plan and reports per-entity outcomes
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use evetopo::catalog::Catalog;
//! use evetopo::remote::DryRunLab;
//! use evetopo::render::TemplateRenderer;
//! use evetopo::{config_loader, orchestrator};
//! use std::path::Path;
//!
//! let topology = config_loader::load_topology(Path::new("lab.yml"), &Catalog::default())?;
//!
//! let mut api = DryRunLab::new();
//! let result = orchestrator::build(&topology, &mut api, &TemplateRenderer::new("templates"));
//! println!("{}", result);
//! # Ok::<(), color_eyre::Report>(())
//! ```
//!
//! ## Document Format
//!
//! ```yaml
//! name: leaf-spine
//! path: /dc1
//! nodes:
//!   - name: leaf01
//!     template: veos
//!     image: veos-4.22.0F
//!     configuration:
//!       file: configs/leaf01.cfg
//!   - name: leaf02
//!     template: veos
//!     image: veos-4.22.0F
//!     configuration:
//!       template: leaf.j2
//!       vars:
//!         hostname: leaf02
//! networks:
//!   - name: mgmt
//!     network_type: pnet0
//! links:
//!   network:
//!     - {src: leaf01, src_label: Mgmt1, dst: mgmt}
//!   node:
//!     - {src: leaf01, src_label: Eth1, dst: leaf02, dst_label: Eth1}
//! ```

pub mod catalog;
pub mod config_loader;
pub mod orchestrator;
pub mod plan;
pub mod remote;
pub mod render;
pub mod topology;
pub mod utils;

pub use orchestrator::{build, BuildError, BuildResult, EntityState};
pub use plan::BuildPlan;
pub use topology::Topology;
pub use utils::{validate, ValidationError, ValidationErrors};
