//! Node configuration templates.
//!
//! Templates use Jinja2 syntax (variables, conditionals, loops, includes) and
//! are looked up by name in a search directory that is fixed when the
//! renderer is built. Undefined variables are an error unless the renderer is
//! switched to lenient mode, so a typo in a variable name fails the node
//! instead of producing a half-empty configuration.

use crate::topology::VarSource;
use log::debug;
use minijinja::{Environment, UndefinedBehavior};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default template search directory, relative to the working directory.
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// Extensions tried, in order, when a template id is given without one.
const TEMPLATE_EXTENSIONS: &[&str] = &["j2", "jinja2", "jinja"];

/// Variables handed to a template.
pub type Vars = BTreeMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Template '{id}' not found in {}", search_dir.display())]
    TemplateNotFound { id: String, search_dir: PathBuf },

    #[error("Failed to read variables file {}: {source}", path.display())]
    VarsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse variables file {}: {source}", path.display())]
    VarsParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Variables file {} must hold a non-empty mapping of variables", path.display())]
    VarsNotMapping { path: PathBuf },

    #[error("Failed to render template '{id}': {source}")]
    Template {
        id: String,
        #[source]
        source: minijinja::Error,
    },
}

/// Renders node configurations from templates in one search directory.
pub struct TemplateRenderer {
    search_dir: PathBuf,
    strict: bool,
    env: Environment<'static>,
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer")
            .field("search_dir", &self.search_dir)
            .field("strict", &self.strict)
            .finish()
    }
}

impl TemplateRenderer {
    /// Build a renderer that resolves templates in `search_dir`, with strict
    /// undefined-variable handling.
    pub fn new(search_dir: impl Into<PathBuf>) -> Self {
        let search_dir = search_dir.into();

        let mut env = Environment::new();
        env.set_loader(minijinja::path_loader(search_dir.clone()));
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        Self {
            search_dir,
            strict: true,
            env,
        }
    }

    /// Switch undefined-variable handling between strict (error) and lenient
    /// (renders as empty).
    pub fn with_strict_undefined(mut self, strict: bool) -> Self {
        self.strict = strict;
        self.env.set_undefined_behavior(if strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        });
        self
    }

    pub fn search_dir(&self) -> &Path {
        &self.search_dir
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Render `template_id` with variables taken from `vars`.
    pub fn render(&self, template_id: &str, vars: &VarSource) -> Result<String, RenderError> {
        match vars {
            VarSource::Inline(vars) => self.render_with(template_id, vars),
            VarSource::File(path) => {
                let vars = load_vars(path)?;
                self.render_with(template_id, &vars)
            }
        }
    }

    /// Render `template_id` with an already loaded variable mapping.
    pub fn render_with(&self, template_id: &str, vars: &Vars) -> Result<String, RenderError> {
        let name = self.resolve(template_id)?;
        debug!("Rendering template {:?} from {:?}", name, self.search_dir);

        let template_error = |source| RenderError::Template {
            id: template_id.to_string(),
            source,
        };
        let template = self.env.get_template(&name).map_err(template_error)?;
        template.render(vars).map_err(template_error)
    }

    /// Map a template id to a file name inside the search directory.
    ///
    /// The id is used as given when that file exists; otherwise the known
    /// template extensions are tried in order.
    fn resolve(&self, template_id: &str) -> Result<String, RenderError> {
        let candidates = std::iter::once(template_id.to_string()).chain(
            TEMPLATE_EXTENSIONS
                .iter()
                .map(|ext| format!("{}.{}", template_id, ext)),
        );

        for candidate in candidates {
            if self.search_dir.join(&candidate).is_file() {
                return Ok(candidate);
            }
        }

        Err(RenderError::TemplateNotFound {
            id: template_id.to_string(),
            search_dir: self.search_dir.clone(),
        })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE_DIR)
    }
}

/// Load a variables document (YAML or JSON) holding a mapping at the top level.
pub fn load_vars(path: &Path) -> Result<Vars, RenderError> {
    let content = std::fs::read_to_string(path).map_err(|source| RenderError::VarsRead {
        path: path.to_path_buf(),
        source,
    })?;

    let document: Value = serde_yaml::from_str(&content).map_err(|source| RenderError::VarsParse {
        path: path.to_path_buf(),
        source,
    })?;

    let not_mapping = || RenderError::VarsNotMapping {
        path: path.to_path_buf(),
    };
    let Value::Mapping(map) = document else {
        return Err(not_mapping());
    };
    if map.is_empty() {
        return Err(not_mapping());
    }

    map.into_iter()
        .map(|(key, value)| match key {
            Value::String(key) => Ok((key, value)),
            _ => Err(not_mapping()),
        })
        .collect()
}
