use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use evetopo::catalog::Catalog;
use evetopo::remote::{ClientSettings, DryRunLab, EveClient, Protocol};
use evetopo::render::{TemplateRenderer, DEFAULT_TEMPLATE_DIR};
use evetopo::topology::Topology;
use evetopo::{config_loader, orchestrator, BuildPlan, ValidationErrors};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Exit code for a document that fails validation.
const EXIT_INVALID: u8 = 2;

/// Build EVE-NG labs from declarative topology documents
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML catalog of node templates and network types replacing the built-in one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a topology document and report every problem found
    Validate {
        /// Path to the topology document
        topology: PathBuf,
    },

    /// Print the ordered list of operations a build would issue
    Plan {
        /// Path to the topology document
        topology: PathBuf,
    },

    /// Print the startup configuration of one node
    Render {
        /// Path to the topology document
        topology: PathBuf,

        /// Name of the node
        node: String,

        #[command(flatten)]
        templates: TemplateArgs,
    },

    /// Create the lab on the server
    Build {
        /// Path to the topology document
        topology: PathBuf,

        /// Record the calls instead of contacting a server
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        templates: TemplateArgs,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct TemplateArgs {
    /// Directory configuration templates are looked up in
    #[arg(long, default_value = DEFAULT_TEMPLATE_DIR)]
    template_dir: PathBuf,

    /// Render undefined template variables as empty instead of failing
    #[arg(long)]
    lenient: bool,
}

impl TemplateArgs {
    fn renderer(&self) -> TemplateRenderer {
        TemplateRenderer::new(&self.template_dir).with_strict_undefined(!self.lenient)
    }
}

#[derive(ClapArgs, Debug)]
struct ConnectionArgs {
    /// EVE-NG server address
    #[arg(long, env = "EVE_NG_HOST")]
    host: Option<String>,

    /// Server port (80 for http, 443 for https when not set)
    #[arg(long, env = "EVE_NG_PORT")]
    port: Option<u16>,

    #[arg(long, env = "EVE_NG_PROTOCOL", value_enum, default_value_t = Protocol::Http)]
    protocol: Protocol,

    /// Defaults to the current user
    #[arg(long, env = "EVE_NG_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "EVE_NG_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Verify the server's TLS certificate
    #[arg(long, env = "EVE_NG_SSL_VERIFY")]
    ssl_verify: bool,

    /// Request timeout in seconds
    #[arg(long, env = "EVE_NG_TIMEOUT", default_value_t = 30)]
    timeout: u64,
}

impl ConnectionArgs {
    fn settings(&self) -> Result<ClientSettings> {
        let host = self
            .host
            .clone()
            .ok_or_else(|| eyre!("No EVE-NG server given; use --host or EVE_NG_HOST"))?;
        let username = match &self.username {
            Some(username) => username.clone(),
            None => std::env::var("USER").wrap_err("No username given; use --username or EVE_NG_USERNAME")?,
        };
        let password = self
            .password
            .clone()
            .ok_or_else(|| eyre!("No password given; use --password or EVE_NG_PASSWORD"))?;

        Ok(ClientSettings {
            host,
            port: self.port,
            protocol: self.protocol,
            username,
            password,
            ssl_verify: self.ssl_verify,
            timeout: Duration::from_secs(self.timeout),
        })
    }
}

/// Load a topology, printing validation problems instead of failing on them.
fn load(path: &Path, catalog: &Catalog) -> Result<Option<Topology>> {
    match config_loader::load_topology(path, catalog) {
        Ok(topology) => Ok(Some(topology)),
        Err(err) => match err.downcast_ref::<ValidationErrors>() {
            Some(errors) => {
                eprintln!("{}: {}", path.display(), errors);
                Ok(None)
            }
            None => Err(err),
        },
    }
}

fn main() -> Result<ExitCode> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let catalog = config_loader::load_catalog(args.catalog.as_deref())?;

    match args.command {
        Command::Validate { topology: path } => {
            let Some(topology) = load(&path, &catalog)? else {
                return Ok(ExitCode::FAILURE);
            };
            println!(
                "{}: valid ({} nodes, {} networks, {} links)",
                path.display(),
                topology.nodes.len(),
                topology.networks.len(),
                topology.links.network.len() + topology.links.node.len()
            );
            Ok(ExitCode::SUCCESS)
        }

        Command::Plan { topology: path } => {
            let Some(topology) = load(&path, &catalog)? else {
                return Ok(ExitCode::from(EXIT_INVALID));
            };
            print!("{}", BuildPlan::new(&topology));
            Ok(ExitCode::SUCCESS)
        }

        Command::Render {
            topology: path,
            node,
            templates,
        } => {
            let Some(topology) = load(&path, &catalog)? else {
                return Ok(ExitCode::from(EXIT_INVALID));
            };
            let node = topology
                .node(&node)
                .ok_or_else(|| eyre!("No node named '{}' in {}", node, path.display()))?;
            let configuration = node
                .configuration
                .as_ref()
                .ok_or_else(|| eyre!("Node '{}' has no configuration", node.name))?;

            let text = orchestrator::resolve_configuration(configuration, &templates.renderer())?;
            print!("{}", text);
            Ok(ExitCode::SUCCESS)
        }

        Command::Build {
            topology: path,
            dry_run,
            templates,
            connection,
        } => {
            let Some(topology) = load(&path, &catalog)? else {
                return Ok(ExitCode::from(EXIT_INVALID));
            };
            let renderer = templates.renderer();

            let result = if dry_run {
                info!("Dry run: no server will be contacted");
                let mut api = DryRunLab::new();
                orchestrator::build(&topology, &mut api, &renderer)
            } else {
                let mut client = EveClient::new(connection.settings()?)?;
                client.login().wrap_err("Failed to log in to the EVE-NG server")?;

                let result = orchestrator::build(&topology, &mut client, &renderer);
                if let Err(e) = client.logout() {
                    warn!("Logout failed: {}", e);
                }
                result
            };

            print!("{}", result);
            Ok(if result.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let args = Args::parse_from([
            "evetopo",
            "build",
            "lab.yml",
            "--host",
            "10.0.0.5",
            "--protocol",
            "https",
            "--username",
            "admin",
            "--password",
            "eve",
            "--template-dir",
            "configs/templates",
        ]);

        let Command::Build {
            topology,
            dry_run,
            templates,
            connection,
        } = args.command
        else {
            panic!("expected build subcommand");
        };
        assert_eq!(topology, PathBuf::from("lab.yml"));
        assert!(!dry_run);
        assert_eq!(templates.template_dir, PathBuf::from("configs/templates"));
        assert!(!templates.lenient);
        assert_eq!(connection.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(connection.protocol, Protocol::Https);
        assert_eq!(connection.timeout, 30);

        let settings = connection.settings().unwrap();
        assert_eq!(settings.username, "admin");
        assert_eq!(settings.port(), 443);
        assert_eq!(settings.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_template_defaults() {
        let args = Args::parse_from(["evetopo", "render", "lab.yml", "leaf01", "--lenient", "-v"]);

        assert!(args.verbose);
        let Command::Render { node, templates, .. } = args.command else {
            panic!("expected render subcommand");
        };
        assert_eq!(node, "leaf01");
        assert_eq!(templates.template_dir, PathBuf::from(DEFAULT_TEMPLATE_DIR));
        assert!(!templates.renderer().is_strict());
    }

    #[test]
    fn test_global_catalog_flag() {
        let args = Args::parse_from(["evetopo", "validate", "lab.yml", "--catalog", "catalog.yml"]);
        assert_eq!(args.catalog, Some(PathBuf::from("catalog.yml")));
        assert!(matches!(args.command, Command::Validate { .. }));
    }

    #[test]
    fn test_build_requires_topology() {
        assert!(Args::try_parse_from(["evetopo", "build"]).is_err());
    }
}
