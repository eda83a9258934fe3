use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use gcp_lifecycle::config::{Config, GcpConfig};
use gcp_lifecycle::constants::GCP_CONFIG;
use gcp_lifecycle::gcp::client::GcpClient;
use gcp_lifecycle::host::local::{LocalHost, RelationshipArg};
use gcp_lifecycle::resource::dispatch::{LIFECYCLE_OPERATIONS, NODE_TYPES};

/// Run lifecycle operations on GCP resources
#[derive(Parser, Debug)]
#[command(name = "gcp-lifecycle", version, about, long_about = None)]
struct Args {
    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Invoke one lifecycle operation on a node
    Run {
        /// Node type (network, firewall_rule, security_group, url_map, dns_zone, dns_record)
        node_type: String,

        /// Operation (create, configure, update, delete, validate)
        operation: String,

        /// Node identifier; state is kept per node
        #[arg(long)]
        node_id: String,

        /// Node properties as YAML or JSON, or @path to a file
        #[arg(long)]
        properties: Option<String>,

        /// Relationship to another node, as kind=node_id
        #[arg(long = "relationship")]
        relationships: Vec<RelationshipArg>,

        /// How many times a retry request is honoured
        #[arg(long, default_value_t = 60)]
        task_retries: u32,

        /// Seconds between retries, instead of the delay the operation asks for
        #[arg(long)]
        retry_interval: Option<u64>,

        /// GCP project to use when the node does not name one
        #[arg(short, long)]
        project: Option<String>,

        /// GCP zone to use when the node does not name one
        #[arg(short, long)]
        zone: Option<String>,

        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Print the stored state of a node
    Show {
        node_id: String,

        #[arg(long)]
        state_dir: Option<PathBuf>,
    },

    /// Show or change the persisted defaults
    Defaults {
        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        zone: Option<String>,

        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel, to_stderr: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    if to_stderr {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
        tracing_subscriber::fmt()
            .with_max_level(tracing_level)
            .with_writer(non_blocking.with_max_level(tracing_level))
            .with_target(false)
            .init();
        return Some(guard);
    }

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), err);
            return None;
        },
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gcp-lifecycle started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("gcp-lifecycle").join("gcp-lifecycle.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gcp-lifecycle").join("gcp-lifecycle.log");
    }
    PathBuf::from("gcp-lifecycle.log")
}

/// Parse `--properties`: inline YAML/JSON, or `@path`
fn parse_properties(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };

    let content = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?,
        None => raw.to_string(),
    };

    match serde_yaml::from_str::<Value>(&content).context("Failed to parse properties")? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => bail!("Properties must be a mapping, got {}", other),
    }
}

/// Provider context carrying `resources.gcp_config` built from the defaults
fn provider_context(defaults: &Config) -> Map<String, Value> {
    let mut gcp_config = json!({});
    defaults.apply_defaults(&mut gcp_config);

    let mut context = Map::new();
    context.insert("resources".to_string(), json!({ GCP_CONFIG: gcp_config }));
    context
}

#[allow(clippy::too_many_arguments)]
async fn run(
    defaults: Config,
    state_dir: PathBuf,
    node_type: &str,
    operation: &str,
    node_id: &str,
    mut properties: Map<String, Value>,
    relationships: &[RelationshipArg],
    task_retries: u32,
    retry_interval: Option<Duration>,
) -> Result<()> {
    if !NODE_TYPES.contains(&node_type) {
        bail!("Unknown node type {} (expected one of {:?})", node_type, NODE_TYPES);
    }
    if !LIFECYCLE_OPERATIONS.contains(&operation) {
        bail!(
            "Unknown operation {} (expected one of {:?})",
            operation,
            LIFECYCLE_OPERATIONS
        );
    }

    if let Some(gcp_config) = properties.get_mut(GCP_CONFIG) {
        defaults.apply_defaults(gcp_config);
    }

    let host = LocalHost::new(state_dir)
        .with_task_retries(task_retries)
        .with_retry_interval(retry_interval)
        .with_provider_context(provider_context(&defaults));

    let state = host.instance(node_id, node_type, properties)?;
    let ctx = host.context(&state, relationships)?;
    let config = GcpConfig::resolve(&ctx).map_err(anyhow::Error::new)?;
    tracing::info!("Using project {} (zone {})", config.project, config.zone);

    let client = GcpClient::new(&config).await?;
    let state = host.run(state, operation, relationships, &client).await?;

    println!("{}", serde_json::to_string_pretty(&state.runtime_properties)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_stderr);

    let mut defaults = Config::load();

    match args.command {
        Command::Run {
            node_type,
            operation,
            node_id,
            properties,
            relationships,
            task_retries,
            retry_interval,
            project,
            zone,
            state_dir,
        } => {
            if project.is_some() {
                defaults.project_id = project;
            }
            if zone.is_some() {
                defaults.zone = zone;
            }
            let state_dir = state_dir.unwrap_or_else(|| defaults.effective_state_dir());
            let properties = parse_properties(properties.as_deref())?;

            run(
                defaults,
                state_dir,
                &node_type,
                &operation,
                &node_id,
                properties,
                &relationships,
                task_retries,
                retry_interval.map(Duration::from_secs),
            )
            .await
        },
        Command::Show { node_id, state_dir } => {
            let host = LocalHost::new(state_dir.unwrap_or_else(|| defaults.effective_state_dir()));
            match host.load(&node_id)? {
                Some(state) => {
                    println!("{}", serde_json::to_string_pretty(&state)?);
                    Ok(())
                },
                None => bail!("No state for node {} in {}", node_id, host.state_dir().display()),
            }
        },
        Command::Defaults {
            project,
            zone,
            state_dir,
        } => {
            let changed = project.is_some() || zone.is_some() || state_dir.is_some();
            if let Some(project) = project {
                if !gcp_lifecycle::gcp::auth::validate_project_id(&project) {
                    bail!("Invalid project id: {}", project);
                }
                defaults.project_id = Some(project);
            }
            if zone.is_some() {
                defaults.zone = zone;
            }
            if state_dir.is_some() {
                defaults.state_dir = state_dir;
            }
            if changed {
                defaults.save().context("Failed to save defaults")?;
            }
            println!("{}", serde_json::to_string_pretty(&defaults)?);
            Ok(())
        },
    }
}
