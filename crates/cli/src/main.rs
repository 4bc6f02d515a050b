use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use vessel_api::{OperationResult, RestApi, RestStorage};
use vessel_core::{Context, Error, JsonCodec, Object, Selector, Validate};
use vessel_deploy::{RegistryGeneratorClient, RollbackRest};
use vessel_persist::SqliteBackend;
use vessel_registry::{Registries, WatchEvent};
use vessel_store::VersionedStore;

#[derive(Parser, Debug)]
#[command(name = "vesselctl", version, about = "Vessel resource CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for the request (default: "default")
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// SQLite database path (default: ~/.vessel/vessel.db)
    #[arg(long = "db", env = "VESSEL_DB_PATH", global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
    Yaml,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Kind {
    #[value(alias = "route")]
    Routes,
    #[value(alias = "buildconfig", alias = "bc")]
    BuildConfigs,
    #[value(alias = "deployment")]
    Deployments,
    #[value(alias = "deploymentconfig", alias = "dc")]
    DeploymentConfigs,
    #[value(alias = "image")]
    Images,
    #[value(alias = "imagerepository", alias = "is")]
    ImageRepositories,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print one object
    Get { kind: Kind, name: String },
    /// List objects of a kind
    Ls {
        kind: Kind,
        /// Label selector, e.g. "app=web,tier!=db"
        #[arg(short = 'l', long = "selector", default_value = "")]
        selector: String,
        /// Field selector, e.g. "name=foo"
        #[arg(long = "field-selector", default_value = "")]
        field_selector: String,
    },
    /// Create an object from a YAML or JSON file
    Create {
        kind: Kind,
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Replace an existing object from a YAML or JSON file
    Replace {
        kind: Kind,
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// Delete one object
    Delete { kind: Kind, name: String },
    /// Watch a kind and print +/~/- events
    Watch {
        kind: Kind,
        #[arg(short = 'l', long = "selector", default_value = "")]
        selector: String,
        /// Resume after this resource version (default: from now)
        #[arg(long = "rv", default_value = "")]
        resource_version: String,
    },
    /// Generate the config that rolls back to the state captured in a deployment
    Rollback {
        deployment: String,
        #[arg(long = "include-triggers", action = ArgAction::SetTrue)]
        include_triggers: bool,
        #[arg(long = "include-template", action = ArgAction::SetTrue)]
        include_template: bool,
        #[arg(long = "include-replication-meta", action = ArgAction::SetTrue)]
        include_replication_meta: bool,
        #[arg(long = "include-strategy", action = ArgAction::SetTrue)]
        include_strategy: bool,
        /// Persist the candidate as the live deployment config
        #[arg(long = "apply", action = ArgAction::SetTrue)]
        apply: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("VESSEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VESSEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid VESSEL_METRICS_ADDR; expected host:port");
        }
    }
}

/// Dispatch `$body` with `$storage` bound to the REST binding for `$kind`.
macro_rules! with_storage {
    ($api:expr, $kind:expr, |$storage:ident| $body:expr) => {
        match $kind {
            Kind::Routes => {
                let $storage = &$api.routes;
                $body
            }
            Kind::BuildConfigs => {
                let $storage = &$api.build_configs;
                $body
            }
            Kind::Deployments => {
                let $storage = &$api.deployments;
                $body
            }
            Kind::DeploymentConfigs => {
                let $storage = &$api.deployment_configs;
                $body
            }
            Kind::Images => {
                let $storage = &$api.images;
                $body
            }
            Kind::ImageRepositories => {
                let $storage = &$api.image_repositories;
                $body
            }
        }
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let backend = match cli.db.as_deref() {
        Some(path) => SqliteBackend::open(path)?,
        None => SqliteBackend::open_default()?,
    };
    let codec = Arc::new(JsonCodec::default());
    let registries = Registries::new(VersionedStore::new(Arc::new(backend)), codec.clone());
    let api = RestApi::new(&registries);
    let ctx = match cli.namespace.as_deref() {
        Some(ns) => Context::with_namespace(ns),
        None => Context::default_namespace(),
    };
    let out = cli.output;

    match cli.command {
        Commands::Get { kind, name } => {
            info!(?kind, name = %name, "get invoked");
            with_storage!(api, kind, |storage| {
                let obj = storage.get(&ctx, &name).await?;
                print_objects(out, std::slice::from_ref(&obj))?;
            })
        }
        Commands::Ls { kind, selector, field_selector } => {
            let label = Selector::parse(&selector)?;
            let field = Selector::parse(&field_selector)?;
            info!(?kind, label = %label, field = %field, "ls invoked");
            with_storage!(api, kind, |storage| {
                let list = storage.list(&ctx, &label, &field).await?;
                match out {
                    Output::Human => print_objects(out, &list.items)?,
                    _ => print_value(out, &list)?,
                }
            })
        }
        Commands::Create { kind, file } => {
            info!(?kind, file = %file, "create invoked");
            with_storage!(api, kind, |storage| {
                let obj = read_object(storage, &file)?;
                let created = settle(storage.create(&ctx, obj)?.await)?;
                print_objects(out, std::slice::from_ref(&created))?;
            })
        }
        Commands::Replace { kind, file } => {
            info!(?kind, file = %file, "replace invoked");
            with_storage!(api, kind, |storage| {
                let obj = read_object(storage, &file)?;
                let updated = settle(storage.update(&ctx, obj)?.await)?;
                print_objects(out, std::slice::from_ref(&updated))?;
            })
        }
        Commands::Delete { kind, name } => {
            info!(?kind, name = %name, "delete invoked");
            with_storage!(api, kind, |storage| {
                let status = settle(storage.delete(&ctx, &name).await?.await)?;
                match out {
                    Output::Human => println!("deleted {}", name),
                    _ => print_value(out, &status)?,
                }
            })
        }
        Commands::Watch { kind, selector, resource_version } => {
            let label = Selector::parse(&selector)?;
            info!(?kind, label = %label, rv = %resource_version, "watch invoked");
            with_storage!(api, kind, |storage| {
                watch(storage, &ctx, label, &resource_version, out).await?;
            })
        }
        Commands::Rollback {
            deployment,
            include_triggers,
            include_template,
            include_replication_meta,
            include_strategy,
            apply,
        } => {
            info!(deployment = %deployment, apply, "rollback invoked");
            let client = RegistryGeneratorClient::new(registries.deployments.clone(), registries.deployment_configs.clone());
            let rest = RollbackRest::new(Arc::new(client), codec);
            let mut request = rest.new_object();
            request.spec.from.name = Some(deployment);
            request.spec.include_triggers = include_triggers;
            request.spec.include_template = include_template;
            request.spec.include_replication_meta = include_replication_meta;
            request.spec.include_strategy = include_strategy;
            let candidate = rest.create(&ctx, request).await?;
            let shown = if apply { settle(api.deployment_configs.update(&ctx, candidate)?.await)? } else { candidate };
            match out {
                Output::Human => {
                    let verb = if apply { "applied" } else { "generated (not applied)" };
                    println!("{} {} at version {}", shown.name(), verb, shown.latest_version);
                }
                _ => print_value(out, &shown)?,
            }
        }
    }

    Ok(())
}

fn settle<T>(result: OperationResult<T>) -> Result<T> {
    result.into_result().map_err(|status| {
        anyhow!(
            "{} ({})",
            status.message.unwrap_or_else(|| "operation failed".to_string()),
            status.code.unwrap_or_default()
        )
    })
}

fn read_object<R>(storage: &RestStorage<R>, path: &str) -> Result<R>
where
    R: Object + Validate + Default,
{
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    if raw.trim().is_empty() {
        return Ok(storage.new_object());
    }
    // YAML is a superset of JSON, so one parser covers both.
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {} as {}", path, R::KIND))
}

async fn watch<R>(storage: &RestStorage<R>, ctx: &Context, label: Selector, rv: &str, out: Output) -> Result<()>
where
    R: Object + Validate + Default,
{
    let mut handle = match storage.watch(ctx, label, Selector::everything(), rv).await {
        Ok(h) => h,
        Err(e @ Error::Conflict { .. }) => bail!("{e}; list again to obtain a current resource version"),
        Err(e) => return Err(e.into()),
    };
    loop {
        tokio::select! {
            maybe = handle.rx.recv() => {
                let Some(event) = maybe else {
                    warn!("watch stream closed; exiting watch loop");
                    break;
                };
                print_event(out, &event)?;
            }
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received; shutting down watch loop");
                break;
            }
        }
    }
    handle.cancel.cancel();
    Ok(())
}

fn print_event<R: Object>(out: Output, event: &WatchEvent<R>) -> Result<()> {
    let obj = event.object();
    match out {
        Output::Human => {
            let mark = match event {
                WatchEvent::Added(_) => '+',
                WatchEvent::Modified(_) => '~',
                WatchEvent::Deleted(_) => '-',
            };
            println!("{} {} @{}", mark, display_key(obj), obj.resource_version().unwrap_or("-"));
        }
        Output::Json => {
            #[derive(Serialize)]
            struct Line<'a, T> {
                #[serde(rename = "type")]
                type_: &'a str,
                object: &'a T,
            }
            println!("{}", serde_json::to_string(&Line { type_: event.type_name(), object: obj })?);
        }
        Output::Yaml => {
            println!("---\n# {}", event.type_name());
            print!("{}", serde_yaml::to_string(obj)?);
        }
    }
    Ok(())
}

fn print_objects<R: Object>(out: Output, items: &[R]) -> Result<()> {
    match out {
        Output::Human => {
            println!("{:<12} {:<36} {:<8} AGE", "NAMESPACE", "NAME", "VERSION");
            for item in items {
                let ns = if item.namespace().is_empty() { "-" } else { item.namespace() };
                let age = item.meta().creation_timestamp.as_ref().map(|t| render_age(t.0.timestamp())).unwrap_or_else(|| "-".to_string());
                println!("{:<12} {:<36} {:<8} {}", ns, item.name(), item.resource_version().unwrap_or("-"), age);
            }
            Ok(())
        }
        _ if items.len() == 1 => print_value(out, &items[0]),
        _ => print_value(out, &items),
    }
}

fn print_value<T: Serialize + ?Sized>(out: Output, value: &T) -> Result<()> {
    match out {
        Output::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn display_key<R: Object>(obj: &R) -> String {
    if obj.namespace().is_empty() {
        obj.name().to_string()
    } else {
        format!("{}/{}", obj.namespace(), obj.name())
    }
}

fn render_age(creation_ts: i64) -> String {
    if creation_ts <= 0 {
        return "-".to_string();
    }
    let now = chrono::Utc::now().timestamp();
    let mut secs = (now - creation_ts).max(0) as u64;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3600;
    secs %= 3600;
    let mins = secs / 60;
    secs %= 60;
    if days > 0 {
        format!("{}d{}h", days, hours)
    } else if hours > 0 {
        format!("{}h{}m", hours, mins)
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}
