use std::io::Read;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kube::config::KubeConfigOptions;
use kubedyn_core::{extract_kind_with, parse_gvk_key, strip_server_fields, ManifestLimits, OperatorConfig, ResourceHandle};
use kubedyn_dispatch::{
    dispatch, spawn_supervised, DispatchOutcome, DispatchedEvent, SupervisorConfig, SupervisorExit, SupervisorHandle,
    ViewSummary,
};
use kubedyn_kubehub::{ClusterContext, DiscoveredResource, WatchOptions};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kubedynctl", version, about = "Apply, delete and watch arbitrary Kubernetes manifests")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for manifests that carry none, and for get/watch (default: current context)
    #[arg(long = "ns", global = true, env = "KUBEDYN_NAMESPACE")]
    namespace: Option<String>,

    /// Kubeconfig context (default: current context, or in-cluster)
    #[arg(long = "context", global = true)]
    context: Option<String>,

    /// Field manager identity for server-side apply
    #[arg(long = "field-manager", global = true)]
    field_manager: Option<String>,

    /// Take ownership of fields managed by others
    #[arg(long = "force-conflicts", global = true, action = ArgAction::SetTrue)]
    force_conflicts: bool,

    /// Deadline for every request, in seconds
    #[arg(long = "timeout", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the recognized kind of a manifest (no cluster access)
    Kind {
        /// Manifest file, or "-" for stdin
        #[arg(short = 'f', long = "filename")]
        file: String,
    },
    /// Resolve a GVK key to its REST resource and scope
    Resolve {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
    },
    /// List served resources
    Discover,
    /// Server-side apply every document of a manifest, in order
    Apply {
        #[arg(short = 'f', long = "filename")]
        file: String,
    },
    /// Delete every document of a manifest, in reverse order
    Delete {
        #[arg(short = 'f', long = "filename")]
        file: String,
    },
    /// Fetch one object
    Get {
        /// GVK key, e.g. "v1/ConfigMap"
        gvk: String,
        name: String,
    },
    /// Watch a collection and print decoded change events
    Watch {
        /// GVK key, e.g. "apps/v1/Deployment"
        gvk: String,
        /// Label selector
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        /// Watch every namespace
        #[arg(short = 'A', long = "all-namespaces", action = ArgAction::SetTrue)]
        all_namespaces: bool,
        /// Reopen the watch when it ends or fails
        #[arg(long = "reconnect", action = ArgAction::SetTrue)]
        reconnect: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("KUBEDYN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KUBEDYN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KUBEDYN_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading manifest from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading manifest {path}"))
}

fn operator_config(cli: &Cli) -> OperatorConfig {
    let mut cfg = OperatorConfig::from_env();
    if let Some(fm) = &cli.field_manager {
        cfg = cfg.with_field_manager(fm.clone());
    }
    if cli.force_conflicts {
        cfg = cfg.with_force_conflicts(true);
    }
    if let Some(secs) = cli.timeout_secs {
        cfg = cfg.with_request_timeout(Duration::from_secs(secs));
    }
    cfg
}

/// Context for the chosen kubeconfig context plus that context's default namespace.
async fn connect(cli: &Cli) -> Result<(ClusterContext, String)> {
    let kcfg = match &cli.context {
        Some(name) => {
            let opts = KubeConfigOptions { context: Some(name.clone()), ..Default::default() };
            kube::Config::from_kubeconfig(&opts).await.with_context(|| format!("loading kubeconfig context {name}"))?
        }
        None => kube::Config::infer().await.context("inferring cluster configuration")?,
    };
    let default_ns = kcfg.default_namespace.clone();
    let ctx = ClusterContext::connect(kcfg, operator_config(cli))?;
    Ok((ctx, default_ns))
}

fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn group_version(group: &str, version: &str) -> String {
    if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    }
}

fn scope_label(namespaced: bool) -> &'static str {
    if namespaced {
        "namespaced"
    } else {
        "cluster"
    }
}

fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

fn event_line(ev: &DispatchedEvent) -> String {
    let s = ev.view.summary();
    let mut line = format!("{:<9} {:<14} {}", format!("{:?}", ev.event_type).to_uppercase(), s.kind, object_key(s.namespace.as_deref(), &s.name));
    if let Some(want) = s.replicas {
        line.push_str(&format!(
            "  replicas={} current={} ready={}",
            want,
            s.status_replicas.unwrap_or(0),
            s.ready_replicas.unwrap_or(0)
        ));
    }
    line
}

#[derive(Serialize)]
struct EventRow {
    event: kubedyn_core::EventType,
    #[serde(flatten)]
    summary: ViewSummary,
}

fn printer(output: Output) -> impl FnMut(DispatchedEvent) -> ControlFlow<()> + Send + 'static {
    move |ev| {
        match output {
            Output::Human => println!("{}", event_line(&ev)),
            Output::Json => {
                let row = EventRow { event: ev.event_type, summary: ev.view.summary() };
                match serde_json::to_string(&row) {
                    Ok(s) => println!("{s}"),
                    Err(e) => warn!(error = %e, "event could not be rendered"),
                }
            }
        }
        ControlFlow::Continue(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Kind { file } => {
            let text = read_input(file)?;
            let kind = extract_kind_with(&text, &ManifestLimits::from_env())?;
            match cli.output {
                Output::Human => println!("{kind}"),
                Output::Json => print_json(&serde_json::json!({ "kind": kind }))?,
            }
        }
        Commands::Resolve { gvk } => {
            let gvk = parse_gvk_key(gvk)?;
            let (ctx, _) = connect(&cli).await?;
            let mapping = ctx.mapper().resolve(&gvk).await?;
            match cli.output {
                Output::Human => println!("{} -> {} ({})", mapping.gvk_key(), mapping.plural(), scope_label(mapping.namespaced())),
                Output::Json => print_json(&DiscoveredResource::from(&mapping))?,
            }
            ctx.close();
        }
        Commands::Discover => {
            let (ctx, _) = connect(&cli).await?;
            let resources = ctx.mapper().served_resources().await?;
            info!(count = resources.len(), "discover finished");
            match cli.output {
                Output::Human => {
                    for r in &resources {
                        println!("{} • {} • {} • {}", group_version(&r.group, &r.version), r.kind, r.plural, scope_label(r.namespaced));
                    }
                }
                Output::Json => print_json(&resources)?,
            }
            ctx.close();
        }
        Commands::Apply { file } => {
            let text = read_input(file)?;
            let (ctx, default_ns) = connect(&cli).await?;
            let ns = cli.namespace.as_deref().unwrap_or(&default_ns);
            let outcomes = kubedyn_apply::apply_all(&ctx, &text, Some(ns)).await?;
            match cli.output {
                Output::Human => {
                    for o in &outcomes {
                        let kind = o.object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("object");
                        println!(
                            "{} {} applied (resourceVersion {})",
                            kind,
                            object_key(o.namespace.as_deref(), &o.name),
                            o.resource_version.as_deref().unwrap_or("-")
                        );
                    }
                }
                Output::Json => print_json(&outcomes)?,
            }
            ctx.close();
        }
        Commands::Delete { file } => {
            let text = read_input(file)?;
            let (ctx, default_ns) = connect(&cli).await?;
            let ns = cli.namespace.as_deref().unwrap_or(&default_ns);
            let outcomes = kubedyn_apply::delete_all(&ctx, &text, Some(ns)).await?;
            match cli.output {
                Output::Human => {
                    for o in &outcomes {
                        let what = if o.deleted { "deleted" } else { "not found" };
                        println!("{} {} {}", o.gvk, object_key(o.namespace.as_deref(), &o.name), what);
                    }
                }
                Output::Json => print_json(&outcomes)?,
            }
            ctx.close();
        }
        Commands::Get { gvk, name } => {
            let gvk = parse_gvk_key(gvk)?;
            let (ctx, default_ns) = connect(&cli).await?;
            let mapping = ctx.mapper().resolve(&gvk).await?;
            let ns = cli.namespace.as_deref().unwrap_or(&default_ns);
            let handle = ResourceHandle::bind(&mapping, Some(ns), name)?;
            let obj = kubedyn_apply::get(&ctx, &handle, name).await?;
            let doc = strip_server_fields(serde_json::to_value(&obj)?);
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&doc)?),
                Output::Json => print_json(&doc)?,
            }
            ctx.close();
        }
        Commands::Watch { gvk, selector, all_namespaces, reconnect } => {
            let gvk = parse_gvk_key(gvk)?;
            let (ctx, default_ns) = connect(&cli).await?;
            let mapping = ctx.mapper().resolve(&gvk).await?;
            let handle = if *all_namespaces {
                ResourceHandle::all_namespaces(&mapping)
            } else {
                let ns = cli.namespace.as_deref().unwrap_or(&default_ns);
                ResourceHandle::bind(&mapping, Some(ns), "")?
            };
            let mut opts = WatchOptions::default();
            if let Some(sel) = selector {
                opts = opts.with_labels(sel);
            }
            info!(target_ref = %handle, reconnect, "watch invoked");

            if *reconnect {
                let SupervisorHandle { cancel, join } =
                    spawn_supervised(Arc::new(ctx), handle, opts, SupervisorConfig::from_env(), printer(cli.output));
                tokio::spawn(async move {
                    if signal::ctrl_c().await.is_ok() {
                        info!("Ctrl-C received; stopping watch");
                    }
                    cancel.cancel();
                });
                match join.await? {
                    Ok(SupervisorExit::Cancelled | SupervisorExit::Stopped) => {}
                    Ok(SupervisorExit::Exhausted) => warn!("watch reconnects exhausted"),
                    Err(e) => bail!("watch failed: {e}"),
                }
                return Ok(());
            }

            let stream = kubedyn_apply::watch(&ctx, &handle, &opts).await?;
            let mut print = printer(cli.output);
            tokio::select! {
                res = dispatch(stream, &mut print) => match res? {
                    DispatchOutcome::Closed(stats) => warn!(?stats, "watch stream ended"),
                    DispatchOutcome::Stopped(stats) => info!(?stats, "watch stopped"),
                },
                _ = signal::ctrl_c() => info!("Ctrl-C received; stopping watch"),
            }
            ctx.close();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubedyn_core::EventType;
    use kubedyn_dispatch::decode_view;
    use serde_json::json;

    #[test]
    fn human_formatting() {
        assert_eq!(group_version("", "v1"), "v1");
        assert_eq!(group_version("apps", "v1"), "apps/v1");
        assert_eq!(object_key(Some("demo"), "web"), "demo/web");
        assert_eq!(object_key(None, "admin"), "admin");
    }

    #[test]
    fn event_line_shows_replicas_for_workloads() {
        let view = decode_view(
            "Deployment",
            json!({
                "apiVersion": "apps/v1", "kind": "Deployment",
                "metadata": {"name": "web", "namespace": "demo"},
                "spec": {"replicas": 3, "selector": {}, "template": {}},
                "status": {"replicas": 3, "readyReplicas": 1}
            }),
        )
        .unwrap()
        .unwrap();
        let line = event_line(&DispatchedEvent { event_type: EventType::Modified, view });
        assert!(line.starts_with("MODIFIED"), "{line}");
        assert!(line.contains("demo/web"));
        assert!(line.ends_with("replicas=3 current=3 ready=1"), "{line}");
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["kubedynctl", "watch", "apps/v1/Deployment", "-A", "--reconnect", "-o", "json"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::Watch { all_namespaces: true, reconnect: true, .. }));
    }
}
