use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use kflex_apply::PatchDocument;
use kflex_core::{BootstrapConfig, ClusterSpec, Profile, DEFAULT_CLUSTER_NAME};
use kflex_kubehub::SystemRunner;
use kflex_ops::{ingress_patches, Bootstrap, StatusReporter};
use kflex_render::ConfigRenderer;
use serde::Serialize;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kflexctl", version, about = "Bootstrap a local kind cluster with ingress-nginx")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Deployment profile: passthrough (9080/9443, TLS passthrough) or standard (80/443)
    #[arg(long, global = true, env = "KFLEX_PROFILE", default_value_t = Profile::Passthrough)]
    profile: Profile,

    /// Name of the kind cluster
    #[arg(long, global = true, env = "KFLEX_CLUSTER_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    name: String,

    /// kind binary (default: KFLEX_KIND_BIN or "kind")
    #[arg(long = "kind-bin", global = true)]
    kind_bin: Option<String>,

    /// kubectl binary (default: KFLEX_KUBECTL_BIN or "kubectl")
    #[arg(long = "kubectl-bin", global = true)]
    kubectl_bin: Option<String>,

    /// ingress-nginx manifest to apply (default: upstream kind provider manifest)
    #[arg(long = "ingress-manifest", global = true)]
    ingress_manifest: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install kind if needed, create the cluster if missing, install and patch ingress-nginx
    Init,
    /// Print the kind topology that `init` would create the cluster with
    Render,
    /// Print the ingress-nginx patches that `init` applies
    Patches,
}

impl Cli {
    fn config(&self) -> BootstrapConfig {
        let mut cfg = BootstrapConfig::from_env();
        if let Some(v) = &self.kind_bin { cfg.kind_bin = v.clone(); }
        if let Some(v) = &self.kubectl_bin { cfg.kubectl_bin = v.clone(); }
        if let Some(v) = &self.ingress_manifest { cfg.ingress_manifest = v.clone(); }
        cfg
    }
}

const DEFAULT_LOG_FILTER: &str = "warn";

fn log_filter(value: Option<&str>) -> tracing_subscriber::EnvFilter {
    value
        .and_then(|v| tracing_subscriber::EnvFilter::from_str(v).ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
}

// Logs go to stderr so they never tear through the progress lines on stdout.
fn init_tracing() {
    let env = std::env::var("KFLEX_LOG").ok();
    tracing_subscriber::fmt().with_env_filter(log_filter(env.as_deref())).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KFLEX_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KFLEX_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(Serialize)]
struct PatchView {
    target: String,
    #[serde(rename = "type")]
    patch_type: &'static str,
    patch: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let config = cli.config();
    let spec = ClusterSpec::for_profile(&cli.name, cli.profile)?;

    match cli.command {
        Commands::Init => {
            info!(cluster = %spec.name(), profile = %cli.profile, "init invoked");
            let bootstrap = Bootstrap::new(SystemRunner, StatusReporter::stdout(), spec, cli.profile, config)?;
            match bootstrap.run().await {
                Ok(report) => match cli.output {
                    Output::Human => {
                        let skipped: Vec<String> = report.skipped.iter().map(|s| s.to_string()).collect();
                        if skipped.is_empty() {
                            println!("kind cluster {} is ready", report.cluster);
                        } else {
                            println!("kind cluster {} is ready (skipped: {})", report.cluster, skipped.join(", "));
                        }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                },
                Err(failure) => {
                    error!(step = %failure.step, kind = %failure.kind(), error = %failure.error, "bootstrap failed");
                    eprintln!("Error: {}", failure);
                    std::process::exit(1);
                }
            }
        }
        Commands::Render => {
            let text = ConfigRenderer::new()?.render_to_string(&spec)?;
            match cli.output {
                Output::Human => print!("{}", text),
                Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "spec": spec, "config": text }))?),
            }
        }
        Commands::Patches => {
            let patches = ingress_patches(&config, cli.profile);
            match cli.output {
                Output::Human => {
                    for p in &patches {
                        println!("# {} -n {} ({})", p.target, config.ingress_namespace, p.document.patch_type());
                        match &p.document {
                            PatchDocument::Strategic(_) => print!("{}", p.document.to_yaml()?),
                            PatchDocument::Json(_) => println!("{}", p.document.to_json()?),
                        }
                    }
                }
                Output::Json => {
                    let mut views = Vec::with_capacity(patches.len());
                    for p in &patches {
                        let patch = serde_json::from_str(&p.document.to_json()?)?;
                        views.push(PatchView { target: p.target.to_string(), patch_type: p.document.patch_type(), patch });
                    }
                    println!("{}", serde_json::to_string_pretty(&views)?);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_defaults_to_warn() {
        assert_eq!(log_filter(None).to_string(), "warn");
        assert_eq!(log_filter(Some("kflex_ops=debug")).to_string(), "kflex_ops=debug");
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kflexctl", "init", "--profile", "standard", "-o", "json"]).expect("parse");
        assert_eq!(cli.profile, Profile::Standard);
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::Init));
    }
}
