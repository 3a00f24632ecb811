//! kflex ops: bootstrap a local kind cluster with ingress-nginx.
//!
//! The sequence is fixed: probe kind, install it if missing, probe the
//! cluster, create it if missing, install ingress-nginx, patch its ports and
//! args. Steps run one after another on the caller's task; the only
//! concurrency is the progress spinner. The first failure aborts the run.

#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use kflex_apply::{build_container_args_patch, ingress_port_patches, PatchDocument, PatchTarget, TargetedPatch};
use kflex_core::{BootstrapConfig, BootstrapError, ClusterSpec, ErrorKind, Profile, Result, Step, StepStatus};
use kflex_kubehub::{CommandOutput, CommandRunner, KindCli, KubectlCli, StateProber, ToolCommand};
use kflex_render::{ConfigRenderer, TransientFile};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod reporter;

pub use reporter::{Announcement, ProgressEvent, StatusReporter};

/// The step that broke the run and why.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {error}")]
pub struct StepFailure {
    pub step: Step,
    #[source]
    pub error: BootstrapError,
}

impl StepFailure {
    pub fn kind(&self) -> ErrorKind { self.error.kind() }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

/// What a successful run did.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub run_id: Uuid,
    pub cluster: String,
    pub profile: Profile,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub skipped: Vec<Step>,
}

impl BootstrapReport {
    fn new(run_id: Uuid, cluster: &str, profile: Profile) -> Self {
        Self { run_id, cluster: cluster.to_string(), profile, started_at: Utc::now(), finished_at: None, steps: Vec::new(), skipped: Vec::new() }
    }

    /// Steps that ran, in order.
    pub fn executed(&self) -> Vec<Step> { self.steps.iter().map(|r| r.step).collect() }
}

/// Every patch the bootstrap applies to the ingress controller, in apply
/// order: container args (strategic merge), deployment ports, service ports.
pub fn ingress_patches(config: &BootstrapConfig, profile: Profile) -> Vec<TargetedPatch> {
    let args = build_container_args_patch(&config.ingress_container, &profile.ingress_controller_args());
    let mut out = vec![TargetedPatch { target: PatchTarget::deployment(&config.ingress_deployment), document: args }];
    out.extend(ingress_port_patches(&config.ingress_deployment, &config.ingress_service, profile.http_port(), profile.https_port()));
    out
}

/// A warning raised while a progress line is live. Held until the line has
/// resolved so it does not tear through the spinner.
#[derive(Debug)]
enum Held {
    CommandFailed { command: String, code: Option<i32>, stderr: String },
    Leftover { error: BootstrapError },
}

impl Held {
    fn log(&self) {
        match self {
            Held::CommandFailed { command, code, stderr } => warn!(command = %command, code = ?code, stderr = %stderr, "command failed"),
            Held::Leftover { error } => warn!(error = %error, "leftover kind config"),
        }
    }
}

pub struct Bootstrap<R> {
    runner: R,
    held: Mutex<Vec<Held>>,
    reporter: StatusReporter,
    spec: ClusterSpec,
    profile: Profile,
    config: BootstrapConfig,
    kind: KindCli,
    kubectl: KubectlCli,
    renderer: ConfigRenderer,
}

impl<R: CommandRunner> Bootstrap<R> {
    pub fn new(runner: R, reporter: StatusReporter, spec: ClusterSpec, profile: Profile, config: BootstrapConfig) -> Result<Self> {
        let kind = KindCli::new(&config.kind_bin);
        let kubectl = KubectlCli::new(&config.kubectl_bin);
        Ok(Self { runner, held: Mutex::new(Vec::new()), reporter, spec, profile, config, kind, kubectl, renderer: ConfigRenderer::new()? })
    }

    pub fn reporter(&self) -> &StatusReporter { &self.reporter }

    pub async fn run(&self) -> std::result::Result<BootstrapReport, StepFailure> {
        let run_id = Uuid::new_v4();
        let span = info_span!("bootstrap", %run_id, cluster = %self.spec.name(), profile = %self.profile);
        self.run_steps(run_id).instrument(span).await
    }

    async fn run_steps(&self, run_id: Uuid) -> std::result::Result<BootstrapReport, StepFailure> {
        let mut report = BootstrapReport::new(run_id, self.spec.name(), self.profile);
        let prober = StateProber::new(&self.runner, &self.kind);

        let installed = self.probe(Step::CheckTool, &mut report, prober.is_tool_installed()).await?;
        if installed {
            info!(tool = %self.kind.bin(), "already installed; skipping install");
            report.skipped.push(Step::InstallTool);
        } else {
            self.announced(Step::InstallTool, &mut report, self.install_tool()).await?;
        }

        let exists = self.probe(Step::CheckCluster, &mut report, prober.cluster_exists(self.spec.name())).await?;
        if exists {
            info!(cluster = %self.spec.name(), "cluster exists; skipping create");
            report.skipped.push(Step::CreateCluster);
        } else {
            self.announced(Step::CreateCluster, &mut report, self.create_cluster()).await?;
        }

        self.announced(Step::InstallIngress, &mut report, self.install_ingress()).await?;
        self.announced(Step::PatchIngress, &mut report, self.patch_ingress()).await?;

        report.finished_at = Some(Utc::now());
        info!(executed = report.steps.len(), skipped = report.skipped.len(), "bootstrap complete");
        Ok(report)
    }

    /// Read-only check; logged but not announced.
    async fn probe<T>(
        &self,
        step: Step,
        report: &mut BootstrapReport,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, StepFailure> {
        debug!(step = %step, "{}", step.label());
        let started = Instant::now();
        let res = fut.await;
        self.finish(step, report, started, res)
    }

    /// Runs `fut` under a progress line. The line resolves only after the
    /// step's command returned, on success and on failure alike.
    async fn announced<T>(
        &self,
        step: Step,
        report: &mut BootstrapReport,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, StepFailure> {
        let announcement = self.reporter.announce(step.label());
        let started = Instant::now();
        let res = fut.await;
        match &res {
            Ok(_) => announcement.complete().await,
            Err(_) => announcement.fail().await,
        }
        self.finish(step, report, started, res)
    }

    fn finish<T>(&self, step: Step, report: &mut BootstrapReport, started: Instant, res: Result<T>) -> std::result::Result<T, StepFailure> {
        self.flush_held();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!("kflex_step_ms", elapsed_ms as f64, "step" => step.id());
        match res {
            Ok(v) => {
                counter!("kflex_steps_total", 1u64, "step" => step.id(), "outcome" => "done");
                report.steps.push(StepRecord { step, status: StepStatus::Done, elapsed_ms });
                Ok(v)
            }
            Err(error) => {
                counter!("kflex_steps_total", 1u64, "step" => step.id(), "outcome" => "failed");
                error!(step = %step, kind = %error.kind(), error = %error, "step failed");
                Err(StepFailure { step, error })
            }
        }
    }

    async fn install_tool(&self) -> Result<()> {
        let tool = self.kind.bin().to_string();
        let cmd = ToolCommand::from_argv(&self.config.kind_install).ok_or_else(|| BootstrapError::Install {
            tool: tool.clone(),
            command: String::new(),
            reason: "no installer command configured".into(),
        })?;
        let out = self
            .runner
            .run(&cmd)
            .await
            .map_err(|e| BootstrapError::Install { tool: tool.clone(), command: cmd.to_string(), reason: e.to_string() })?;
        if !out.success {
            self.hold_failure(&cmd, &out);
            return Err(BootstrapError::Install { tool, command: cmd.to_string(), reason: out.failure_reason() });
        }
        info!(command = %cmd, "installed");
        Ok(())
    }

    async fn create_cluster(&self) -> Result<()> {
        let name = self.spec.name();
        let rendered = self.renderer.render(&self.spec)?;
        let cmd = self.kind.create_cluster(name, rendered.path());
        let outcome = self.runner.run(&cmd).await;
        // The topology file goes away whatever kind did with it.
        let removed = rendered.remove();

        let failure = match outcome {
            Ok(out) if out.success => None,
            Ok(out) => {
                self.hold_failure(&cmd, &out);
                Some(out.failure_reason())
            }
            Err(e) => Some(e.to_string()),
        };
        match failure {
            None => {
                removed?;
                info!(cluster = %name, "cluster created");
                Ok(())
            }
            Some(reason) => {
                if let Err(error) = removed { self.hold(Held::Leftover { error }); }
                Err(BootstrapError::CreateCluster { name: name.to_string(), reason })
            }
        }
    }

    async fn install_ingress(&self) -> Result<()> {
        let manifest = &self.config.ingress_manifest;
        self.kubectl_ok(&self.kubectl.apply_url(manifest), manifest).await?;
        info!(manifest = %manifest, "ingress controller applied");
        Ok(())
    }

    async fn patch_ingress(&self) -> Result<()> {
        for patch in ingress_patches(&self.config, self.profile) {
            self.apply_patch(&patch).await?;
        }
        Ok(())
    }

    async fn apply_patch(&self, patch: &TargetedPatch) -> Result<()> {
        let ns = &self.config.ingress_namespace;
        let resource = patch.target.to_string();
        match &patch.document {
            PatchDocument::Strategic(_) => {
                let file = TransientFile::write("nginx-controller-patch-", ".yaml", patch.document.to_yaml()?)?;
                let res = self.kubectl_ok(&self.kubectl.patch_file(ns, &resource, file.path()), &resource).await;
                let removed = file.remove();
                res?;
                removed?;
            }
            PatchDocument::Json(_) => {
                let body = patch.document.to_json()?;
                self.kubectl_ok(&self.kubectl.patch_json(ns, &resource, &body), &resource).await?;
            }
        }
        info!(resource = %resource, patch_type = patch.document.patch_type(), "patched");
        Ok(())
    }

    async fn kubectl_ok(&self, cmd: &ToolCommand, target: &str) -> Result<()> {
        let out = self
            .runner
            .run(cmd)
            .await
            .map_err(|e| BootstrapError::Apply { target: target.to_string(), reason: e.to_string() })?;
        if !out.success {
            self.hold_failure(cmd, &out);
            return Err(BootstrapError::Apply { target: target.to_string(), reason: out.failure_reason() });
        }
        debug!(command = %cmd, stdout = %String::from_utf8_lossy(&out.stdout).trim_end(), "ok");
        Ok(())
    }

    fn hold(&self, held: Held) {
        match self.held.lock() {
            Ok(mut h) => h.push(held),
            Err(_) => held.log(),
        }
    }

    fn hold_failure(&self, cmd: &ToolCommand, out: &CommandOutput) {
        self.hold(Held::CommandFailed {
            command: cmd.to_string(),
            code: out.code,
            stderr: String::from_utf8_lossy(&out.stderr).trim_end().to_string(),
        });
    }

    /// Log what was held back while the step's progress line was live.
    fn flush_held(&self) {
        let held = self.held.lock().map(|mut h| std::mem::take(&mut *h)).unwrap_or_default();
        for h in &held { h.log(); }
    }
}
