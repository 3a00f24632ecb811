use kflex_core::{BootstrapError, Result};
use tracing::{debug, info};

use crate::{CommandRunner, KindCli};

/// Answers the idempotency questions of the bootstrap by querying kind.
/// Read-only: never changes anything on the host.
pub struct StateProber<'a, R: ?Sized> {
    runner: &'a R,
    kind: &'a KindCli,
}

impl<'a, R: CommandRunner + ?Sized> StateProber<'a, R> {
    pub fn new(runner: &'a R, kind: &'a KindCli) -> Self { Self { runner, kind } }

    /// A non-zero exit of the presence check means "not installed" and is
    /// not an error; only a check that cannot run at all is.
    pub async fn is_tool_installed(&self) -> Result<bool> {
        let cmd = self.kind.presence_check();
        let out = self
            .runner
            .run(&cmd)
            .await
            .map_err(|source| BootstrapError::ToolCheck { tool: self.kind.bin().to_string(), source })?;
        info!(tool = %self.kind.bin(), installed = out.success, "presence check");
        Ok(out.success)
    }

    pub async fn cluster_exists(&self, name: &str) -> Result<bool> {
        let cmd = self.kind.get_clusters();
        let out = self
            .runner
            .run(&cmd)
            .await
            .map_err(|e| BootstrapError::Query { command: cmd.to_string(), reason: e.to_string() })?;
        if !out.success {
            return Err(BootstrapError::Query { command: cmd.to_string(), reason: out.failure_reason() });
        }
        let listing = std::str::from_utf8(&out.stdout)
            .map_err(|e| BootstrapError::Query { command: cmd.to_string(), reason: format!("unreadable output: {}", e) })?;
        debug!(listing = %listing.trim_end(), "clusters");
        let exists = cluster_listed(listing, name);
        info!(cluster = %name, exists, "cluster lookup");
        Ok(exists)
    }
}

/// Whether `name` is one of the lines of a `kind get clusters` listing.
/// Matches whole lines only, so `kubeflex` is not found in `kubeflex-dev`.
pub fn cluster_listed(listing: &str, name: &str) -> bool {
    listing.lines().map(str::trim).any(|line| line == name)
}
