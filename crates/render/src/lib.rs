//! kflex render: kind topology template and the transient files handed to
//! external tools.

#![forbid(unsafe_code)]

use std::io::Write;
use std::path::Path;

use kflex_core::{BootstrapError, ClusterSpec, Result};
use tempfile::TempPath;
use tera::{Context, Tera};
use tracing::debug;

const KIND_CONFIG_TEMPLATE: &str = include_str!("../templates/kind-config.yaml.tera");
const TEMPLATE_NAME: &str = "kind-config.yaml";

/// A fully written, closed file in the temp dir. The owner must remove it once
/// the consuming tool is done; dropping it removes it as well.
#[derive(Debug)]
pub struct TransientFile {
    content: String,
    path: TempPath,
}

/// Rendered kind topology, ready for `kind create cluster --config`.
pub type RenderedConfig = TransientFile;

impl TransientFile {
    /// Write `content` to a uniquely named `<prefix>*<suffix>` file, flush and close it.
    pub fn write(prefix: &str, suffix: &str, content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile()
            .map_err(|e| BootstrapError::io(format!("failed to create temp file {}*{}", prefix, suffix), e))?;
        let shown = file.path().display().to_string();
        file.write_all(content.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| BootstrapError::io(format!("failed to write temp file {}", shown), e))?;
        // Closes the handle; the path stays owned and is deleted on drop.
        let path = file.into_temp_path();
        debug!(path = %path.display(), bytes = content.len(), "transient file written");
        Ok(Self { content, path })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn content(&self) -> &str { &self.content }

    /// Delete the file now, reporting failures that `Drop` would swallow.
    pub fn remove(self) -> Result<()> {
        let shown = self.path.display().to_string();
        self.path.close().map_err(|e| BootstrapError::io(format!("failed to remove temp file {}", shown), e))?;
        debug!(path = %shown, "transient file removed");
        Ok(())
    }
}

/// Fills the kind topology template with a [`ClusterSpec`].
pub struct ConfigRenderer {
    tera: Tera,
}

impl ConfigRenderer {
    /// Renderer over the embedded topology template.
    pub fn new() -> Result<Self> { Self::with_template(KIND_CONFIG_TEMPLATE) }

    /// Renderer over a caller-provided template using the same variables
    /// (`name`, `port_mappings`).
    pub fn with_template(source: &str) -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, source).map_err(render_error)?;
        Ok(Self { tera })
    }

    pub fn render_to_string(&self, spec: &ClusterSpec) -> Result<String> {
        let mut ctx = Context::new();
        ctx.insert("name", spec.name());
        ctx.insert("port_mappings", spec.port_mappings());
        let mut out = self.tera.render(TEMPLATE_NAME, &ctx).map_err(render_error)?;
        if !out.ends_with('\n') { out.push('\n'); }
        Ok(out)
    }

    pub fn render(&self, spec: &ClusterSpec) -> Result<RenderedConfig> {
        let text = self.render_to_string(spec)?;
        TransientFile::write("kind-config-", ".yaml", text)
    }
}

fn render_error(e: tera::Error) -> BootstrapError {
    // tera's top-level message rarely says what went wrong; the cause chain does.
    let mut reason = e.to_string();
    let mut src = std::error::Error::source(&e);
    while let Some(s) = src {
        reason.push_str(": ");
        reason.push_str(&s.to_string());
        src = s.source();
    }
    BootstrapError::Render { what: "kind config".into(), reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kflex_core::{ErrorKind, PortMapping, Profile, Protocol};

    fn spec() -> ClusterSpec {
        ClusterSpec::new(
            "kubeflex",
            [PortMapping::tcp(9080, 9080), PortMapping { container_port: 9443, host_port: 19443, protocol: Protocol::Udp }],
        )
        .expect("spec")
    }

    #[test]
    fn rendered_text_has_name_once_and_every_port_pair() {
        let text = ConfigRenderer::new().expect("renderer").render_to_string(&spec()).expect("render");
        assert_eq!(text.matches("kubeflex").count(), 1);
        assert!(text.contains("\nname: kubeflex\n"));
        assert!(text.contains("  - containerPort: 9080\n    hostPort: 9080\n    protocol: TCP\n"));
        assert!(text.contains("  - containerPort: 9443\n    hostPort: 19443\n    protocol: UDP\n"));
        assert!(text.contains("node-labels: \"ingress-ready=true\""));
    }

    #[test]
    fn port_block_follows_profile() {
        let spec = ClusterSpec::for_profile("kubeflex", Profile::Standard).expect("spec");
        let text = ConfigRenderer::new().expect("renderer").render_to_string(&spec).expect("render");
        assert!(text.contains("containerPort: 80\n    hostPort: 80\n"));
        assert!(text.contains("containerPort: 443\n    hostPort: 443\n"));
        assert!(!text.contains("9080"));
    }

    #[test]
    fn render_writes_complete_file_and_remove_deletes_it() {
        let rendered = ConfigRenderer::new().expect("renderer").render(&spec()).expect("render");
        let path = rendered.path().to_path_buf();
        let name = path.file_name().and_then(|n| n.to_str()).expect("utf8 name");
        assert!(name.starts_with("kind-config-") && name.ends_with(".yaml"));
        let on_disk = std::fs::read_to_string(&path).expect("readable right away");
        assert_eq!(on_disk, rendered.content());
        rendered.remove().expect("remove");
        assert!(!path.exists());
    }

    #[test]
    fn dropping_transient_file_deletes_it() {
        let path = {
            let f = TransientFile::write("kflex-test-", ".txt", "x").expect("write");
            f.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn malformed_template_is_render_error() {
        let err = ConfigRenderer::with_template("name: {{ name ").err().expect("parse error");
        assert_eq!(err.kind(), ErrorKind::RenderError);

        // Parses, but references a variable that is never provided.
        let r = ConfigRenderer::with_template("name: {{ missing }}").expect("parses");
        assert_eq!(r.render_to_string(&spec()).unwrap_err().kind(), ErrorKind::RenderError);
    }
}
