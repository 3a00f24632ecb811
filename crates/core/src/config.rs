use serde::{Deserialize, Serialize};

pub const DEFAULT_INGRESS_MANIFEST: &str =
    "https://raw.githubusercontent.com/kubernetes/ingress-nginx/main/deploy/static/provider/kind/deploy.yaml";

/// Tool locations and ingress coordinates. Defaults target a stock kind +
/// ingress-nginx setup; every field can be overridden through `KFLEX_*`
/// environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub kind_bin: String,
    pub kubectl_bin: String,
    /// Installer invocation for kind, program first.
    pub kind_install: Vec<String>,
    pub ingress_manifest: String,
    pub ingress_namespace: String,
    pub ingress_deployment: String,
    pub ingress_service: String,
    pub ingress_container: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            kind_bin: "kind".into(),
            kubectl_bin: "kubectl".into(),
            kind_install: vec!["go".into(), "install".into(), "sigs.k8s.io/kind@v0.19.0".into()],
            ingress_manifest: DEFAULT_INGRESS_MANIFEST.into(),
            ingress_namespace: "ingress-nginx".into(),
            ingress_deployment: "ingress-nginx-controller".into(),
            ingress_service: "ingress-nginx-controller".into(),
            ingress_container: "controller".into(),
        }
    }
}

impl BootstrapConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `KFLEX_*` keys.
    /// Empty values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("KFLEX_KIND_BIN") { cfg.kind_bin = v; }
        if let Some(v) = get("KFLEX_KUBECTL_BIN") { cfg.kubectl_bin = v; }
        if let Some(v) = get("KFLEX_KIND_INSTALL") {
            cfg.kind_install = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = get("KFLEX_INGRESS_MANIFEST") { cfg.ingress_manifest = v; }
        if let Some(v) = get("KFLEX_INGRESS_NAMESPACE") { cfg.ingress_namespace = v; }
        if let Some(v) = get("KFLEX_INGRESS_DEPLOYMENT") { cfg.ingress_deployment = v; }
        if let Some(v) = get("KFLEX_INGRESS_SERVICE") { cfg.ingress_service = v; }
        if let Some(v) = get("KFLEX_INGRESS_CONTAINER") { cfg.ingress_container = v; }
        cfg
    }
}
