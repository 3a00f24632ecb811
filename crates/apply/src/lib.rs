//! kflex apply: patch documents that reconfigure the running ingress
//! controller in place. Pure construction; nothing here talks to a cluster
//! or validates indices against live objects.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use kflex_core::{BootstrapError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Kinds of resources the bootstrap patches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Deployment,
    Service,
}

impl ResourceKind {
    /// kubectl resource prefix (`deployment/x`, `svc/x`).
    pub fn short(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::Service => "svc",
        }
    }

    /// JSON pointer to the ports array of the resource. Deployments address
    /// the first container of the pod template.
    pub fn ports_pointer(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "/spec/template/spec/containers/0/ports",
            ResourceKind::Service => "/spec/ports",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Ok(ResourceKind::Deployment),
            "service" | "services" | "svc" => Ok(ResourceKind::Service),
            other => Err(BootstrapError::InvalidSpec(format!("unsupported patch target kind: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchTarget {
    pub kind: ResourceKind,
    pub name: String,
}

impl PatchTarget {
    pub fn deployment(name: impl Into<String>) -> Self { Self { kind: ResourceKind::Deployment, name: name.into() } }
    pub fn service(name: impl Into<String>) -> Self { Self { kind: ResourceKind::Service, name: name.into() } }
}

impl fmt::Display for PatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.kind.short(), self.name) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
}

/// One RFC 6902 operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: Json,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchDocument {
    /// Strategic-merge body; replaces whole subtrees.
    Strategic(Json),
    /// JSON-Patch; operations apply in listed order and each path must
    /// already exist on the target.
    Json(Vec<PatchOperation>),
}

impl PatchDocument {
    pub fn patch_type(&self) -> &'static str {
        match self {
            PatchDocument::Strategic(_) => "strategic",
            PatchDocument::Json(_) => "json",
        }
    }

    /// YAML body, as written to a `--patch-file`.
    pub fn to_yaml(&self) -> Result<String> {
        match self {
            PatchDocument::Strategic(body) => serde_yaml::to_string(body).map_err(|e| patch_error(self, e)),
            PatchDocument::Json(ops) => serde_yaml::to_string(ops).map_err(|e| patch_error(self, e)),
        }
    }

    /// Compact JSON, as passed to `-p`.
    pub fn to_json(&self) -> Result<String> {
        match self {
            PatchDocument::Strategic(body) => serde_json::to_string(body).map_err(|e| patch_error(self, e)),
            PatchDocument::Json(ops) => serde_json::to_string(ops).map_err(|e| patch_error(self, e)),
        }
    }
}

fn patch_error(doc: &PatchDocument, e: impl fmt::Display) -> BootstrapError {
    BootstrapError::Render { what: format!("{} patch", doc.patch_type()), reason: e.to_string() }
}

/// A patch bound to the single resource it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetedPatch {
    pub target: PatchTarget,
    pub document: PatchDocument,
}

/// Strategic-merge patch replacing the full argument list of `container` in a
/// deployment's pod template. Containers merge on `name`, so the list of
/// other containers is left alone.
pub fn build_container_args_patch<S: AsRef<str>>(container: &str, args: &[S]) -> PatchDocument {
    let args: Vec<Json> = args.iter().map(|a| Json::String(a.as_ref().to_string())).collect();
    PatchDocument::Strategic(serde_json::json!({
        "spec": {"template": {"spec": {"containers": [
            {"name": container, "args": args}
        ]}}}
    }))
}

/// `replace` of `<ports>/<index>/<field>` on a resource of `kind`.
pub fn build_port_replacement(kind: ResourceKind, index: usize, field: &str, value: impl Into<Json>) -> PatchOperation {
    PatchOperation {
        op: PatchOp::Replace,
        path: format!("{}/{}/{}", kind.ports_pointer(), index, field),
        value: value.into(),
    }
}

/// Port rewrites for the ingress controller: the deployment's container and
/// host ports, then the service ports. Index 0 is http, index 1 is https, as
/// laid out by the upstream kind manifest.
pub fn ingress_port_patches(deployment: &str, service: &str, http: u16, https: u16) -> [TargetedPatch; 2] {
    let deploy_ops = [(0, http), (1, https)]
        .into_iter()
        .flat_map(|(i, port)| {
            [
                build_port_replacement(ResourceKind::Deployment, i, "containerPort", port),
                build_port_replacement(ResourceKind::Deployment, i, "hostPort", port),
            ]
        })
        .collect();
    let svc_ops = [(0, http), (1, https)]
        .into_iter()
        .map(|(i, port)| build_port_replacement(ResourceKind::Service, i, "port", port))
        .collect();
    [
        TargetedPatch { target: PatchTarget::deployment(deployment), document: PatchDocument::Json(deploy_ops) },
        TargetedPatch { target: PatchTarget::service(service), document: PatchDocument::Json(svc_ops) },
    ]
}
