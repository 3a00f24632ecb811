//! kflex core types: cluster spec, deployment profiles, step bookkeeping and errors.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

mod config;
mod error;
mod profile;

pub use config::BootstrapConfig;
pub use error::{BootstrapError, ErrorKind, Result};
pub use profile::Profile;

/// Cluster name used when nothing else is configured.
pub const DEFAULT_CLUSTER_NAME: &str = "kubeflex";

/// Transport keyword of a port mapping as understood by the provisioning tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Protocol {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            _ => Err(BootstrapError::InvalidSpec(format!("unknown transport protocol: {:?}", s))),
        }
    }
}

/// One `extraPortMappings` entry of the control-plane node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self { container_port, host_port, protocol: Protocol::Tcp }
    }
}

/// Desired cluster topology. Immutable once constructed; build it with
/// [`ClusterSpec::new`] or [`ClusterSpec::for_profile`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    name: String,
    port_mappings: SmallVec<[PortMapping; 4]>,
}

impl ClusterSpec {
    pub fn new(name: impl Into<String>, port_mappings: impl IntoIterator<Item = PortMapping>) -> Result<Self> {
        let name = name.into();
        validate_cluster_name(&name)?;
        let port_mappings: SmallVec<[PortMapping; 4]> = port_mappings.into_iter().collect();
        if port_mappings.is_empty() {
            return Err(BootstrapError::InvalidSpec("at least one port mapping is required".into()));
        }
        Ok(Self { name, port_mappings })
    }

    /// Spec carrying the fixed port block of `profile`.
    pub fn for_profile(name: impl Into<String>, profile: Profile) -> Result<Self> {
        Self::new(name, profile.port_mappings())
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn port_mappings(&self) -> &[PortMapping] { &self.port_mappings }
}

fn validate_cluster_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BootstrapError::InvalidSpec("cluster name must not be empty".into()));
    }
    let valid_chars = name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(BootstrapError::InvalidSpec(format!(
            "invalid cluster name {:?} (expect lowercase alphanumerics and '-')",
            name
        )));
    }
    Ok(())
}

/// Bootstrap steps in execution order. The two checks are narrated through logs only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    CheckTool,
    InstallTool,
    CheckCluster,
    CreateCluster,
    InstallIngress,
    PatchIngress,
}

impl Step {
    pub fn label(&self) -> &'static str {
        match self {
            Step::CheckTool => "Checking if kind is installed...",
            Step::InstallTool => "Installing kind...",
            Step::CheckCluster => "Checking if a kind cluster already exists...",
            Step::CreateCluster => "Creating kind cluster...",
            Step::InstallIngress => "Installing nginx ingress...",
            Step::PatchIngress => "Patching nginx ingress...",
        }
    }

    /// Short stable identifier, used for metric labels.
    pub fn id(&self) -> &'static str {
        match self {
            Step::CheckTool => "check-tool",
            Step::InstallTool => "install-tool",
            Step::CheckCluster => "check-cluster",
            Step::CreateCluster => "create-cluster",
            Step::InstallIngress => "install-ingress",
            Step::PatchIngress => "patch-ingress",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.id()) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool { matches!(self, StepStatus::Done | StepStatus::Failed) }

    /// Pending -> Running -> {Done | Failed}. Returns false and leaves `self`
    /// untouched for any other transition.
    pub fn advance(&mut self, next: StepStatus) -> bool {
        let allowed = matches!(
            (*self, next),
            (StepStatus::Pending, StepStatus::Running)
                | (StepStatus::Running, StepStatus::Done)
                | (StepStatus::Running, StepStatus::Failed)
        );
        if allowed { *self = next; }
        allowed
    }
}

pub mod prelude {
    pub use super::{BootstrapConfig, BootstrapError, ClusterSpec, PortMapping, Profile, Protocol, Step, StepStatus};
}
