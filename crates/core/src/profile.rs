use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{BootstrapError, PortMapping};

/// Base argument list of the ingress-nginx controller container. Profiles
/// append the port flags and their extra switches.
const BASE_CONTROLLER_ARGS: &[&str] = &[
    "/nginx-ingress-controller",
    "--election-id=ingress-nginx-leader",
    "--controller-class=k8s.io/ingress-nginx",
    "--ingress-class=nginx",
    "--configmap=$(POD_NAMESPACE)/ingress-nginx-controller",
    "--validating-webhook=:8443",
    "--validating-webhook-certificate=/usr/local/certificates/cert",
    "--validating-webhook-key=/usr/local/certificates/key",
    "--watch-ingress-without-class=true",
    "--publish-status-address=localhost",
];

/// Deployment profile. Profiles differ only in the ingress ports and one
/// controller flag; the bootstrap sequence is the same for all of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Ingress on 9080/9443 with TLS passthrough enabled.
    #[default]
    Passthrough,
    /// Ingress on the stock 80/443.
    Standard,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::Passthrough, Profile::Standard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Passthrough => "passthrough",
            Profile::Standard => "standard",
        }
    }

    pub fn http_port(&self) -> u16 {
        match self {
            Profile::Passthrough => 9080,
            Profile::Standard => 80,
        }
    }

    pub fn https_port(&self) -> u16 {
        match self {
            Profile::Passthrough => 9443,
            Profile::Standard => 443,
        }
    }

    pub fn port_mappings(&self) -> [PortMapping; 2] {
        [
            PortMapping::tcp(self.http_port(), self.http_port()),
            PortMapping::tcp(self.https_port(), self.https_port()),
        ]
    }

    /// Full replacement argument list for the controller container.
    pub fn ingress_controller_args(&self) -> Vec<String> {
        let mut args: Vec<String> = BASE_CONTROLLER_ARGS.iter().map(|s| s.to_string()).collect();
        if matches!(self, Profile::Passthrough) {
            args.push("--enable-ssl-passthrough".to_string());
        }
        args.push(format!("--http-port={}", self.http_port()));
        args.push(format!("--https-port={}", self.https_port()));
        args
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Profile {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Profile::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BootstrapError::InvalidSpec(format!("unknown profile {:?} (expect passthrough or standard)", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_args_carry_extra_flag_and_ports() {
        let args = Profile::Passthrough.ingress_controller_args();
        assert_eq!(args.first().map(String::as_str), Some("/nginx-ingress-controller"));
        assert!(args.iter().any(|a| a == "--enable-ssl-passthrough"));
        assert_eq!(&args[args.len() - 2..], &["--http-port=9080".to_string(), "--https-port=9443".to_string()]);
    }

    #[test]
    fn standard_differs_only_in_ports_and_flag() {
        let pass = Profile::Passthrough.ingress_controller_args();
        let std = Profile::Standard.ingress_controller_args();
        assert_eq!(pass.len(), std.len() + 1);
        assert!(!std.iter().any(|a| a == "--enable-ssl-passthrough"));
        assert!(std.iter().any(|a| a == "--http-port=80"));
        assert_eq!(Profile::Standard.port_mappings()[1], PortMapping::tcp(443, 443));
    }

    #[test]
    fn parses_names() {
        assert_eq!("standard".parse::<Profile>().expect("ok"), Profile::Standard);
        assert_eq!("PassThrough".parse::<Profile>().expect("ok"), Profile::Passthrough);
        assert!("prod".parse::<Profile>().is_err());
    }
}
