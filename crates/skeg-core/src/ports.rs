//! Port spec parsing
//!
//! Accepted forms, each with an optional `/tcp` or `/udp` suffix:
//!
//! - `80` or `7000-7005`: expose container ports, host port auto-assigned
//! - `8080:80`: bind host port 8080 to container port 80
//! - `127.0.0.1:8080:80` and `127.0.0.1::80`: as above, on one host address

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use skeg_provider::{PortConfig, PortInfo};
use std::fmt;

/// Container port reserved for the ssh daemon
pub const SSH_PORT: u16 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published container port.
///
/// `host_port` 0 means the runtime picks a free port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub host_ip: String,
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl Port {
    /// The binding every environment gets for its ssh daemon
    pub fn ssh() -> Self {
        Self {
            host_ip: String::new(),
            host_port: 0,
            container_port: SSH_PORT,
            protocol: Protocol::Tcp,
        }
    }

    pub fn is_ssh(&self) -> bool {
        self.container_port == SSH_PORT && self.protocol == Protocol::Tcp
    }

    /// Convert a runtime port entry, skipping protocols we don't manage
    pub fn from_info(info: &PortInfo) -> Option<Self> {
        Some(Self {
            host_ip: info.host_ip.clone().unwrap_or_default(),
            host_port: info.host_port.unwrap_or(0),
            container_port: info.container_port,
            protocol: Protocol::parse(&info.protocol)?,
        })
    }

    pub fn to_config(&self) -> PortConfig {
        PortConfig {
            host_port: Some(self.host_port),
            container_port: self.container_port,
            protocol: self.protocol.as_str().to_string(),
            host_ip: if self.host_ip.is_empty() {
                None
            } else {
                Some(self.host_ip.clone())
            },
        }
    }
}

/// Parse user port specs into bindings.
///
/// A spec asking for 22/tcp fails with [`CoreError::ReservedPort`] even when
/// other specs in the list are malformed.
pub fn parse_ports<S: AsRef<str>>(specs: &[S]) -> Result<Vec<Port>> {
    let mut ports = Vec::new();
    let mut first_error = None;

    for spec in specs {
        match parse_port_spec(spec.as_ref()) {
            Ok(parsed) => ports.extend(parsed),
            Err(e @ CoreError::ReservedPort(_)) => return Err(e),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(ports),
    }
}

fn parse_port_spec(spec: &str) -> Result<Vec<Port>> {
    let raw = spec.trim();
    let invalid = || CoreError::InvalidPort(spec.to_string());

    let (body, protocol) = match raw.rsplit_once('/') {
        Some((body, proto)) => (body, Protocol::parse(proto).ok_or_else(invalid)?),
        None => (raw, Protocol::Tcp),
    };

    let parts: Vec<&str> = body.split(':').collect();
    let (host_ip, host, container) = match parts.as_slice() {
        [container] => ("", "", *container),
        [host, container] => ("", *host, *container),
        [ip, host, container] => (*ip, *host, *container),
        _ => return Err(invalid()),
    };

    let (first, last) = parse_range(container).ok_or_else(invalid)?;
    let host_port = if host.is_empty() {
        0
    } else if host.contains('-') {
        // validate first so "abc-def:80" is reported as malformed
        parse_range(host).ok_or_else(invalid)?;
        return Err(CoreError::UnsupportedRange(spec.to_string()));
    } else {
        host.parse::<u16>().map_err(|_| invalid())?
    };

    if (first..=last).contains(&SSH_PORT) && protocol == Protocol::Tcp {
        return Err(CoreError::ReservedPort(spec.to_string()));
    }
    if first != last && host_port != 0 {
        return Err(CoreError::UnsupportedRange(spec.to_string()));
    }

    Ok((first..=last)
        .map(|container_port| Port {
            host_ip: host_ip.to_string(),
            host_port,
            container_port,
            protocol,
        })
        .collect())
}

fn parse_range(s: &str) -> Option<(u16, u16)> {
    let (start, end) = match s.split_once('-') {
        Some((start, end)) => (start, end),
        None => (s, s),
    };
    let start: u16 = start.parse().ok()?;
    let end: u16 = end.parse().ok()?;
    if start == 0 || end < start {
        return None;
    }
    Some((start, end))
}
