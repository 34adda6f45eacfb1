//! Port bindings and the engine's textual port listing.
//!
//! The listing is a comma-separated list where each token is either
//! `<containerPort>/<protocol>` (exposed, unbound) or
//! `<host>:<hostPort>-><containerPort>/<protocol>` (bound).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortParseError {
    #[error("malformed port token '{0}'")]
    Malformed(String),
    #[error("invalid port number '{0}'")]
    InvalidPort(String),
    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = PortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" | "TCP" => Ok(Protocol::Tcp),
            "udp" | "UDP" => Ok(Protocol::Udp),
            "sctp" | "SCTP" => Ok(Protocol::Sctp),
            other => Err(PortParseError::UnknownProtocol(other.to_owned())),
        }
    }
}

/// Host side of a published port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A container port as reported by the engine, bound to the host or not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostAddress>,
}

impl PortBinding {
    pub fn is_bound(&self) -> bool {
        self.host.is_some()
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "{host}->")?;
        }
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

impl FromStr for PortBinding {
    type Err = PortParseError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        let mut sides = token.split("->").map(str::trim);
        let (host_side, container_side) = match (sides.next(), sides.next(), sides.next()) {
            (Some(container), None, None) => (None, container),
            (Some(host), Some(container), None) => (Some(host), container),
            _ => return Err(PortParseError::Malformed(token.to_owned())),
        };

        let (port, protocol) = container_side
            .split_once('/')
            .ok_or_else(|| PortParseError::Malformed(token.to_owned()))?;
        let container_port = parse_port(port)?;
        let protocol = protocol.parse()?;

        let host = match host_side {
            None => None,
            Some(host_side) => {
                // Split at the last colon so IPv6 hosts such as `:::32771` work.
                let (host, port) = host_side
                    .rsplit_once(':')
                    .ok_or_else(|| PortParseError::Malformed(token.to_owned()))?;
                Some(HostAddress {
                    host: host.to_owned(),
                    port: parse_port(port)?,
                })
            }
        };

        Ok(PortBinding {
            container_port,
            protocol,
            host,
        })
    }
}

fn parse_port(s: &str) -> Result<u16, PortParseError> {
    s.trim()
        .parse::<u16>()
        .map_err(|_| PortParseError::InvalidPort(s.to_owned()))
}

/// Parse a full port listing such as `0.0.0.0:32771->80/tcp, 443/tcp`.
pub fn parse_port_list(listing: &str) -> Result<Vec<PortBinding>, PortParseError> {
    listing
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::parse)
        .collect()
}
