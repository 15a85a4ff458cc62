//! Plugin handshake line.
//!
//! A plugin announces itself with one stdout line:
//! `CORE-VERSION|APP-VERSION|NETWORK|ADDRESS|PROTOCOL`, e.g.
//! `1|1|tcp|127.0.0.1:1234|grpc`. Extra trailing fields are ignored.

use std::fmt;
use std::str::FromStr;

use crate::error::ProvisionError;

/// Environment the plugin checks before serving.
pub const MAGIC_COOKIE_KEY: &str = "SHOES_PLUGIN_MAGIC_COOKIE";
pub const MAGIC_COOKIE_VALUE: &str = "are_you_a_shoes?";

pub const CORE_PROTOCOL_VERSION: u32 = 1;
pub const APP_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    Tcp(String),
    Unix(String),
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp(addr) => write!(f, "tcp://{addr}"),
            Network::Unix(path) => write!(f, "unix://{path}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub app_version: u32,
    pub network: Network,
}

impl FromStr for Handshake {
    type Err = ProvisionError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| ProvisionError::Handshake(format!("{why}: {:?}", line.trim()));
        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() < 5 {
            return Err(invalid("malformed handshake line"));
        }

        let core: u32 = parts[0].parse().map_err(|_| invalid("bad core version"))?;
        if core != CORE_PROTOCOL_VERSION {
            return Err(invalid("unsupported core protocol version"));
        }
        let app_version: u32 = parts[1].parse().map_err(|_| invalid("bad app version"))?;
        if app_version != APP_PROTOCOL_VERSION {
            return Err(invalid("unsupported app protocol version"));
        }
        if parts[3].is_empty() {
            return Err(invalid("empty address"));
        }
        let network = match parts[2] {
            "tcp" => Network::Tcp(parts[3].to_string()),
            "unix" => Network::Unix(parts[3].to_string()),
            _ => return Err(invalid("unsupported network")),
        };
        if parts[4] != "grpc" {
            return Err(invalid("unsupported protocol"));
        }

        Ok(Handshake {
            app_version,
            network,
        })
    }
}
