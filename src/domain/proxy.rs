//! The Proxy Pool's durable-facing record (distinct from the pool's
//! in-memory scheduling state in `proxy_pool::state`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// A single upstream proxy and its observed health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRecord {
    /// `host:port` or `host:port:user` when authenticated.
    pub id: String,
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub auth: Option<ProxyAuth>,
    pub healthy: bool,
    pub last_check_at: Option<DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
    pub last_error: Option<String>,
    pub usage_count: u64,
    pub cooling_until: Option<DateTime<Utc>>,
    /// Start of the most recent `with_proxy` invocation; breaks ties in
    /// selection (§4.1: minimum `usageCount`, then oldest `lastUsedAt`).
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    pub fn new(host: String, port: u16, protocol: ProxyProtocol, auth: Option<ProxyAuth>) -> Self {
        let id = match &auth {
            Some(a) => format!("{host}:{port}:{}", a.username),
            None => format!("{host}:{port}"),
        };
        Self {
            id,
            host,
            port,
            protocol,
            auth,
            healthy: true,
            last_check_at: None,
            response_time_ms: None,
            last_error: None,
            usage_count: 0,
            cooling_until: None,
            last_used_at: None,
        }
    }

    /// The scheme-prefixed URL reqwest/fantoccini expect, credentials
    /// included. Never log this; use `log_id` instead.
    pub fn url(&self) -> String {
        let scheme = match self.protocol {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        };
        match &self.auth {
            Some(auth) => format!(
                "{scheme}://{}:{}@{}:{}",
                auth.username, auth.password, self.host, self.port
            ),
            None => format!("{scheme}://{}:{}", self.host, self.port),
        }
    }

    /// A short, credential-free identifier safe to put in logs/metrics.
    pub fn log_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// On-disk proxy file format (spec §6): `{proxies: [...], lastUpdated}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyFile {
    pub proxies: Vec<ProxyFileEntry>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyFileEntry {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub auth: Option<ProxyAuth>,
}
