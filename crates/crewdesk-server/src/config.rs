use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub outbound_buffer: usize,
    pub heartbeat: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("CREWDESK_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!(
                "CREWDESK_JWT_SECRET is unset or still a placeholder; \
                 it must match the auth service's signing secret"
            );
        }

        let db_path = lookup("CREWDESK_DB_PATH").unwrap_or_else(|| "crewdesk.db".into());
        let host = lookup("CREWDESK_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("CREWDESK_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("CREWDESK_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {host}:{port}"))?;

        let outbound_buffer: usize = lookup("CREWDESK_OUTBOUND_BUFFER")
            .unwrap_or_else(|| "256".into())
            .parse()
            .context("CREWDESK_OUTBOUND_BUFFER must be a positive integer")?;
        if outbound_buffer == 0 {
            bail!("CREWDESK_OUTBOUND_BUFFER must be at least 1");
        }

        let heartbeat_secs: u64 = lookup("CREWDESK_HEARTBEAT_SECS")
            .unwrap_or_else(|| "15".into())
            .parse()
            .context("CREWDESK_HEARTBEAT_SECS must be a whole number of seconds")?;
        if heartbeat_secs == 0 {
            bail!("CREWDESK_HEARTBEAT_SECS must be at least 1");
        }

        Ok(Self {
            jwt_secret,
            db_path: db_path.into(),
            addr,
            outbound_buffer,
            heartbeat: Duration::from_secs(heartbeat_secs),
        })
    }
}
