use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

/// Server settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("BEACON_JWT_SECRET").unwrap_or_else(|| {
            warn!("BEACON_JWT_SECRET not set, using the development secret");
            DEFAULT_JWT_SECRET.into()
        });
        let db_path = lookup("BEACON_DB_PATH").unwrap_or_else(|| "beacon.db".into());
        let host = lookup("BEACON_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("BEACON_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("BEACON_PORT is not a port number: {:?}", raw))?,
            None => 3000,
        };

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            host,
            port,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
