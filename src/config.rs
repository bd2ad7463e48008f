// config.rs
use std::{env, fmt::Display, str::FromStr};

use reqwest::Url;
use tracing::{info, warn};

use crate::error::PollError;
use crate::geo::DEFAULT_ENDPOINTS;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub geo_endpoints: Vec<String>,
    pub admin_email: String,
    pub admin_password: Option<String>,
    pub admin_session_ttl_minutes: i64,
}

impl Config {
    /// Reads the environment (after `.env`, if present). Malformed values are fatal.
    pub fn from_env() -> Result<Self, PollError> {
        let geo_endpoints = match var("GEO_ENDPOINTS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|endpoint| !endpoint.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
        };

        let config = Self {
            port: try_load("PORT", "3030")?,
            database_url: var("DATABASE_URL"),
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            geo_endpoints,
            admin_email: var("ADMIN_EMAIL").unwrap_or_else(|| "admin@localhost".to_string()),
            admin_password: var("ADMIN_PASSWORD"),
            admin_session_ttl_minutes: try_load("ADMIN_SESSION_TTL_MINUTES", "60")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PollError> {
        for endpoint in &self.geo_endpoints {
            let candidate = endpoint.replace("{ip}", "127.0.0.1");
            Url::parse(&candidate)
                .map_err(|e| PollError::Schema(format!("GEO_ENDPOINTS entry '{endpoint}': {e}")))?;
        }

        if let Some(url) = &self.database_url {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(PollError::Schema(
                    "DATABASE_URL must be a postgres:// URL".to_string(),
                ));
            }
        }

        if self.admin_session_ttl_minutes <= 0 {
            return Err(PollError::Schema(
                "ADMIN_SESSION_TTL_MINUTES must be positive".to_string(),
            ));
        }

        if self.admin_password.is_none() {
            warn!("ADMIN_PASSWORD not set, admin login is disabled");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3030,
            database_url: None,
            database_max_connections: 5,
            geo_endpoints: DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            admin_email: "admin@localhost".to_string(),
            admin_password: None,
            admin_session_ttl_minutes: 60,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, PollError>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim()
        .parse()
        .map_err(|e| PollError::Schema(format!("invalid {key} value '{raw}': {e}")))
}
