use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub blob_dir: PathBuf,
    pub jwt_secret: String,
    pub public_url: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("HUDDLE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("HUDDLE_JWT_SECRET is unset or still a placeholder");
        }

        let host = lookup("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("HUDDLE_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("HUDDLE_PORT must be a port number")?;
        let db_path = lookup("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into()).into();
        let blob_dir = lookup("HUDDLE_BLOB_DIR").unwrap_or_else(|| "./blobs".into()).into();
        let public_url = lookup("HUDDLE_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", port));

        Ok(Self {
            host,
            port,
            db_path,
            blob_dir,
            jwt_secret,
            public_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[("HUDDLE_JWT_SECRET", "abc")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.db_path, PathBuf::from("huddle.db"));
        assert_eq!(config.public_url, "http://127.0.0.1:3000");
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(ServerConfig::from_lookup(lookup(&[])).is_err());
        assert!(
            ServerConfig::from_lookup(lookup(&[("HUDDLE_JWT_SECRET", "dev-secret-change-me")])).is_err()
        );
    }

    #[test]
    fn bad_port_is_an_error() {
        let vars = [("HUDDLE_JWT_SECRET", "abc"), ("HUDDLE_PORT", "http")];
        assert!(ServerConfig::from_lookup(lookup(&vars)).is_err());
    }
}
