use std::path::PathBuf;

use url::Url;

use huddle_sync::config::DEFAULT_COLLECTION;

use crate::error::ClientError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_CACHE_PATH: &str = "huddle-cache.db";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: Url,
    pub cache_path: PathBuf,
    pub collection: String,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("HUDDLE_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.into());
        let server_url = Url::parse(&server_url)?;
        if !matches!(server_url.scheme(), "http" | "https") {
            return Err(ClientError::Protocol(format!(
                "HUDDLE_SERVER_URL must be http or https, got {}",
                server_url.scheme()
            )));
        }

        let cache_path = lookup("HUDDLE_CACHE_PATH")
            .unwrap_or_else(|| DEFAULT_CACHE_PATH.into())
            .into();
        let collection = lookup("HUDDLE_COLLECTION")
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COLLECTION.into());

        Ok(Self {
            server_url,
            cache_path,
            collection,
        })
    }
}

/// `base` with `segments` appended to its path. Segments are percent-encoded.
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ClientError::Protocol(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// WebSocket URL of the live feed: same host, `ws`/`wss` scheme.
pub fn feed_url(base: &Url) -> Result<Url, ClientError> {
    let mut url = endpoint(base, &["feed"])?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Protocol(format!("cannot switch {} to {}", base, scheme)))?;
    Ok(url)
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
    fn defaults_point_at_a_local_server() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_url.as_str(), "http://127.0.0.1:3000/");
        assert_eq!(config.cache_path, PathBuf::from("huddle-cache.db"));
        assert_eq!(config.collection, "messages");
    }

    #[test]
    fn non_http_server_url_is_refused() {
        assert!(ClientConfig::from_lookup(lookup(&[("HUDDLE_SERVER_URL", "ftp://example.com")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("HUDDLE_SERVER_URL", "not a url")])).is_err());
    }

    #[test]
    fn endpoints_keep_a_path_prefix_and_encode_keys() {
        let base = Url::parse("https://chat.example.com/api/").unwrap();
        let url = endpoint(&base, &["blobs", "u1-1-my photo.jpg"]).unwrap();
        assert_eq!(url.as_str(), "https://chat.example.com/api/blobs/u1-1-my%20photo.jpg");
    }

    #[test]
    fn feed_url_switches_to_websocket_scheme() {
        let plain = Url::parse("http://127.0.0.1:3000").unwrap();
        assert_eq!(feed_url(&plain).unwrap().as_str(), "ws://127.0.0.1:3000/feed");

        let tls = Url::parse("https://chat.example.com").unwrap();
        assert_eq!(feed_url(&tls).unwrap().as_str(), "wss://chat.example.com/feed");
    }
}
