// src/services/identity.rs

//! Request identity rotation.
//!
//! Every request goes out with a User-Agent drawn from a browser pool and,
//! when enabled, through a proxy drawn from the configured list.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue};

use crate::error::Result;
use crate::models::SpiderConfig;
use crate::utils::RandomSource;

/// Browser User-Agents used when the config does not provide its own.
const DEFAULT_USER_AGENTS: &[&str] = &[
    // Chrome
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Firefox
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    // Edge
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.0.0",
    // Safari
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8";

/// Supplies rotating header sets and proxy endpoints.
pub struct IdentityProvider {
    user_agents: Vec<HeaderValue>,
    accept_language: HeaderValue,
    proxies: Vec<String>,
    rng: Arc<dyn RandomSource>,
}

impl IdentityProvider {
    /// Build the pools from config. Unusable User-Agent strings are dropped.
    pub fn new(config: &SpiderConfig, rng: Arc<dyn RandomSource>) -> Result<Self> {
        let configured: Vec<&str> = config.user_agents.iter().map(String::as_str).collect();
        let source = if configured.is_empty() {
            DEFAULT_USER_AGENTS.to_vec()
        } else {
            configured
        };
        let user_agents = source
            .into_iter()
            .filter_map(|ua| HeaderValue::from_str(ua.trim()).ok())
            .collect();

        let accept_language = HeaderValue::from_str(&config.accept_language)
            .unwrap_or_else(|_| HeaderValue::from_static("en;q=0.8"));

        let mut proxies: Vec<String> = config
            .proxies
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if let Some(path) = &config.proxy_file {
            proxies.extend(load_proxy_file(path)?);
        }

        Ok(Self {
            user_agents,
            accept_language,
            proxies,
            rng,
        })
    }

    /// One identity, drawn fresh on every call.
    pub fn next_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !self.user_agents.is_empty() {
            let idx = self.rng.pick(self.user_agents.len());
            headers.insert(header::USER_AGENT, self.user_agents[idx].clone());
        }
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(header::ACCEPT_LANGUAGE, self.accept_language.clone());
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );
        headers
    }

    /// A random proxy endpoint, or `None` when the pool is empty.
    pub fn next_proxy(&self) -> Option<&str> {
        if self.proxies.is_empty() {
            return None;
        }
        let idx = self.rng.pick(self.proxies.len());
        Some(self.proxies[idx].as_str())
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// User-Agent to hand to a headless browser.
    pub fn next_user_agent(&self) -> Option<String> {
        self.next_headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// Read a proxy list: one endpoint per line, `#` starts a comment line.
/// A missing file is an empty list.
pub fn load_proxy_file(path: &Path) -> Result<Vec<String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("Proxy file {} not found, continuing without it", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::FixedRandom;
    use std::io::Write;

    fn provider(config: &SpiderConfig, picks: Vec<usize>) -> IdentityProvider {
        IdentityProvider::new(config, Arc::new(FixedRandom::new(picks, vec![0.0]))).unwrap()
    }

    #[test]
    fn headers_rotate_user_agent_from_pool() {
        let config = SpiderConfig::default();
        let ids = provider(&config, vec![0, 4]);

        let first = ids.next_headers();
        let second = ids.next_headers();
        assert_eq!(first[header::USER_AGENT], DEFAULT_USER_AGENTS[0]);
        assert_eq!(second[header::USER_AGENT], DEFAULT_USER_AGENTS[4]);
        assert_eq!(first[header::ACCEPT_LANGUAGE], config.accept_language.as_str());
        assert!(first.contains_key(header::ACCEPT));
    }

    #[test]
    fn configured_user_agents_replace_defaults() {
        let config = SpiderConfig {
            user_agents: vec!["jobwatch-test/1.0".into()],
            ..SpiderConfig::default()
        };
        let ids = provider(&config, vec![3]);
        assert_eq!(ids.next_user_agent().as_deref(), Some("jobwatch-test/1.0"));
    }

    #[test]
    fn empty_proxy_pool_means_no_proxy() {
        let ids = provider(&SpiderConfig::default(), vec![0]);
        assert_eq!(ids.next_proxy(), None);
        assert_eq!(ids.proxy_count(), 0);
    }

    #[test]
    fn proxies_merge_inline_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# office proxies\n10.0.0.2:3128\n\n  10.0.0.3:3128  ").unwrap();

        let config = SpiderConfig {
            proxies: vec!["10.0.0.1:8080".into(), " ".into()],
            proxy_file: Some(file.path().to_path_buf()),
            ..SpiderConfig::default()
        };
        let ids = provider(&config, vec![2]);
        assert_eq!(ids.proxy_count(), 3);
        assert_eq!(ids.next_proxy(), Some("10.0.0.3:3128"));
    }

    #[test]
    fn missing_proxy_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let list = load_proxy_file(&tmp.path().join("none.txt")).unwrap();
        assert!(list.is_empty());
    }
}
