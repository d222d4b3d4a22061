//! Server configuration.
//!
//! A flat string key/value store (`http.port`, `store.max_bytes_total`, ...)
//! filled from defaults and then overridden from the environment:
//!
//! ```bash
//! export DROP__HTTP__PORT=9000                # http.port
//! export DROP__STORE__MINUTES_PER_GIGABYTE=60 # store.minutes_per_gigabyte
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use drop_store::StoreConfig;

pub const ENV_PREFIX: &str = "DROP__";

#[derive(Debug, Default, Clone)]
pub struct DropConfig {
    values: HashMap<String, String>,
}

impl DropConfig {
    /// Config with every key set to its default
    pub fn with_defaults() -> Self {
        let mut config = Self::default();
        config.set("http.host", "0.0.0.0");
        config.set("http.port", "8222");
        config.set("store.content_dir", "data");
        config.set("store.max_bytes_per_file", "100000000");
        config.set("store.max_bytes_total", "10000000000");
        config.set("store.minutes_per_gigabyte", "30");
        config.set("store.sweep_interval_secs", "1800");
        config.set("store.max_wait_secs", "3600");
        config.set("log.debug", "false");
        config
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Apply `PREFIX` + `SECTION__KEY` variables as `section.key`
    pub fn load_vars<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
            }
        }
    }

    pub fn load_env(&mut self) {
        self.load_vars(ENV_PREFIX, std::env::vars());
    }

    /// Typed value of a key that must be present
    pub fn parse<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        let raw = self
            .get(key)
            .with_context(|| format!("missing config key {key}"))?;
        raw.trim()
            .parse()
            .with_context(|| format!("invalid value {raw:?} for {key}"))
    }

    pub fn debug_logging(&self) -> bool {
        self.parse("log.debug").unwrap_or(false)
    }

    pub fn server(&self) -> anyhow::Result<ServerConfig> {
        let host: String = self.parse("http.host")?;
        let port: u16 = self.parse("http.port")?;
        let public_url = self
            .get("http.public_url")
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        Ok(ServerConfig {
            host,
            port,
            public_url,
        })
    }

    pub fn store(&self) -> anyhow::Result<StoreConfig> {
        let sweep_interval_secs: u64 = self.parse("store.sweep_interval_secs")?;
        if sweep_interval_secs == 0 {
            anyhow::bail!("store.sweep_interval_secs must be at least 1");
        }

        Ok(StoreConfig::new()
            .with_content_dir(self.parse::<PathBuf>("store.content_dir")?)
            .with_max_bytes_per_file(self.parse("store.max_bytes_per_file")?)
            .with_max_bytes_total(self.parse("store.max_bytes_total")?)
            .with_minutes_per_gigabyte(self.parse("store.minutes_per_gigabyte")?)
            .with_sweep_interval(Duration::from_secs(sweep_interval_secs))
            .with_max_wait(Duration::from_secs(self.parse("store.max_wait_secs")?)))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_url: String,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_build_store_config() {
        let config = DropConfig::with_defaults();
        let store = config.store().unwrap();

        assert_eq!(store.content_dir, PathBuf::from("data"));
        assert_eq!(store.max_bytes_per_file, 100_000_000);
        assert_eq!(store.max_bytes_total, 10_000_000_000);
        assert_eq!(store.minutes_per_gigabyte, 30.0);
        assert_eq!(store.sweep_interval, Duration::from_secs(1800));
        assert_eq!(store.max_wait, Duration::from_secs(3600));

        let server = config.server().unwrap();
        assert_eq!(server.addr(), "0.0.0.0:8222");
        assert_eq!(server.public_url, "http://localhost:8222");
        assert!(!config.debug_logging());
    }

    #[test]
    fn env_vars_override_nested_keys() {
        let mut config = DropConfig::with_defaults();
        config.load_vars(
            ENV_PREFIX,
            vars(&[
                ("DROP__HTTP__PORT", "9000"),
                ("DROP__HTTP__PUBLIC_URL", "https://drop.example.org"),
                ("DROP__STORE__MAX_BYTES_PER_FILE", "1234"),
                ("DROP__LOG__DEBUG", "true"),
                ("OTHER__HTTP__PORT", "1"),
            ]),
        );

        assert_eq!(config.get("http.port"), Some("9000"));
        assert!(config.has("http.public_url"));
        assert_eq!(config.store().unwrap().max_bytes_per_file, 1234);
        assert_eq!(config.server().unwrap().public_url, "https://drop.example.org");
        assert!(config.debug_logging());
    }

    #[test]
    fn invalid_numbers_are_reported_with_their_key() {
        let mut config = DropConfig::with_defaults();
        config.set("store.max_bytes_total", "lots");

        let err = config.store().unwrap_err();
        assert!(format!("{err:#}").contains("store.max_bytes_total"));
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let mut config = DropConfig::with_defaults();
        config.set("store.sweep_interval_secs", "0");

        let err = config.store().unwrap_err();
        assert!(err.to_string().contains("store.sweep_interval_secs"));
    }
}
