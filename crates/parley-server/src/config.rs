use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// base64url P-256 scalar; `None` means generate one per process.
    pub vapid_private_key: Option<String>,
    pub vapid_subject: String,
    pub push_timeout: Duration,
    pub trust_proxy: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let host = var("PARLEY_HOST", "0.0.0.0");
        let port: u16 = var("PARLEY_PORT", "3000")
            .parse()
            .context("PARLEY_PORT must be a port number")?;
        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let push_timeout_secs: u64 = var("PARLEY_PUSH_TIMEOUT_SECS", "10")
            .parse()
            .context("PARLEY_PUSH_TIMEOUT_SECS must be a number of seconds")?;

        let trust_proxy = matches!(
            var("PARLEY_TRUST_PROXY", "false").to_ascii_lowercase().as_str(),
            "1" | "true" | "yes"
        );

        Ok(Self {
            addr,
            db_path: var("PARLEY_DB_PATH", "parley.db").into(),
            jwt_secret,
            vapid_private_key: get("PARLEY_VAPID_PRIVATE_KEY").filter(|k| !k.trim().is_empty()),
            vapid_subject: var("PARLEY_VAPID_SUBJECT", "mailto:admin@localhost"),
            push_timeout: Duration::from_secs(push_timeout_secs),
            trust_proxy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("PARLEY_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.vapid_subject, "mailto:admin@localhost");
        assert_eq!(config.push_timeout, Duration::from_secs(10));
        assert!(config.vapid_private_key.is_none());
        assert!(!config.trust_proxy);
    }

    #[test]
    fn refuses_missing_or_placeholder_secret() {
        assert!(load(&[]).is_err());
        assert!(load(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("PARLEY_JWT_SECRET", "a-real-secret"),
            ("PARLEY_HOST", "127.0.0.1"),
            ("PARLEY_PORT", "8080"),
            ("PARLEY_TRUST_PROXY", "true"),
            ("PARLEY_PUSH_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:8080".parse().unwrap());
        assert!(config.trust_proxy);
        assert_eq!(config.push_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_port() {
        assert!(load(&[("PARLEY_JWT_SECRET", "s3cr3t!"), ("PARLEY_PORT", "http")]).is_err());
    }
}
