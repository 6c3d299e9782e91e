use std::env;
use std::time::Duration;

/// Desktop Chrome user agent sent upstream when the client did not send one.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Route the gateway is mounted on; also the prefix of every rewritten URI
    pub proxy_path: String,
    /// Bound on each upstream fetch, body included
    pub upstream_timeout_secs: u64,
    /// `max-age` injected on media responses that carry no caching directive
    pub segment_max_age_secs: u32,
    /// User-Agent used upstream when the browser did not send one
    pub default_user_agent: String,
    /// Permit loopback/private IP literals as proxy targets.
    /// Dev default: true. Prod default: false.
    pub allow_private_targets: bool,
    /// Per-IP requests per minute (0 disables the limiter)
    pub rate_limit_rpm: u32,
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Check if running in dev mode
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let proxy_path = env::var("PROXY_PATH").unwrap_or_else(|_| "/api/proxy".to_string());
        if !proxy_path.starts_with('/') || proxy_path.contains('?') {
            return Err(format!("PROXY_PATH must be an absolute path, got '{proxy_path}'").into());
        }

        let upstream_timeout_secs: u64 = env::var("UPSTREAM_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        if upstream_timeout_secs == 0 {
            return Err("UPSTREAM_TIMEOUT_SECS must be greater than zero".into());
        }

        let segment_max_age_secs = env::var("SEGMENT_MAX_AGE_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .unwrap_or(60);

        let default_user_agent =
            env::var("DEFAULT_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());

        let allow_private_targets = env::var("ALLOW_PRIVATE_TARGETS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(is_dev);

        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        Ok(Config {
            port,
            is_dev,
            proxy_path,
            upstream_timeout_secs,
            segment_max_age_secs,
            default_user_agent,
            allow_private_targets,
            rate_limit_rpm,
        })
    }

    /// Upstream fetch timeout as a [`Duration`]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serialize all env-var tests to prevent races between parallel test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "DEV_MODE",
        "PORT",
        "PROXY_PATH",
        "UPSTREAM_TIMEOUT_SECS",
        "SEGMENT_MAX_AGE_SECS",
        "DEFAULT_USER_AGENT",
        "ALLOW_PRIVATE_TARGETS",
        "RATE_LIMIT_RPM",
    ];

    /// Clear every config var, apply `set`, run `f`, then restore.
    fn with_env(set: &[(&str, &str)], f: impl FnOnce()) {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());

        let saved: Vec<(&str, Option<String>)> =
            ALL_VARS.iter().map(|k| (*k, env::var(k).ok())).collect();

        for k in ALL_VARS {
            // SAFETY: serialized by ENV_LOCK; no other thread touches env vars concurrently.
            unsafe { env::remove_var(k) };
        }
        for (k, v) in set {
            unsafe { env::set_var(k, v) };
        }

        f();

        for (k, old) in saved {
            match old {
                Some(v) => unsafe { env::set_var(k, v) },
                None => unsafe { env::remove_var(k) },
            }
        }
    }

    #[test]
    fn dev_mode_uses_defaults() {
        with_env(&[("DEV_MODE", "true")], || {
            let config = Config::from_env().expect("should succeed in dev mode");
            assert!(config.is_dev);
            assert_eq!(config.port, 3000);
            assert_eq!(config.proxy_path, "/api/proxy");
            assert_eq!(config.upstream_timeout(), Duration::from_secs(30));
            assert_eq!(config.segment_max_age_secs, 60);
            assert_eq!(config.default_user_agent, DEFAULT_USER_AGENT);
            assert!(config.allow_private_targets);
            assert_eq!(config.rate_limit_rpm, 0);
        });
    }

    #[test]
    fn prod_mode_requires_port() {
        with_env(&[], || {
            let result = Config::from_env();
            assert!(result.is_err(), "Should fail without PORT in prod mode");
        });
    }

    #[test]
    fn prod_mode_blocks_private_targets_by_default() {
        with_env(&[("PORT", "8080")], || {
            let config = Config::from_env().unwrap();
            assert!(!config.is_dev);
            assert!(!config.allow_private_targets);
        });
    }

    #[test]
    fn private_targets_can_be_enabled_in_prod() {
        with_env(&[("PORT", "8080"), ("ALLOW_PRIVATE_TARGETS", "true")], || {
            let config = Config::from_env().unwrap();
            assert!(config.allow_private_targets);
        });
    }

    #[test]
    fn custom_proxy_path() {
        with_env(&[("DEV_MODE", "true"), ("PROXY_PATH", "/relay")], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.proxy_path, "/relay");
        });
    }

    #[test]
    fn relative_proxy_path_rejected() {
        with_env(&[("DEV_MODE", "true"), ("PROXY_PATH", "relay")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn zero_timeout_rejected() {
        with_env(&[("DEV_MODE", "true"), ("UPSTREAM_TIMEOUT_SECS", "0")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn numeric_overrides_parsed() {
        with_env(
            &[
                ("DEV_MODE", "true"),
                ("UPSTREAM_TIMEOUT_SECS", "12"),
                ("SEGMENT_MAX_AGE_SECS", "5"),
                ("RATE_LIMIT_RPM", "600"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.upstream_timeout_secs, 12);
                assert_eq!(config.segment_max_age_secs, 5);
                assert_eq!(config.rate_limit_rpm, 600);
            },
        );
    }
}
