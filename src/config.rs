use std::{env, time::Duration};

use derive_more::FromStr;
use garde::Validate;
use serde::Serialize;

/// Deployment environment, mirrors the ambient stack's own distinction:
/// gates pretty- vs JSON-formatted logs and whether TLS is mandatory on
/// outbound SMTP submission.
#[derive(Debug, Default, Clone, Copy, FromStr, Serialize, PartialEq, Eq)]
pub enum Environment {
    Staging,
    Production,
    #[default]
    Development,
}

impl Environment {
    pub fn from_env() -> Self {
        env::var("ENVIRONMENT")
            .map(|s| s.parse())
            .inspect_err(|_| {
                tracing::warn!("did not find ENVIRONMENT env var, defaulting to development")
            })
            .unwrap_or(Ok(Environment::Development))
            .expect("invalid ENVIRONMENT env var, must be one of: development, production, staging")
    }
}

const SECRET_DENYLIST: &[&str] = &["changeme", "secret", "password", "test"];

fn validate_secret(secret: &String, _: &()) -> garde::Result {
    if secret.len() < 32 {
        return Err(garde::Error::new("secret must be at least 32 bytes long"));
    }
    if SECRET_DENYLIST.contains(&secret.to_lowercase().as_str()) {
        return Err(garde::Error::new("secret is a known placeholder value"));
    }
    Ok(())
}

/// Startup configuration for the gateway. Every field is read once from the
/// environment (see [`GatewayConfig::from_env`]) and wrapped in an `Arc`
/// afterwards; nothing reads the environment again after construction.
#[derive(Debug, Clone, Validate)]
pub struct GatewayConfig {
    #[garde(length(min = 1))]
    pub service_domains: Vec<String>,

    #[garde(range(min = 1))]
    pub ephemeral_ttl_seconds: u64,
    #[garde(range(min = 1))]
    pub ephemeral_capacity: usize,
    #[garde(range(min = 1))]
    pub reaper_interval_seconds: u64,
    #[garde(range(min = 1))]
    pub reaper_hard_ceiling_grace_seconds: u64,

    #[garde(range(min = 1))]
    pub analyzer_timeout_seconds: u64,
    #[garde(skip)]
    pub analyzer_endpoint: Option<String>,
    #[garde(skip)]
    pub analyzer_api_key: Option<String>,

    #[garde(range(min = 1))]
    pub outbound_retry_attempts: u32,
    #[garde(range(min = 1))]
    pub outbound_send_timeout_seconds: u64,

    #[garde(range(min = 1))]
    pub webhook_max_body_bytes: u64,
    #[garde(range(min = 1))]
    pub webhook_signature_max_age_seconds: i64,
    #[garde(range(min = 1))]
    pub webhook_replay_cache_size: usize,
    #[garde(custom(validate_secret))]
    pub webhook_signing_secret: String,

    #[garde(range(min = 1))]
    pub rate_limit_rpm: u32,

    #[garde(skip)]
    pub dry_run: bool,
    #[garde(range(min = 1))]
    pub shutdown_drain_seconds: u64,
    #[garde(skip)]
    pub notify_on_block: bool,

    #[garde(skip)]
    pub environment: Environment,

    #[garde(dive)]
    pub outbound: OutboundConfig,
}

#[derive(Debug, Clone, Validate)]
pub struct OutboundConfig {
    #[garde(length(min = 1))]
    pub sending_domain: String,
    #[garde(skip)]
    pub api_endpoint: Option<String>,
    #[garde(skip)]
    pub api_key: Option<String>,
    #[garde(skip)]
    pub smtp_host: Option<String>,
    #[garde(skip)]
    pub smtp_port: Option<u16>,
    #[garde(skip)]
    pub smtp_username: Option<String>,
    #[garde(skip)]
    pub smtp_password: Option<String>,
}

impl GatewayConfig {
    pub fn ephemeral_ttl(&self) -> Duration {
        Duration::from_secs(self.ephemeral_ttl_seconds)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_seconds)
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_seconds)
    }

    pub fn outbound_send_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_send_timeout_seconds)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_seconds)
    }

    /// Loads configuration from the environment, applying the defaults
    /// documented in the configuration table, then runs fail-fast
    /// validation. Panics (aborting the process before any listener binds)
    /// if a required value is missing or an invariant is violated.
    pub fn from_env() -> anyhow::Result<Self> {
        fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
            env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let service_domains = env::var("SERVICE_DOMAINS")
            .map_err(|_| anyhow::anyhow!("SERVICE_DOMAINS must be set"))?
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let config = GatewayConfig {
            service_domains,
            ephemeral_ttl_seconds: var_or("EPHEMERAL_TTL_SECONDS", 300),
            ephemeral_capacity: var_or("EPHEMERAL_CAPACITY", 100),
            reaper_interval_seconds: var_or("REAPER_INTERVAL_SECONDS", 60),
            reaper_hard_ceiling_grace_seconds: var_or("REAPER_HARD_CEILING_GRACE_SECONDS", 60),
            analyzer_timeout_seconds: var_or("ANALYZER_TIMEOUT_SECONDS", 30),
            analyzer_endpoint: env::var("ANALYZER_ENDPOINT").ok(),
            analyzer_api_key: env::var("ANALYZER_API_KEY").ok(),
            outbound_retry_attempts: var_or("OUTBOUND_RETRY_ATTEMPTS", 3),
            outbound_send_timeout_seconds: var_or("OUTBOUND_SEND_TIMEOUT_SECONDS", 10),
            webhook_max_body_bytes: var_or("WEBHOOK_MAX_BODY_BYTES", 5 * 1024 * 1024),
            webhook_signature_max_age_seconds: var_or("WEBHOOK_SIGNATURE_MAX_AGE_SECONDS", 300),
            webhook_replay_cache_size: var_or("WEBHOOK_REPLAY_CACHE_SIZE", 10_000),
            webhook_signing_secret: env::var("WEBHOOK_SIGNING_SECRET")
                .map_err(|_| anyhow::anyhow!("WEBHOOK_SIGNING_SECRET must be set"))?,
            rate_limit_rpm: var_or("RATE_LIMIT_RPM", 100),
            dry_run: var_or("DRY_RUN", false),
            shutdown_drain_seconds: var_or("SHUTDOWN_DRAIN_SECONDS", 30),
            notify_on_block: var_or("NOTIFY_ON_BLOCK", false),
            environment: Environment::from_env(),
            outbound: OutboundConfig {
                sending_domain: env::var("OUTBOUND_SENDING_DOMAIN")
                    .map_err(|_| anyhow::anyhow!("OUTBOUND_SENDING_DOMAIN must be set"))?,
                api_endpoint: env::var("OUTBOUND_API_ENDPOINT").ok(),
                api_key: env::var("OUTBOUND_API_KEY").ok(),
                smtp_host: env::var("OUTBOUND_SMTP_HOST").ok(),
                smtp_port: env::var("OUTBOUND_SMTP_PORT").ok().and_then(|v| v.parse().ok()),
                smtp_username: env::var("OUTBOUND_SMTP_USERNAME").ok(),
                smtp_password: env::var("OUTBOUND_SMTP_PASSWORD").ok(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        GatewayConfig {
            service_domains: vec!["shield.tld".to_owned()],
            ephemeral_ttl_seconds: 300,
            ephemeral_capacity: 100,
            reaper_interval_seconds: 60,
            reaper_hard_ceiling_grace_seconds: 60,
            analyzer_timeout_seconds: 30,
            analyzer_endpoint: None,
            analyzer_api_key: None,
            outbound_retry_attempts: 3,
            outbound_send_timeout_seconds: 10,
            webhook_max_body_bytes: 5 * 1024 * 1024,
            webhook_signature_max_age_seconds: 300,
            webhook_replay_cache_size: 10_000,
            webhook_signing_secret: "x".repeat(32),
            rate_limit_rpm: 100,
            dry_run: true,
            shutdown_drain_seconds: 30,
            notify_on_block: false,
            environment: Environment::Development,
            outbound: OutboundConfig {
                sending_domain: "shield.tld".to_owned(),
                api_endpoint: None,
                api_key: None,
                smtp_host: None,
                smtp_port: None,
                smtp_username: None,
                smtp_password: None,
            },
        }
    }
}
