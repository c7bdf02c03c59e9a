use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::LockoutPolicy;

const DEV_JWT_SECRET: &str = "dev-only-jwt-secret-do-not-use-in-production";
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug)]
pub struct BankingConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub lockout: LockoutConfig,
    pub rate_limit: RateLimitConfig,
    pub timeouts: TimeoutConfig,
    pub security: SecurityConfig,
    pub demo_seed_password: Option<SecretString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Unset in dev selects the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Unset in dev selects the in-process revocation cache.
    pub url: Option<String>,
}

#[derive(Debug)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub issuer: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
}

#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub max_failed_attempts: u32,
    pub failure_window_seconds: i64,
    pub lockout_duration_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_per_minute: u32,
    pub login_burst: u32,
    pub transfer_per_minute: u32,
    pub transfer_burst: u32,
    pub global_ip_limit: u32,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub cache_timeout_ms: u64,
    pub request_timeout_seconds: u64,
    pub settlement_retry_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl BankingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = BankingConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("banking-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: get_optional_env("DATABASE_URL", is_prod)?,
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
            },
            redis: RedisConfig {
                url: get_optional_env("REDIS_URL", is_prod)?,
            },
            jwt: JwtConfig {
                secret: SecretString::new(get_env("JWT_SECRET", Some(DEV_JWT_SECRET), is_prod)?),
                issuer: get_env("JWT_ISSUER", Some("banking-service"), is_prod)?,
                access_token_ttl_minutes: get_parsed("ACCESS_TOKEN_TTL_MINUTES", "15", is_prod)?,
                refresh_token_ttl_days: get_parsed("REFRESH_TOKEN_TTL_DAYS", "7", is_prod)?,
            },
            lockout: LockoutConfig {
                max_failed_attempts: get_parsed("LOCKOUT_MAX_FAILED_ATTEMPTS", "5", is_prod)?,
                failure_window_seconds: get_parsed(
                    "LOCKOUT_FAILURE_WINDOW_SECONDS",
                    "900",
                    is_prod,
                )?,
                lockout_duration_seconds: get_parsed("LOCKOUT_DURATION_SECONDS", "900", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login_per_minute: get_parsed("RATE_LIMIT_LOGIN_PER_MINUTE", "5", is_prod)?,
                login_burst: get_parsed("RATE_LIMIT_LOGIN_BURST", "5", is_prod)?,
                transfer_per_minute: get_parsed("RATE_LIMIT_TRANSFER_PER_MINUTE", "10", is_prod)?,
                transfer_burst: get_parsed("RATE_LIMIT_TRANSFER_BURST", "10", is_prod)?,
                global_ip_limit: get_parsed("RATE_LIMIT_GLOBAL_IP_LIMIT", "300", is_prod)?,
            },
            timeouts: TimeoutConfig {
                cache_timeout_ms: get_parsed("CACHE_TIMEOUT_MS", "250", is_prod)?,
                request_timeout_seconds: get_parsed("REQUEST_TIMEOUT_SECONDS", "10", is_prod)?,
                settlement_retry_seconds: get_parsed("SETTLEMENT_RETRY_SECONDS", "5", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            demo_seed_password: env::var("DEMO_SEED_PASSWORD")
                .ok()
                .filter(|v| !v.is_empty())
                .map(SecretString::new),
        };

        config.validate()?;
        Ok(config)
    }

    /// Dev defaults without reading the environment. Backends are in-memory.
    pub fn development() -> Self {
        Self {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "banking-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
            },
            redis: RedisConfig { url: None },
            jwt: JwtConfig {
                secret: SecretString::new(DEV_JWT_SECRET.to_string()),
                issuer: "banking-service".to_string(),
                access_token_ttl_minutes: 15,
                refresh_token_ttl_days: 7,
            },
            lockout: LockoutConfig {
                max_failed_attempts: 5,
                failure_window_seconds: 900,
                lockout_duration_seconds: 900,
            },
            rate_limit: RateLimitConfig {
                login_per_minute: 5,
                login_burst: 5,
                transfer_per_minute: 10,
                transfer_burst: 10,
                global_ip_limit: 300,
            },
            timeouts: TimeoutConfig {
                cache_timeout_ms: 250,
                request_timeout_seconds: 10,
                settlement_retry_seconds: 5,
            },
            security: SecurityConfig {
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            demo_seed_password: None,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_ttl_minutes <= 0 {
            return Err(config_error("ACCESS_TOKEN_TTL_MINUTES must be positive"));
        }

        if self.jwt.refresh_token_ttl_days <= 0 {
            return Err(config_error("REFRESH_TOKEN_TTL_DAYS must be positive"));
        }

        if self.jwt.secret.expose_secret().len() < MIN_JWT_SECRET_LEN {
            return Err(config_error(format!(
                "JWT_SECRET must be at least {} bytes",
                MIN_JWT_SECRET_LEN
            )));
        }

        if self.lockout.max_failed_attempts == 0
            || self.lockout.failure_window_seconds <= 0
            || self.lockout.lockout_duration_seconds <= 0
        {
            return Err(config_error("Lockout thresholds must be positive"));
        }

        let limits = &self.rate_limit;
        if [
            limits.login_per_minute,
            limits.login_burst,
            limits.transfer_per_minute,
            limits.transfer_burst,
            limits.global_ip_limit,
        ]
        .contains(&0)
        {
            return Err(config_error("Rate limits must be greater than 0"));
        }

        if self.timeouts.cache_timeout_ms == 0 || self.timeouts.request_timeout_seconds == 0 {
            return Err(config_error("Timeouts must be greater than 0"));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }

            if self.database.url.is_none() || self.redis.url.is_none() {
                return Err(config_error(
                    "DATABASE_URL and REDIS_URL are required in production",
                ));
            }

            if self.jwt.secret.expose_secret() == DEV_JWT_SECRET {
                return Err(config_error("JWT_SECRET must be set in production"));
            }

            if self.demo_seed_password.is_some() {
                tracing::warn!("DEMO_SEED_PASSWORD is ignored in production");
            }
        }

        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    pub fn access_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.jwt.access_token_ttl_minutes)
    }

    pub fn refresh_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.jwt.refresh_token_ttl_days)
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_failed_attempts: self.lockout.max_failed_attempts,
            failure_window: chrono::Duration::seconds(self.lockout.failure_window_seconds),
            lockout_duration: chrono::Duration::seconds(self.lockout.lockout_duration_seconds),
        }
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.cache_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_timeout_seconds)
    }

    pub fn settlement_retry(&self) -> Duration {
        Duration::from_secs(self.timeouts.settlement_retry_seconds)
    }
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(message.into()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(config_error(format!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(config_error(format!("{} is required but not set", key)))
            }
        }
    }
}

fn get_optional_env(key: &str, is_prod: bool) -> Result<Option<String>, AppError> {
    if is_prod {
        return get_env(key, None, true).map(Some);
    }
    Ok(env::var(key).ok().filter(|v| !v.is_empty()))
}

fn get_parsed<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| config_error(format!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
