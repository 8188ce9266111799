//! Process-wide configuration, read from the environment once at boot and
//! frozen behind `Arc`. Missing or malformed required keys abort startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub jwt_secret: String,
    /// 64 hex characters = 32 raw bytes, validated at load.
    pub encryption_key: String,
    /// Externally-visible absolute base URL, no trailing slash. Signature
    /// verification builds `fullURI` from this, never from the Host header.
    pub base_url: String,
    pub bind_addr: String,
    pub output_prefix: String,
    pub allow_unsigned: bool,
    pub environment: Environment,
    pub sandbox_workers: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match optional("CODEFLOW_ENV").as_deref() {
            Some("development") => Environment::Development,
            Some("production") | None => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "CODEFLOW_ENV",
                    reason: format!("expected 'development' or 'production', got '{}'", other),
                })
            }
        };

        let encryption_key = required("CODEFLOW_ENCRYPTION_KEY")?;
        validate_encryption_key(&encryption_key)?;

        let base_url = required("CODEFLOW_BASE_URL")?
            .trim_end_matches('/')
            .to_string();

        let allow_unsigned = flag("CODEFLOW_ALLOW_UNSIGNED");
        if allow_unsigned && environment == Environment::Production {
            return Err(ConfigError::Invalid {
                var: "CODEFLOW_ALLOW_UNSIGNED",
                reason: "the unsigned-request bypass cannot be enabled in production".to_string(),
            });
        }

        let sandbox_workers = match optional("CODEFLOW_SANDBOX_WORKERS") {
            Some(raw) => raw.parse::<usize>().map_err(|_| ConfigError::Invalid {
                var: "CODEFLOW_SANDBOX_WORKERS",
                reason: format!("expected a positive integer, got '{}'", raw),
            })?,
            None => 4,
        };

        Ok(Self {
            database_url: required("CODEFLOW_DATABASE_URL")?,
            client_id: required("CODEFLOW_CLIENT_ID")?,
            client_secret: required("CODEFLOW_CLIENT_SECRET")?,
            jwt_secret: required("CODEFLOW_JWT_SECRET")?,
            encryption_key,
            base_url,
            bind_addr: optional("CODEFLOW_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".into()),
            output_prefix: optional("CODEFLOW_OUTPUT_PREFIX").unwrap_or_else(|| "codeflow".into()),
            allow_unsigned,
            environment,
            sandbox_workers: sandbox_workers.max(1),
        })
    }
}

fn validate_encryption_key(key: &str) -> Result<(), ConfigError> {
    if key.len() != 64 {
        return Err(ConfigError::Invalid {
            var: "CODEFLOW_ENCRYPTION_KEY",
            reason: format!("expected 64 hex characters, got {}", key.len()),
        });
    }
    if hex::decode(key).is_err() {
        return Err(ConfigError::Invalid {
            var: "CODEFLOW_ENCRYPTION_KEY",
            reason: "not valid hex".to_string(),
        });
    }
    Ok(())
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn optional(var: &'static str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn flag(var: &'static str) -> bool {
    matches!(
        std::env::var(var).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_key_shape() {
        assert!(validate_encryption_key(&"ab".repeat(32)).is_ok());
        assert!(validate_encryption_key("short").is_err());
        assert!(validate_encryption_key(&"zz".repeat(32)).is_err());
    }
}
