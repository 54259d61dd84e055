//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub callback: CallbackConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Inbound payment-callback verification settings
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    /// Shared secret for HMAC signature verification. Optional so that
    /// `log-only` deployments can run unsigned, but `require` mode refuses
    /// to start without it.
    pub shared_secret: Option<String>,
    pub enforcement: SignatureEnforcement,
    /// Replay acceptance window in seconds. `validate()` rejects values
    /// below [`MIN_CALLBACK_MAX_AGE_SECS`].
    pub max_age_secs: i64,
    pub require_nonce: bool,
    pub nonce_prune_interval_secs: u64,
}

/// Whether signature verification gates callback processing or is only recorded.
///
/// This is an explicit, documented choice: there is no implicit
/// "unverifiable but processed anyway" fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEnforcement {
    Require,
    LogOnly,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Floor for the replay acceptance window.
pub const MIN_CALLBACK_MAX_AGE_SECS: i64 = 30;

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            callback: CallbackConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.callback.validate()?;
        self.logging.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost,http://127.0.0.1".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("PORT cannot be 0".to_string()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue("HOST cannot be empty".to_string()));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CallbackConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let enforcement = match env::var("CALLBACK_SIGNATURE_ENFORCEMENT")
            .unwrap_or_else(|_| "require".to_string())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "require" => SignatureEnforcement::Require,
            "log-only" | "log_only" => SignatureEnforcement::LogOnly,
            _ => {
                return Err(ConfigError::InvalidValue(
                    "CALLBACK_SIGNATURE_ENFORCEMENT must be 'require' or 'log-only'".to_string(),
                ))
            }
        };

        let max_age_secs: i64 = env::var("CALLBACK_MAX_AGE_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CALLBACK_MAX_AGE_SECS".to_string()))?;

        Ok(CallbackConfig {
            shared_secret: env::var("CALLBACK_SHARED_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            enforcement,
            max_age_secs,
            require_nonce: env::var("CALLBACK_REQUIRE_NONCE")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CALLBACK_REQUIRE_NONCE".to_string()))?,
            nonce_prune_interval_secs: env::var("NONCE_PRUNE_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("NONCE_PRUNE_INTERVAL_SECS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enforcement == SignatureEnforcement::Require && self.shared_secret.is_none() {
            return Err(ConfigError::MissingVariable(
                "CALLBACK_SHARED_SECRET (required when CALLBACK_SIGNATURE_ENFORCEMENT=require)"
                    .to_string(),
            ));
        }

        if self.max_age_secs < MIN_CALLBACK_MAX_AGE_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "CALLBACK_MAX_AGE_SECS must be at least {}",
                MIN_CALLBACK_MAX_AGE_SECS
            )));
        }

        if self.nonce_prune_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "NONCE_PRUNE_INTERVAL_SECS cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
