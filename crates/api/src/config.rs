//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub app_base_url: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Payment gateway
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,

    // Shared secret for the sweep trigger endpoint
    pub sweep_shared_secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),

            // Payment gateway
            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .map_err(|_| ConfigError::Missing("STRIPE_SECRET_KEY"))?,
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| ConfigError::Missing("STRIPE_WEBHOOK_SECRET"))?,

            sweep_shared_secret: {
                let secret = env::var("SWEEP_SHARED_SECRET")
                    .map_err(|_| ConfigError::Missing("SWEEP_SHARED_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "SWEEP_SHARED_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_vars() {
        env::set_var("DATABASE_URL", "postgres://localhost/opsdash_test");
        env::set_var("STRIPE_SECRET_KEY", "sk_test_abc");
        env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_test_abc");
        env::set_var(
            "SWEEP_SHARED_SECRET",
            "0123456789abcdef0123456789abcdef",
        );
    }

    fn cleanup() {
        for key in [
            "BIND_ADDRESS",
            "APP_BASE_URL",
            "DATABASE_URL",
            "DATABASE_MAX_CONNECTIONS",
            "STRIPE_SECRET_KEY",
            "STRIPE_WEBHOOK_SECRET",
            "SWEEP_SHARED_SECRET",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_with_defaults() {
        cleanup();
        set_required_vars();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.database_max_connections, 20);

        cleanup();
    }

    #[test]
    #[serial]
    fn test_missing_database_url_fails() {
        cleanup();
        set_required_vars();
        env::remove_var("DATABASE_URL");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));

        cleanup();
    }

    #[test]
    #[serial]
    fn test_short_sweep_secret_rejected() {
        cleanup();
        set_required_vars();
        env::set_var("SWEEP_SHARED_SECRET", "too-short");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::WeakSecret(_))
        ));

        cleanup();
    }
}
