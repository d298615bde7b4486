use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub gateway: GatewayConfig,
    pub payment: PaymentConfig,
}

/// Kashier credentials and transport knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub api_key: String,
    /// Full shared secret in Kashier's `key_id$secret` form.
    pub secret_key: String,
    pub currency: String,
    pub timeout_secs: u64,
}

/// Engine tuning: lock TTLs, retry and reconciliation bounds.
#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub lock_ttl_secs: u64,
    pub webhook_lock_ttl_secs: u64,
    pub reconciliation_max_attempts: i32,
    pub reconciliation_initial_delay_secs: u64,
    pub reconciliation_max_delay_secs: u64,
    pub reconciliation_batch_size: i64,
    pub reconciliation_sweep_interval_secs: u64,
    pub retry_max_attempts: i32,
    pub retry_age_threshold_secs: i64,
    pub retry_sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env_or("SERVER_PORT", "3000").parse()?,
            database_url: env::var("DATABASE_URL")?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            gateway: GatewayConfig {
                base_url: env_or("KASHIER_BASE_URL", "https://api.kashier.io"),
                merchant_id: env::var("KASHIER_MERCHANT_ID")?,
                api_key: env::var("KASHIER_API_KEY")?,
                secret_key: env::var("KASHIER_SECRET_KEY")?,
                currency: env_or("KASHIER_CURRENCY", "EGP"),
                timeout_secs: env_or("PAYMENT_GATEWAY_TIMEOUT", "30").parse()?,
            },
            payment: PaymentConfig {
                lock_ttl_secs: env_or("PAYMENT_LOCK_TTL", "10").parse()?,
                webhook_lock_ttl_secs: env_or("PAYMENT_WEBHOOK_LOCK_TTL", "30").parse()?,
                reconciliation_max_attempts: env_or("PAYMENT_RECONCILIATION_MAX_ATTEMPTS", "10")
                    .parse()?,
                reconciliation_initial_delay_secs: env_or(
                    "PAYMENT_RECONCILIATION_INITIAL_DELAY",
                    "60",
                )
                .parse()?,
                reconciliation_max_delay_secs: env_or("PAYMENT_RECONCILIATION_MAX_DELAY", "3600")
                    .parse()?,
                reconciliation_batch_size: env_or("PAYMENT_RECONCILIATION_BATCH_SIZE", "50")
                    .parse()?,
                reconciliation_sweep_interval_secs: env_or(
                    "PAYMENT_RECONCILIATION_SWEEP_INTERVAL",
                    "60",
                )
                .parse()?,
                retry_max_attempts: env_or("PAYMENT_MAX_RETRY_ATTEMPTS", "3").parse()?,
                retry_age_threshold_secs: env_or("PAYMENT_RETRY_AGE_THRESHOLD", "300").parse()?,
                retry_sweep_interval_secs: env_or("PAYMENT_RETRY_SWEEP_INTERVAL", "120").parse()?,
            },
        })
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        PaymentConfig {
            lock_ttl_secs: 10,
            webhook_lock_ttl_secs: 30,
            reconciliation_max_attempts: 10,
            reconciliation_initial_delay_secs: 60,
            reconciliation_max_delay_secs: 3600,
            reconciliation_batch_size: 50,
            reconciliation_sweep_interval_secs: 60,
            retry_max_attempts: 3,
            retry_age_threshold_secs: 300,
            retry_sweep_interval_secs: 120,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_payment_config_is_bounded() {
        let config = PaymentConfig::default();
        assert!(config.lock_ttl_secs >= 10 && config.lock_ttl_secs <= 30);
        assert!(config.reconciliation_max_attempts > 0);
        assert!(config.reconciliation_initial_delay_secs < config.reconciliation_max_delay_secs);
    }
}
