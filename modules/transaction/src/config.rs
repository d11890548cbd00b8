use std::env;
use std::time::Duration;

use crate::payment::client::Environment;

/// Transaction service configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub nats_url: String,
    pub redis_url: String,
    pub http_port: u16,
    pub inventory_rpc_url: String,
    pub environment: Environment,
    pub midtrans_server_key: String,
    /// Short-TTL deadline: tentative expiry.
    pub expiration_ttl: Duration,
    /// Final-TTL deadline: expiry becomes definitive and inventory learns.
    pub expiration_final_ttl: Duration,
    /// Reconcile sweep period.
    pub check_scheduler_period: Duration,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: String,
    pub min_conns: u32,
    pub max_conns: u32,
}

impl DbConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.username, self.password, self.host, self.port, self.name, self.ssl_mode
        )
    }
}

fn var(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{key} must be set"))
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, String> {
    raw.parse().map_err(|_| format!("{key} is not valid"))
}

fn duration_secs_or(key: &str, default_secs: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let environment = Environment::parse(&var_or("ENVIRONMENT", "local"));

        // Sandbox key outside production, live key in production.
        let midtrans_server_key = if environment.is_production() {
            var("MIDTRANS_PROD_SERVER_KEY")?
        } else {
            var("MIDTRANS_DEV_SERVER_KEY")?
        };

        Ok(Config {
            db: DbConfig {
                host: var("DB_HOST")?,
                port: parse("DB_PORT", var_or("DB_PORT", "5432"))?,
                username: var("DB_USERNAME")?,
                password: var("DB_PASSWORD")?,
                name: var("DB_NAME")?,
                ssl_mode: var_or("DB_SSL_MODE", "disable"),
                min_conns: parse("DB_MIN_CONNS", var_or("DB_MIN_CONNS", "2"))?,
                max_conns: parse("DB_MAX_CONNS", var_or("DB_MAX_CONNS", "10"))?,
            },
            nats_url: format!("nats://{}:{}", var("NATS_HOST")?, var_or("NATS_PORT", "4222")),
            redis_url: format!("redis://{}:{}", var("REDIS_HOST")?, var_or("REDIS_PORT", "6379")),
            http_port: parse("HTTP_PORT", var_or("HTTP_PORT", "8082"))?,
            inventory_rpc_url: var("INVENTORY_RPC_URL")?,
            environment,
            midtrans_server_key,
            expiration_ttl: duration_secs_or("TRANSACTION_EXPIRATION_TTL", 60),
            expiration_final_ttl: duration_secs_or("TRANSACTION_EXPIRATION_FINAL_TTL", 120),
            check_scheduler_period: duration_secs_or(
                "TRANSACTION_CHECK_SCHEDULER_IN_SECONDS",
                60,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_defaults_apply_when_unset_or_zero() {
        // Not set in the test environment.
        assert_eq!(
            duration_secs_or("TRANSACTION_EXPIRATION_TTL_TEST_UNSET", 60),
            Duration::from_secs(60)
        );
    }
}
