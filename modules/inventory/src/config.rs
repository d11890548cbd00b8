use std::env;

/// Inventory service configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub nats_url: String,
    pub http_port: u16,
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

pub fn db_from_env() -> Result<DbConfig, String> {
    Ok(DbConfig {
        host: var("DB_HOST")?,
        port: parse("DB_PORT", var_or("DB_PORT", "5432"))?,
        username: var("DB_USERNAME")?,
        password: var("DB_PASSWORD")?,
        name: var("DB_NAME")?,
        ssl_mode: var_or("DB_SSL_MODE", "disable"),
        min_conns: parse("DB_MIN_CONNS", var_or("DB_MIN_CONNS", "2"))?,
        max_conns: parse("DB_MAX_CONNS", var_or("DB_MAX_CONNS", "10"))?,
    })
}

pub fn nats_url_from_env() -> Result<String, String> {
    let host = var("NATS_HOST")?;
    let port = var_or("NATS_PORT", "4222");
    Ok(format!("nats://{host}:{port}"))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Config {
            db: db_from_env()?,
            nats_url: nats_url_from_env()?,
            http_port: parse("HTTP_PORT", var_or("HTTP_PORT", "8081"))?,
        })
    }
}
