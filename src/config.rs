// src/config.rs - Configuration management
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use anyhow::{Context, Result};
use rand::{thread_rng, Rng, distributions::Alphanumeric};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub inventory: InventoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub client_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
    pub bcrypt_cost: u32,
    pub max_login_attempts: u32,
    pub lockout_duration_minutes: u64,
    pub allow_self_registration: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub console_enabled: bool,
}

/// Stock classifier thresholds and alert behaviour.
///
/// quantity <= critical_threshold        -> critical
/// critical_threshold < q <= low_threshold -> low
/// quantity > low_threshold              -> normal
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InventoryConfig {
    pub critical_threshold: i64,
    pub low_threshold: i64,
    /// Single dismiss duration for all stock toasts.
    pub toast_dismiss_seconds: u64,
}

// Dummy defaults for tests (no ENV read here)
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests_only!!!".to_string(),
            token_expiration_hours: 24,
            bcrypt_cost: 10,
            max_login_attempts: 5,
            lockout_duration_minutes: 15,
            allow_self_registration: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            client_timeout: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:bhcms.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
            idle_timeout: 600,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://127.0.0.1:8080".to_string(),
                "http://localhost:8080".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_enabled: true,
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 10,
            low_threshold: 20,
            toast_dismiss_seconds: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
            inventory: InventoryConfig::default(),
        }
    }
}

pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        let path = Path::new(&config_file);
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", config_file))?;
        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config)?;

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn override_with_env(config: &mut Config) -> Result<()> {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Ok(port_str) = env::var("BHCMS_PORT") {
        if let Ok(port) = port_str.parse::<u16>() {
            config.server.port = port;
        }
    }
    if let Ok(workers_str) = env::var("BHCMS_WORKERS") {
        if let Ok(workers) = workers_str.parse::<usize>() {
            config.server.workers = Some(workers);
        }
    }
    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Ok(expiration_str) = env::var("AUTH_TOKEN_EXPIRATION_HOURS") {
        if let Ok(expiration) = expiration_str.parse::<i64>() {
            config.auth.token_expiration_hours = expiration;
        }
    }
    if let Ok(max_str) = env::var("AUTH_MAX_LOGIN_ATTEMPTS") {
        if let Ok(max) = max_str.parse::<u32>() {
            config.auth.max_login_attempts = max;
        }
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Ok(max_conn_str) = env::var("DATABASE_MAX_CONNECTIONS") {
        if let Ok(max_conn) = max_conn_str.parse::<u32>() {
            config.database.max_connections = max_conn;
        }
    }
    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(critical_str) = env::var("STOCK_CRITICAL_THRESHOLD") {
        if let Ok(critical) = critical_str.parse::<i64>() {
            config.inventory.critical_threshold = critical;
        }
    }
    if let Ok(low_str) = env::var("STOCK_LOW_THRESHOLD") {
        if let Ok(low) = low_str.parse::<i64>() {
            config.inventory.low_threshold = low;
        }
    }
    if let Ok(dismiss_str) = env::var("TOAST_DISMISS_SECONDS") {
        if let Ok(dismiss) = dismiss_str.parse::<u64>() {
            config.inventory.toast_dismiss_seconds = dismiss;
        }
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        if self.inventory.critical_threshold >= self.inventory.low_threshold {
            return Err(anyhow::anyhow!(
                "critical_threshold ({}) must be < low_threshold ({})",
                self.inventory.critical_threshold,
                self.inventory.low_threshold
            ));
        }

        if self.inventory.toast_dismiss_seconds == 0 {
            return Err(anyhow::anyhow!("toast_dismiss_seconds must be at least 1"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        env::var("BHCMS_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("BHCMS starting up...");
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {}",
            if self.database.url.contains("sqlite") { "SQLite" }
            else if self.database.url.contains("postgres") { "PostgreSQL" }
            else { "Unknown" });
        log::info!("Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!(
            "Stock thresholds: critical <= {}, low <= {}",
            self.inventory.critical_threshold, self.inventory.low_threshold
        );

        if !self.is_production() {
            log::warn!("Running in development mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        env::remove_var("BHCMS_ENV");
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.inventory.critical_threshold, 10);
        assert_eq!(config.inventory.low_threshold, 20);
        assert_eq!(config.inventory.toast_dismiss_seconds, 5);
        assert!(!config.is_production());
        assert!(config.auth.jwt_secret.len() >= 32);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.auth.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = "a".repeat(32);
        assert!(config.validate().is_ok());

        config.database.max_connections = 1;
        config.database.min_connections = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_validation() {
        let mut config = Config::default();

        // critical must stay below low
        config.inventory.critical_threshold = 20;
        config.inventory.low_threshold = 20;
        assert!(config.validate().is_err());

        config.inventory.critical_threshold = 5;
        config.inventory.low_threshold = 15;
        assert!(config.validate().is_ok());

        config.inventory.toast_dismiss_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_loading() {
        let toml_content = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [inventory]
        critical_threshold = 5
        low_threshold = 12
        "#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, toml_content).unwrap();

        let config: Config = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.inventory.critical_threshold, 5);
        assert_eq!(config.inventory.low_threshold, 12);
        // Untouched sections keep defaults
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_generate_jwt_secret() {
        let secret = generate_jwt_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
