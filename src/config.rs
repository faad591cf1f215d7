use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

/// Knobs for the entitlement engine itself. The grace window and attempt cap
/// are configuration, not inferred constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_free_plan_id")]
    pub free_plan_id: String,
    #[serde(default = "default_grace_days")]
    pub grace_days: i64,
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: i32,
    #[serde(default = "default_renewal_lookahead_hours")]
    pub renewal_lookahead_hours: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_billing_period_days")]
    pub billing_period_days: i64,
    #[serde(default = "default_catalog_ttl_secs")]
    pub catalog_ttl_secs: u64,
    /// ISO 4217 code for renewal charges; plan prices are minor units of this.
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_free_plan_id() -> String {
    "gratis".to_string()
}
fn default_grace_days() -> i64 {
    7
}
fn default_max_failed_attempts() -> i32 {
    3
}
fn default_renewal_lookahead_hours() -> i64 {
    24
}
fn default_sweep_interval_secs() -> u64 {
    3600
}
fn default_billing_period_days() -> i64 {
    30
}
fn default_catalog_ttl_secs() -> u64 {
    30
}
fn default_currency() -> String {
    "usd".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            free_plan_id: default_free_plan_id(),
            grace_days: default_grace_days(),
            max_failed_attempts: default_max_failed_attempts(),
            renewal_lookahead_hours: default_renewal_lookahead_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
            billing_period_days: default_billing_period_days(),
            catalog_ttl_secs: default_catalog_ttl_secs(),
            currency: default_currency(),
        }
    }
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => {
                // file present, env vars still override below
                toml::from_str(&config_str)
                    .map_err(|e| format!("Failed to parse config file: {e}"))?
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // no file: build from environment and defaults
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }
                fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
                    env::var(name)
                        .ok()
                        .and_then(|v| v.parse::<T>().ok())
                        .unwrap_or(default)
                }

                let database_url = get_env("DATABASE_URL")
                    .ok_or("Missing DATABASE_URL and no config.toml found")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: get_env_parse("SERVER_PORT", 8080u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
                    },
                    gateway: GatewayConfig {
                        base_url: get_env("GATEWAY_BASE_URL")
                            .unwrap_or_else(|| "https://gateway.invalid".to_string()),
                        api_key: get_env("GATEWAY_API_KEY").unwrap_or_default(),
                        timeout_secs: get_env_parse(
                            "GATEWAY_TIMEOUT_SECS",
                            default_gateway_timeout_secs(),
                        ),
                    },
                    engine: EngineConfig {
                        free_plan_id: get_env("ENGINE_FREE_PLAN_ID")
                            .unwrap_or_else(default_free_plan_id),
                        grace_days: get_env_parse("ENGINE_GRACE_DAYS", default_grace_days()),
                        max_failed_attempts: get_env_parse(
                            "ENGINE_MAX_FAILED_ATTEMPTS",
                            default_max_failed_attempts(),
                        ),
                        renewal_lookahead_hours: get_env_parse(
                            "ENGINE_RENEWAL_LOOKAHEAD_HOURS",
                            default_renewal_lookahead_hours(),
                        ),
                        sweep_interval_secs: get_env_parse(
                            "ENGINE_SWEEP_INTERVAL_SECS",
                            default_sweep_interval_secs(),
                        ),
                        billing_period_days: get_env_parse(
                            "ENGINE_BILLING_PERIOD_DAYS",
                            default_billing_period_days(),
                        ),
                        catalog_ttl_secs: get_env_parse(
                            "ENGINE_CATALOG_TTL_SECS",
                            default_catalog_ttl_secs(),
                        ),
                        currency: get_env("ENGINE_CURRENCY").unwrap_or_else(default_currency),
                    },
                }
            }
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        // environment overrides (applied even when the file exists)
        if let Ok(v) = env::var("SERVER_HOST") {
            config.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            config.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            config.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            config.database.max_connections = mc;
        }
        if let Ok(v) = env::var("GATEWAY_BASE_URL") {
            config.gateway.base_url = v;
        }
        if let Ok(v) = env::var("GATEWAY_API_KEY") {
            config.gateway.api_key = v;
        }
        if let Ok(v) = env::var("GATEWAY_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            config.gateway.timeout_secs = n;
        }
        if let Ok(v) = env::var("ENGINE_FREE_PLAN_ID") {
            config.engine.free_plan_id = v;
        }
        if let Ok(v) = env::var("ENGINE_GRACE_DAYS")
            && let Ok(n) = v.parse()
        {
            config.engine.grace_days = n;
        }
        if let Ok(v) = env::var("ENGINE_MAX_FAILED_ATTEMPTS")
            && let Ok(n) = v.parse()
        {
            config.engine.max_failed_attempts = n;
        }
        if let Ok(v) = env::var("ENGINE_RENEWAL_LOOKAHEAD_HOURS")
            && let Ok(n) = v.parse()
        {
            config.engine.renewal_lookahead_hours = n;
        }
        if let Ok(v) = env::var("ENGINE_SWEEP_INTERVAL_SECS")
            && let Ok(n) = v.parse()
        {
            config.engine.sweep_interval_secs = n;
        }
        if let Ok(v) = env::var("ENGINE_BILLING_PERIOD_DAYS")
            && let Ok(n) = v.parse()
        {
            config.engine.billing_period_days = n;
        }
        if let Ok(v) = env::var("ENGINE_CATALOG_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            config.engine.catalog_ttl_secs = n;
        }
        if let Ok(v) = env::var("ENGINE_CURRENCY") {
            config.engine.currency = v;
        }

        Ok(config)
    }
}
