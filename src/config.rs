use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub stripe: StripeConfig,
    #[serde(default)]
    pub billing: BillingConfig,
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
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    #[serde(default)]
    pub premium_price_id: Option<String>,
    #[serde(default)]
    pub pro_price_id: Option<String>,
    #[serde(default = "default_success_url")]
    pub success_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
}

fn default_success_url() -> String {
    "http://localhost:5173/billing/success?session_id={CHECKOUT_SESSION_ID}".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:5173/billing".to_string()
}

/// Entitlement cache tuning. All values are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_status_ttl")]
    pub status_ttl_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_status_ttl() -> u64 {
    15 * 60
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_session_idle() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            status_ttl_secs: default_status_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
            session_idle_secs: default_session_idle(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl BillingConfig {
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        let mut config: Config = match std::fs::read_to_string(&config_path) {
            // 有配置文件：先解析再用环境变量覆盖
            Ok(config_str) => Self::from_toml_str(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::from_env_defaults()?,
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, Box<dyn std::error::Error>> {
        toml::from_str(raw).map_err(|e| format!("Failed to parse config file: {e}").into())
    }

    /// 无配置文件：使用环境变量与默认值构建
    fn from_env_defaults() -> Result<Self, Box<dyn std::error::Error>> {
        let database_url = get_env("DATABASE_URL")
            .ok_or("DATABASE_URL is not set and no config.toml was found")?;

        Ok(Config {
            server: ServerConfig {
                host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: get_env_parse("SERVER_PORT", 8080u16),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET").unwrap_or_else(|| "change-me-in-production".to_string()),
            },
            stripe: StripeConfig {
                secret_key: get_env("STRIPE_SECRET_KEY").unwrap_or_default(),
                webhook_secret: get_env("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
                premium_price_id: get_env("STRIPE_PREMIUM_PRICE_ID"),
                pro_price_id: get_env("STRIPE_PRO_PRICE_ID"),
                success_url: get_env("STRIPE_SUCCESS_URL").unwrap_or_else(default_success_url),
                cancel_url: get_env("STRIPE_CANCEL_URL").unwrap_or_else(default_cancel_url),
            },
            billing: BillingConfig::default(),
        })
    }

    // 环境变量覆盖（即便文件存在时也覆盖）
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            self.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Ok(v) = env::var("STRIPE_SECRET_KEY") {
            self.stripe.secret_key = v;
        }
        if let Ok(v) = env::var("STRIPE_WEBHOOK_SECRET") {
            self.stripe.webhook_secret = v;
        }
        if let Ok(v) = env::var("STRIPE_PREMIUM_PRICE_ID") {
            self.stripe.premium_price_id = Some(v);
        }
        if let Ok(v) = env::var("STRIPE_PRO_PRICE_ID") {
            self.stripe.pro_price_id = Some(v);
        }
        if let Ok(v) = env::var("STRIPE_SUCCESS_URL") {
            self.stripe.success_url = v;
        }
        if let Ok(v) = env::var("STRIPE_CANCEL_URL") {
            self.stripe.cancel_url = v;
        }

        // Billing cache
        if let Ok(v) = env::var("BILLING_STATUS_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.billing.status_ttl_secs = n;
        }
        if let Ok(v) = env::var("BILLING_FETCH_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.billing.fetch_timeout_secs = n;
        }
        if let Ok(v) = env::var("BILLING_SESSION_IDLE_SECS")
            && let Ok(n) = v.parse()
        {
            self.billing.session_idle_secs = n;
        }
        if let Ok(v) = env::var("BILLING_SWEEP_INTERVAL_SECS")
            && let Ok(n) = v.parse()
        {
            self.billing.sweep_interval_secs = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_section_defaults() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [database]
            url = "postgres://localhost/glycoguide"
            max_connections = 5

            [jwt]
            secret = "secret"

            [stripe]
            secret_key = "sk_test_123"
            webhook_secret = "whsec_123"
        "#;
        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.billing.status_ttl(), Duration::from_secs(900));
        assert_eq!(config.billing.fetch_timeout(), Duration::from_secs(10));
        assert!(config.stripe.premium_price_id.is_none());
        assert!(config.stripe.success_url.contains("{CHECKOUT_SESSION_ID}"));
    }

    #[test]
    fn test_billing_section_override() {
        let raw = r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [database]
            url = "postgres://localhost/glycoguide"
            max_connections = 5

            [jwt]
            secret = "secret"

            [stripe]
            secret_key = "sk_test_123"
            webhook_secret = "whsec_123"
            pro_price_id = "price_pro"

            [billing]
            status_ttl_secs = 60
        "#;
        let config = Config::from_toml_str(raw).unwrap();
        assert_eq!(config.billing.status_ttl_secs, 60);
        assert_eq!(config.billing.session_idle_secs, 3600);
        assert_eq!(config.stripe.pro_price_id.as_deref(), Some("price_pro"));
    }
}
