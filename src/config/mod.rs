use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// 键值存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
    Disabled,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            "disabled" | "off" | "none" => Ok(StoreBackend::Disabled),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub store_backend: StoreBackend,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub redis_db: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u64,
    /// 按路由覆盖的限流策略，格式 `path=max/window,...`
    pub rate_limit_routes: Option<String>,
    /// 信任反向代理写入的 x-real-ip / x-forwarded-for
    pub trust_proxy_headers: bool,
    pub response_cache_ttl_secs: u64,
    pub response_cache_max_body_bytes: usize,
    pub mfa_issuer: String,
    pub mfa_setup_ttl_secs: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "::".to_string(),
            server_port: 3000,
            jwt_secret: String::new(),
            jwt_expiration_secs: 24 * 3600,
            store_backend: StoreBackend::Redis,
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            redis_password: None,
            redis_db: 0,
            rate_limit_window_secs: 60,
            rate_limit_requests: 30,
            rate_limit_routes: None,
            trust_proxy_headers: false,
            response_cache_ttl_secs: 3600,
            response_cache_max_body_bytes: 1024 * 1024,
            mfa_issuer: "Escola".to_string(),
            mfa_setup_ttl_secs: 300,
            circuit_failure_threshold: 5,
            circuit_reset_timeout_secs: 30,
        }
    }
}

/// 读取可选环境变量，缺失或无法解析时使用默认值
fn var_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}, using default", name);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();
        let defaults = Config::default();

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|raw| raw.trim_end_matches('h').parse::<u64>().ok())
            .unwrap_or(24);

        // REDIS_ENABLED=false 优先于 KV_STORE
        let store_backend = if var_or("REDIS_ENABLED", true) {
            var_or("KV_STORE", defaults.store_backend)
        } else {
            StoreBackend::Disabled
        };

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: var_or("SERVER_PORT", defaults.server_port),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            store_backend,
            redis_host: env::var("REDIS_HOST").unwrap_or(defaults.redis_host),
            redis_port: var_or("REDIS_PORT", defaults.redis_port),
            redis_password: env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
            redis_db: var_or("REDIS_DB", defaults.redis_db),
            rate_limit_window_secs: var_or("RATE_LIMIT_WINDOW", defaults.rate_limit_window_secs),
            rate_limit_requests: var_or("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests),
            rate_limit_routes: env::var("RATE_LIMIT_ROUTES").ok(),
            trust_proxy_headers: var_or("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers),
            response_cache_ttl_secs: var_or("RESPONSE_CACHE_TTL", defaults.response_cache_ttl_secs),
            response_cache_max_body_bytes: var_or(
                "RESPONSE_CACHE_MAX_BODY",
                defaults.response_cache_max_body_bytes,
            ),
            mfa_issuer: env::var("MFA_ISSUER").unwrap_or(defaults.mfa_issuer),
            mfa_setup_ttl_secs: var_or("MFA_SETUP_TTL", defaults.mfa_setup_ttl_secs),
            circuit_failure_threshold: var_or(
                "CIRCUIT_FAILURE_THRESHOLD",
                defaults.circuit_failure_threshold,
            ),
            circuit_reset_timeout_secs: var_or(
                "CIRCUIT_RESET_TIMEOUT",
                defaults.circuit_reset_timeout_secs,
            ),
        })
    }

    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis_host, self.redis_port, self.redis_db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis_host, self.redis_port, self.redis_db
            ),
        }
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn circuit_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_reset_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_includes_password_when_set() {
        let mut config = Config::default();
        assert_eq!(config.redis_url(), "redis://127.0.0.1:6379/0");

        config.redis_password = Some("s3cret".to_string());
        config.redis_db = 2;
        assert_eq!(config.redis_url(), "redis://:s3cret@127.0.0.1:6379/2");
    }

    #[test]
    fn store_backend_parses_aliases() {
        assert_eq!("Redis".parse::<StoreBackend>(), Ok(StoreBackend::Redis));
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("off".parse::<StoreBackend>(), Ok(StoreBackend::Disabled));
        assert!("etcd".parse::<StoreBackend>().is_err());
    }
}
