/// 缓存键模块
/// 提供各种缓存键生成函数

// 限流计数键
pub mod rate_limit_keys;

// 响应缓存键
pub mod response_keys;

// MFA 密钥键
pub mod mfa_keys;

// 重新导出常用的键生成函数
pub use mfa_keys::{MFA_EVENTS_CHANNEL, mfa_enabled_key, mfa_secret_key};
pub use rate_limit_keys::rate_limit_key;
pub use response_keys::{response_cache_key, sorted_query};
