/// 待验证的 MFA 密钥前缀
const MFA_SECRET_PREFIX: &str = "mfa:secret:";

/// 已启用的 MFA 密钥前缀
const MFA_ENABLED_PREFIX: &str = "mfa:enabled:";

/// MFA 生命周期事件频道
pub const MFA_EVENTS_CHANNEL: &str = "mfa:events";

/// 生成待验证密钥键
pub fn mfa_secret_key(user_id: &str) -> String {
    format!("{}{}", MFA_SECRET_PREFIX, user_id)
}

/// 生成已启用密钥键
pub fn mfa_enabled_key(user_id: &str) -> String {
    format!("{}{}", MFA_ENABLED_PREFIX, user_id)
}
