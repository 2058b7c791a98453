// 多因素认证
// TOTP 密钥的生成、启用、校验和关闭

pub mod service;

pub use service::{MfaError, MfaService, MfaSetup};
