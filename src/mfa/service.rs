use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{debug, info, warn};

use crate::cache::keys::{MFA_EVENTS_CHANNEL, mfa_enabled_key, mfa_secret_key};
use crate::cache::{CacheClient, StoreError};
use crate::clock::Clock;

/// TOTP 参数: SHA-1，6 位，30 秒步长，允许前后各一个步长
const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

#[derive(Debug, Error)]
pub enum MfaError {
    #[error("secret error: {0}")]
    Secret(String),

    #[error("totp error: {0}")]
    Totp(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 生成密钥后返回给调用方的内容，二维码由调用方渲染
#[derive(Debug, Clone, Serialize)]
pub struct MfaSetup {
    pub secret: String,
    pub otpauth_url: String,
    pub expires_in: u64,
}

/// MFA 生命周期事件
#[derive(Debug, Serialize)]
struct MfaEvent<'a> {
    event: &'a str,
    user_id: &'a str,
    at: i64,
}

/// TOTP 密钥生命周期: 待验证 -> 已启用 -> 每次敏感请求校验
pub struct MfaService {
    store: CacheClient,
    issuer: String,
    setup_ttl_secs: u64,
    clock: Arc<dyn Clock>,
}

impl MfaService {
    pub fn new(
        store: CacheClient,
        issuer: impl Into<String>,
        setup_ttl_secs: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            issuer: issuer.into(),
            setup_ttl_secs,
            clock,
        }
    }

    fn totp(&self, secret_base32: &str, user_id: &str) -> Result<TOTP, MfaError> {
        let bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| MfaError::Secret(format!("{:?}", e)))?;
        self.totp_from_bytes(bytes, user_id)
    }

    fn totp_from_bytes(&self, bytes: Vec<u8>, user_id: &str) -> Result<TOTP, MfaError> {
        // otpauth 账户名不能包含冒号
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            bytes,
            Some(self.issuer.clone()),
            user_id.replace(':', "_"),
        )
        .map_err(|e| MfaError::Totp(e.to_string()))
    }

    fn check(&self, secret_base32: &str, user_id: &str, token: &str) -> bool {
        match self.totp(secret_base32, user_id) {
            Ok(totp) => totp.check(token.trim(), self.clock.unix_secs()),
            Err(e) => {
                warn!(user_id, "Stored MFA secret is unusable: {}", e);
                false
            }
        }
    }

    async fn publish_event(&self, event: &str, user_id: &str) {
        let payload = MfaEvent {
            event,
            user_id,
            at: self.clock.now().timestamp(),
        };
        let published = match serde_json::to_string(&payload) {
            Ok(json) => self.store.publish(MFA_EVENTS_CHANNEL, &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = published {
            debug!(user_id, event, "Failed to publish MFA event: {}", e);
        }
    }

    /// 生成新的待验证密钥，覆盖之前未完成的设置
    pub async fn generate_secret(&self, user_id: &str) -> Result<MfaSetup, MfaError> {
        let bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| MfaError::Secret(format!("{:?}", e)))?;
        let totp = self.totp_from_bytes(bytes, user_id)?;
        let secret = totp.get_secret_base32();

        self.store
            .set(&mfa_secret_key(user_id), &secret, Some(self.setup_ttl_secs))
            .await?;
        info!(user_id, "Provisional MFA secret generated");

        Ok(MfaSetup {
            otpauth_url: totp.get_url(),
            secret,
            expires_in: self.setup_ttl_secs,
        })
    }

    /// 校验待验证密钥并启用 MFA
    ///
    /// 待验证密钥不存在（未生成或已过期）时返回 false。
    /// 校验失败不修改任何状态，待验证密钥保留到自然过期。
    pub async fn verify_and_enable(&self, user_id: &str, token: &str) -> bool {
        let secret = match self.store.get(&mfa_secret_key(user_id)).await {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                debug!(user_id, "No provisional MFA secret");
                return false;
            }
            Err(e) => {
                warn!(user_id, "Failed to load provisional MFA secret: {}", e);
                return false;
            }
        };

        if !self.check(&secret, user_id, token) {
            info!(user_id, "MFA setup verification failed");
            return false;
        }

        if let Err(e) = self.store.set(&mfa_enabled_key(user_id), &secret, None).await {
            warn!(user_id, "Failed to persist enabled MFA secret: {}", e);
            return false;
        }
        if let Err(e) = self.store.del(&mfa_secret_key(user_id)).await {
            warn!(user_id, "Failed to remove provisional MFA secret: {}", e);
        }

        info!(user_id, "MFA enabled");
        self.publish_event("enabled", user_id).await;
        true
    }

    /// 使用已启用的密钥校验令牌，未启用时返回 false
    pub async fn verify_token(&self, user_id: &str, token: &str) -> bool {
        match self.store.get(&mfa_enabled_key(user_id)).await {
            Ok(Some(secret)) => self.check(&secret, user_id, token),
            Ok(None) => false,
            Err(e) => {
                warn!(user_id, "Failed to load MFA secret: {}", e);
                false
            }
        }
    }

    /// 查询是否启用，存储错误原样返回，由调用方决定默认行为
    pub async fn try_is_enabled(&self, user_id: &str) -> Result<bool, MfaError> {
        Ok(self.store.get(&mfa_enabled_key(user_id)).await?.is_some())
    }

    pub async fn is_enabled(&self, user_id: &str) -> bool {
        self.try_is_enabled(user_id).await.unwrap_or_else(|e| {
            warn!(user_id, "Failed to check MFA status: {}", e);
            false
        })
    }

    /// 关闭 MFA，返回之前是否处于启用状态
    pub async fn disable(&self, user_id: &str) -> Result<bool, MfaError> {
        let removed = self.store.del(&mfa_enabled_key(user_id)).await?;
        if removed > 0 {
            info!(user_id, "MFA disabled");
            self.publish_event("disabled", user_id).await;
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::cache::testing::FailingStore;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use futures_util::StreamExt;

    fn service() -> (MfaService, ManualClock) {
        let clock = ManualClock::default();
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = CacheClient::new(Arc::new(MemoryStore::new(clock_arc.clone())));
        (MfaService::new(store, "Escola", 300, clock_arc), clock)
    }

    fn code_for(service: &MfaService, secret: &str, user_id: &str) -> String {
        service
            .totp(secret, user_id)
            .unwrap()
            .generate(service.clock.unix_secs())
    }

    fn wrong_code(right: &str) -> String {
        let digit = right.as_bytes()[0] - b'0';
        format!("{}{}", (digit + 1) % 10, &right[1..])
    }

    #[tokio::test]
    async fn setup_then_verify_enables_mfa() {
        let (mfa, _) = service();
        let setup = mfa.generate_secret("aluno-1").await.unwrap();
        assert!(setup.otpauth_url.starts_with("otpauth://totp/"));
        assert_eq!(setup.expires_in, 300);

        let code = code_for(&mfa, &setup.secret, "aluno-1");
        assert!(mfa.verify_and_enable("aluno-1", &code).await);
        assert!(mfa.is_enabled("aluno-1").await);
        assert!(mfa.verify_token("aluno-1", &code).await);

        // 待验证密钥已被删除
        assert!(!mfa.verify_and_enable("aluno-1", &code).await);
    }

    #[tokio::test]
    async fn adjacent_time_step_is_accepted() {
        let (mfa, clock) = service();
        let setup = mfa.generate_secret("aluno-2").await.unwrap();
        let code = code_for(&mfa, &setup.secret, "aluno-2");

        clock.advance(Duration::seconds(TOTP_STEP as i64));
        assert!(mfa.verify_and_enable("aluno-2", &code).await);
    }

    #[tokio::test]
    async fn wrong_code_keeps_provisional_secret() {
        let (mfa, _) = service();
        let setup = mfa.generate_secret("aluno-3").await.unwrap();
        let code = code_for(&mfa, &setup.secret, "aluno-3");

        assert!(!mfa.verify_and_enable("aluno-3", &wrong_code(&code)).await);
        assert!(!mfa.is_enabled("aluno-3").await);

        // 猜错一次不会提前销毁待验证密钥
        assert!(mfa.verify_and_enable("aluno-3", &code).await);
    }

    #[tokio::test]
    async fn provisional_secret_expires() {
        let (mfa, clock) = service();
        let setup = mfa.generate_secret("aluno-4").await.unwrap();

        clock.advance(Duration::seconds(301));
        let code = code_for(&mfa, &setup.secret, "aluno-4");
        assert!(!mfa.verify_and_enable("aluno-4", &code).await);
        assert!(!mfa.is_enabled("aluno-4").await);
    }

    #[tokio::test]
    async fn disable_turns_verification_off() {
        let (mfa, _) = service();
        let setup = mfa.generate_secret("aluno-5").await.unwrap();
        let code = code_for(&mfa, &setup.secret, "aluno-5");
        assert!(mfa.verify_and_enable("aluno-5", &code).await);

        assert!(mfa.disable("aluno-5").await.unwrap());
        assert!(!mfa.is_enabled("aluno-5").await);
        assert!(!mfa.verify_token("aluno-5", &code).await);
        assert!(!mfa.disable("aluno-5").await.unwrap());
    }

    #[tokio::test]
    async fn verify_token_without_mfa_is_false() {
        let (mfa, _) = service();
        assert!(!mfa.verify_token("ninguem", "123456").await);
    }

    #[tokio::test]
    async fn enable_and_disable_publish_events() {
        let (mfa, _) = service();
        let mut events = mfa.store.subscribe(MFA_EVENTS_CHANNEL).await.unwrap();

        let setup = mfa.generate_secret("aluno-6").await.unwrap();
        let code = code_for(&mfa, &setup.secret, "aluno-6");
        assert!(mfa.verify_and_enable("aluno-6", &code).await);
        mfa.disable("aluno-6").await.unwrap();

        let enabled: serde_json::Value =
            serde_json::from_str(&events.next().await.unwrap()).unwrap();
        let disabled: serde_json::Value =
            serde_json::from_str(&events.next().await.unwrap()).unwrap();
        assert_eq!(enabled["event"], "enabled");
        assert_eq!(disabled["event"], "disabled");
        assert_eq!(disabled["user_id"], "aluno-6");
    }

    #[tokio::test]
    async fn store_outage_denies_verification() {
        let clock = crate::clock::system();
        let mfa = MfaService::new(
            CacheClient::new(Arc::new(FailingStore)),
            "Escola",
            300,
            clock,
        );
        assert!(mfa.generate_secret("aluno-7").await.is_err());
        assert!(!mfa.verify_and_enable("aluno-7", "123456").await);
        assert!(!mfa.verify_token("aluno-7", "123456").await);
        assert!(mfa.try_is_enabled("aluno-7").await.is_err());
    }

    #[tokio::test]
    async fn disabled_store_never_enables() {
        let clock = crate::clock::system();
        let mfa = MfaService::new(CacheClient::disabled(), "Escola", 300, clock);
        let setup = mfa.generate_secret("aluno-8").await.unwrap();
        let code = code_for(&mfa, &setup.secret, "aluno-8");
        assert!(!mfa.verify_and_enable("aluno-8", &code).await);
        assert!(!mfa.is_enabled("aluno-8").await);
    }
}
