use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID
    #[serde(default)]
    pub roles: Vec<String>,
    pub exp: i64, // 过期时间
    pub iat: i64, // 签发时间
    pub jti: String,
}

/// 签发访问令牌，返回令牌和过期时间戳
pub fn generate_token(
    user_id: &str,
    roles: &[&str],
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration =
        (now + Duration::seconds(config.jwt_expiration().as_secs() as i64)).timestamp();

    let claims = Claims {
        sub: user_id.to_string(),
        roles: roles.iter().map(|role| role.to_string()).collect(),
        exp: expiration,
        iat: now.timestamp(),
        jti: Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )?;

    Ok((token, expiration))
}

pub fn verify_token(token: &str, config: &Config) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            jwt_secret: "test-secret".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn issued_token_verifies() {
        let config = config();
        let (token, exp) = generate_token("prof-1", &["professor"], &config).unwrap();
        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "prof-1");
        assert_eq!(claims.roles, vec!["professor".to_string()]);
        assert_eq!(claims.exp, exp);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let (token, _) = generate_token("prof-1", &[], &config()).unwrap();
        let other = Config {
            jwt_secret: "other".to_string(),
            ..Config::default()
        };
        assert!(verify_token(&token, &other).is_err());
    }
}
