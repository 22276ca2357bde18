use axum::Json;
use base64::Engine;
use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::result::ApiResponse;

pub mod validation;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password.as_bytes(), DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password.as_bytes(), hash)
}

/// 令牌持有者的身份类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 通过身份证号 + OTP 登录的公民
    Citizen,
    /// 邮箱密码注册的账户
    User,
    Admin,
}

impl Role {
    pub fn from_db(role: &str) -> Self {
        if role.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::User
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // 用户ID或公民ID
    pub exp: i64,    // 过期时间
    pub iat: i64,    // 签发时间
    pub role: Role,
}

pub fn generate_token(
    subject: &str,
    role: Role,
    config: &Config,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = (now + Duration::seconds(config.jwt_expiration().as_secs() as i64)).timestamp();

    let claims = Claims {
        sub: subject.to_string(),
        exp: expiration,
        iat: now.timestamp(),
        role,
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

fn random_base36(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// 六位数字验证码
pub fn generate_otp() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

pub fn generate_transaction_id(now: DateTime<Utc>) -> String {
    format!("txn_{}_{}", now.timestamp_millis(), random_base36(9))
}

/// 驾照号：`{类型大写}-{毫秒时间戳}-{6位随机}`
pub fn generate_license_number(license_type: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        license_type.to_uppercase(),
        now.timestamp_millis(),
        random_base36(6).to_uppercase()
    )
}

/// 邮箱确认、密码重置使用的一次性令牌
pub fn generate_secret_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// 一次性令牌只以摘要形式落库
pub fn hash_secret(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

pub fn message_to_api_response<T: Serialize>(msg: impl Into<String>, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::with_message(msg, data))
}

pub mod error_codes {
    pub const VALIDATION_ERROR: i32 = 1000;
    pub const USER_EXISTS: i32 = 1001;
    pub const AUTH_FAILED: i32 = 1002;
    pub const PERMISSION_DENIED: i32 = 1003;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const INTERNAL_ERROR: i32 = 5000;
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/license_portal".into(),
        redis_url: "redis://127.0.0.1/".into(),
        jwt_secret: "test-secret".into(),
        jwt_expiration_secs: 3600,
        otp_ttl_secs: 600,
        reset_token_ttl_secs: 3600,
        rate_limit_window_secs: 60,
        rate_limit_requests: 100,
        login_attempt_limit: 5,
        otp_attempt_limit: 3,
        server_host: "127.0.0.1".into(),
        server_port: 3000,
        api_base_uri: "/api".into(),
        site_url: "http://localhost:3000".into(),
        app_url: "http://localhost:3000".into(),
        app_env: "development".into(),
        sms_gateway_url: None,
        email_gateway_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_carries_subject_and_role() {
        let config = test_config();
        let (token, exp) = generate_token("citizen-1", Role::Citizen, &config).unwrap();
        let claims = verify_token(&token, &config).unwrap();
        assert_eq!(claims.sub, "citizen-1");
        assert_eq!(claims.role, Role::Citizen);
        assert_eq!(claims.exp, exp);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let config = test_config();
        let (token, _) = generate_token("u", Role::Admin, &config).unwrap();
        let mut other = test_config();
        other.jwt_secret = "different".into();
        assert!(verify_token(&token, &other).is_err());
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..200 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            let n: u32 = otp.parse().unwrap();
            assert!((100_000..1_000_000).contains(&n));
        }
    }

    #[test]
    fn transaction_id_shape() {
        let now = Utc::now();
        let id = generate_transaction_id(now);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts[0], "txn");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn license_number_uses_uppercase_type_and_suffix() {
        let now = Utc::now();
        let number = generate_license_number("commercial", now);
        let mut parts = number.splitn(3, '-');
        assert_eq!(parts.next(), Some("COMMERCIAL"));
        assert_eq!(parts.next(), Some(now.timestamp_millis().to_string().as_str()));
        let suffix = parts.next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(!suffix.chars().any(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn secret_digest_is_stable_hex() {
        let token = generate_secret_token();
        assert_eq!(hash_secret(&token), hash_secret(&token));
        assert_eq!(hash_secret(&token).len(), 64);
        assert_ne!(hash_secret(&token), hash_secret("other"));
    }

    #[test]
    fn password_hash_verifies() {
        let hashed = hash_password("secret1").unwrap();
        assert!(verify_password("secret1", &hashed).unwrap());
        assert!(!verify_password("secret2", &hashed).unwrap());
    }
}
