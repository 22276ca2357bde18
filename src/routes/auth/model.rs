use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{
    error::AppError,
    utils::{
        Role,
        validation::{
            is_blank, is_valid_email, is_valid_national_id, is_valid_password,
            is_valid_phone_number,
        },
    },
};

const USER_COLUMNS: &str = "id, email, full_name, national_id, phone_number, password_hash, \
     role, email_confirmed_at, created_at, updated_at";

const CITIZEN_COLUMNS: &str = "id, national_id, full_name, phone_number, email, status";

const SESSION_COLUMNS: &str =
    "id, citizen_id, transaction_id, otp_code, otp_expires_at, status, created_at";

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub national_id: String,
    pub phone_number: String,
    pub password_hash: String,
    pub role: String,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub national_id: String,
    pub phone_number: String,
    pub role: Role,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            role: Role::from_db(&user.role),
            email_confirmed: user.email_confirmed_at.is_some(),
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            national_id: user.national_id,
            phone_number: user.phone_number,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Citizen {
    pub id: Uuid,
    pub national_id: String,
    pub full_name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CitizenProfile {
    pub id: Uuid,
    pub national_id: String,
    pub full_name: String,
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl From<Citizen> for CitizenProfile {
    fn from(c: Citizen) -> Self {
        Self {
            id: c.id,
            national_id: c.national_id,
            full_name: c.full_name,
            phone_number: c.phone_number,
            email: c.email,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AuthSession {
    pub id: Uuid,
    pub citizen_id: Uuid,
    pub transaction_id: String,
    pub otp_code: String,
    pub otp_expires_at: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

pub mod session_status {
    pub const PENDING: &str = "PENDING";
    pub const VERIFIED: &str = "VERIFIED";
    pub const EXPIRED: &str = "EXPIRED";
}

#[derive(Debug, PartialEq, Eq)]
pub enum OtpFailure {
    AlreadyUsed,
    Expired,
    Mismatch,
}

impl AuthSession {
    /// 只有 PENDING、未过期且验证码一致的会话才能通过
    pub fn check(&self, otp: &str, now: DateTime<Utc>) -> Result<(), OtpFailure> {
        if self.status != session_status::PENDING {
            return Err(if self.status == session_status::EXPIRED {
                OtpFailure::Expired
            } else {
                OtpFailure::AlreadyUsed
            });
        }
        if now > self.otp_expires_at {
            return Err(OtpFailure::Expired);
        }
        if self.otp_code != otp.trim() {
            return Err(OtpFailure::Mismatch);
        }
        Ok(())
    }

    pub async fn create(
        pool: &PgPool,
        citizen_id: Uuid,
        transaction_id: &str,
        otp_code: &str,
        otp_expires_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, AuthSession>(&format!(
            r#"
            INSERT INTO auth_sessions (citizen_id, transaction_id, otp_code, otp_expires_at, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(citizen_id)
        .bind(transaction_id)
        .bind(otp_code)
        .bind(otp_expires_at)
        .bind(session_status::PENDING)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_transaction(
        pool: &PgPool,
        transaction_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AuthSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM auth_sessions WHERE transaction_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(transaction_id)
        .fetch_optional(pool)
        .await
    }

    /// 条件更新：只有仍为 PENDING 的会话才会被改写，返回是否改写成功
    pub async fn transition(
        pool: &PgPool,
        id: Uuid,
        to_status: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE auth_sessions SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to_status)
            .bind(id)
            .bind(session_status::PENDING)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

impl Citizen {
    pub async fn find_active_by_national_id(
        pool: &PgPool,
        national_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Citizen>(&format!(
            "SELECT {CITIZEN_COLUMNS} FROM citizens WHERE national_id = $1 AND status = 'ACTIVE'"
        ))
        .bind(national_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_national_id(
        pool: &PgPool,
        national_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Citizen>(&format!(
            "SELECT {CITIZEN_COLUMNS} FROM citizens WHERE national_id = $1"
        ))
        .bind(national_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Citizen>(&format!("SELECT {CITIZEN_COLUMNS} FROM citizens WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub national_id: String,
    pub phone_number: String,
    pub password_hash: String,
    pub confirmation_token_hash: String,
}

impl User {
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// 按身份证号或手机号查找已存在的账户
    pub async fn find_by_identity(
        pool: &PgPool,
        national_id: &str,
        phone_number: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE national_id = $1 OR phone_number = $2 LIMIT 1"
        ))
        .bind(national_id)
        .bind(phone_number)
        .fetch_optional(pool)
        .await
    }

    pub async fn create(pool: &PgPool, new_user: NewUser) -> Result<Self, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, full_name, national_id, phone_number, password_hash,
                               role, confirmation_token_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'user', $6, NOW(), NOW())
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new_user.email)
        .bind(&new_user.full_name)
        .bind(&new_user.national_id)
        .bind(&new_user.phone_number)
        .bind(&new_user.password_hash)
        .bind(&new_user.confirmation_token_hash)
        .fetch_one(pool)
        .await?;

        tracing::info!("Created user account {}", user.id);
        Ok(user)
    }

    pub async fn confirm_email(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET email_confirmed_at = NOW(), confirmation_token_hash = NULL, updated_at = NOW()
            WHERE confirmation_token_hash = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(token_hash)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_reset_token(
        pool: &PgPool,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET reset_token_hash = $1, reset_token_expires_at = $2, updated_at = NOW() \
             WHERE id = $3",
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// 令牌有效时替换密码并作废令牌
    pub async fn reset_password(
        pool: &PgPool,
        token_hash: &str,
        password_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET password_hash = $1, reset_token_hash = NULL, reset_token_expires_at = NULL,
                updated_at = NOW()
            WHERE reset_token_hash = $2 AND reset_token_expires_at > NOW()
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(password_hash)
        .bind(token_hash)
        .fetch_optional(pool)
        .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub national_id: Option<String>,
    pub phone_number: Option<String>,
    pub password: Option<String>,
}

/// 通过格式校验的注册信息
#[derive(Debug)]
pub struct ValidSignup {
    pub full_name: String,
    pub email: String,
    pub national_id: String,
    pub phone_number: String,
    pub password: String,
}

impl SignupRequest {
    pub fn validate(self) -> Result<ValidSignup, AppError> {
        let (Some(full_name), Some(email), Some(national_id), Some(phone_number), Some(password)) = (
            self.full_name,
            self.email,
            self.national_id,
            self.phone_number,
            self.password,
        ) else {
            return Err(AppError::validation("All fields are required"));
        };

        if [&full_name, &email, &national_id, &phone_number, &password]
            .iter()
            .any(|v| is_blank(Some(v.as_str())))
        {
            return Err(AppError::validation("All fields are required"));
        }
        if !is_valid_national_id(&national_id) {
            return Err(AppError::validation("National ID must be 13-16 digits"));
        }
        if !is_valid_phone_number(&phone_number) {
            return Err(AppError::validation(
                "Phone number must be in format +257 XX XXX XXX",
            ));
        }
        let email = email.trim().to_string();
        if !is_valid_email(&email) {
            return Err(AppError::validation("Please enter a valid email address"));
        }
        if !is_valid_password(&password) {
            return Err(AppError::validation(
                "Password must be at least 6 characters long",
            ));
        }

        Ok(ValidSignup {
            full_name: full_name.trim().to_string(),
            email,
            national_id,
            phone_number,
            password,
        })
    }
}

/// 按触发的唯一约束名给出冲突提示
pub fn signup_conflict_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some(c) if c.contains("national_id") => "User with this National ID already exists",
        Some(c) if c.contains("phone") => "User with this phone number already exists",
        _ => "An account with this email already exists",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub user: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmEmailRequest {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: i64,
}

impl SessionToken {
    pub fn bearer(access_token: String, expires_at: i64) -> Self {
        Self {
            access_token,
            token_type: "bearer",
            expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub session: SessionToken,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateOtpRequest {
    pub national_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateOtpResponse {
    pub transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    pub transaction_id: Option<String>,
    pub otp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub citizen: CitizenProfile,
    pub session: SessionToken,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citizen: Option<CitizenProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signup() -> SignupRequest {
        SignupRequest {
            full_name: Some("Aline Niyonzima".into()),
            email: Some("aline@example.bi".into()),
            national_id: Some("1234567890123".into()),
            phone_number: Some("+257 79 123 456".into()),
            password: Some("secret1".into()),
        }
    }

    fn session(status: &str, expires_in: i64) -> AuthSession {
        let now = Utc::now();
        AuthSession {
            id: Uuid::new_v4(),
            citizen_id: Uuid::new_v4(),
            transaction_id: "txn_1_abc".into(),
            otp_code: "482913".into(),
            otp_expires_at: now + Duration::seconds(expires_in),
            status: status.into(),
            created_at: now,
        }
    }

    fn message(err: AppError) -> String {
        err.to_string()
    }

    #[test]
    fn valid_signup_passes() {
        let ok = signup().validate().unwrap();
        assert_eq!(ok.national_id, "1234567890123");
    }

    #[test]
    fn signup_missing_field() {
        let mut req = signup();
        req.phone_number = None;
        assert_eq!(message(req.validate().unwrap_err()), "All fields are required");

        let mut req = signup();
        req.full_name = Some("  ".into());
        assert_eq!(message(req.validate().unwrap_err()), "All fields are required");
    }

    #[test]
    fn signup_checks_run_in_order() {
        let mut req = signup();
        req.national_id = Some("12345".into());
        req.phone_number = Some("bad".into());
        assert_eq!(
            message(req.validate().unwrap_err()),
            "National ID must be 13-16 digits"
        );

        let mut req = signup();
        req.phone_number = Some("+257 79123456".into());
        assert_eq!(
            message(req.validate().unwrap_err()),
            "Phone number must be in format +257 XX XXX XXX"
        );

        let mut req = signup();
        req.email = Some("not-an-email".into());
        assert_eq!(
            message(req.validate().unwrap_err()),
            "Please enter a valid email address"
        );

        let mut req = signup();
        req.password = Some("12345".into());
        assert_eq!(
            message(req.validate().unwrap_err()),
            "Password must be at least 6 characters long"
        );
    }

    #[test]
    fn otp_check_accepts_matching_code() {
        assert_eq!(session("PENDING", 60).check("482913", Utc::now()), Ok(()));
        assert_eq!(session("PENDING", 60).check(" 482913 ", Utc::now()), Ok(()));
    }

    #[test]
    fn otp_check_failures() {
        let now = Utc::now();
        assert_eq!(session("PENDING", 60).check("000000", now), Err(OtpFailure::Mismatch));
        assert_eq!(session("PENDING", -1).check("482913", now), Err(OtpFailure::Expired));
        assert_eq!(session("VERIFIED", 60).check("482913", now), Err(OtpFailure::AlreadyUsed));
        assert_eq!(session("EXPIRED", 60).check("482913", now), Err(OtpFailure::Expired));
    }

    #[test]
    fn profile_maps_role_and_confirmation() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@b.bi".into(),
            full_name: "A".into(),
            national_id: "1234567890123".into(),
            phone_number: "+257 79 123 456".into(),
            password_hash: "x".into(),
            role: "ADMIN".into(),
            email_confirmed_at: None,
            created_at: now,
            updated_at: now,
        };
        let profile = UserProfile::from(user);
        assert_eq!(profile.role, Role::Admin);
        assert!(!profile.email_confirmed);
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["fullName"], "A");
    }

    #[test]
    fn conflict_message_follows_constraint() {
        assert_eq!(
            signup_conflict_message(Some("users_national_id_key")),
            "User with this National ID already exists"
        );
        assert_eq!(
            signup_conflict_message(Some("users_phone_number_key")),
            "User with this phone number already exists"
        );
        assert_eq!(
            signup_conflict_message(Some("users_email_key")),
            "An account with this email already exists"
        );
        assert_eq!(
            signup_conflict_message(None),
            "An account with this email already exists"
        );
    }
}
