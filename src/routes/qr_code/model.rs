use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{error::AppError, routes::application::LicenseType};

pub mod qr_status {
    pub const ACTIVE: &str = "active";
    pub const EXPIRED: &str = "expired";
    pub const INVALID: &str = "invalid";
}

const QR_COLUMNS: &str =
    "id, license_number, application_id, qr_code_data, issue_date, expiry_date, status, created_at";

#[derive(Debug, Clone, FromRow)]
pub struct QrCodeRecord {
    pub id: Uuid,
    pub license_number: String,
    pub application_id: Uuid,
    pub qr_code_data: String,
    pub issue_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// 验证时连带查出申请信息
#[derive(Debug, Clone, FromRow)]
pub struct LicenseRecord {
    pub license_number: String,
    pub qr_code_data: String,
    pub issue_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub status: String,
    pub license_type: Option<String>,
    pub application_status: Option<String>,
}

impl QrCodeRecord {
    pub async fn find_by_application(
        pool: &PgPool,
        application_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, QrCodeRecord>(&format!(
            "SELECT {QR_COLUMNS} FROM qr_codes WHERE application_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(application_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn insert(pool: &PgPool, issued: &IssuedLicense) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, QrCodeRecord>(&format!(
            r#"
            INSERT INTO qr_codes (license_number, application_id, qr_code_data,
                issue_date, expiry_date, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING {QR_COLUMNS}
            "#
        ))
        .bind(&issued.license_number)
        .bind(issued.application_id)
        .bind(&issued.content)
        .bind(issued.issue_date)
        .bind(issued.expiry_date)
        .bind(qr_status::ACTIVE)
        .fetch_one(pool)
        .await
    }

    /// 重新签发：刷新内容和日期，状态恢复为 active
    pub async fn refresh(
        pool: &PgPool,
        id: Uuid,
        issued: &IssuedLicense,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, QrCodeRecord>(&format!(
            r#"
            UPDATE qr_codes
            SET qr_code_data = $2, issue_date = $3, expiry_date = $4, status = $5
            WHERE id = $1
            RETURNING {QR_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&issued.content)
        .bind(issued.issue_date)
        .bind(issued.expiry_date)
        .bind(qr_status::ACTIVE)
        .fetch_one(pool)
        .await
    }

    pub async fn set_status(
        pool: &PgPool,
        license_number: &str,
        status: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, QrCodeRecord>(&format!(
            "UPDATE qr_codes SET status = $2 WHERE license_number = $1 RETURNING {QR_COLUMNS}"
        ))
        .bind(license_number)
        .bind(status)
        .fetch_optional(pool)
        .await
    }
}

impl LicenseRecord {
    /// application_id 为 None 时只按执照号查
    pub async fn find(
        pool: &PgPool,
        license_number: &str,
        application_id: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseRecord>(
            r#"
            SELECT q.license_number, q.qr_code_data, q.issue_date, q.expiry_date, q.status,
                   a.license_type, a.status AS application_status
            FROM qr_codes q
            LEFT JOIN license_applications a ON a.id = q.application_id
            WHERE q.license_number = $1
              AND ($2::uuid IS NULL OR q.application_id = $2)
            ORDER BY q.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(license_number)
        .bind(application_id)
        .fetch_optional(pool)
        .await
    }

    pub fn check(&self, now: DateTime<Utc>) -> LicenseCheck {
        if is_expired(self.expiry_date, now) {
            LicenseCheck::Expired
        } else if self.status == qr_status::INVALID {
            LicenseCheck::Invalidated
        } else {
            LicenseCheck::Valid
        }
    }

    /// 从签发时存下的二维码内容里取持有人姓名
    pub fn stored_holder_name(&self) -> String {
        serde_json::from_str::<Value>(&self.qr_code_data)
            .ok()
            .and_then(|v| v.get("holderName").and_then(Value::as_str).map(str::to_string))
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseCheck {
    Valid,
    Expired,
    Invalidated,
}

/// 有效期到 expiry_date 当天 0 点 (UTC)
pub fn is_expired(expiry_date: NaiveDate, now: DateTime<Utc>) -> bool {
    now.naive_utc() > expiry_date.and_time(NaiveTime::MIN)
}

/// 按年数顺延；2 月 29 日签发、到期年不是闰年时顺延到 3 月 1 日
pub fn expiry_date_for(license_type: &str, issue_date: NaiveDate) -> NaiveDate {
    let months = Months::new(12 * LicenseType::validity_years(license_type));
    let Some(expiry) = issue_date.checked_add_months(months) else {
        return NaiveDate::MAX;
    };
    if issue_date.month() == 2 && issue_date.day() == 29 && expiry.day() != 29 {
        return expiry.succ_opt().unwrap_or(expiry);
    }
    expiry
}

pub fn verification_url(app_url: &str, license_number: &str) -> String {
    format!("{}/verify/{}", app_url.trim_end_matches('/'), license_number)
}

/// 二维码里编码的内容
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub license_number: String,
    pub application_id: Uuid,
    pub national_id: String,
    pub holder_name: String,
    pub license_type: String,
    pub issued_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub verification_url: String,
}

/// 准备写库的签发结果
#[derive(Debug, Clone)]
pub struct IssuedLicense {
    pub license_number: String,
    pub application_id: Uuid,
    pub content: String,
    pub issue_date: NaiveDate,
    pub expiry_date: NaiveDate,
}

/// 扫码得到的内容，只信任用于查库的两个字段
#[derive(Debug, Clone)]
pub struct ScannedPayload {
    pub license_number: String,
    pub application_id: Uuid,
    pub holder_name: Option<String>,
    pub national_id: Option<String>,
}

impl ScannedPayload {
    pub fn parse(raw: Value) -> Result<Self, AppError> {
        let value = match raw {
            Value::String(s) => serde_json::from_str::<Value>(&s)
                .map_err(|_| AppError::validation("Invalid QR code format"))?,
            other => other,
        };
        if !value.is_object() {
            return Err(AppError::validation("Invalid QR code format"));
        }

        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let invalid = || AppError::validation("Invalid QR code data");

        let license_number = text("licenseNumber").ok_or_else(invalid)?;
        let application_id = text("applicationId")
            .and_then(|id| Uuid::parse_str(&id).ok())
            .ok_or_else(invalid)?;

        Ok(Self {
            license_number,
            application_id,
            holder_name: text("holderName"),
            national_id: text("nationalId"),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQrRequest {
    pub application_id: Option<String>,
    pub personal_info: Option<Value>,
}

impl GenerateQrRequest {
    pub fn claimed_national_id(&self) -> Option<&str> {
        self.personal_info
            .as_ref()
            .and_then(|info| info.get("nationalId"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrSummary {
    pub holder_name: String,
    pub national_id: String,
    pub license_type: String,
    pub issue_date: NaiveDate,
    pub expiry_date: NaiveDate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQrResponse {
    pub license_number: String,
    pub qr_code_image: String,
    pub issue_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub qr_data: QrSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyQrRequest {
    pub qr_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseNumberQuery {
    pub license_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateQrRequest {
    pub license_number: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Valid,
    Expired,
    Invalid,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseDetails {
    pub license_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub national_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub status: VerificationStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<LicenseDetails>,
}

impl VerificationResult {
    pub fn valid(data: LicenseDetails) -> Self {
        Self {
            valid: true,
            status: VerificationStatus::Valid,
            message: "Valid license".into(),
            data: Some(data),
        }
    }

    pub fn expired(data: LicenseDetails) -> Self {
        Self {
            valid: false,
            status: VerificationStatus::Expired,
            message: "License has expired".into(),
            data: Some(data),
        }
    }

    pub fn invalidated(data: LicenseDetails) -> Self {
        Self {
            valid: false,
            status: VerificationStatus::Invalid,
            message: "License has been invalidated".into(),
            data: Some(data),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            status: VerificationStatus::Invalid,
            message: message.into(),
            data: None,
        }
    }
}
