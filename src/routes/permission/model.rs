use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::routes::auth::CitizenProfile;

const PERMISSION_COLUMNS: &str = "id, citizen_id, national_id, email_permission, birthdate_permission, \
     gender_permission, name_permission, phone_number_permission, picture_permission, \
     created_at, updated_at";

/// 公民授权共享的六项资料
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentFlags {
    pub email: bool,
    pub birthdate: bool,
    pub gender: bool,
    pub name: bool,
    pub phone_number: bool,
    pub picture: bool,
}

impl ConsentFlags {
    pub const FIELDS: [&'static str; 6] =
        ["email", "birthdate", "gender", "name", "phoneNumber", "picture"];

    /// 六个字段必须全部存在且为布尔值
    pub fn from_value(value: &Value) -> Option<Self> {
        let flag = |key: &str| value.get(key).and_then(Value::as_bool);
        Some(Self {
            email: flag("email")?,
            birthdate: flag("birthdate")?,
            gender: flag("gender")?,
            name: flag("name")?,
            phone_number: flag("phoneNumber")?,
            picture: flag("picture")?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PermissionRecord {
    pub id: Uuid,
    pub citizen_id: Uuid,
    pub national_id: String,
    pub email_permission: bool,
    pub birthdate_permission: bool,
    pub gender_permission: bool,
    pub name_permission: bool,
    pub phone_number_permission: bool,
    pub picture_permission: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionInfo {
    pub id: Uuid,
    pub citizen_id: Uuid,
    pub national_id: String,
    pub permissions: ConsentFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PermissionRecord> for PermissionInfo {
    fn from(r: PermissionRecord) -> Self {
        Self {
            id: r.id,
            citizen_id: r.citizen_id,
            national_id: r.national_id,
            permissions: ConsentFlags {
                email: r.email_permission,
                birthdate: r.birthdate_permission,
                gender: r.gender_permission,
                name: r.name_permission,
                phone_number: r.phone_number_permission,
                picture: r.picture_permission,
            },
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl PermissionRecord {
    pub async fn find_by_citizen(
        pool: &PgPool,
        citizen_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, PermissionRecord>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM user_permissions WHERE citizen_id = $1"
        ))
        .bind(citizen_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        citizen_id: Uuid,
        national_id: &str,
        flags: ConsentFlags,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PermissionRecord>(&format!(
            r#"
            UPDATE user_permissions
            SET national_id = $2, email_permission = $3, birthdate_permission = $4,
                gender_permission = $5, name_permission = $6, phone_number_permission = $7,
                picture_permission = $8, updated_at = NOW()
            WHERE citizen_id = $1
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(citizen_id)
        .bind(national_id)
        .bind(flags.email)
        .bind(flags.birthdate)
        .bind(flags.gender)
        .bind(flags.name)
        .bind(flags.phone_number)
        .bind(flags.picture)
        .fetch_one(pool)
        .await
    }

    pub async fn insert(
        pool: &PgPool,
        citizen_id: Uuid,
        national_id: &str,
        flags: ConsentFlags,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PermissionRecord>(&format!(
            r#"
            INSERT INTO user_permissions (citizen_id, national_id, email_permission,
                birthdate_permission, gender_permission, name_permission,
                phone_number_permission, picture_permission, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(citizen_id)
        .bind(national_id)
        .bind(flags.email)
        .bind(flags.birthdate)
        .bind(flags.gender)
        .bind(flags.name)
        .bind(flags.phone_number)
        .bind(flags.picture)
        .fetch_one(pool)
        .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePermissionsRequest {
    pub national_id: Option<String>,
    pub permissions: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NationalIdQuery {
    pub national_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_update: Option<bool>,
    pub data: PermissionInfo,
    pub citizen: CitizenProfile,
}
