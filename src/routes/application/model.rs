use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::{error::AppError, utils::validation::is_valid_national_id};

const APPLICATION_COLUMNS: &str = "id, citizen_id, license_type, status, personal_info, documents, \
     emergency_contact, photos, review_notes, submitted_at, approved_at, rejected_at, \
     created_at, updated_at";

/// 申请状态。除草稿提交外，所有流转都由管理员触发且不可逆。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Draft,
    Pending,
    UnderReview,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    /// 可以被审批的状态
    pub const REVIEWABLE: [ApplicationStatus; 3] = [
        ApplicationStatus::Draft,
        ApplicationStatus::Pending,
        ApplicationStatus::UnderReview,
    ];

    /// 申请人仍可修改内容的状态
    pub const EDITABLE: [ApplicationStatus; 2] =
        [ApplicationStatus::Draft, ApplicationStatus::Pending];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Draft => "DRAFT",
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::UnderReview => "UNDER_REVIEW",
            ApplicationStatus::Approved => "APPROVED",
            ApplicationStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ApplicationStatus::Approved | ApplicationStatus::Rejected)
    }

    fn names(statuses: &[ApplicationStatus]) -> Vec<String> {
        statuses.iter().map(|s| s.as_str().to_string()).collect()
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(ApplicationStatus::Draft),
            "PENDING" => Ok(ApplicationStatus::Pending),
            "UNDER_REVIEW" => Ok(ApplicationStatus::UnderReview),
            "APPROVED" => Ok(ApplicationStatus::Approved),
            "REJECTED" => Ok(ApplicationStatus::Rejected),
            other => Err(AppError::validation(format!(
                "Unknown application status: {}",
                other
            ))),
        }
    }
}

/// 管理员审批动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    pub fn parse(action: Option<&str>) -> Result<Self, AppError> {
        match action {
            Some("APPROVED") => Ok(ReviewAction::Approve),
            Some("REJECTED") => Ok(ReviewAction::Reject),
            _ => Err(AppError::validation(
                "Invalid action. Must be \"APPROVED\" or \"REJECTED\"",
            )),
        }
    }

    pub fn target_status(&self) -> ApplicationStatus {
        match self {
            ReviewAction::Approve => ApplicationStatus::Approved,
            ReviewAction::Reject => ApplicationStatus::Rejected,
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approved",
            ReviewAction::Reject => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseType {
    Car,
    Motorcycle,
    Commercial,
}

impl LicenseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseType::Car => "car",
            LicenseType::Motorcycle => "motorcycle",
            LicenseType::Commercial => "commercial",
        }
    }

    /// 有效期年限：商用 3 年，其余 5 年。未知类型按 5 年处理。
    pub fn validity_years(license_type: &str) -> u32 {
        match license_type.parse::<LicenseType>() {
            Ok(LicenseType::Commercial) => 3,
            _ => 5,
        }
    }
}

impl FromStr for LicenseType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "car" => Ok(LicenseType::Car),
            "motorcycle" => Ok(LicenseType::Motorcycle),
            "commercial" => Ok(LicenseType::Commercial),
            _ => Err(AppError::validation(
                "License type must be one of: car, motorcycle, commercial",
            )),
        }
    }
}

/// personalInfo 中必须带合法的 nationalId
pub fn validate_personal_info(info: &Value) -> Result<(), AppError> {
    if !info.is_object() {
        return Err(AppError::validation("personalInfo must be an object"));
    }
    match info.get("nationalId").and_then(Value::as_str) {
        Some(id) if is_valid_national_id(id) => Ok(()),
        Some(_) => Err(AppError::validation("National ID must be 13-16 digits")),
        None => Err(AppError::validation("personalInfo.nationalId is required")),
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct LicenseApplication {
    pub id: Uuid,
    pub citizen_id: Uuid,
    pub license_type: String,
    pub status: String,
    pub personal_info: Option<Value>,
    pub documents: Option<Value>,
    pub emergency_contact: Option<Value>,
    pub photos: Option<Value>,
    pub review_notes: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LicenseApplication {
    pub fn current_status(&self) -> Option<ApplicationStatus> {
        self.status.parse().ok()
    }

    fn personal_field(&self, key: &str) -> Option<&str> {
        self.personal_info
            .as_ref()
            .and_then(|info| info.get(key))
            .and_then(Value::as_str)
    }

    pub fn national_id(&self) -> Option<&str> {
        self.personal_field("nationalId")
    }

    /// `firstName lastName`，缺失部分忽略
    pub fn holder_name(&self) -> String {
        format!(
            "{} {}",
            self.personal_field("firstName").unwrap_or_default(),
            self.personal_field("lastName").unwrap_or_default()
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub id: Uuid,
    pub citizen_id: Uuid,
    pub license_type: String,
    pub status: String,
    pub personal_info: Option<Value>,
    pub documents: Option<Value>,
    pub emergency_contact: Option<Value>,
    pub photos: Option<Value>,
    pub review_notes: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LicenseApplication> for ApplicationInfo {
    fn from(app: LicenseApplication) -> Self {
        Self {
            id: app.id,
            citizen_id: app.citizen_id,
            license_type: app.license_type,
            status: app.status,
            personal_info: app.personal_info,
            documents: app.documents,
            emergency_contact: app.emergency_contact,
            photos: app.photos,
            review_notes: app.review_notes,
            submitted_at: app.submitted_at,
            approved_at: app.approved_at,
            rejected_at: app.rejected_at,
            created_at: app.created_at,
            updated_at: app.updated_at,
        }
    }
}

pub struct NewApplication {
    pub citizen_id: Uuid,
    pub license_type: LicenseType,
    pub personal_info: Value,
    pub documents: Option<Value>,
    pub emergency_contact: Option<Value>,
    pub photos: Option<Value>,
    pub submit: bool,
}

#[derive(Debug, Default)]
pub struct ApplicationUpdate {
    pub license_type: Option<LicenseType>,
    pub personal_info: Option<Value>,
    pub documents: Option<Value>,
    pub emergency_contact: Option<Value>,
    pub photos: Option<Value>,
}

impl LicenseApplication {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseApplication>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM license_applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_by_citizen(
        pool: &PgPool,
        citizen_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseApplication>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM license_applications WHERE citizen_id = $1 \
             ORDER BY created_at DESC"
        ))
        .bind(citizen_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_by_status(
        pool: &PgPool,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseApplication>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM license_applications \
             WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC"
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await
    }

    pub async fn create(pool: &PgPool, new_app: NewApplication) -> Result<Self, sqlx::Error> {
        let status = if new_app.submit {
            ApplicationStatus::Pending
        } else {
            ApplicationStatus::Draft
        };

        let app = sqlx::query_as::<_, LicenseApplication>(&format!(
            r#"
            INSERT INTO license_applications (citizen_id, license_type, status, personal_info,
                documents, emergency_contact, photos, submitted_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $8 THEN NOW() END, NOW(), NOW())
            RETURNING {APPLICATION_COLUMNS}
            "#
        ))
        .bind(new_app.citizen_id)
        .bind(new_app.license_type.as_str())
        .bind(status.as_str())
        .bind(new_app.personal_info)
        .bind(new_app.documents)
        .bind(new_app.emergency_contact)
        .bind(new_app.photos)
        .bind(new_app.submit)
        .fetch_one(pool)
        .await?;

        tracing::info!("Created {} application {} for citizen {}", app.status, app.id, app.citizen_id);
        Ok(app)
    }

    /// 仅在可编辑状态下更新；不可编辑或不存在时返回 None
    pub async fn update_contents(
        pool: &PgPool,
        id: Uuid,
        update: ApplicationUpdate,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseApplication>(&format!(
            r#"
            UPDATE license_applications
            SET license_type = COALESCE($2, license_type),
                personal_info = COALESCE($3, personal_info),
                documents = COALESCE($4, documents),
                emergency_contact = COALESCE($5, emergency_contact),
                photos = COALESCE($6, photos),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($7)
            RETURNING {APPLICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.license_type.map(|t| t.as_str()))
        .bind(update.personal_info)
        .bind(update.documents)
        .bind(update.emergency_contact)
        .bind(update.photos)
        .bind(ApplicationStatus::names(&ApplicationStatus::EDITABLE))
        .fetch_optional(pool)
        .await
    }

    /// DRAFT -> PENDING
    pub async fn submit(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseApplication>(&format!(
            r#"
            UPDATE license_applications
            SET status = $2, submitted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = $3
            RETURNING {APPLICATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(ApplicationStatus::Pending.as_str())
        .bind(ApplicationStatus::Draft.as_str())
        .fetch_optional(pool)
        .await
    }

    /// 对一组申请执行审批，只有处于可审批状态的行会被更新
    pub async fn review_many(
        pool: &PgPool,
        ids: &[Uuid],
        action: ReviewAction,
        review_notes: Option<&str>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, LicenseApplication>(&format!(
            r#"
            UPDATE license_applications
            SET status = $2,
                review_notes = $3,
                approved_at = CASE WHEN $2 = 'APPROVED' THEN NOW() ELSE approved_at END,
                rejected_at = CASE WHEN $2 = 'REJECTED' THEN NOW() ELSE rejected_at END,
                updated_at = NOW()
            WHERE id = ANY($1) AND status = ANY($4)
            RETURNING {APPLICATION_COLUMNS}
            "#
        ))
        .bind(ids)
        .bind(action.target_status().as_str())
        .bind(review_notes)
        .bind(ApplicationStatus::names(&ApplicationStatus::REVIEWABLE))
        .fetch_all(pool)
        .await
    }

    pub async fn review(
        pool: &PgPool,
        id: Uuid,
        action: ReviewAction,
        review_notes: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        Ok(Self::review_many(pool, &[id], action, review_notes)
            .await?
            .into_iter()
            .next())
    }
}

/// 管理员操作审计记录
pub struct AdminAction;

impl AdminAction {
    pub async fn record_many(
        pool: &PgPool,
        admin_id: Uuid,
        action_type: &str,
        application_ids: &[Uuid],
        notes: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO admin_actions (admin_id, action_type, application_id, notes, created_at)
            SELECT $1, $2, app_id, $4, NOW() FROM UNNEST($3::uuid[]) AS app_id
            "#,
        )
        .bind(admin_id)
        .bind(action_type)
        .bind(application_ids)
        .bind(notes)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitizenQuery {
    pub citizen_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApplicationList {
    pub applications: Vec<ApplicationInfo>,
    pub count: usize,
}

impl From<Vec<LicenseApplication>> for ApplicationList {
    fn from(apps: Vec<LicenseApplication>) -> Self {
        let applications: Vec<ApplicationInfo> = apps.into_iter().map(Into::into).collect();
        Self {
            count: applications.len(),
            applications,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub citizen_id: Option<Uuid>,
    pub license_type: Option<String>,
    pub personal_info: Option<Value>,
    pub documents: Option<Value>,
    pub emergency_contact: Option<Value>,
    pub photos: Option<Value>,
    #[serde(default)]
    pub submit: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApplicationRequest {
    pub license_type: Option<String>,
    pub personal_info: Option<Value>,
    pub documents: Option<Value>,
    pub emergency_contact: Option<Value>,
    pub photos: Option<Value>,
}

impl UpdateApplicationRequest {
    pub fn validate(self) -> Result<ApplicationUpdate, AppError> {
        let license_type = self
            .license_type
            .as_deref()
            .map(str::parse::<LicenseType>)
            .transpose()?;
        if let Some(info) = &self.personal_info {
            validate_personal_info(info)?;
        }

        let update = ApplicationUpdate {
            license_type,
            personal_info: self.personal_info,
            documents: self.documents,
            emergency_contact: self.emergency_contact,
            photos: self.photos,
        };
        if update.license_type.is_none()
            && update.personal_info.is_none()
            && update.documents.is_none()
            && update.emergency_contact.is_none()
            && update.photos.is_none()
        {
            return Err(AppError::validation("No fields to update"));
        }
        Ok(update)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub application_id: Option<String>,
    pub action: Option<String>,
    pub review_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReviewRequest {
    pub application_ids: Option<Value>,
    pub action: Option<String>,
    pub review_notes: Option<String>,
}

impl BatchReviewRequest {
    /// 必须是非空的 UUID 字符串数组
    pub fn parsed_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let raw = self
            .application_ids
            .as_ref()
            .and_then(Value::as_array)
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| AppError::validation("Application IDs array is required"))?;

        raw.iter()
            .map(|id| match id.as_str() {
                Some(s) => Uuid::parse_str(s.trim())
                    .map_err(|_| AppError::validation(format!("Invalid application ID: {}", s))),
                None => Err(AppError::validation(format!("Invalid application ID: {}", id))),
            })
            .collect()
    }
}

/// 空白备注按未填写处理
pub fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn application(personal_info: Option<Value>) -> LicenseApplication {
        let now = Utc::now();
        LicenseApplication {
            id: Uuid::new_v4(),
            citizen_id: Uuid::new_v4(),
            license_type: "car".into(),
            status: "PENDING".into(),
            personal_info,
            documents: None,
            emergency_contact: None,
            photos: None,
            review_notes: None,
            submitted_at: Some(now),
            approved_at: None,
            rejected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_parses_persisted_values() {
        assert_eq!("UNDER_REVIEW".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::UnderReview);
        assert_eq!("pending".parse::<ApplicationStatus>().unwrap(), ApplicationStatus::Pending);
        assert!("SHIPPED".parse::<ApplicationStatus>().is_err());
        assert_eq!(ApplicationStatus::UnderReview.to_string(), "UNDER_REVIEW");
    }

    #[test]
    fn final_states_are_not_reviewable() {
        for status in ApplicationStatus::REVIEWABLE {
            assert!(!status.is_final());
        }
        assert!(ApplicationStatus::Approved.is_final());
        assert!(ApplicationStatus::Rejected.is_final());
        assert!(!ApplicationStatus::EDITABLE.contains(&ApplicationStatus::UnderReview));
    }

    #[test]
    fn review_action_accepts_only_uppercase_outcomes() {
        assert_eq!(ReviewAction::parse(Some("APPROVED")).unwrap(), ReviewAction::Approve);
        assert_eq!(
            ReviewAction::parse(Some("REJECTED")).unwrap().target_status(),
            ApplicationStatus::Rejected
        );
        assert!(ReviewAction::parse(Some("approved")).is_err());
        assert!(ReviewAction::parse(Some("PENDING")).is_err());
        assert!(ReviewAction::parse(None).is_err());
    }

    #[test]
    fn license_validity() {
        assert_eq!(LicenseType::validity_years("commercial"), 3);
        assert_eq!(LicenseType::validity_years("car"), 5);
        assert_eq!(LicenseType::validity_years("motorcycle"), 5);
        assert_eq!(LicenseType::validity_years("tractor"), 5);
        assert!("Tractor".parse::<LicenseType>().is_err());
        assert_eq!("CAR".parse::<LicenseType>().unwrap(), LicenseType::Car);
    }

    #[test]
    fn personal_info_needs_valid_national_id() {
        assert!(validate_personal_info(&json!({"nationalId": "1234567890123"})).is_ok());
        assert!(validate_personal_info(&json!({"nationalId": "123"})).is_err());
        assert!(validate_personal_info(&json!({"firstName": "A"})).is_err());
        assert!(validate_personal_info(&json!("1234567890123")).is_err());
    }

    #[test]
    fn holder_name_trims_missing_parts() {
        let app = application(Some(json!({"firstName": "Jean", "lastName": "Hakizimana"})));
        assert_eq!(app.holder_name(), "Jean Hakizimana");
        let app = application(Some(json!({"lastName": "Hakizimana"})));
        assert_eq!(app.holder_name(), "Hakizimana");
        assert_eq!(application(None).holder_name(), "");
    }

    #[test]
    fn info_uses_camel_case() {
        let app = application(Some(json!({"nationalId": "1234567890123"})));
        let value = serde_json::to_value(ApplicationInfo::from(app)).unwrap();
        assert!(value.get("licenseType").is_some());
        assert!(value.get("emergencyContact").is_some());
        assert_eq!(value["personalInfo"]["nationalId"], "1234567890123");
    }

    #[test]
    fn update_requires_some_field() {
        let empty = UpdateApplicationRequest {
            license_type: None,
            personal_info: None,
            documents: None,
            emergency_contact: None,
            photos: None,
        };
        assert!(empty.validate().is_err());

        let update = UpdateApplicationRequest {
            license_type: Some("motorcycle".into()),
            personal_info: None,
            documents: None,
            emergency_contact: None,
            photos: None,
        }
        .validate()
        .unwrap();
        assert_eq!(update.license_type, Some(LicenseType::Motorcycle));
    }

    #[test]
    fn batch_ids_must_be_a_uuid_array() {
        let batch = |ids: Value| BatchReviewRequest {
            application_ids: Some(ids),
            action: Some("APPROVED".into()),
            review_notes: None,
        };
        let id = Uuid::new_v4();
        assert_eq!(batch(json!([id.to_string()])).parsed_ids().unwrap(), vec![id]);

        for bad in [json!("abc"), json!([]), json!({"0": id.to_string()})] {
            let err = batch(bad).parsed_ids().unwrap_err();
            assert_eq!(err.to_string(), "Application IDs array is required");
        }
        let err = batch(json!([id.to_string(), "not-a-uuid"])).parsed_ids().unwrap_err();
        assert_eq!(err.to_string(), "Invalid application ID: not-a-uuid");
        let err = batch(json!([42])).parsed_ids().unwrap_err();
        assert_eq!(err.to_string(), "Invalid application ID: 42");
    }

    #[test]
    fn notes_are_normalized() {
        assert_eq!(normalize_notes(Some("  ".into())), None);
        assert_eq!(normalize_notes(Some(" ok ".into())), Some("ok".into()));
        assert_eq!(normalize_notes(None), None);
    }
}
