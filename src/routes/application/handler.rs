use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    extract::{Json, Path, Query},
    utils::{Claims, Role, message_to_api_response, success_to_api_response},
};

use super::model::{
    AdminAction, ApplicationInfo, ApplicationList, ApplicationStatus, BatchReviewRequest,
    CitizenQuery, CreateApplicationRequest, LicenseApplication, LicenseType, NewApplication,
    ReviewAction, ReviewRequest, StatusQuery, UpdateApplicationRequest, normalize_notes,
    validate_personal_info,
};

fn not_found() -> AppError {
    AppError::not_found("Application not found")
}

async fn find_application(state: &AppState, id: Uuid) -> Result<LicenseApplication, AppError> {
    LicenseApplication::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(not_found)
}

pub(crate) fn subject_id(claims: &Claims) -> Result<Uuid, AppError> {
    Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized("Invalid token subject".into()))
}

/// 公民令牌只能看到自己的申请，其他公民的申请按不存在处理
pub(crate) fn ensure_visible(claims: &Claims, app: &LicenseApplication) -> Result<(), AppError> {
    match claims.role {
        Role::Citizen if Uuid::parse_str(&claims.sub).ok() != Some(app.citizen_id) => {
            tracing::warn!("Citizen {} denied access to application {}", claims.sub, app.id);
            Err(not_found())
        }
        _ => Ok(()),
    }
}

/// 公民令牌固定查询自己；账户令牌必须指定 citizenId
fn scoped_citizen_id(claims: &Claims, requested: Option<String>) -> Result<Uuid, AppError> {
    if claims.role == Role::Citizen {
        return subject_id(claims);
    }
    let citizen_id = requested
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::validation("Missing required parameter: citizenId"))?;
    Uuid::parse_str(citizen_id.trim())
        .map_err(|_| AppError::validation("citizenId must be a valid UUID"))
}

async fn find_visible(
    state: &AppState,
    claims: &Claims,
    id: Uuid,
) -> Result<LicenseApplication, AppError> {
    let app = find_application(state, id).await?;
    ensure_visible(claims, &app)?;
    Ok(app)
}

/// 审计记录写入失败只记日志
pub(crate) async fn audit(
    state: &AppState,
    admin_id: Uuid,
    action_type: &str,
    ids: &[Uuid],
    notes: Option<&str>,
) {
    if ids.is_empty() {
        return;
    }
    if let Err(e) = AdminAction::record_many(&state.pool, admin_id, action_type, ids, notes).await {
        tracing::error!("Failed to log admin action {} for {:?}: {:?}", action_type, ids, e);
    }
}

#[axum::debug_handler]
pub async fn list_applications(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(query): Query<CitizenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let citizen_id = scoped_citizen_id(&claims, query.citizen_id)?;

    let apps = LicenseApplication::list_by_citizen(&state.pool, citizen_id)
        .await
        .map_err(|e| {
            tracing::error!("Error fetching applications: {:?}", e);
            AppError::Internal("Failed to fetch applications".into())
        })?;

    Ok((StatusCode::OK, success_to_api_response(ApplicationList::from(apps))))
}

#[axum::debug_handler]
pub async fn get_application(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let app = find_visible(&state, &claims, id).await?;
    Ok((
        StatusCode::OK,
        message_to_api_response("Application fetched successfully", ApplicationInfo::from(app)),
    ))
}

#[axum::debug_handler]
pub async fn create_application(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse, AppError> {
    // 公民令牌只能为自己建申请
    let citizen_id = match claims.role {
        Role::Citizen => subject_id(&claims)?,
        Role::User | Role::Admin => req
            .citizen_id
            .ok_or_else(|| AppError::validation("citizenId is required"))?,
    };

    let license_type: LicenseType = req
        .license_type
        .as_deref()
        .ok_or_else(|| AppError::validation("licenseType is required"))?
        .parse()?;

    let personal_info = req
        .personal_info
        .ok_or_else(|| AppError::validation("personalInfo is required"))?;
    validate_personal_info(&personal_info)?;

    let app = LicenseApplication::create(
        &state.pool,
        NewApplication {
            citizen_id,
            license_type,
            personal_info,
            documents: req.documents,
            emergency_contact: req.emergency_contact,
            photos: req.photos,
            submit: req.submit,
        },
    )
    .await?;

    let msg = if req.submit {
        "Application submitted successfully"
    } else {
        "Application saved as draft"
    };
    Ok((
        StatusCode::CREATED,
        message_to_api_response(msg, ApplicationInfo::from(app)),
    ))
}

#[axum::debug_handler]
pub async fn update_application(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateApplicationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let update = req.validate()?;
    find_visible(&state, &claims, id).await?;

    match LicenseApplication::update_contents(&state.pool, id, update).await? {
        Some(app) => {
            tracing::info!("Updated application {}", app.id);
            Ok((
                StatusCode::OK,
                message_to_api_response(
                    "Application updated successfully",
                    ApplicationInfo::from(app),
                ),
            ))
        }
        None => Err(AppError::validation("Application can no longer be edited")),
    }
}

#[axum::debug_handler]
pub async fn submit_application(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    find_visible(&state, &claims, id).await?;

    match LicenseApplication::submit(&state.pool, id).await? {
        Some(app) => {
            tracing::info!("Application {} submitted", app.id);
            Ok((
                StatusCode::OK,
                message_to_api_response(
                    "Application submitted successfully",
                    ApplicationInfo::from(app),
                ),
            ))
        }
        None => {
            let app = find_application(&state, id).await?;
            Err(AppError::validation(format!(
                "Only draft applications can be submitted (current status: {})",
                app.status
            )))
        }
    }
}

#[axum::debug_handler]
pub async fn admin_list_applications(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = query
        .status
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<ApplicationStatus>())
        .transpose()?;

    let apps = LicenseApplication::list_by_status(&state.pool, status).await?;
    Ok((StatusCode::OK, success_to_api_response(ApplicationList::from(apps))))
}

#[axum::debug_handler]
pub async fn review_application(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<ReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(application_id), Some(action)) = (
        req.application_id.filter(|id| !id.trim().is_empty()),
        req.action.filter(|a| !a.trim().is_empty()),
    ) else {
        return Err(AppError::validation(
            "Application ID and action are required",
        ));
    };
    let action = ReviewAction::parse(Some(action.as_str()))?;
    let id = Uuid::parse_str(application_id.trim()).map_err(|_| not_found())?;
    let admin_id = subject_id(&claims)?;
    let notes = normalize_notes(req.review_notes);

    let existing = find_application(&state, id).await?;
    if existing.current_status().is_some_and(|s| s.is_final()) {
        return Err(AppError::validation(format!(
            "Application already {}",
            existing.status
        )));
    }

    // 条件更新，并发审批时只有一个请求能成功
    let updated = match LicenseApplication::review(&state.pool, id, action, notes.as_deref()).await {
        Ok(Some(app)) => app,
        Ok(None) => {
            let current = find_application(&state, id).await?;
            return Err(AppError::validation(format!(
                "Application already {}",
                current.status
            )));
        }
        Err(e) => {
            tracing::error!("Database update error: {:?}", e);
            return Err(AppError::Internal(
                "Failed to update application status".into(),
            ));
        }
    };

    tracing::info!("Admin {} {} application {}", admin_id, action.past_tense(), id);
    audit(
        &state,
        admin_id,
        action.target_status().as_str(),
        &[updated.id],
        notes.as_deref(),
    )
    .await;

    Ok((
        StatusCode::OK,
        message_to_api_response(
            format!("Application {} successfully", action.past_tense()),
            ApplicationInfo::from(updated),
        ),
    ))
}

#[axum::debug_handler]
pub async fn batch_review_applications(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<BatchReviewRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ids = req.parsed_ids()?;
    let action = ReviewAction::parse(req.action.as_deref())?;
    let admin_id = subject_id(&claims)?;
    let notes = normalize_notes(req.review_notes);

    let updated = LicenseApplication::review_many(&state.pool, &ids, action, notes.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Database batch update error: {:?}", e);
            AppError::Internal("Failed to update application statuses".into())
        })?;

    let updated_ids: Vec<Uuid> = updated.iter().map(|app| app.id).collect();
    tracing::info!(
        "Admin {} {} {} of {} applications",
        admin_id,
        action.past_tense(),
        updated_ids.len(),
        ids.len()
    );
    audit(
        &state,
        admin_id,
        action.target_status().as_str(),
        &updated_ids,
        notes.as_deref(),
    )
    .await;

    let list = ApplicationList::from(updated);
    Ok((
        StatusCode::OK,
        message_to_api_response(
            format!("{} applications {} successfully", list.count, action.past_tense()),
            list,
        ),
    ))
}
