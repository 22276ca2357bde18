use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    AppState,
    error::AppError,
    extract::{Json, Query},
    routes::auth::Citizen,
    utils::message_to_api_response,
};

use super::model::{
    ConsentFlags, NationalIdQuery, PermissionRecord, PermissionsResponse, SavePermissionsRequest,
};

async fn find_citizen(state: &AppState, national_id: &str) -> Result<Citizen, AppError> {
    Citizen::find_by_national_id(&state.pool, national_id)
        .await?
        .ok_or_else(|| AppError::not_found("Citizen not found with this national ID"))
}

#[axum::debug_handler]
pub async fn save_permissions(
    State(state): State<AppState>,
    Json(req): Json<SavePermissionsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(national_id), Some(permissions)) = (
        req.national_id.filter(|n| !n.trim().is_empty()),
        req.permissions,
    ) else {
        return Err(AppError::validation(
            "National ID and permissions are required",
        ));
    };

    let flags = ConsentFlags::from_value(&permissions).ok_or_else(|| {
        AppError::validation(format!(
            "Invalid permissions format. Required: {} (all boolean)",
            ConsentFlags::FIELDS.join(", ")
        ))
    })?;

    let citizen = find_citizen(&state, &national_id).await?;

    let is_update = PermissionRecord::find_by_citizen(&state.pool, citizen.id)
        .await?
        .is_some();

    let saved = if is_update {
        tracing::info!("Updating permissions for citizen {}", citizen.id);
        PermissionRecord::update(&state.pool, citizen.id, &national_id, flags).await
    } else {
        tracing::info!("Creating permissions for citizen {}", citizen.id);
        PermissionRecord::insert(&state.pool, citizen.id, &national_id, flags).await
    };

    let verb = if is_update { "update" } else { "save" };
    let record = saved.map_err(|e| {
        tracing::error!("Failed to {} permissions: {:?}", verb, e);
        AppError::Internal(format!("Failed to {} permissions", verb))
    })?;

    Ok((
        StatusCode::OK,
        message_to_api_response(
            format!("Permissions {}d successfully", verb),
            PermissionsResponse {
                is_update: Some(is_update),
                data: record.into(),
                citizen: citizen.into(),
            },
        ),
    ))
}

#[axum::debug_handler]
pub async fn get_permissions(
    State(state): State<AppState>,
    Query(query): Query<NationalIdQuery>,
) -> Result<impl IntoResponse, AppError> {
    let national_id = query
        .national_id
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::validation("National ID is required"))?;

    let citizen = find_citizen(&state, &national_id).await?;

    let record = PermissionRecord::find_by_citizen(&state.pool, citizen.id)
        .await?
        .ok_or_else(|| AppError::not_found("No permissions found for this national ID"))?;

    Ok((
        StatusCode::OK,
        message_to_api_response(
            "Permissions retrieved successfully",
            PermissionsResponse {
                is_update: None,
                data: record.into(),
                citizen: citizen.into(),
            },
        ),
    ))
}
