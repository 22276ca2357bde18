use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    extract::{Json, Query},
    routes::application::{LicenseApplication, audit, ensure_visible, subject_id},
    utils::{Claims, generate_license_number, message_to_api_response, success_to_api_response},
};

use super::{
    model::{
        GenerateQrRequest, GenerateQrResponse, InvalidateQrRequest, IssuedLicense, LicenseCheck,
        LicenseDetails, LicenseNumberQuery, LicenseRecord, QrCodeRecord, QrPayload, QrSummary,
        ScannedPayload, VerificationResult, VerifyQrRequest, expiry_date_for, qr_status,
        verification_url,
    },
    render,
};

#[axum::debug_handler]
pub async fn generate_qr_code(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<GenerateQrRequest>,
) -> Result<impl IntoResponse, AppError> {
    let application_id = req
        .application_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::validation("Application ID is required"))?;

    let not_found = || AppError::not_found("Application not found");
    let application_id = Uuid::parse_str(application_id).map_err(|_| not_found())?;
    let app = LicenseApplication::find_by_id(&state.pool, application_id)
        .await?
        .ok_or_else(not_found)?;
    ensure_visible(&claims, &app)?;

    let national_id = app.national_id().unwrap_or_default().to_string();
    if let Some(claimed) = req.claimed_national_id() {
        if claimed != national_id {
            tracing::warn!(
                "National ID mismatch when generating QR for application {}",
                app.id
            );
            return Err(not_found());
        }
    }

    let existing = QrCodeRecord::find_by_application(&state.pool, app.id).await?;
    if existing
        .as_ref()
        .is_some_and(|qr| qr.status == qr_status::INVALID)
    {
        return Err(AppError::validation("License has been invalidated"));
    }

    let now = Utc::now();
    let license_number = match &existing {
        Some(qr) => qr.license_number.clone(),
        None => generate_license_number(&app.license_type, now),
    };
    let issue_date = now.date_naive();
    let expiry_date = expiry_date_for(&app.license_type, issue_date);
    let holder_name = app.holder_name();

    let payload = QrPayload {
        license_number: license_number.clone(),
        application_id: app.id,
        national_id: national_id.clone(),
        holder_name: holder_name.clone(),
        license_type: app.license_type.clone(),
        issued_date: issue_date,
        expiry_date,
        verification_url: verification_url(&state.config.app_url, &license_number),
    };
    let content = serde_json::to_string(&payload)
        .map_err(|e| AppError::Internal(format!("Failed to encode QR payload: {}", e)))?;
    let qr_code_image = render::to_data_url(&content)?;

    let issued = IssuedLicense {
        license_number,
        application_id: app.id,
        content,
        issue_date,
        expiry_date,
    };
    let saved = match existing {
        Some(qr) => QrCodeRecord::refresh(&state.pool, qr.id, &issued).await,
        None => QrCodeRecord::insert(&state.pool, &issued).await,
    }
    .map_err(|e| {
        tracing::error!("Failed to save QR code for application {}: {:?}", app.id, e);
        AppError::Internal("Failed to generate QR code".into())
    })?;

    tracing::info!(
        "Issued license {} for application {}",
        saved.license_number,
        app.id
    );

    Ok((
        StatusCode::OK,
        message_to_api_response(
            "QR code generated successfully",
            GenerateQrResponse {
                license_number: saved.license_number,
                qr_code_image,
                issue_date: saved.issue_date,
                expiry_date: saved.expiry_date,
                created_at: saved.created_at,
                qr_data: QrSummary {
                    holder_name,
                    national_id,
                    license_type: app.license_type,
                    issue_date: saved.issue_date,
                    expiry_date: saved.expiry_date,
                },
            },
        ),
    ))
}

#[axum::debug_handler]
pub async fn verify_qr_code(
    State(state): State<AppState>,
    Json(req): Json<VerifyQrRequest>,
) -> Result<impl IntoResponse, AppError> {
    let raw = req
        .qr_data
        .filter(|v| !v.is_null())
        .ok_or_else(|| AppError::validation("QR data is required"))?;
    let scanned = ScannedPayload::parse(raw)?;

    let Some(record) =
        LicenseRecord::find(&state.pool, &scanned.license_number, Some(scanned.application_id))
            .await?
    else {
        return Ok((
            StatusCode::OK,
            success_to_api_response(VerificationResult::invalid(
                "License not found in database",
            )),
        ));
    };

    let check = record.check(Utc::now());
    if check == LicenseCheck::Expired && record.status != qr_status::EXPIRED {
        mark_expired(&state, &record.license_number).await;
    }

    let result = match check {
        LicenseCheck::Expired => VerificationResult::expired(LicenseDetails {
            license_number: record.license_number,
            holder_name: scanned.holder_name,
            license_type: record.license_type,
            issue_date: Some(record.issue_date),
            expiry_date: Some(record.expiry_date),
            ..Default::default()
        }),
        LicenseCheck::Invalidated => VerificationResult::invalidated(LicenseDetails {
            license_number: record.license_number,
            holder_name: scanned.holder_name,
            license_type: record.license_type,
            issue_date: Some(record.issue_date),
            expiry_date: Some(record.expiry_date),
            ..Default::default()
        }),
        LicenseCheck::Valid => VerificationResult::valid(LicenseDetails {
            license_number: record.license_number,
            holder_name: scanned.holder_name,
            national_id: scanned.national_id,
            license_type: record.license_type,
            issue_date: Some(record.issue_date),
            expiry_date: Some(record.expiry_date),
            application_status: record.application_status,
        }),
    };

    Ok((StatusCode::OK, success_to_api_response(result)))
}

#[axum::debug_handler]
pub async fn lookup_license(
    State(state): State<AppState>,
    Query(query): Query<LicenseNumberQuery>,
) -> Result<impl IntoResponse, AppError> {
    let license_number = query
        .license_number
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::validation("License number is required"))?;

    let Some(record) = LicenseRecord::find(&state.pool, license_number.trim(), None).await? else {
        return Ok((
            StatusCode::OK,
            success_to_api_response(VerificationResult::invalid("License not found")),
        ));
    };

    let result = match record.check(Utc::now()) {
        LicenseCheck::Expired => VerificationResult::expired(LicenseDetails {
            license_number: record.license_number,
            issue_date: Some(record.issue_date),
            expiry_date: Some(record.expiry_date),
            ..Default::default()
        }),
        LicenseCheck::Invalidated => VerificationResult::invalid("License has been invalidated"),
        LicenseCheck::Valid => VerificationResult::valid(LicenseDetails {
            holder_name: Some(record.stored_holder_name()),
            license_number: record.license_number,
            license_type: record.license_type,
            issue_date: Some(record.issue_date),
            expiry_date: Some(record.expiry_date),
            application_status: record.application_status,
            ..Default::default()
        }),
    };

    Ok((StatusCode::OK, success_to_api_response(result)))
}

#[axum::debug_handler]
pub async fn invalidate_qr_code(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<InvalidateQrRequest>,
) -> Result<impl IntoResponse, AppError> {
    let license_number = req
        .license_number
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::validation("License number is required"))?;
    let admin_id = subject_id(&claims)?;

    let record = QrCodeRecord::set_status(&state.pool, license_number.trim(), qr_status::INVALID)
        .await?
        .ok_or_else(|| AppError::not_found("License not found"))?;

    tracing::info!(
        "Admin {} invalidated license {}",
        admin_id,
        record.license_number
    );
    let reason = req.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    audit(
        &state,
        admin_id,
        "INVALIDATE_LICENSE",
        &[record.application_id],
        reason.as_deref(),
    )
    .await;

    Ok((
        StatusCode::OK,
        message_to_api_response(
            "License invalidated successfully",
            LicenseDetails {
                license_number: record.license_number,
                issue_date: Some(record.issue_date),
                expiry_date: Some(record.expiry_date),
                ..Default::default()
            },
        ),
    ))
}

/// 过期状态回写失败不影响验证结果
async fn mark_expired(state: &AppState, license_number: &str) {
    if let Err(e) = QrCodeRecord::set_status(&state.pool, license_number, qr_status::EXPIRED).await
    {
        tracing::error!("Failed to mark license {} expired: {:?}", license_number, e);
    }
}
