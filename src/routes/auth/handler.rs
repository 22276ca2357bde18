use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    extract::Json,
    middleware::{
        clear_login_attempts, otp_attempts_exhausted, register_login_attempt,
        register_otp_failure,
    },
    utils::{
        Claims, Role, generate_otp, generate_secret_token, generate_token,
        generate_transaction_id, hash_password, hash_secret, message_to_api_response,
        success_to_api_response, verify_password,
        validation::{is_blank, is_valid_password},
    },
};

use super::model::{
    AuthSession, Citizen, ConfirmEmailRequest, ForgotPasswordRequest, ForgotPasswordResponse,
    InitiateOtpRequest, InitiateOtpResponse, LoginRequest, LoginResponse, MeResponse, NewUser,
    OtpFailure, ResetPasswordRequest, SessionToken, SignupRequest, SignupResponse, User,
    UserProfile, VerifyOtpRequest, VerifyOtpResponse, session_status, signup_conflict_message,
};

fn parse_subject(claims: &Claims) -> Result<Uuid, AppError> {
    Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized("Invalid token subject".into()))
}

#[axum::debug_handler]
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let req = req.validate()?;

    if User::find_by_email(&state.pool, &req.email).await?.is_some() {
        return Err(AppError::Conflict(
            "An account with this email already exists".into(),
        ));
    }

    if let Some(existing) =
        User::find_by_identity(&state.pool, &req.national_id, &req.phone_number).await?
    {
        let msg = if existing.national_id == req.national_id {
            "User with this National ID already exists"
        } else {
            "User with this phone number already exists"
        };
        return Err(AppError::Conflict(msg.into()));
    }

    let confirmation_token = generate_secret_token();
    let new_user = NewUser {
        password_hash: hash_password(&req.password)?,
        confirmation_token_hash: hash_secret(&confirmation_token),
        email: req.email,
        full_name: req.full_name,
        national_id: req.national_id,
        phone_number: req.phone_number,
    };

    let user = match User::create(&state.pool, new_user).await {
        Ok(user) => user,
        // 并发注册时由唯一约束兜底
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(AppError::Conflict(
                signup_conflict_message(db.constraint()).into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let link = format!(
        "{}/confirm-email?token={}",
        state.config.site_url, confirmation_token
    );
    state
        .notifier
        .send_email(
            &user.email,
            "Confirm your email",
            &format!("Confirm your account by opening {}", link),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        message_to_api_response(
            "User created successfully! Please check your email for verification.",
            SignupResponse {
                user: user.into(),
                confirmation_token: state
                    .config
                    .is_development()
                    .then_some(confirmation_token),
            },
        ),
    ))
}

#[axum::debug_handler]
pub async fn confirm_email(
    State(state): State<AppState>,
    Json(req): Json<ConfirmEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token = req
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::validation("Confirmation token is required"))?;

    let user = User::confirm_email(&state.pool, &hash_secret(token.trim()))
        .await?
        .ok_or_else(|| AppError::validation("Invalid or already used confirmation token"))?;

    tracing::info!("Confirmed email for user {}", user.id);
    Ok((
        StatusCode::OK,
        message_to_api_response("Email confirmed. You can now sign in.", UserProfile::from(user)),
    ))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(AppError::validation("Email and password are required"));
    };
    if is_blank(Some(email.as_str())) || password.is_empty() {
        return Err(AppError::validation("Email and password are required"));
    }
    let email = email.trim().to_string();

    if !register_login_attempt(&state.redis, &email, &state.config).await? {
        tracing::warn!("Too many login attempts for {}", email);
        return Err(AppError::TooManyRequests(
            "Too many login attempts. Please wait a moment and try again".into(),
        ));
    }

    let user = User::find_by_email(&state.pool, &email)
        .await?
        .ok_or_else(|| AppError::not_found("No account found with this email address"))?;

    if !verify_password(&password, &user.password_hash)? {
        return Err(AppError::Unauthorized(
            "Password incorrect. Please try again".into(),
        ));
    }

    if user.email_confirmed_at.is_none() {
        return Err(AppError::Unauthorized(
            "Please verify your email before signing in".into(),
        ));
    }

    if let Err(e) = clear_login_attempts(&state.redis, &email).await {
        tracing::warn!("Failed to reset login attempts for {}: {}", email, e);
    }

    let role = Role::from_db(&user.role);
    let (token, expires_at) = generate_token(&user.id.to_string(), role, &state.config)?;
    tracing::info!("User {} signed in", user.id);

    Ok((
        StatusCode::OK,
        message_to_api_response(
            "Login successful",
            LoginResponse {
                user: user.into(),
                session: SessionToken::bearer(token, expires_at),
            },
        ),
    ))
}

#[axum::debug_handler]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = req
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| AppError::validation("Email is required"))?;

    let mut reset_token = None;
    // 账户不存在时同样返回成功
    if let Some(user) = User::find_by_email(&state.pool, email.trim()).await? {
        let token = generate_secret_token();
        let expires_at =
            Utc::now() + Duration::seconds(state.config.reset_token_ttl().as_secs() as i64);
        User::set_reset_token(&state.pool, user.id, &hash_secret(&token), expires_at).await?;

        let link = format!("{}/reset-password?token={}", state.config.site_url, token);
        state
            .notifier
            .send_email(
                &user.email,
                "Reset your password",
                &format!("Reset your password by opening {}", link),
            )
            .await;
        tracing::info!("Issued password reset token for user {}", user.id);
        reset_token = Some(token);
    }

    Ok((
        StatusCode::OK,
        message_to_api_response(
            "Password reset email sent! Please check your inbox.",
            ForgotPasswordResponse {
                reset_token: reset_token.filter(|_| state.config.is_development()),
            },
        ),
    ))
}

#[axum::debug_handler]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(token), Some(new_password)) = (req.token, req.new_password) else {
        return Err(AppError::validation("Token and new password are required"));
    };
    if !is_valid_password(&new_password) {
        return Err(AppError::validation(
            "Password must be at least 6 characters long",
        ));
    }

    let user = User::reset_password(
        &state.pool,
        &hash_secret(token.trim()),
        &hash_password(&new_password)?,
    )
    .await?
    .ok_or_else(|| AppError::validation("Reset link is invalid or has expired"))?;

    tracing::info!("Password reset for user {}", user.id);
    Ok((
        StatusCode::OK,
        message_to_api_response("Password updated successfully", ()),
    ))
}

#[axum::debug_handler]
pub async fn initiate_otp(
    State(state): State<AppState>,
    Json(req): Json<InitiateOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let national_id = req
        .national_id
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::validation("National ID is required"))?;

    tracing::info!("Looking up National ID {}", national_id);
    let citizen = Citizen::find_active_by_national_id(&state.pool, &national_id)
        .await?
        .ok_or_else(|| {
            AppError::not_found("National ID not found. Please check and try again.")
        })?;

    let now = Utc::now();
    let otp = generate_otp();
    let transaction_id = generate_transaction_id(now);
    let expires_at = now + Duration::seconds(state.config.otp_ttl().as_secs() as i64);

    if let Err(e) =
        AuthSession::create(&state.pool, citizen.id, &transaction_id, &otp, expires_at).await
    {
        tracing::error!("Failed to create auth session: {:?}", e);
        return Err(AppError::Internal(
            "Failed to initiate authentication. Please try again.".into(),
        ));
    }

    tracing::debug!("OTP for {} expires at {}", transaction_id, expires_at);
    state
        .notifier
        .send_sms(
            &citizen.phone_number,
            &format!(
                "Your driver's license verification code is {}. It expires in {} minutes.",
                otp,
                state.config.otp_ttl().as_secs() / 60
            ),
        )
        .await;

    Ok((
        StatusCode::OK,
        message_to_api_response(
            format!("OTP sent to {}", citizen.phone_number),
            InitiateOtpResponse {
                transaction_id,
                otp: state.config.is_development().then_some(otp),
            },
        ),
    ))
}

#[axum::debug_handler]
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(transaction_id), Some(otp)) = (req.transaction_id, req.otp) else {
        return Err(AppError::validation("Transaction ID and OTP are required"));
    };

    let session = AuthSession::find_by_transaction(&state.pool, &transaction_id)
        .await?
        .ok_or_else(|| AppError::not_found("Authentication session not found"))?;

    match session.check(&otp, Utc::now()) {
        Ok(()) => {}
        Err(OtpFailure::Expired) => {
            AuthSession::transition(&state.pool, session.id, session_status::EXPIRED).await?;
            return Err(AppError::validation("OTP has expired"));
        }
        Err(OtpFailure::AlreadyUsed) => {
            return Err(AppError::validation("OTP has already been used"));
        }
        Err(OtpFailure::Mismatch) => {
            let failures =
                register_otp_failure(&state.redis, &transaction_id, &state.config).await?;
            if otp_attempts_exhausted(failures, &state.config) {
                tracing::warn!(
                    "Locking transaction {} after {} failed OTP attempts",
                    transaction_id,
                    failures
                );
                AuthSession::transition(&state.pool, session.id, session_status::EXPIRED).await?;
                return Err(AppError::TooManyRequests(
                    "Too many invalid attempts. Please request a new code".into(),
                ));
            }
            return Err(AppError::Unauthorized("Invalid OTP".into()));
        }
    }

    // 并发验证时只有一个请求能把会话改为 VERIFIED
    if !AuthSession::transition(&state.pool, session.id, session_status::VERIFIED).await? {
        return Err(AppError::validation("OTP has already been used"));
    }

    let citizen = Citizen::find_by_id(&state.pool, session.citizen_id)
        .await?
        .ok_or_else(|| AppError::not_found("Citizen not found"))?;

    let (token, expires_at) = generate_token(&citizen.id.to_string(), Role::Citizen, &state.config)?;
    tracing::info!("Citizen {} authenticated via OTP", citizen.id);

    Ok((
        StatusCode::OK,
        message_to_api_response(
            "Authentication successful",
            VerifyOtpResponse {
                citizen: citizen.into(),
                session: SessionToken::bearer(token, expires_at),
            },
        ),
    ))
}

#[axum::debug_handler]
pub async fn me(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let id = parse_subject(&claims)?;

    let response = match claims.role {
        Role::Citizen => MeResponse {
            role: claims.role,
            user: None,
            citizen: Some(
                Citizen::find_by_id(&state.pool, id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Citizen not found"))?
                    .into(),
            ),
        },
        Role::User | Role::Admin => MeResponse {
            role: claims.role,
            user: Some(
                User::find_by_id(&state.pool, id)
                    .await?
                    .ok_or_else(|| AppError::not_found("User not found"))?
                    .into(),
            ),
            citizen: None,
        },
    };

    Ok((StatusCode::OK, success_to_api_response(response)))
}

#[axum::debug_handler]
pub async fn refresh_token(
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let (token, expires_at) = generate_token(&claims.sub, claims.role, &state.config)?;
    Ok((
        StatusCode::OK,
        success_to_api_response(SessionToken::bearer(token, expires_at)),
    ))
}
