use axum::{
    body::Body,
    extract::{Extension, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::{
    AppState,
    error::AppError,
    utils::{Claims, Role, verify_token},
};

/// 校验 Bearer 令牌，并把 Claims 放进请求扩展
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;

    let claims = verify_token(bearer.token(), &state.config).map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        AppError::Unauthorized("Invalid or expired token".into())
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// 必须挂在 auth_middleware 之后
pub async fn require_admin(
    Extension(claims): Extension<Claims>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if claims.role != Role::Admin {
        tracing::warn!("Non-admin subject {} attempted an admin route", claims.sub);
        return Err(AppError::Forbidden("Admin privileges required".into()));
    }
    Ok(next.run(req).await)
}
