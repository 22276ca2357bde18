use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    AppState,
    middleware::{auth_middleware, log_errors, require_admin},
    routes::{application, auth, permission, qr_code},
};

// 无需登录的路由
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/confirm-email", post(auth::confirm_email))
        .route("/auth/login", post(auth::login))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/initiate", post(auth::initiate_otp))
        .route("/auth/verify-otp", post(auth::verify_otp))
        .route(
            "/permissions",
            post(permission::save_permissions).get(permission::get_permissions),
        )
        .route(
            "/qr-codes/verify",
            post(qr_code::verify_qr_code).get(qr_code::lookup_license),
        )
}

// 需要认证的路由
fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/refresh", post(auth::refresh_token))
        .route(
            "/applications",
            get(application::list_applications).post(application::create_application),
        )
        .route(
            "/applications/{id}",
            get(application::get_application).put(application::update_application),
        )
        .route(
            "/applications/{id}/submit",
            post(application::submit_application),
        )
        .route("/qr-codes/generate", post(qr_code::generate_qr_code))
}

// 管理员路由，先过认证再检查角色
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/applications",
            get(application::admin_list_applications),
        )
        .route(
            "/admin/applications/review",
            post(application::review_application).patch(application::batch_review_applications),
        )
        .route(
            "/admin/qr-codes/invalidate",
            post(qr_code::invalidate_qr_code),
        )
        .route_layer(from_fn(require_admin))
}

/// 组装全部路由。限流层由调用方按需叠加。
pub fn create_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .merge(protected_routes())
        .merge(admin_routes())
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let api = Router::new().merge(public_routes()).merge(authenticated);

    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(base, api)
    };

    router
        .layer(from_fn(log_errors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
