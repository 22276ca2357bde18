mod auth;
mod error_handler;
mod rate_limit;

pub use auth::{auth_middleware, require_admin};
pub use error_handler::log_errors;
pub use rate_limit::{
    RateLimiter, clear_login_attempts, otp_attempts_exhausted, rate_limit, register_login_attempt,
    register_otp_failure,
};
