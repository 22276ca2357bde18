pub mod application;
pub mod auth;
pub mod permission;
pub mod qr_code;
