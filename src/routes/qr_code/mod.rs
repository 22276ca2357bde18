mod handler;
mod model;
mod render;

pub use handler::{generate_qr_code, invalidate_qr_code, lookup_license, verify_qr_code};
