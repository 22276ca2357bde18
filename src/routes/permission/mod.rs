mod handler;
mod model;

pub use handler::{get_permissions, save_permissions};
