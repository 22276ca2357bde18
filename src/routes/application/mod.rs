mod handler;
mod model;

pub use handler::{
    admin_list_applications,
    batch_review_applications,
    create_application,
    get_application,
    list_applications,
    review_application,
    submit_application,
    update_application,
};
pub(crate) use handler::{audit, ensure_visible, subject_id};
pub use model::{ApplicationStatus, LicenseApplication, LicenseType};
