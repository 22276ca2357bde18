mod handler;
mod model;

pub use handler::{
    confirm_email,
    forgot_password,
    initiate_otp,
    login,
    me,
    refresh_token,
    reset_password,
    signup,
    verify_otp,
};
pub use model::{Citizen, CitizenProfile};
