mod health;
mod log_handler;

pub use health::{health_check, readiness_check, AppState};
pub use log_handler::log_handler;
