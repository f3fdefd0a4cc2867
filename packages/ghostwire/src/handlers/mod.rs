pub mod db;
pub mod health;
pub mod profiles;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use db::{get_document, list_datasets, replace_document, save_dataset, switch_dataset};
pub use health::{health_handler, health_live_handler, metrics_handler, status_handler};
pub use profiles::{create_profile, log_activity};
pub use websocket::websocket_handler;
