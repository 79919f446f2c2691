// Admin HTTP API

pub mod admin;

pub use admin::{create_admin_router, AdminAppState};
