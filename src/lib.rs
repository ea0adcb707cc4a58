//! Lendit Book Lending Server
//!
//! REST JSON API over a small lending core: book inventory, loans with
//! partial returns, due dates and overdue reporting, and a borrowing cart.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
