pub mod core;
pub mod database;
pub mod services;

pub use crate::core::settings::Settings;
pub use database::{MemoryStore, SqliteStore, Store};
pub use services::{ReportDraft, ReportError, ReportService, Submission};
