pub mod reports;

pub use reports::{ReportDraft, ReportError, ReportService, Submission};
