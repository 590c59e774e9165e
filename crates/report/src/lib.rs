//! `rowguard-report` — merges audit findings and isolation test results into
//! JSON and Markdown artifacts with severity roll-ups and an exit status.

pub mod markdown;
pub mod report;

pub use report::{Report, ReportError, ReportStatus};
