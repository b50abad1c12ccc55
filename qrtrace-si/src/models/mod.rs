//! Data models for qrtrace-si

pub mod submission;

pub use submission::{Submission, SubmissionReport, SubmissionStage, VisitOutcome};
