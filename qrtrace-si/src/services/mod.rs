//! Service layer for qrtrace-si
//!
//! The pipeline orchestrator plus its injected collaborators (decoder,
//! visitor, classifier, SMS gateway) and the pure policy/formatting helpers.

pub mod classifier;
pub mod image_decoder;
pub mod pipeline;
pub mod policy;
pub mod responder;
pub mod safety;
pub mod twilio;
pub mod visitor;

pub use pipeline::{PipelineError, SubmissionPipeline};
