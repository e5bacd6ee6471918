pub mod config;
pub mod report;
pub mod workflow;

pub use config::{Modality, ProcessingConfig, Step};
pub use report::ReportWriter;
pub use workflow::{expand_inputs, RunSummary, SessionState, Workflow};
