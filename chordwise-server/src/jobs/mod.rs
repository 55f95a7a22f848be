//! Job pipeline: submission, background execution, monitoring

pub mod monitor;
pub mod orchestrator;
pub mod source;

pub use monitor::{spawn_monitor, MonitorHandle};
pub use orchestrator::JobOrchestrator;
pub use source::SourceReference;
