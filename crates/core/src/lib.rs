//! Small utilities shared by every crate in the gateway workspace: a
//! build-info stamp, tokio runtime metrics, and process-wide logging
//! setup.

pub mod logging;
pub mod tokio_metrics;
pub mod version;
