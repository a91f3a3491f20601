//! App container manager
//!
//! Long-lived per-enrollment containers exposing TCP ports to the learner's
//! browser. The database row is the source of truth; every status query
//! reconciles it against what the engine actually reports.

mod manager;
pub mod url;

pub use manager::{AppContainerManager, AppStatus};
