//! Container engine adapter
//!
//! The only module that talks to the container daemon. Everything above it
//! works against the [`ContainerEngine`] trait so tests can substitute an
//! in-memory engine.

mod docker;
mod traits;

#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerEngine;
pub use traits::{
    ContainerDetails, ContainerEngine, ContainerSpec, ContainerState, DiskUsage, EngineError,
    EngineResult, ExecStream, ImageDetails, PruneReport, ResourceLimits, RestartPolicyKind,
};
