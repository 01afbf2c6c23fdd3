//! Deployment and lifecycle orchestration for container-backed web projects.
//!
//! [`services::orchestrator::DeploymentOrchestrator`] turns a
//! [`models::DeploymentRequest`] into a running container group and owns
//! every status change during deployment.
//! [`services::synchronizer::StatusSynchronizer`] corrects drift between
//! declared status and what the container runtime reports.

pub mod error;
pub mod models;
pub mod services;

pub use error::{Result, WharfError};
