pub mod config;
pub mod event;
pub mod project;
pub mod report;
pub mod service;

pub use config::{ContainerSettings, LoggingConfig, PortRange, Timeouts, WharfConfig};
pub use event::{DeploymentEvent, DeploymentStep};
pub use project::{
    DeploymentRequest, Project, ProjectFilter, ProjectPatch, ProjectStatus, TransitionOrigin,
};
pub use report::{
    PortAllocation, PortStatistics, ProjectStatusReport, ReconciliationFailure,
    ReconciliationReport, StatusCorrection,
};
pub use service::{ContainerInfo, ContainerStatus, PortMapping, RestartPolicy, ServiceSpec};
