pub mod config_loader;
pub mod fetcher;
pub(crate) mod lifecycle;
pub mod locks;
pub mod notifier;
pub mod orchestrator;
pub mod ports;
pub mod registry;
pub mod runtime;
pub mod synchronizer;
