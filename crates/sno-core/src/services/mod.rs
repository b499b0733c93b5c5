pub mod config_loader;
pub mod deployer;
pub mod handles;
pub mod orchestrator;
pub mod readiness;
pub mod remote;
pub mod state;
pub mod synth;
pub mod template;
pub mod transport;
