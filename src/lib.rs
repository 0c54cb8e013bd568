pub mod briefing;
pub mod config;
pub mod dag;
pub mod errors;
pub mod events;
pub mod executor;
pub mod gates;
pub mod init;
pub mod logging;
pub mod orchestrator;
pub mod phase;
pub mod phasegate_config;
pub mod session;
pub mod ui;
pub mod util;
