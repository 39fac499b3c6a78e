pub mod app;
pub mod cache;
pub mod capability;
pub mod config;
pub mod consts;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod run;
pub mod server;
pub mod status;
pub mod submission;
