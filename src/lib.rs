pub mod betting;
pub mod config;
pub mod config_store;
pub mod error;
pub mod fixture;
pub mod ledger;
pub mod logging;
pub mod performance;
pub mod persist;
pub mod quality;
pub mod service;
pub mod simulation;
pub mod tuner;

pub use error::{EngineError, Result};
