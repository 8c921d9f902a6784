pub mod alarms;
pub mod auth;
pub mod config;
pub mod diagram;
pub mod error;
pub mod export;
pub mod models;
pub mod mqtt;
pub mod services;
pub mod settings;
pub mod simulator;
pub mod source;
pub mod storage;

pub use config::Config;
pub use error::{AppError, Result};
