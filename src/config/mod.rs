//! Application configuration

mod app_config;

pub use app_config::{
    AppConfig, DatabaseConfig, LlmConfig, LogFormat, LoggingConfig, ServerConfig, WorkflowConfig,
};
