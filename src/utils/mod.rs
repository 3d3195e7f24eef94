pub mod logging_config;

pub use logging_config::LoggingConfig;
