//! Configuration Module
//!
//! Configuration loading for the streaming service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, Mt5Settings, ServerSettings, SourceKind, StreamConfig,
};
