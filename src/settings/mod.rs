//! Bridge configuration.
//!
//! Settings load once at startup from a TOML file and are never hot-reloaded;
//! the noise rule table referenced here is loaded the same way. Missing files
//! and missing fields fall back to defaults so a bare `phonebridge` invocation
//! works out of the box.

mod loader;
mod schema;

pub use loader::{load, settings_path};
pub use schema::{
    BridgeSettings, HeartbeatSettings, HistorySettings, InjectionSettings, NoiseSettings,
    PollingSettings, ReconnectSettings, ServerSettings,
};
