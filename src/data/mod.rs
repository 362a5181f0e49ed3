//! Data module for preferences, the service registry and usage records

mod config;
pub mod keys;
mod registry;
mod usage;

pub use config::{
    ApiKeys, AppConfig, GeneralConfig, HotkeyConfig, PinnedFrame, PreferenceStore,
    ServicesConfig, VoiceConfig,
};
pub use registry::{BrandColor, ServiceDescriptor, ServiceId, ServiceRegistry, BRIDGE_SERVICE_NAME};
pub use usage::{SessionRecord, UsageExport, UsageSnapshot, UsageStatistics};
