//! AI Menubar - menu-bar shell around AI chat web services
//!
//! Keeps one long-lived web view per service so switching between them never
//! reloads a page, and tears down any microphone use those pages start.

pub mod audio;
pub mod business;
pub mod data;
pub mod platform;
pub mod scripts;
pub mod ui;

pub use business::{BridgeGenerator, HotkeyManager, SessionCache, UsageTracker};
pub use data::{AppConfig, PreferenceStore, ServiceRegistry};
