//! Business logic layer
//!
//! The session cache and everything that feeds it: page messages, voice
//! state, timers, reachability, plus the usage tracker, keyboard policy,
//! bridge page and global hotkey.

pub mod bridge;
pub mod clock;
mod hotkey_manager;
pub mod key_policy;
pub mod messages;
pub mod network_monitor;
pub mod session_cache;
pub mod usage_tracker;
mod voice_state;

pub use bridge::{BridgeError, BridgeGenerator, BridgeProvider};
pub use clock::{Clock, SystemClock};
pub use hotkey_manager::HotkeyManager;
pub use key_policy::{KeyContext, KeyEvent, KeyPolicy, KeyRule, NodeKind, Verdict};
pub use network_monitor::{NetworkMonitor, ProbeConfig};
pub use session_cache::{AppEvent, SessionCache, USER_AGENT};
pub use usage_tracker::{UsageTracker, AUTOSAVE_INTERVAL};
pub use voice_state::{Transition, VoiceChatState};
