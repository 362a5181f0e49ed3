//! Platform seams
//!
//! The session cache only ever talks to a `BrowserEngine`; the shell only to
//! a `HotkeyProvider`. Concrete implementations are wired in by
//! `PlatformFactory` and the `webview` module.

use anyhow::Result;
use std::rc::Rc;
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::data::{HotkeyConfig, ServiceId};

mod hotkey;
pub mod webview;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(test)]
pub mod testing;

pub use hotkey::GlobalHotkeyProvider;
pub use webview::{WryEngine, WryEngineFactory};

/// Errors raised by a browser engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to create web view: {0}")]
    Create(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("script result channel closed")]
    ChannelClosed,

    #[error("no result within {0:?}")]
    Timeout(Duration),
}

/// Completion for an asynchronous script evaluation
pub type ScriptCallback = Box<dyn FnOnce(Result<serde_json::Value, EngineError>) + Send + 'static>;

/// One navigation to issue on an engine
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationRequest {
    pub url: Url,
    /// Ignore any locally cached copy of the page
    pub bypass_cache: bool,
    pub headers: Vec<(String, String)>,
}

impl NavigationRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            bypass_cache: false,
            headers: Vec::new(),
        }
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Headers actually sent, including the cache-bypass pair when requested
    pub fn effective_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if self.bypass_cache {
            for (name, value) in [("Cache-Control", "no-cache"), ("Pragma", "no-store")] {
                if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)) {
                    headers.push((name.to_string(), value.to_string()));
                }
            }
        }
        headers
    }
}

/// Fixed per-instance configuration handed to the factory
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub service: ServiceId,
    pub user_agent: String,
    /// Scripts the engine runs before any page script, on every navigation
    pub document_start_scripts: Vec<String>,
    /// Site storage is discarded with the instance
    pub non_persistent: bool,
    pub javascript_enabled: bool,
    /// Allow media playback without a user gesture
    pub autoplay: bool,
    /// Distinguishes this instance from earlier ones for the same service
    pub generation: u64,
}

/// Something a page or the engine reported back to the host.
/// `generation` is copied from the sending instance's `EngineConfig`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Raw body posted on the page-to-host channel
    Message {
        service: ServiceId,
        generation: u64,
        body: String,
    },
    PageLoadStarted {
        service: ServiceId,
        generation: u64,
    },
    PageLoadFinished {
        service: ServiceId,
        generation: u64,
        url: String,
    },
}

impl EngineEvent {
    pub fn source(&self) -> (&ServiceId, u64) {
        match self {
            EngineEvent::Message {
                service, generation, ..
            }
            | EngineEvent::PageLoadStarted { service, generation }
            | EngineEvent::PageLoadFinished {
                service, generation, ..
            } => (service, *generation),
        }
    }
}

/// Where engines deliver `EngineEvent`s; drained on the main thread
pub type EventSink = Sender<EngineEvent>;

/// A live browser instance. Main-thread only.
pub trait BrowserEngine {
    fn navigate(&self, request: &NavigationRequest) -> Result<(), EngineError>;

    /// Evaluate `script`; `callback` runs later with the JSON result.
    /// A script that cannot be dispatched still completes, with an error.
    fn evaluate(&self, script: &str, callback: ScriptCallback);

    fn current_url(&self) -> Option<Url>;

    fn clear_site_data(&self) -> Result<(), EngineError>;

    fn set_visible(&self, visible: bool);

    fn resize(&self, width: u32, height: u32);
}

/// Builds browser instances sharing one network/process context
pub trait EngineFactory {
    fn create(
        &self,
        config: &EngineConfig,
        events: EventSink,
    ) -> Result<Rc<dyn BrowserEngine>, EngineError>;
}

/// Trait for platform-specific hotkey management
pub trait HotkeyProvider {
    /// Start listening for the hotkey
    fn on_trigger(&self, callback: Box<dyn Fn() + Send + Sync + 'static>);
    /// Stop listening
    fn stop(&self);
}

/// Factory for creating platform-specific implementations
pub struct PlatformFactory;

impl PlatformFactory {
    pub fn create_hotkey_provider(config: &HotkeyConfig) -> Result<Box<dyn HotkeyProvider>> {
        Ok(Box::new(GlobalHotkeyProvider::new(config)?))
    }
}
