//! `wry` browser engine
//!
//! Every service page is a child web view of the one popup window. All
//! instances are built from a single shared `WebContext`, so a permission
//! granted to one page's process is visible to the others.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use url::Url;
use wry::dpi::{PhysicalPosition, PhysicalSize, Position, Size};
use wry::http::header::{HeaderMap, HeaderName, HeaderValue};
use wry::{PageLoadEvent, Rect, WebContext, WebView, WebViewBuilder};

use super::{
    BrowserEngine, EngineConfig, EngineError, EngineEvent, EngineFactory, EventSink,
    NavigationRequest, ScriptCallback,
};

fn full_bounds(width: u32, height: u32) -> Rect {
    Rect {
        position: Position::Physical(PhysicalPosition::new(0, 0)),
        size: Size::Physical(PhysicalSize::new(width, height)),
    }
}

pub struct WryEngine {
    webview: WebView,
}

impl BrowserEngine for WryEngine {
    fn navigate(&self, request: &NavigationRequest) -> Result<(), EngineError> {
        let headers = request.effective_headers();
        if headers.is_empty() {
            return self
                .webview
                .load_url(request.url.as_str())
                .map_err(|e| EngineError::Navigation(e.to_string()));
        }

        let mut map = HeaderMap::new();
        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => tracing::warn!("Skipping invalid header {}", name),
            }
        }
        self.webview
            .load_url_with_headers(request.url.as_str(), map)
            .map_err(|e| EngineError::Navigation(e.to_string()))
    }

    fn evaluate(&self, script: &str, callback: ScriptCallback) {
        // wry wants `Fn`; the completion fires once, from whichever side gets it
        let slot = Arc::new(Mutex::new(Some(callback)));
        let pending = slot.clone();
        let result = self
            .webview
            .evaluate_script_with_callback(script, move |raw: String| {
                let callback = pending.lock().ok().and_then(|mut s| s.take());
                if let Some(callback) = callback {
                    let value = if raw.trim().is_empty() {
                        Ok(serde_json::Value::Null)
                    } else {
                        serde_json::from_str(&raw).map_err(|e| EngineError::Script(e.to_string()))
                    };
                    callback(value);
                }
            });

        if let Err(e) = result {
            tracing::warn!("Script evaluation could not be dispatched: {}", e);
            let callback = slot.lock().ok().and_then(|mut s| s.take());
            if let Some(callback) = callback {
                callback(Err(EngineError::Script(e.to_string())));
            }
        }
    }

    fn current_url(&self) -> Option<Url> {
        self.webview
            .url()
            .ok()
            .and_then(|raw| Url::parse(&raw).ok())
    }

    fn clear_site_data(&self) -> Result<(), EngineError> {
        self.webview
            .clear_all_browsing_data()
            .map_err(|e| EngineError::Script(e.to_string()))
    }

    fn set_visible(&self, visible: bool) {
        if let Err(e) = self.webview.set_visible(visible) {
            tracing::warn!("Failed to change web view visibility: {}", e);
        }
        if visible {
            let _ = self.webview.focus();
        }
    }

    fn resize(&self, width: u32, height: u32) {
        if let Err(e) = self.webview.set_bounds(full_bounds(width, height)) {
            tracing::warn!("Failed to resize web view: {}", e);
        }
    }
}

/// Creates `WryEngine`s as children of the popup window
pub struct WryEngineFactory {
    window: Rc<tao::window::Window>,
    context: RefCell<WebContext>,
}

impl WryEngineFactory {
    pub fn new(window: Rc<tao::window::Window>) -> Self {
        Self {
            window,
            context: RefCell::new(WebContext::new(None)),
        }
    }
}

impl EngineFactory for WryEngineFactory {
    fn create(
        &self,
        config: &EngineConfig,
        events: EventSink,
    ) -> Result<Rc<dyn BrowserEngine>, EngineError> {
        let size = self.window.inner_size();
        let mut context = self.context.borrow_mut();

        let mut builder = WebViewBuilder::new_with_web_context(&mut context)
            .with_bounds(full_bounds(size.width, size.height))
            .with_user_agent(&config.user_agent)
            .with_incognito(config.non_persistent)
            .with_autoplay(config.autoplay)
            .with_visible(false);

        if !config.javascript_enabled {
            tracing::warn!("JavaScript cannot be disabled for {}", config.service);
        }

        for script in &config.document_start_scripts {
            builder = builder.with_initialization_script(script.as_str());
        }

        let generation = config.generation;
        let ipc_service = config.service.clone();
        let ipc_events = events.clone();
        let load_service = config.service.clone();

        let webview = builder
            .with_ipc_handler(move |msg: wry::http::Request<String>| {
                let _ = ipc_events.send(EngineEvent::Message {
                    service: ipc_service.clone(),
                    generation,
                    body: msg.body().clone(),
                });
            })
            .with_on_page_load_handler(move |event, url| {
                let event = match event {
                    PageLoadEvent::Started => EngineEvent::PageLoadStarted {
                        service: load_service.clone(),
                        generation,
                    },
                    PageLoadEvent::Finished => EngineEvent::PageLoadFinished {
                        service: load_service.clone(),
                        generation,
                        url,
                    },
                };
                let _ = events.send(event);
            })
            .build_as_child(&*self.window)
            .map_err(|e| EngineError::Create(e.to_string()))?;

        tracing::debug!("Created web view for {}", config.service);
        Ok(Rc::new(WryEngine { webview }))
    }
}
