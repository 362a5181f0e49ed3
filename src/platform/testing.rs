//! Recording fake engine for cache tests

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use url::Url;

use super::{
    BrowserEngine, EngineConfig, EngineError, EngineEvent, EngineFactory, EventSink,
    NavigationRequest, ScriptCallback,
};
use crate::data::ServiceId;

/// What a `FakeEngine` was asked to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Navigate(NavigationRequest),
    Evaluate(String),
    ClearSiteData,
    SetVisible(bool),
}

pub struct FakeEngine {
    pub service: ServiceId,
    pub config: EngineConfig,
    pub calls: RefCell<Vec<EngineCall>>,
    url: RefCell<Option<Url>>,
    /// Results handed to evaluate callbacks; `Null` once exhausted
    pub script_results: RefCell<VecDeque<Result<serde_json::Value, EngineError>>>,
    /// Hold callbacks instead of completing them immediately
    pub defer_callbacks: Cell<bool>,
    /// Fail every evaluation at dispatch, as an engine that rejects the call
    pub fail_dispatch: Cell<bool>,
    pub pending: RefCell<Vec<ScriptCallback>>,
    events: EventSink,
}

impl FakeEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn navigations(&self) -> Vec<NavigationRequest> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Navigate(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                EngineCall::Evaluate(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn evaluated_containing(&self, needle: &str) -> usize {
        self.evaluated().iter().filter(|s| s.contains(needle)).count()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn post_message(&self, body: &str) {
        self.emit(EngineEvent::Message {
            service: self.service.clone(),
            generation: self.config.generation,
            body: body.to_string(),
        });
    }

    pub fn page_finished(&self) {
        let url = self
            .url
            .borrow()
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default();
        self.emit(EngineEvent::PageLoadFinished {
            service: self.service.clone(),
            generation: self.config.generation,
            url,
        });
    }

    pub fn complete_pending(&self) {
        let pending: Vec<ScriptCallback> = self.pending.borrow_mut().drain(..).collect();
        for callback in pending {
            callback(Ok(serde_json::Value::Null));
        }
    }
}

impl BrowserEngine for FakeEngine {
    fn navigate(&self, request: &NavigationRequest) -> Result<(), EngineError> {
        *self.url.borrow_mut() = Some(request.url.clone());
        self.calls
            .borrow_mut()
            .push(EngineCall::Navigate(request.clone()));
        Ok(())
    }

    fn evaluate(&self, script: &str, callback: ScriptCallback) {
        self.calls
            .borrow_mut()
            .push(EngineCall::Evaluate(script.to_string()));
        if self.fail_dispatch.get() {
            callback(Err(EngineError::Script("dispatch failed".to_string())));
            return;
        }
        if self.defer_callbacks.get() {
            self.pending.borrow_mut().push(callback);
            return;
        }
        let result = self
            .script_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(serde_json::Value::Null));
        callback(result);
    }

    fn current_url(&self) -> Option<Url> {
        self.url.borrow().clone()
    }

    fn clear_site_data(&self) -> Result<(), EngineError> {
        self.calls.borrow_mut().push(EngineCall::ClearSiteData);
        Ok(())
    }

    fn set_visible(&self, visible: bool) {
        self.calls.borrow_mut().push(EngineCall::SetVisible(visible));
    }

    fn resize(&self, _width: u32, _height: u32) {}
}

/// Factory that keeps every engine it created for inspection
#[derive(Default)]
pub struct FakeFactory {
    pub created: RefCell<Vec<Rc<FakeEngine>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently created engine for a service
    pub fn engine(&self, service: &str) -> Rc<FakeEngine> {
        self.created
            .borrow()
            .iter()
            .rev()
            .find(|e| e.service.as_str() == service)
            .cloned()
            .unwrap_or_else(|| panic!("no engine for {service}"))
    }

    pub fn count_for(&self, service: &str) -> usize {
        self.created
            .borrow()
            .iter()
            .filter(|e| e.service.as_str() == service)
            .count()
    }
}

impl EngineFactory for Rc<FakeFactory> {
    fn create(
        &self,
        config: &EngineConfig,
        events: EventSink,
    ) -> Result<Rc<dyn BrowserEngine>, EngineError> {
        let engine = Rc::new(FakeEngine {
            service: config.service.clone(),
            config: config.clone(),
            calls: RefCell::new(Vec::new()),
            url: RefCell::new(None),
            script_results: RefCell::new(VecDeque::new()),
            defer_callbacks: Cell::new(false),
            fail_dispatch: Cell::new(false),
            pending: RefCell::new(Vec::new()),
            events,
        });
        self.created.borrow_mut().push(engine.clone());
        Ok(engine)
    }
}
