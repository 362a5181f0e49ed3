//! WebView Session Cache
//!
//! Keeps exactly one live browser instance per service so switching services
//! never reloads a page, and owns the microphone lifecycle of those pages.
//!
//! Everything here runs on the main thread. Engines report back through two
//! channels that `pump` drains: page events (channel messages and page-load
//! notifications) and script completions. Timers are a small list of
//! deadlines checked by `tick`, measured against an injected `Clock`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use crate::business::clock::Clock;
use crate::business::key_policy::NodeKind;
use crate::business::messages::{self, PageEvent, PageMessage};
use crate::business::voice_state::{Transition, VoiceChatState};
use crate::data::{ServiceDescriptor, ServiceId, VoiceConfig};
use crate::platform::{
    BrowserEngine, EngineConfig, EngineError, EngineEvent, EngineFactory, NavigationRequest,
};
use crate::scripts::{self, Provider};

/// Desktop Safari user agent presented by every instance
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";

/// Service whose stale stored credentials break its signed-in state
const CREDENTIAL_RESET_SERVICE: &str = "ChatGPT";
/// Services that get repeated permission-fixer injections after creation
const EAGER_FIXER_SERVICES: [&str; 2] = ["ChatGPT", "Copilot"];
const EAGER_FIXER_DELAYS_MS: [u64; 4] = [500, 1000, 2000, 5000];
const DEFAULT_FIXER_DELAY_MS: u64 = 2000;
const PRIME_STOP_DELAY_MS: u64 = 2000;

/// Why the host stopped, used by the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    ResignActive,
    ResignKey,
    Hidden,
    AudioDeviceChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptPurpose {
    PermissionFixer,
    KeychainBlocker,
    VoiceDetector,
    AudioCleanupMonitor,
    StopAudio,
    ClearStorage,
    PrimeMicrophone,
}

impl fmt::Display for ScriptPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptPurpose::PermissionFixer => "permission fixer",
            ScriptPurpose::KeychainBlocker => "keychain blocker",
            ScriptPurpose::VoiceDetector => "voice detector",
            ScriptPurpose::AudioCleanupMonitor => "audio cleanup monitor",
            ScriptPurpose::StopAudio => "audio stop",
            ScriptPurpose::ClearStorage => "storage reset",
            ScriptPurpose::PrimeMicrophone => "microphone priming",
        };
        f.write_str(name)
    }
}

struct ScriptOutcome {
    service: ServiceId,
    generation: u64,
    purpose: ScriptPurpose,
    result: Result<serde_json::Value, EngineError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Task {
    InjectPermissionFixer(ServiceId),
    InjectAudioCleanup(ServiceId),
    StopAudioSimple(ServiceId),
    /// Stop the microphone if voice chat is still inactive
    DeferredStop,
}

struct Scheduled {
    due: Instant,
    task: Task,
}

struct SessionEntry {
    service: ServiceDescriptor,
    engine: Rc<dyn BrowserEngine>,
    /// Bumped for every instance built, so late reports from a discarded one are ignored
    generation: u64,
    loading: bool,
}

impl SessionEntry {
    fn provider(&self) -> Provider {
        let url = self.engine.current_url();
        Provider::from_host(url.as_ref().and_then(|u| u.host_str()))
    }
}

pub struct SessionCache {
    services: Vec<ServiceDescriptor>,
    factory: Box<dyn EngineFactory>,
    clock: Rc<dyn Clock>,
    tuning: VoiceConfig,
    entries: BTreeMap<ServiceId, SessionEntry>,
    next_generation: u64,
    voice: VoiceChatState,
    scheduled: Vec<Scheduled>,
    next_sweep: Instant,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    outcomes_tx: Sender<ScriptOutcome>,
    outcomes_rx: Receiver<ScriptOutcome>,
    user_typing: bool,
    last_typing: Option<Instant>,
    /// Service whose page has a text field focused
    input_focus: Option<ServiceId>,
    online: bool,
    /// Navigations that may have failed for lack of network
    pending_reload: BTreeSet<ServiceId>,
}

impl SessionCache {
    pub fn new(
        services: Vec<ServiceDescriptor>,
        factory: Box<dyn EngineFactory>,
        clock: Rc<dyn Clock>,
        tuning: VoiceConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let (outcomes_tx, outcomes_rx) = mpsc::channel();
        let now = clock.now();
        Self {
            services,
            factory,
            clock,
            voice: VoiceChatState::new(tuning.grace_window()),
            tuning,
            entries: BTreeMap::new(),
            next_generation: 1,
            scheduled: Vec::new(),
            next_sweep: now + tuning.microphone_sweep(),
            events_tx,
            events_rx,
            outcomes_tx,
            outcomes_rx,
            user_typing: false,
            last_typing: None,
            input_focus: None,
            online: true,
            pending_reload: BTreeSet::new(),
        }
    }

    /// Create an instance for every known service
    pub fn preload(&mut self) {
        let services = self.services.clone();
        for service in &services {
            if let Err(e) = self.get_or_create(service) {
                tracing::error!("Failed to preload {}: {}", service.name, e);
            }
        }
        tracing::info!("Preloaded {} web views", self.entries.len());
    }

    /// The cached instance for `service`, creating it on first use
    pub fn get_or_create(
        &mut self,
        service: &ServiceDescriptor,
    ) -> Result<Rc<dyn BrowserEngine>, EngineError> {
        if let Some(entry) = self.entries.get(&service.id) {
            return Ok(entry.engine.clone());
        }
        self.create(service)
    }

    pub fn engine(&self, id: &ServiceId) -> Option<Rc<dyn BrowserEngine>> {
        self.entries.get(id).map(|e| e.engine.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn create(&mut self, service: &ServiceDescriptor) -> Result<Rc<dyn BrowserEngine>, EngineError> {
        let is_credential_reset = service.name == CREDENTIAL_RESET_SERVICE;
        let eager = EAGER_FIXER_SERVICES.contains(&service.name.as_str());

        let mut document_start_scripts = vec![scripts::bootstrap().to_string()];
        if is_credential_reset {
            document_start_scripts.push(scripts::credential_blocker().to_string());
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let config = EngineConfig {
            service: service.id.clone(),
            user_agent: USER_AGENT.to_string(),
            document_start_scripts,
            non_persistent: true,
            javascript_enabled: true,
            autoplay: true,
            generation,
        };
        let engine = self.factory.create(&config, self.events_tx.clone())?;

        let mut request = NavigationRequest::new(service.url.clone());
        if eager {
            request = request
                .with_header("Cache-Control", "no-cache")
                .with_header("Pragma", "no-store");
        }

        self.entries.insert(
            service.id.clone(),
            SessionEntry {
                service: service.clone(),
                engine: engine.clone(),
                generation,
                loading: true,
            },
        );
        self.navigate_entry(&service.id, &request);

        let now = self.clock.now();
        if eager {
            let with_cleanup = Provider::from_host(service.host()).is_aggressive();
            for delay in EAGER_FIXER_DELAYS_MS {
                let due = now + Duration::from_millis(delay);
                self.schedule(due, Task::InjectPermissionFixer(service.id.clone()));
                if with_cleanup {
                    self.schedule(due, Task::InjectAudioCleanup(service.id.clone()));
                }
            }
        } else {
            self.schedule(
                now + Duration::from_millis(DEFAULT_FIXER_DELAY_MS),
                Task::InjectPermissionFixer(service.id.clone()),
            );
        }

        tracing::debug!("Created session for {}", service.name);
        Ok(engine)
    }

    /// Re-fetch a service's page, keeping the same instance
    pub fn reload(&mut self, id: &ServiceId) {
        let Some(entry) = self.entries.get_mut(id) else {
            tracing::debug!("Reload requested for {} with no session", id);
            return;
        };
        entry.loading = true;
        let engine = entry.engine.clone();
        let request = NavigationRequest::new(entry.service.url.clone()).bypass_cache();

        if entry.service.name == CREDENTIAL_RESET_SERVICE {
            // storage first; navigation follows from the completion
            self.evaluate(&engine, id, scripts::clear_storage(), ScriptPurpose::ClearStorage);
            return;
        }
        self.navigate_entry(id, &request);
    }

    /// Navigate an existing entry. Anything issued while offline is retried on reconnect.
    fn navigate_entry(&mut self, id: &ServiceId, request: &NavigationRequest) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        entry.loading = true;
        if let Err(e) = entry.engine.navigate(request) {
            tracing::warn!("Navigation of {} failed: {}", entry.service.name, e);
            self.on_navigation_failed(id);
            return;
        }
        if !self.online {
            tracing::debug!("Navigated {} while offline; retrying when online", id);
            self.pending_reload.insert(id.clone());
        }
    }

    /// Halt capture in every page and forget all voice state
    pub fn stop_all_microphone_use(&mut self) {
        tracing::debug!("Stopping all microphone use");
        self.voice.clear();

        let targets: Vec<(ServiceId, Rc<dyn BrowserEngine>, Provider)> = self
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.engine.clone(), e.provider()))
            .collect();
        for (id, engine, provider) in targets {
            self.evaluate(&engine, &id, &scripts::stop_audio(provider), ScriptPurpose::StopAudio);
        }
    }

    pub fn set_voice_chat_active(&mut self, active: bool) {
        let now = self.clock.now();
        let transition = self.voice.set_active(active, now);

        if active {
            self.inject_voice_detectors();
        }
        if transition == Transition::BecameInactive {
            tracing::info!("Voice chat inactive; releasing microphone shortly");
            self.schedule(now + self.tuning.stop_debounce(), Task::DeferredStop);
        } else if transition == Transition::BecameActive {
            tracing::info!("Voice chat active");
        }
    }

    pub fn is_voice_chat_active(&self) -> bool {
        self.voice.is_active(self.clock.now())
    }

    pub fn active_voice_services(&self) -> Vec<String> {
        self.voice.active_services().map(str::to_string).collect()
    }

    /// Tear down every instance and its site data, then build fresh ones
    pub fn clear_all(&mut self) {
        tracing::info!("Clearing all web view sessions");
        for entry in self.entries.values() {
            if let Err(e) = entry.engine.clear_site_data() {
                tracing::warn!("Failed to clear site data for {}: {}", entry.service.name, e);
            }
            entry.engine.set_visible(false);
        }
        self.entries.clear();
        self.scheduled.clear();
        self.pending_reload.clear();
        self.voice.clear();
        self.user_typing = false;
        self.last_typing = None;
        self.input_focus = None;
        self.preload();
    }

    pub fn is_loading(&self, id: &ServiceId) -> bool {
        self.entries.get(id).map(|e| e.loading).unwrap_or(false)
    }

    pub fn set_loading(&mut self, id: &ServiceId, loading: bool) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.loading = loading;
        }
    }

    /// A navigation completed; a failed one reports nothing at all
    pub fn on_page_loaded(&mut self, id: &ServiceId) {
        self.set_loading(id, false);
        if self.pending_reload.remove(id) {
            tracing::debug!("{} loaded; no reload needed", id);
        }
    }

    /// The engine refused a navigation outright
    pub fn on_navigation_failed(&mut self, id: &ServiceId) {
        self.set_loading(id, false);
        if !self.online && self.entries.contains_key(id) {
            tracing::debug!("Marking {} for reload when online", id);
            self.pending_reload.insert(id.clone());
        }
    }

    pub fn set_network_reachable(&mut self, online: bool) {
        let was_online = self.online;
        self.online = online;
        if online == was_online {
            return;
        }

        if !online {
            let in_flight: Vec<ServiceId> = self
                .entries
                .iter()
                .filter(|(_, e)| e.loading)
                .map(|(id, _)| id.clone())
                .collect();
            tracing::info!("Network lost with {} pages loading", in_flight.len());
            self.pending_reload.extend(in_flight);
            return;
        }

        let pending = std::mem::take(&mut self.pending_reload);
        if !pending.is_empty() {
            tracing::info!("Network restored; reloading {} services", pending.len());
        }
        for id in pending {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let request = NavigationRequest::new(entry.service.url.clone()).bypass_cache();
            self.navigate_entry(&id, &request);
        }
    }

    pub fn is_user_typing(&self) -> bool {
        self.user_typing
    }

    /// What has keyboard focus inside `id`'s page
    pub fn focused_node(&self, id: &ServiceId) -> NodeKind {
        if self.input_focus.as_ref() == Some(id) {
            NodeKind::TextInput
        } else {
            NodeKind::WebContent
        }
    }

    pub fn handle_app_event(&mut self, event: AppEvent) {
        tracing::debug!("App event {:?}", event);
        self.stop_all_microphone_use();
    }

    /// Prime every page's media permission, then release the microphone
    pub fn request_microphone_permission(&mut self) {
        let targets: Vec<(ServiceId, Rc<dyn BrowserEngine>, Provider)> = self
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.engine.clone(), e.provider()))
            .collect();
        for (id, engine, provider) in targets {
            self.evaluate(
                &engine,
                &id,
                scripts::prime_microphone(provider),
                ScriptPurpose::PrimeMicrophone,
            );
        }
    }

    /// OS permission was just granted: patch pages so they use it
    pub fn on_microphone_permission_granted(&mut self) {
        let ids: Vec<ServiceId> = self.entries.keys().cloned().collect();
        for id in ids {
            self.inject_permission_fixer(&id);
        }
    }

    /// Ask a page whether its voice UI is on screen, waiting at most `timeout`.
    /// Falls back to the last reported voice state when no answer arrives.
    pub fn is_voice_ui_visible_blocking(&self, id: &ServiceId, timeout: Duration) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        let provider = entry.provider();
        let (tx, rx) = mpsc::channel();
        entry.engine.evaluate(
            &scripts::voice_ui_probe(provider),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );

        let answer = match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EngineError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::ChannelClosed),
        };
        match answer {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e @ (EngineError::Timeout(_) | EngineError::ChannelClosed)) => {
                tracing::debug!("No voice UI answer from {}: {}", id, e);
                provider.tag().is_some_and(|tag| self.voice.has_service(tag))
            }
            Err(e) => {
                tracing::debug!("Voice UI probe failed for {}: {}", id, e);
                false
            }
        }
    }

    /// Show one service's instance and hide the rest
    pub fn show(&mut self, id: &ServiceId) {
        for (entry_id, entry) in &self.entries {
            entry.engine.set_visible(entry_id == id);
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        for entry in self.entries.values() {
            entry.engine.resize(width, height);
        }
    }

    /// Drain page events and script completions
    pub fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            let (service, generation) = event.source();
            if !self.is_current(service, generation) {
                tracing::debug!("Dropping event from a discarded {} instance", service);
                continue;
            }
            match event {
                EngineEvent::Message { service, body, .. } => self.handle_message(&service, &body),
                EngineEvent::PageLoadStarted { service, .. } => self.set_loading(&service, true),
                EngineEvent::PageLoadFinished { service, .. } => self.on_page_loaded(&service),
            }
        }
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            self.handle_outcome(outcome);
        }
    }

    /// Run everything that is due: queued events, timers, decay and sweeps
    pub fn tick(&mut self) {
        self.pump();
        let now = self.clock.now();

        let (due, waiting): (Vec<Scheduled>, Vec<Scheduled>) =
            std::mem::take(&mut self.scheduled)
                .into_iter()
                .partition(|s| s.due <= now);
        self.scheduled = waiting;
        for scheduled in due {
            self.run_task(scheduled.task);
        }

        if self.voice.decay(now) {
            tracing::debug!("Voice chat state went stale");
            self.schedule(now + self.tuning.stop_debounce(), Task::DeferredStop);
        }

        if self.user_typing {
            let idle = self
                .last_typing
                .map(|t| now.saturating_duration_since(t) > self.tuning.typing_idle())
                .unwrap_or(true);
            if idle {
                self.user_typing = false;
            }
        }

        if now >= self.next_sweep {
            self.next_sweep = now + self.tuning.microphone_sweep();
            self.stop_all_microphone_use();
        }

        self.pump();
    }

    pub fn handle_message(&mut self, id: &ServiceId, body: &str) {
        let msg = match messages::parse(body) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Ignoring malformed message from {}: {}", id, e);
                return;
            }
        };
        tracing::debug!("Message from {}: {:?}", id, msg);

        let provider = self
            .entries
            .get(id)
            .map(|e| e.provider())
            .unwrap_or(Provider::Generic);
        let aggressive_tag = Provider::Copilot.tag().unwrap_or("copilot");
        let from_aggressive =
            provider.is_aggressive() || msg.service.as_deref() == Some(aggressive_tag);

        match &msg.event {
            PageEvent::VoiceStopped => self.on_voice_stopped(id, &msg, from_aggressive),
            PageEvent::VoiceStarted => {
                if from_aggressive {
                    self.voice.add_service(aggressive_tag);
                }
                self.set_voice_chat_active(true);
            }
            PageEvent::PermissionDenied => {
                tracing::warn!(
                    "Microphone permission error in {}: {}",
                    id,
                    msg.reason.as_deref().unwrap_or("unknown")
                );
                self.set_voice_chat_active(false);
            }
            // the fixer's completion chains the keychain blocker where needed
            PageEvent::CredentialPrompt => self.inject_permission_fixer(id),
            PageEvent::VoiceActivity => {
                self.voice.touch(self.clock.now());
                if from_aggressive {
                    self.voice.add_service(aggressive_tag);
                }
            }
            PageEvent::Typing => {
                self.user_typing = true;
                self.last_typing = Some(self.clock.now());
            }
            PageEvent::InputFocused => {
                self.input_focus = Some(id.clone());
                self.user_typing = true;
                self.last_typing = Some(self.clock.now());
            }
            PageEvent::InputBlurred => {
                if self.input_focus.as_ref() == Some(id) {
                    self.input_focus = None;
                }
            }
            PageEvent::Unknown(kind) => {
                tracing::debug!("Unhandled message type {:?} from {}", kind, id);
            }
        }
    }

    fn on_voice_stopped(&mut self, id: &ServiceId, msg: &PageMessage, from_aggressive: bool) {
        if from_aggressive {
            self.voice.remove_service(Provider::Copilot.tag().unwrap_or("copilot"));
            if let Some(engine) = self.engine(id) {
                self.evaluate(
                    &engine,
                    id,
                    &scripts::stop_audio(Provider::Copilot),
                    ScriptPurpose::StopAudio,
                );
            }
        }

        self.set_voice_chat_active(false);

        if msg.requires_immediate_stop() {
            tracing::info!(
                "Voice chat closed by {}; stopping microphone now",
                msg.reason.as_deref().unwrap_or("user")
            );
            self.stop_all_microphone_use();
        }
    }

    fn schedule(&mut self, due: Instant, task: Task) {
        self.scheduled.push(Scheduled { due, task });
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::InjectPermissionFixer(id) => self.inject_permission_fixer(&id),
            Task::InjectAudioCleanup(id) => {
                if let Some(engine) = self.engine(&id) {
                    self.evaluate(
                        &engine,
                        &id,
                        &scripts::audio_cleanup_monitor(Provider::Copilot),
                        ScriptPurpose::AudioCleanupMonitor,
                    );
                }
            }
            Task::StopAudioSimple(id) => {
                if let Some(engine) = self.engine(&id) {
                    self.evaluate(&engine, &id, scripts::stop_audio_simple(), ScriptPurpose::StopAudio);
                }
            }
            Task::DeferredStop => {
                if !self.voice.flag() {
                    self.stop_all_microphone_use();
                }
            }
        }
    }

    fn inject_voice_detectors(&mut self) {
        let targets: Vec<(ServiceId, Rc<dyn BrowserEngine>, Provider)> = self
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.engine.clone(), e.provider()))
            .collect();
        for (id, engine, provider) in targets {
            self.evaluate(
                &engine,
                &id,
                &scripts::voice_detector(provider),
                ScriptPurpose::VoiceDetector,
            );
        }
    }

    fn inject_permission_fixer(&mut self, id: &ServiceId) {
        if let Some(entry) = self.entries.get(id) {
            let engine = entry.engine.clone();
            let script = scripts::permission_fixer(entry.provider());
            self.evaluate(&engine, id, script, ScriptPurpose::PermissionFixer);
        }
    }

    fn inject_keychain_blocker(&mut self, id: &ServiceId) {
        if let Some(engine) = self.engine(id) {
            self.evaluate(&engine, id, scripts::keychain_blocker(), ScriptPurpose::KeychainBlocker);
        }
    }

    fn is_current(&self, id: &ServiceId, generation: u64) -> bool {
        self.entries
            .get(id)
            .is_some_and(|e| e.generation == generation)
    }

    fn evaluate(
        &self,
        engine: &Rc<dyn BrowserEngine>,
        id: &ServiceId,
        script: &str,
        purpose: ScriptPurpose,
    ) {
        let Some(generation) = self.entries.get(id).map(|e| e.generation) else {
            return;
        };
        let tx = self.outcomes_tx.clone();
        let service = id.clone();
        engine.evaluate(
            script,
            Box::new(move |result| {
                let _ = tx.send(ScriptOutcome {
                    service,
                    generation,
                    purpose,
                    result,
                });
            }),
        );
    }

    fn handle_outcome(&mut self, outcome: ScriptOutcome) {
        let ScriptOutcome {
            service,
            generation,
            purpose,
            result,
        } = outcome;

        if !self.is_current(&service, generation) {
            tracing::debug!("Dropping {} result from a discarded {} instance", purpose, service);
            return;
        }

        if purpose == ScriptPurpose::ClearStorage {
            if let Err(e) = &result {
                tracing::warn!("Storage reset for {} failed: {}", service, e);
            }
            if let Some(entry) = self.entries.get(&service) {
                let request = NavigationRequest::new(entry.service.url.clone()).bypass_cache();
                self.navigate_entry(&service, &request);
            }
            return;
        }

        let value = match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Injecting {} into {} failed: {}", purpose, service, e);
                return;
            }
        };
        tracing::debug!("Injected {} into {}", purpose, service);

        let provider = self
            .entries
            .get(&service)
            .map(|e| e.provider())
            .unwrap_or(Provider::Generic);

        match purpose {
            ScriptPurpose::PermissionFixer if provider == Provider::ChatGpt => {
                self.inject_keychain_blocker(&service);
            }
            ScriptPurpose::VoiceDetector if provider.is_aggressive() => {
                self.run_task(Task::InjectAudioCleanup(service));
            }
            ScriptPurpose::PrimeMicrophone => {
                let due = self.clock.now() + Duration::from_millis(PRIME_STOP_DELAY_MS);
                self.schedule(due, Task::StopAudioSimple(service));
            }
            ScriptPurpose::StopAudio if value == serde_json::Value::Bool(false) => {
                tracing::warn!("Audio stop script reported failure in {}", service);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business::clock::ManualClock;
    use crate::data::ServiceRegistry;
    use crate::platform::testing::{EngineCall, FakeFactory};
    use url::Url;

    struct Harness {
        cache: SessionCache,
        factory: Rc<FakeFactory>,
        clock: Rc<ManualClock>,
        registry: ServiceRegistry,
    }

    fn harness() -> Harness {
        let registry = ServiceRegistry::builtin(Url::parse("file:///tmp/bridge/index.html").unwrap());
        let factory = Rc::new(FakeFactory::new());
        let clock = Rc::new(ManualClock::new());
        let cache = SessionCache::new(
            registry.all().to_vec(),
            Box::new(factory.clone()),
            clock.clone(),
            VoiceConfig::default(),
        );
        Harness {
            cache,
            factory,
            clock,
            registry,
        }
    }

    fn preloaded() -> Harness {
        let mut h = harness();
        h.cache.preload();
        for engine in h.factory.created.borrow().iter() {
            engine.clear_calls();
        }
        h
    }

    /// Every engine reports its initial page as loaded
    fn finish_loads(h: &mut Harness) {
        for engine in h.factory.created.borrow().iter() {
            engine.page_finished();
        }
        h.cache.pump();
    }

    fn id(s: &str) -> ServiceId {
        ServiceId::new(s)
    }

    fn same(a: &Rc<dyn BrowserEngine>, b: &Rc<dyn BrowserEngine>) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let mut h = harness();
        for service in h.registry.all().to_vec() {
            let first = h.cache.get_or_create(&service).unwrap();
            let second = h.cache.get_or_create(&service).unwrap();
            assert!(same(&first, &second), "{}", service.name);
            assert_eq!(h.factory.count_for(service.id.as_str()), 1);
        }
        assert_eq!(h.cache.len(), h.registry.len());
    }

    #[test]
    fn test_instances_use_fixed_configuration() {
        let h = preloaded();
        let chatgpt = h.factory.engine("chatgpt");
        assert_eq!(chatgpt.config.user_agent, USER_AGENT);
        assert!(chatgpt.config.non_persistent);
        assert!(chatgpt.config.javascript_enabled);
        assert_eq!(chatgpt.config.document_start_scripts.len(), 2);
        assert_eq!(h.factory.engine("claude").config.document_start_scripts.len(), 1);
    }

    #[test]
    fn test_initial_navigation_headers() {
        let mut h = harness();
        h.cache.preload();

        let copilot = h.factory.engine("copilot").navigations();
        assert_eq!(copilot.len(), 1);
        assert!(copilot[0]
            .headers
            .contains(&("Pragma".to_string(), "no-store".to_string())));

        let claude = h.factory.engine("claude").navigations();
        assert!(claude[0].headers.is_empty());
        assert!(h.cache.is_loading(&id("claude")));
    }

    #[test]
    fn test_clear_all_rebuilds_fresh_instances() {
        let mut h = preloaded();
        let before: Vec<Rc<dyn BrowserEngine>> = h
            .registry
            .all()
            .iter()
            .map(|s| h.cache.engine(&s.id).unwrap())
            .collect();

        h.cache.clear_all();

        assert_eq!(h.cache.len(), h.registry.len());
        for (service, old) in h.registry.all().iter().zip(&before) {
            let new = h.cache.engine(&service.id).unwrap();
            assert!(!same(old, &new), "{}", service.name);
            assert_eq!(h.factory.count_for(service.id.as_str()), 2);
        }
        let old_claude_calls = h.factory.created.borrow()[1].calls();
        assert!(old_claude_calls.contains(&EngineCall::ClearSiteData));
    }

    #[test]
    fn test_stop_all_with_no_sessions_is_harmless() {
        let mut h = harness();
        h.cache.stop_all_microphone_use();
        h.cache.stop_all_microphone_use();
        h.cache.tick();
        assert!(!h.cache.is_voice_chat_active());
        assert!(h.factory.created.borrow().is_empty());
    }

    #[test]
    fn test_stop_all_uses_aggressive_script_for_copilot() {
        let mut h = preloaded();
        h.cache.stop_all_microphone_use();

        assert_eq!(h.factory.engine("copilot").evaluated_containing("_getUserMediaPatched"), 1);
        assert_eq!(h.factory.engine("claude").evaluated_containing("_getUserMediaPatched"), 0);
        assert_eq!(h.factory.engine("claude").evaluated_containing("activeOscillator"), 1);
    }

    #[test]
    fn test_voice_state_decays_after_grace_window() {
        let mut h = preloaded();
        h.cache
            .handle_message(&id("claude"), r#"{"type":"voiceChatStarted","reason":"uiDetected"}"#);
        assert!(h.cache.is_voice_chat_active());

        h.clock.advance(Duration::from_millis(2900));
        assert!(h.cache.is_voice_chat_active());

        h.clock.advance(Duration::from_millis(200));
        assert!(!h.cache.is_voice_chat_active());
        h.cache.tick();
        assert!(!h.cache.is_voice_chat_active());
    }

    #[test]
    fn test_activation_injects_detector_everywhere() {
        let mut h = preloaded();
        h.cache.set_voice_chat_active(true);
        h.cache.pump();

        let claude = h.factory.engine("claude");
        assert_eq!(claude.evaluated_containing("_voiceChatCloseDetectorActive"), 1);
        let copilot = h.factory.engine("copilot");
        assert_eq!(copilot.evaluated_containing("_aggressiveVoiceDetectorActive"), 1);
        // aggressive detector chains the cleanup monitor
        assert_eq!(copilot.evaluated_containing("_audioCleanupMonitorActive"), 1);
    }

    #[test]
    fn test_user_closed_stops_microphone_immediately() {
        let mut h = preloaded();
        h.cache.set_voice_chat_active(true);
        for engine in h.factory.created.borrow().iter() {
            engine.clear_calls();
        }

        h.cache
            .handle_message(&id("claude"), r#"{"type":"voiceChatStopped","reason":"userClosed"}"#);

        assert!(!h.cache.is_voice_chat_active());
        for service in h.registry.all() {
            let engine = h.factory.engine(service.id.as_str());
            assert!(!engine.evaluated().is_empty(), "{} not stopped", service.name);
        }
    }

    #[test]
    fn test_plain_stop_is_deferred() {
        let mut h = preloaded();
        h.cache.set_voice_chat_active(true);
        for engine in h.factory.created.borrow().iter() {
            engine.clear_calls();
        }

        h.cache
            .handle_message(&id("claude"), r#"{"type":"streamEnded","reason":"trackEnded"}"#);
        assert!(h.factory.engine("claude").evaluated().is_empty());

        h.clock.advance(Duration::from_millis(1999));
        h.cache.tick();
        assert_eq!(h.factory.engine("claude").evaluated_containing("activeOscillator"), 0);

        h.clock.advance(Duration::from_millis(1));
        h.cache.tick();
        assert_eq!(h.factory.engine("claude").evaluated_containing("activeOscillator"), 1);
    }

    #[test]
    fn test_deferred_stop_skipped_when_reactivated() {
        let mut h = preloaded();
        h.cache.set_voice_chat_active(true);
        h.cache.set_voice_chat_active(false);
        h.clock.advance(Duration::from_millis(500));
        h.cache.set_voice_chat_active(true);
        for engine in h.factory.created.borrow().iter() {
            engine.clear_calls();
        }

        h.clock.advance(Duration::from_millis(1600));
        h.cache.tick();
        assert_eq!(h.factory.engine("claude").evaluated_containing("activeOscillator"), 0);
    }

    #[test]
    fn test_copilot_stop_forces_release() {
        let mut h = preloaded();
        h.cache
            .handle_message(&id("copilot"), r#"{"type":"voiceChatStarted","service":"copilot"}"#);
        assert_eq!(h.cache.active_voice_services(), vec!["copilot".to_string()]);

        h.factory.engine("copilot").clear_calls();
        h.cache
            .handle_message(&id("copilot"), r#"{"type":"streamEnded","service":"copilot"}"#);

        assert!(h.cache.active_voice_services().is_empty());
        assert_eq!(h.factory.engine("copilot").evaluated_containing("_getUserMediaPatched"), 1);
    }

    #[test]
    fn test_reconnect_reloads_failed_sessions_once() {
        let mut h = preloaded();
        finish_loads(&mut h);
        h.cache.set_network_reachable(false);
        h.cache.on_navigation_failed(&id("claude"));
        h.cache.on_navigation_failed(&id("claude"));

        h.cache.set_network_reachable(true);
        h.cache.set_network_reachable(true);

        let claude = h.factory.engine("claude").navigations();
        assert_eq!(claude.len(), 1);
        assert!(claude[0].bypass_cache);
        assert!(h.factory.engine("grok").navigations().is_empty());
    }

    #[test]
    fn test_offline_navigation_without_completion_is_retried() {
        let mut h = preloaded();
        finish_loads(&mut h);
        h.cache.set_network_reachable(false);

        // a failed load reports nothing; a successful one reports completion
        h.cache.reload(&id("claude"));
        h.cache.reload(&id("grok"));
        h.factory.engine("grok").page_finished();
        h.cache.pump();
        assert!(h.cache.is_loading(&id("claude")));
        assert!(!h.cache.is_loading(&id("grok")));
        h.factory.engine("claude").clear_calls();
        h.factory.engine("grok").clear_calls();

        h.cache.set_network_reachable(true);
        h.cache.set_network_reachable(true);

        let claude = h.factory.engine("claude");
        assert_eq!(claude.navigations().len(), 1);
        assert!(claude.navigations()[0].bypass_cache);
        assert!(h.factory.engine("grok").navigations().is_empty());

        claude.page_finished();
        h.cache.pump();
        assert!(!h.cache.is_loading(&id("claude")));
    }

    #[test]
    fn test_loading_when_network_drops_is_retried() {
        let mut h = preloaded();
        for service in h.registry.all() {
            if service.id != id("claude") {
                h.cache.on_page_loaded(&service.id);
            }
        }

        h.cache.set_network_reachable(false);
        h.cache.set_network_reachable(true);

        assert_eq!(h.factory.engine("claude").navigations().len(), 1);
        assert!(h.factory.engine("grok").navigations().is_empty());
        assert!(h.factory.engine("chatgpt").navigations().is_empty());
    }

    #[test]
    fn test_failure_while_online_is_not_pending() {
        let mut h = preloaded();
        finish_loads(&mut h);
        h.cache.on_navigation_failed(&id("claude"));
        h.cache.set_network_reachable(false);
        h.cache.set_network_reachable(true);
        assert!(h.factory.engine("claude").navigations().is_empty());
    }

    #[test]
    fn test_reload_missing_service_is_noop() {
        let mut h = harness();
        h.cache.reload(&id("claude"));
        assert!(h.factory.created.borrow().is_empty());
    }

    #[test]
    fn test_chatgpt_reload_clears_storage_first() {
        let mut h = preloaded();
        let chatgpt = h.factory.engine("chatgpt");
        chatgpt.defer_callbacks.set(true);

        h.cache.reload(&id("chatgpt"));
        h.cache.pump();
        assert_eq!(chatgpt.evaluated_containing("localStorage.clear()"), 1);
        assert!(chatgpt.navigations().is_empty());

        chatgpt.complete_pending();
        h.cache.pump();
        let navigations = chatgpt.navigations();
        assert_eq!(navigations.len(), 1);
        assert!(navigations[0].bypass_cache);
        assert!(h.cache.engine(&id("chatgpt")).is_some());
    }

    #[test]
    fn test_chatgpt_reload_navigates_when_dispatch_fails() {
        let mut h = preloaded();
        let chatgpt = h.factory.engine("chatgpt");
        chatgpt.fail_dispatch.set(true);

        h.cache.reload(&id("chatgpt"));
        h.cache.pump();

        let navigations = chatgpt.navigations();
        assert_eq!(navigations.len(), 1);
        assert!(navigations[0].bypass_cache);
    }

    #[test]
    fn test_clear_all_discards_late_reports() {
        let mut h = preloaded();
        let old_claude = h.factory.engine("claude");
        let old_chatgpt = h.factory.engine("chatgpt");
        old_chatgpt.defer_callbacks.set(true);
        h.cache.reload(&id("chatgpt"));
        h.cache.handle_message(&id("claude"), r#"{"action":"typing"}"#);
        old_claude.page_finished();
        old_claude.post_message(r#"{"type":"voiceChatStarted"}"#);

        h.cache.clear_all();
        assert!(!h.cache.is_user_typing());
        old_chatgpt.complete_pending();
        h.cache.pump();

        let new_claude = h.factory.engine("claude");
        assert_ne!(new_claude.config.generation, old_claude.config.generation);
        assert!(h.cache.is_loading(&id("claude")));
        assert!(!h.cache.is_voice_chat_active());

        let new_chatgpt = h.factory.engine("chatgpt");
        let navigations = new_chatgpt.navigations();
        assert_eq!(navigations.len(), 1);
        assert!(!navigations[0].bypass_cache);

        // the replacement's own reports still count
        new_claude.page_finished();
        h.cache.pump();
        assert!(!h.cache.is_loading(&id("claude")));
    }

    #[test]
    fn test_generic_reload_keeps_identity() {
        let mut h = preloaded();
        let before = h.cache.engine(&id("claude")).unwrap();
        h.cache.reload(&id("claude"));
        let after = h.cache.engine(&id("claude")).unwrap();

        assert!(same(&before, &after));
        let claude = h.factory.engine("claude");
        assert_eq!(claude.evaluated_containing("localStorage.clear()"), 0);
        assert!(claude.navigations()[0].bypass_cache);
    }

    #[test]
    fn test_permission_fixer_schedule() {
        let mut h = preloaded();

        h.clock.advance(Duration::from_millis(500));
        h.cache.tick();
        let copilot = h.factory.engine("copilot");
        assert_eq!(copilot.evaluated_containing("_permissionFixerInstalled"), 1);
        assert_eq!(copilot.evaluated_containing("_audioCleanupMonitorActive"), 1);
        assert_eq!(h.factory.engine("claude").evaluated_containing("_permissionFixerInstalled"), 0);

        h.clock.advance(Duration::from_millis(1500));
        h.cache.tick();
        assert_eq!(h.factory.engine("claude").evaluated_containing("_permissionFixerInstalled"), 1);

        h.clock.advance(Duration::from_millis(3000));
        h.cache.tick();
        assert_eq!(copilot.evaluated_containing("_permissionFixerInstalled"), 4);
        // ChatGPT's fixer chains the keychain blocker each time
        let chatgpt = h.factory.engine("chatgpt");
        assert_eq!(chatgpt.evaluated_containing("_keychainBlockerActive"), 4);
    }

    #[test]
    fn test_credential_prompt_reinjects_fixer_and_blocker() {
        let mut h = preloaded();
        h.cache.handle_message(&id("chatgpt"), r#"{"type":"credentialPrompt"}"#);
        let chatgpt = h.factory.engine("chatgpt");
        assert_eq!(chatgpt.evaluated_containing("enumerateDevices"), 1);
        assert_eq!(chatgpt.evaluated_containing("_keychainBlockerActive"), 1);
    }

    #[test]
    fn test_typing_detection_goes_idle() {
        let mut h = preloaded();
        h.cache.handle_message(&id("claude"), r#"{"action":"typing"}"#);
        assert!(h.cache.is_user_typing());

        h.clock.advance(Duration::from_millis(400));
        h.cache.tick();
        assert!(h.cache.is_user_typing());

        h.clock.advance(Duration::from_millis(200));
        h.cache.tick();
        assert!(!h.cache.is_user_typing());
    }

    #[test]
    fn test_input_focus_outlives_typing_idle() {
        let mut h = preloaded();
        assert_eq!(h.cache.focused_node(&id("claude")), NodeKind::WebContent);

        h.cache.handle_message(&id("claude"), r#"{"action":"focusInput"}"#);
        h.clock.advance(Duration::from_secs(5));
        h.cache.tick();
        assert!(!h.cache.is_user_typing());
        assert_eq!(h.cache.focused_node(&id("claude")), NodeKind::TextInput);
        assert_eq!(h.cache.focused_node(&id("chatgpt")), NodeKind::WebContent);

        h.cache.handle_message(&id("chatgpt"), r#"{"action":"blurInput"}"#);
        assert_eq!(h.cache.focused_node(&id("claude")), NodeKind::TextInput);
        h.cache.handle_message(&id("claude"), r#"{"action":"blurInput"}"#);
        assert_eq!(h.cache.focused_node(&id("claude")), NodeKind::WebContent);
    }

    #[test]
    fn test_app_events_stop_microphone() {
        let mut h = preloaded();
        h.cache.set_voice_chat_active(true);
        h.cache.handle_app_event(AppEvent::ResignKey);
        assert!(!h.cache.is_voice_chat_active());
        assert_eq!(h.factory.engine("claude").evaluated_containing("activeOscillator"), 1);

        h.cache.set_voice_chat_active(true);
        h.cache.handle_app_event(AppEvent::ResignActive);
        assert!(!h.cache.is_voice_chat_active());
        assert_eq!(h.factory.engine("claude").evaluated_containing("activeOscillator"), 2);
    }

    #[test]
    fn test_periodic_sweep_runs_while_voice_active() {
        let mut h = preloaded();
        h.factory.engine("claude").clear_calls();

        for _ in 0..9 {
            h.clock.advance(Duration::from_secs(1));
            h.cache
                .handle_message(&id("claude"), r#"{"type":"voiceChatStarted","reason":"uiDetected"}"#);
            assert!(h.cache.is_voice_chat_active());
            h.cache.tick();
        }

        // one stop per 3 s sweep
        assert_eq!(h.factory.engine("claude").evaluated_containing("activeOscillator"), 3);
    }

    #[test]
    fn test_prime_then_release() {
        let mut h = preloaded();
        h.cache.request_microphone_permission();
        h.cache.pump();
        let chatgpt = h.factory.engine("chatgpt");
        assert_eq!(chatgpt.evaluated_containing("createOscillator"), 1);
        assert_eq!(h.factory.engine("claude").evaluated_containing("getUserMedia({ audio: true })"), 1);

        h.clock.advance(Duration::from_millis(2000));
        h.cache.tick();
        assert!(h.factory.engine("claude").evaluated_containing("activeOscillator") >= 1);
    }

    #[test]
    fn test_blocking_voice_ui_query() {
        let h = preloaded();
        let copilot = h.factory.engine("copilot");
        copilot
            .script_results
            .borrow_mut()
            .push_back(Ok(serde_json::Value::Bool(true)));
        assert!(h
            .cache
            .is_voice_ui_visible_blocking(&id("copilot"), Duration::from_millis(50)));
        assert!(!h
            .cache
            .is_voice_ui_visible_blocking(&id("copilot"), Duration::from_millis(50)));
        assert!(!h
            .cache
            .is_voice_ui_visible_blocking(&id("nope"), Duration::from_millis(50)));
    }

    #[test]
    fn test_blocking_voice_ui_query_times_out_to_state() {
        let mut h = preloaded();
        h.factory.engine("copilot").defer_callbacks.set(true);
        assert!(!h
            .cache
            .is_voice_ui_visible_blocking(&id("copilot"), Duration::from_millis(5)));

        h.cache
            .handle_message(&id("copilot"), r#"{"type":"voiceActivityDetected","service":"copilot"}"#);
        assert!(h
            .cache
            .is_voice_ui_visible_blocking(&id("copilot"), Duration::from_millis(5)));
    }

    #[test]
    fn test_show_toggles_visibility() {
        let mut h = preloaded();
        h.cache.show(&id("grok"));
        assert!(h
            .factory
            .engine("grok")
            .calls()
            .contains(&EngineCall::SetVisible(true)));
        assert!(h
            .factory
            .engine("claude")
            .calls()
            .contains(&EngineCall::SetVisible(false)));
    }
}
