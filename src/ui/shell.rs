//! Window/menu shell
//!
//! Owns the popup window, the status item and the global hotkey, and routes
//! their events into the session cache. Everything here runs on the `tao`
//! main thread; other threads reach it only through the event loop proxy.

use anyhow::Result;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tao::dpi::{LogicalPosition, LogicalSize};
use tao::event::{Event, StartCause, WindowEvent};
use tao::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy};
use tao::window::{Window, WindowBuilder};
use tokio::sync::watch;
use tray_icon::menu::MenuEvent;
use tray_icon::{TrayIcon, TrayIconBuilder, TrayIconEvent};

use super::placement::{self, Rect};
use super::tray::{self, TrayAction, TrayMenu};
use crate::audio;
use crate::business::{
    AppEvent, BridgeGenerator, HotkeyManager, KeyContext, KeyPolicy, SessionCache, SystemClock,
    UsageTracker,
};
use crate::data::{
    PinnedFrame, PreferenceStore, ServiceId, ServiceRegistry, UsageSnapshot, BRIDGE_SERVICE_NAME,
};
use crate::platform::WryEngineFactory;

#[cfg(target_os = "macos")]
use crate::business::{KeyEvent, Verdict};
#[cfg(target_os = "macos")]
use crate::platform::macos::KeyMonitor;

const POPUP_WIDTH: f64 = 440.0;
const POPUP_HEIGHT: f64 = 640.0;
const TICK: Duration = Duration::from_millis(250);
/// Ticks between default input device checks
const DEVICE_CHECK_TICKS: u32 = 8;

#[derive(Debug)]
pub enum UserEvent {
    Menu(MenuEvent),
    Tray(TrayIconEvent),
    Hotkey,
}

/// What `run` needs that is built before the event loop exists
pub struct ShellContext {
    pub registry: ServiceRegistry,
    pub prefs: PreferenceStore,
    pub bridge: BridgeGenerator,
    pub tracker: UsageTracker,
    /// Reachability changes from the network monitor
    pub reachability: Receiver<bool>,
}

/// Thread-safe sender into the event loop
fn forwarder(proxy: &EventLoopProxy<UserEvent>) -> impl Fn(UserEvent) + Send + Sync + 'static {
    let proxy = Mutex::new(proxy.clone());
    move |event| {
        if let Ok(proxy) = proxy.lock() {
            let _ = proxy.send_event(event);
        }
    }
}

/// Last used service if it is still visible, else the first visible one
fn initial_service(registry: &ServiceRegistry, prefs: &PreferenceStore) -> Option<ServiceId> {
    prefs
        .last_used_service()
        .and_then(|name| registry.by_name(name))
        .filter(|s| prefs.is_service_visible(&s.name))
        .or_else(|| registry.visible(prefs).next())
        .map(|s| s.id.clone())
}

/// Whether the app as a whole still has focus, not just the popup
#[cfg(target_os = "macos")]
fn app_is_active(_window: &Window) -> bool {
    crate::platform::macos::app_is_active()
}

#[cfg(not(target_os = "macos"))]
fn app_is_active(window: &Window) -> bool {
    window.is_focused()
}

/// Key context for the page currently on screen. The voice UI probe only
/// runs while some voice session is known to be live, so ordinary typing
/// never waits on it.
fn key_context(cache: &SessionCache, selected: Option<&ServiceId>, timeout: Duration) -> KeyContext {
    let Some(id) = selected else {
        return KeyContext::default();
    };
    let voice_ui_visible = !cache.active_voice_services().is_empty()
        && cache.is_voice_ui_visible_blocking(id, timeout);
    KeyContext {
        focus: Some(cache.focused_node(id)),
        from_menu: false,
        voice_ui_visible,
    }
}

struct Shell {
    window: Rc<Window>,
    cache: Rc<RefCell<SessionCache>>,
    selected: Rc<RefCell<Option<ServiceId>>>,
    policy: Rc<RefCell<KeyPolicy>>,
    registry: ServiceRegistry,
    prefs: PreferenceStore,
    bridge: BridgeGenerator,
    tracker: Option<UsageTracker>,
    usage: watch::Receiver<UsageSnapshot>,
    hotkey: Option<HotkeyManager>,
    tray: Option<TrayIcon>,
    tray_menu: Option<TrayMenu>,
    tray_anchor: Option<Rect>,
    reachability: Receiver<bool>,
    permission_tx: Sender<bool>,
    permission_rx: Receiver<bool>,
    pending_frame: Option<PinnedFrame>,
    input_device: Option<String>,
    /// The popup lost focus; see on the next tick whether the app did too
    focus_lost: bool,
    ticks: u32,
    stopped: bool,
    #[cfg(target_os = "macos")]
    key_monitor: Option<KeyMonitor>,
}

impl Shell {
    fn new(ctx: ShellContext, window: Rc<Window>, proxy: &EventLoopProxy<UserEvent>) -> Self {
        let ShellContext {
            registry,
            prefs,
            bridge,
            tracker,
            reachability,
        } = ctx;

        let factory = WryEngineFactory::new(window.clone());
        let cache = SessionCache::new(
            registry.all().to_vec(),
            Box::new(factory),
            Rc::new(SystemClock),
            prefs.voice(),
        );

        let hotkey = match HotkeyManager::new(&prefs.hotkey()) {
            Ok(manager) => {
                let send = forwarder(proxy);
                manager.on_trigger(Arc::new(move || send(UserEvent::Hotkey)));
                Some(manager)
            }
            Err(e) => {
                tracing::warn!("Global hotkey unavailable: {:#}", e);
                None
            }
        };

        let (permission_tx, permission_rx) = mpsc::channel();
        let selected = initial_service(&registry, &prefs);
        let policy = KeyPolicy::with_defaults(prefs.hotkey());
        let usage = tracker.subscribe();

        Self {
            window,
            cache: Rc::new(RefCell::new(cache)),
            selected: Rc::new(RefCell::new(selected)),
            policy: Rc::new(RefCell::new(policy)),
            registry,
            prefs,
            bridge,
            tracker: Some(tracker),
            usage,
            hotkey,
            tray: None,
            tray_menu: None,
            tray_anchor: None,
            reachability,
            permission_tx,
            permission_rx,
            pending_frame: None,
            input_device: None,
            focus_lost: false,
            ticks: 0,
            stopped: false,
            #[cfg(target_os = "macos")]
            key_monitor: None,
        }
    }

    /// First event loop iteration: tray, web views, microphone permission
    fn start(&mut self) {
        if let Err(e) = self.install_tray() {
            tracing::error!("Failed to create tray icon: {:#}", e);
        }

        self.cache.borrow_mut().preload();
        if let Some(id) = self.selected.borrow().clone() {
            self.cache.borrow_mut().show(&id);
        }

        audio::request_microphone_permission(self.permission_tx.clone());
        self.input_device = audio::default_input_device_name();

        #[cfg(target_os = "macos")]
        {
            self.key_monitor = self.install_key_monitor();
        }
        tracing::info!("Shell started");
    }

    fn build_menu(&self) -> Result<TrayMenu> {
        let selected = self.selected.borrow();
        let usage = self.usage.borrow();
        TrayMenu::build(&self.registry, &self.prefs, selected.as_ref(), &usage)
    }

    fn install_tray(&mut self) -> Result<()> {
        let menu = self.build_menu()?;
        let tray = TrayIconBuilder::new()
            .with_menu(Box::new(menu.menu().clone()))
            .with_tooltip(format!("AI Menubar ({})", self.prefs.hotkey_display()))
            .with_icon(tray::load_icon()?)
            .build()?;
        self.tray = Some(tray);
        self.tray_menu = Some(menu);
        tracing::info!("System tray initialized");
        Ok(())
    }

    fn refresh_tray(&mut self) {
        let Some(tray) = &self.tray else {
            return;
        };
        match self.build_menu() {
            Ok(menu) => {
                tray.set_menu(Some(Box::new(menu.menu().clone())));
                self.tray_menu = Some(menu);
            }
            Err(e) => tracing::warn!("Failed to rebuild tray menu: {:#}", e),
        }
    }

    fn current_frame(&self) -> Option<PinnedFrame> {
        let scale = self.window.scale_factor();
        let position = self.window.outer_position().ok()?.to_logical::<f64>(scale);
        let size = self.window.inner_size().to_logical::<f64>(scale);
        Some(PinnedFrame {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        })
    }

    fn monitors(&self) -> Vec<Rect> {
        self.window
            .available_monitors()
            .map(|m| {
                let position = m.position().to_logical::<f64>(m.scale_factor());
                let size = m.size().to_logical::<f64>(m.scale_factor());
                Rect::new(position.x, position.y, size.width, size.height)
            })
            .collect()
    }

    fn show_popup(&mut self) {
        let pinned = if self.prefs.pinned_position_enabled() {
            self.prefs.pinned_frame()
        } else {
            None
        };
        let size = self
            .window
            .inner_size()
            .to_logical::<f64>(self.window.scale_factor());
        let frame = placement::popup_frame(
            (size.width, size.height),
            pinned,
            self.tray_anchor,
            &self.monitors(),
        );

        self.window
            .set_inner_size(LogicalSize::new(frame.width, frame.height));
        self.window
            .set_outer_position(LogicalPosition::new(frame.x, frame.y));
        self.window.set_visible(true);
        self.window.set_focus();

        if let Some(id) = self.selected.borrow().clone() {
            self.cache.borrow_mut().show(&id);
        }
    }

    fn hide_popup(&mut self) {
        if !self.window.is_visible() {
            return;
        }
        self.window.set_visible(false);
        self.cache.borrow_mut().handle_app_event(AppEvent::Hidden);
    }

    fn toggle_popup(&mut self) {
        if self.window.is_visible() {
            self.hide_popup();
        } else {
            self.show_popup();
        }
    }

    fn selected_name(&self) -> Option<String> {
        let selected = self.selected.borrow();
        selected
            .as_ref()
            .and_then(|id| self.registry.get(id))
            .map(|s| s.name.clone())
    }

    fn select_service(&mut self, id: ServiceId) {
        let Some(service) = self.registry.get(&id).cloned() else {
            return;
        };
        {
            let mut cache = self.cache.borrow_mut();
            if let Err(e) = cache.get_or_create(&service) {
                tracing::error!("Cannot show {}: {}", service.name, e);
                return;
            }
            cache.show(&id);
        }
        tracing::info!("Selected {}", service.name);
        *self.selected.borrow_mut() = Some(id);
        if let Some(tracker) = &self.tracker {
            tracker.record_selection(&service);
        }
        self.refresh_tray();
        self.show_popup();
    }

    fn on_tray_event(&mut self, event: TrayIconEvent) {
        if let TrayIconEvent::Click { rect, .. } = event {
            let scale = self.window.scale_factor();
            self.tray_anchor = Some(Rect::new(
                rect.position.x as f64 / scale,
                rect.position.y as f64 / scale,
                rect.size.width as f64 / scale,
                rect.size.height as f64 / scale,
            ));
        }
    }

    fn menu_action(&self, event: &MenuEvent) -> Option<TrayAction> {
        self.tray_menu.as_ref().and_then(|menu| menu.action(event))
    }

    fn handle_action(&mut self, action: TrayAction) {
        tracing::debug!("Tray action {:?}", action);
        match action {
            TrayAction::ShowPopup => self.show_popup(),
            TrayAction::SelectService(id) => self.select_service(id),
            TrayAction::ToggleVisibility(name) => self.toggle_visibility(&name),
            TrayAction::ToggleAlwaysOnTop => {
                let value = !self.prefs.always_on_top();
                if let Err(e) = self.prefs.set_always_on_top(value) {
                    tracing::warn!("Failed to save always-on-top: {:#}", e);
                }
                self.window.set_always_on_top(value);
                self.refresh_tray();
            }
            TrayAction::TogglePinPosition => {
                let enabled = !self.prefs.pinned_position_enabled();
                if let Err(e) = self.prefs.set_pinned_position_enabled(enabled) {
                    tracing::warn!("Failed to save pin setting: {:#}", e);
                }
                if enabled {
                    self.pending_frame = self.current_frame();
                }
                self.refresh_tray();
            }
            TrayAction::StopMicrophone => self.cache.borrow_mut().stop_all_microphone_use(),
            TrayAction::RequestMicrophone => {
                audio::request_microphone_permission(self.permission_tx.clone());
                self.cache.borrow_mut().request_microphone_permission();
            }
            TrayAction::ReloadService => {
                if let Some(id) = self.selected.borrow().clone() {
                    self.cache.borrow_mut().reload(&id);
                }
            }
            TrayAction::ClearCache => {
                self.cache.borrow_mut().clear_all();
                if let Some(tracker) = &self.tracker {
                    tracker.clear_all_sessions();
                }
                if let Some(id) = self.selected.borrow().clone() {
                    self.cache.borrow_mut().show(&id);
                }
            }
            TrayAction::ForgetUsage => {
                let selected = self.selected.borrow().clone();
                if let (Some(id), Some(tracker)) = (selected, &self.tracker) {
                    tracing::info!("Forgetting usage of {}", id);
                    tracker.remove_session(&id);
                }
            }
            TrayAction::ReloadSettings => {
                if let Err(e) = self.reload_settings() {
                    tracing::error!("Failed to reload settings: {:#}", e);
                }
            }
            TrayAction::OpenSettings => self.open_settings(),
            TrayAction::Quit => self.quit(),
        }
    }

    fn toggle_visibility(&mut self, name: &str) {
        match self.prefs.toggle_service_visibility(name) {
            Ok(false) if self.selected_name().as_deref() == Some(name) => {
                let next = self.registry.visible(&self.prefs).next().map(|s| s.id.clone());
                if let Some(id) = &next {
                    self.cache.borrow_mut().show(id);
                }
                *self.selected.borrow_mut() = next;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to save visibility for {}: {:#}", name, e),
        }
        self.refresh_tray();
    }

    /// Re-read the config file and apply what changed
    fn reload_settings(&mut self) -> Result<()> {
        let old_keys = self.prefs.api_keys().clone();
        let old_hotkey = self.prefs.hotkey();
        self.prefs.reload()?;

        if *self.prefs.api_keys() != old_keys {
            self.bridge.generate(self.prefs.api_keys())?;
            if let Some(service) = self.registry.by_name(BRIDGE_SERVICE_NAME) {
                self.cache.borrow_mut().reload(&service.id);
            }
        }

        let hotkey = self.prefs.hotkey();
        if hotkey != old_hotkey {
            if let Some(manager) = &self.hotkey {
                match manager.update_config(&hotkey) {
                    Ok(()) => self.policy.borrow_mut().set_hotkey(hotkey),
                    Err(e) => tracing::warn!("Keeping previous hotkey: {:#}", e),
                }
            }
        }

        self.window.set_always_on_top(self.prefs.always_on_top());
        self.refresh_tray();
        Ok(())
    }

    fn open_settings(&self) {
        let opener = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
        if let Err(e) = std::process::Command::new(opener)
            .arg(self.prefs.path())
            .spawn()
        {
            tracing::warn!("Failed to open {}: {}", self.prefs.path().display(), e);
        }
    }

    fn on_window_event(&mut self, event: &WindowEvent<'_>) {
        match event {
            WindowEvent::Focused(false) => {
                self.cache.borrow_mut().handle_app_event(AppEvent::ResignKey);
                self.focus_lost = true;
                if !self.prefs.always_on_top() {
                    self.window.set_visible(false);
                }
            }
            WindowEvent::Resized(size) => {
                self.cache.borrow().resize(size.width, size.height);
                self.note_frame();
            }
            WindowEvent::Moved(_) => self.note_frame(),
            WindowEvent::CloseRequested => self.hide_popup(),
            _ => {}
        }
    }

    /// Pinned frames are written on the next tick, not on every move
    fn note_frame(&mut self) {
        if self.prefs.pinned_position_enabled() && self.window.is_visible() {
            self.pending_frame = self.current_frame();
        }
    }

    fn check_input_device(&mut self) {
        let current = audio::default_input_device_name();
        if current != self.input_device {
            tracing::info!("Default input device changed to {:?}", current);
            self.input_device = current;
            self.cache
                .borrow_mut()
                .handle_app_event(AppEvent::AudioDeviceChanged);
        }
    }

    fn tick(&mut self) {
        while let Ok(online) = self.reachability.try_recv() {
            self.cache.borrow_mut().set_network_reachable(online);
        }
        while let Ok(granted) = self.permission_rx.try_recv() {
            if granted {
                self.cache.borrow_mut().on_microphone_permission_granted();
            }
        }

        if std::mem::take(&mut self.focus_lost) && !app_is_active(&self.window) {
            self.cache
                .borrow_mut()
                .handle_app_event(AppEvent::ResignActive);
            if let Some(tracker) = &self.tracker {
                tracker.save_all();
            }
        }

        self.cache.borrow_mut().tick();

        if let Some(frame) = self.pending_frame.take() {
            if let Err(e) = self.prefs.save_pinned_frame(frame) {
                tracing::warn!("Failed to save pinned frame: {:#}", e);
            }
        }

        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % DEVICE_CHECK_TICKS == 0 {
            self.check_input_device();
        }

        if self.usage.has_changed().unwrap_or(false) {
            let _ = self.usage.borrow_and_update();
            self.refresh_tray();
        }
    }

    #[cfg(target_os = "macos")]
    fn install_key_monitor(&self) -> Option<KeyMonitor> {
        let cache = self.cache.clone();
        let selected = self.selected.clone();
        let policy = self.policy.clone();
        let timeout = self.prefs.voice().blocking_probe_timeout();

        KeyMonitor::install(move |key_code, modifiers, modifier_only| {
            let event = if modifier_only {
                KeyEvent::flags_changed(modifiers)
            } else {
                KeyEvent::key(key_code, modifiers)
            };
            // re-entered while the shell holds the state: let the key through
            let (Ok(cache), Ok(selected), Ok(policy)) =
                (cache.try_borrow(), selected.try_borrow(), policy.try_borrow())
            else {
                return true;
            };
            let ctx = key_context(&cache, selected.as_ref(), timeout);
            policy.evaluate(&event, &ctx) == Verdict::Pass
        })
    }

    /// Final save; safe to call more than once
    fn quit(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        tracing::info!("Shutting down");

        self.cache.borrow_mut().stop_all_microphone_use();
        if let Some(manager) = &self.hotkey {
            manager.stop();
        }
        #[cfg(target_os = "macos")]
        if let Some(mut monitor) = self.key_monitor.take() {
            monitor.remove();
        }

        let fallback = self.selected_name();
        let last = self
            .tracker
            .take()
            .and_then(UsageTracker::shutdown)
            .or(fallback);
        if let Err(e) = self.prefs.set_last_used_service(last) {
            tracing::warn!("Failed to save last used service: {:#}", e);
        }
    }
}

/// Run the menu-bar app until the user quits
pub fn run(ctx: ShellContext) -> Result<()> {
    #[cfg_attr(not(target_os = "macos"), allow(unused_mut))]
    let mut event_loop = EventLoopBuilder::<UserEvent>::with_user_event().build();
    #[cfg(target_os = "macos")]
    {
        use tao::platform::macos::{ActivationPolicy, EventLoopExtMacOS};
        event_loop.set_activation_policy(ActivationPolicy::Accessory);
    }

    let proxy = event_loop.create_proxy();
    let send_menu = forwarder(&proxy);
    MenuEvent::set_event_handler(Some(move |event| send_menu(UserEvent::Menu(event))));
    let send_tray = forwarder(&proxy);
    TrayIconEvent::set_event_handler(Some(move |event| send_tray(UserEvent::Tray(event))));

    let window = WindowBuilder::new()
        .with_title("AI Menubar")
        .with_decorations(false)
        .with_visible(false)
        .with_inner_size(LogicalSize::new(POPUP_WIDTH, POPUP_HEIGHT))
        .with_always_on_top(ctx.prefs.always_on_top())
        .build(&event_loop)?;

    let mut shell = Shell::new(ctx, Rc::new(window), &proxy);
    let mut next_tick = Instant::now() + TICK;

    event_loop.run(move |event, _target, control_flow| {
        match event {
            Event::NewEvents(StartCause::Init) => shell.start(),
            Event::WindowEvent { event, .. } => shell.on_window_event(&event),
            Event::UserEvent(UserEvent::Hotkey) => shell.toggle_popup(),
            Event::UserEvent(UserEvent::Tray(event)) => shell.on_tray_event(event),
            Event::UserEvent(UserEvent::Menu(event)) => {
                if let Some(action) = shell.menu_action(&event) {
                    shell.handle_action(action);
                }
            }
            Event::MainEventsCleared => {
                if Instant::now() >= next_tick {
                    shell.tick();
                    next_tick = Instant::now() + TICK;
                }
            }
            Event::LoopDestroyed => shell.quit(),
            _ => {}
        }

        *control_flow = if shell.stopped {
            ControlFlow::Exit
        } else {
            ControlFlow::WaitUntil(next_tick)
        };
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::business::clock::ManualClock;
    use crate::business::NodeKind;
    use crate::data::VoiceConfig;
    use crate::platform::testing::FakeFactory;
    use tempfile::TempDir;
    use url::Url;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::builtin(Url::parse("file:///tmp/bridge/index.html").unwrap())
    }

    #[test]
    fn initial_service_prefers_visible_last_used() {
        let dir = TempDir::new().unwrap();
        let registry = registry();
        let mut prefs = PreferenceStore::open(dir.path().join("config.toml"), &registry).unwrap();

        assert_eq!(initial_service(&registry, &prefs), Some(ServiceId::new("chatgpt")));

        prefs.set_last_used_service(Some("Claude".to_string())).unwrap();
        assert_eq!(initial_service(&registry, &prefs), Some(ServiceId::new("claude")));

        prefs.set_service_visibility("Claude", false).unwrap();
        assert_eq!(initial_service(&registry, &prefs), Some(ServiceId::new("chatgpt")));
    }

    #[test]
    fn key_context_follows_page_focus() {
        let registry = registry();
        let factory = Rc::new(FakeFactory::new());
        let mut cache = SessionCache::new(
            registry.all().to_vec(),
            Box::new(factory.clone()),
            Rc::new(ManualClock::new()),
            VoiceConfig::default(),
        );
        cache.preload();
        for engine in factory.created.borrow().iter() {
            engine.clear_calls();
        }
        let claude = ServiceId::new("claude");
        let timeout = Duration::from_millis(1);

        assert_eq!(key_context(&cache, None, timeout), KeyContext::default());

        let ctx = key_context(&cache, Some(&claude), timeout);
        assert_eq!(ctx.focus, Some(NodeKind::WebContent));
        assert!(!ctx.voice_ui_visible);

        cache.handle_message(&claude, r#"{"action":"focusInput"}"#);
        let ctx = key_context(&cache, Some(&claude), timeout);
        assert_eq!(ctx.focus, Some(NodeKind::TextInput));
        assert!(!ctx.from_menu);
        // no probe is sent while no voice session is live
        assert_eq!(factory.engine("claude").evaluated_containing("VOICE_UI"), 0);
    }
}
