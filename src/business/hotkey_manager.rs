//! Hotkey Manager
//!
//! Owns the global hotkey that toggles the popup and rebinds it at runtime
//! with a stop+replace strategy. Lives on the main thread; only the trigger
//! callback itself crosses threads.

use crate::data::HotkeyConfig;
use crate::platform::{HotkeyProvider, PlatformFactory};
use anyhow::Result;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

type Trigger = Arc<dyn Fn() + Send + Sync + 'static>;
type ProviderFactory = fn(&HotkeyConfig) -> Result<Box<dyn HotkeyProvider>>;

pub struct HotkeyManager {
    provider: RefCell<Box<dyn HotkeyProvider>>,
    callback: RefCell<Option<Trigger>>,
    config: Cell<HotkeyConfig>,
    factory: ProviderFactory,
}

impl HotkeyManager {
    pub fn new(config: &HotkeyConfig) -> Result<Self> {
        Self::with_factory(config, PlatformFactory::create_hotkey_provider)
    }

    fn with_factory(config: &HotkeyConfig, factory: ProviderFactory) -> Result<Self> {
        let provider = factory(config)?;
        tracing::info!("Global hotkey {} registered", config.display());
        Ok(Self {
            provider: RefCell::new(provider),
            callback: RefCell::new(None),
            config: Cell::new(*config),
            factory,
        })
    }

    pub fn config(&self) -> HotkeyConfig {
        self.config.get()
    }

    /// Set the trigger callback; it is re-bound after every config update
    pub fn on_trigger(&self, callback: Trigger) {
        *self.callback.borrow_mut() = Some(callback.clone());
        self.provider.borrow().on_trigger(Box::new(move || callback()));
    }

    /// Rebind to a new key combination. The previous binding is restored if
    /// the new one cannot be registered.
    pub fn update_config(&self, config: &HotkeyConfig) -> Result<()> {
        if *config == self.config.get() {
            return Ok(());
        }

        self.provider.borrow().stop();
        let new_provider = match (self.factory)(config) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!("Could not register {}: {:#}", config.display(), e);
                self.rebind_previous();
                return Err(e);
            }
        };

        if let Some(callback) = self.callback.borrow().clone() {
            new_provider.on_trigger(Box::new(move || callback()));
        }
        *self.provider.borrow_mut() = new_provider;
        self.config.set(*config);

        tracing::info!("Global hotkey changed to {}", config.display());
        Ok(())
    }

    fn rebind_previous(&self) {
        match (self.factory)(&self.config.get()) {
            Ok(provider) => {
                if let Some(callback) = self.callback.borrow().clone() {
                    provider.on_trigger(Box::new(move || callback()));
                }
                *self.provider.borrow_mut() = provider;
            }
            Err(e) => tracing::error!("Failed to restore previous hotkey: {:#}", e),
        }
    }

    pub fn stop(&self) {
        self.provider.borrow().stop();
    }
}
