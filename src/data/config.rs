//! Application Configuration
//!
//! Handles loading and saving the preference store.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data::keys::{self, modifiers};
use crate::data::ServiceRegistry;

const APP_DIR: &str = "ai-menubar";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub hotkey: HotkeyConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub api_keys: ApiKeys,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl AppConfig {
    /// Directory holding config and generated files
    pub fn app_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join(APP_DIR))
            .unwrap_or_else(exe_dir)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        Self::app_dir().join("config.toml")
    }

    /// Directory for persisted usage sessions
    pub fn sessions_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join(APP_DIR))
            .unwrap_or_else(exe_dir)
            .join("Sessions")
    }

    /// Directory for the generated bridge page
    pub fn bridge_dir() -> PathBuf {
        dirs::document_dir()
            .unwrap_or_else(Self::app_dir)
            .join("GeminiChat")
    }

    /// Load configuration from file or create default
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = AppConfig::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Saved popup window rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinnedFrame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// General configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub always_on_top: bool,
    #[serde(default)]
    pub pinned_position_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_frame: Option<PinnedFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_service: Option<String>,
}

/// Hotkey configuration, stored as Carbon key code + modifier mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyConfig {
    #[serde(default = "default_key_code")]
    pub key_code: u32,
    #[serde(default = "default_modifiers")]
    pub modifiers: u32,
}

fn default_key_code() -> u32 {
    keys::KEY_E
}

fn default_modifiers() -> u32 {
    modifiers::CMD
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            key_code: default_key_code(),
            modifiers: default_modifiers(),
        }
    }
}

impl HotkeyConfig {
    pub fn display(&self) -> String {
        keys::display_string(self.key_code, self.modifiers)
    }
}

/// Per-service visibility, keyed by service name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub visibility: BTreeMap<String, bool>,
}

/// User-supplied API keys for the bridge page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default)]
    pub gemini: String,
    #[serde(default)]
    pub chatgpt: String,
}

/// Voice/microphone timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_stop_debounce_ms")]
    pub stop_debounce_ms: u64,
    #[serde(default = "default_grace_window_ms")]
    pub grace_window_ms: u64,
    #[serde(default = "default_microphone_sweep_ms")]
    pub microphone_sweep_ms: u64,
    #[serde(default = "default_typing_idle_ms")]
    pub typing_idle_ms: u64,
    #[serde(default = "default_blocking_probe_timeout_ms")]
    pub blocking_probe_timeout_ms: u64,
}

fn default_stop_debounce_ms() -> u64 {
    2000
}

fn default_grace_window_ms() -> u64 {
    3000
}

fn default_microphone_sweep_ms() -> u64 {
    3000
}

fn default_typing_idle_ms() -> u64 {
    500
}

fn default_blocking_probe_timeout_ms() -> u64 {
    50
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stop_debounce_ms: default_stop_debounce_ms(),
            grace_window_ms: default_grace_window_ms(),
            microphone_sweep_ms: default_microphone_sweep_ms(),
            typing_idle_ms: default_typing_idle_ms(),
            blocking_probe_timeout_ms: default_blocking_probe_timeout_ms(),
        }
    }
}

impl VoiceConfig {
    pub fn stop_debounce(&self) -> Duration {
        Duration::from_millis(self.stop_debounce_ms)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn microphone_sweep(&self) -> Duration {
        Duration::from_millis(self.microphone_sweep_ms)
    }

    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    pub fn blocking_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.blocking_probe_timeout_ms)
    }
}

/// Persisted key/value settings. Every mutation is written through to disk.
pub struct PreferenceStore {
    path: PathBuf,
    config: AppConfig,
    defaults: BTreeMap<String, bool>,
}

impl PreferenceStore {
    /// Open the store at `path`, filling in visibility for services the
    /// saved file does not know about yet.
    pub fn open(path: impl Into<PathBuf>, registry: &ServiceRegistry) -> Result<Self> {
        let path = path.into();
        let config = AppConfig::load_or_default(&path)?;
        let defaults: BTreeMap<String, bool> = registry
            .all()
            .iter()
            .map(|s| (s.name.clone(), s.default_visible))
            .collect();

        let mut store = Self {
            path,
            config,
            defaults,
        };
        store.fill_visibility_defaults()?;
        Ok(store)
    }

    /// Re-read the file after it was edited by hand
    pub fn reload(&mut self) -> Result<()> {
        self.config = AppConfig::load_or_default(&self.path)?;
        self.fill_visibility_defaults()?;
        tracing::info!("Preferences reloaded from {}", self.path.display());
        Ok(())
    }

    fn fill_visibility_defaults(&mut self) -> Result<()> {
        let mut added = false;
        for (name, visible) in &self.defaults {
            if !self.config.services.visibility.contains_key(name) {
                self.config.services.visibility.insert(name.clone(), *visible);
                added = true;
            }
        }
        if added {
            tracing::info!("Added default visibility for new services");
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        self.config.save(&self.path)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn always_on_top(&self) -> bool {
        self.config.general.always_on_top
    }

    /// Returns whether the value changed
    pub fn set_always_on_top(&mut self, value: bool) -> Result<bool> {
        if self.config.general.always_on_top == value {
            return Ok(false);
        }
        self.config.general.always_on_top = value;
        self.persist()?;
        Ok(true)
    }

    pub fn is_service_visible(&self, name: &str) -> bool {
        self.config
            .services
            .visibility
            .get(name)
            .copied()
            .unwrap_or(true)
    }

    pub fn set_service_visibility(&mut self, name: &str, visible: bool) -> Result<()> {
        self.config
            .services
            .visibility
            .insert(name.to_string(), visible);
        self.persist()
    }

    pub fn toggle_service_visibility(&mut self, name: &str) -> Result<bool> {
        let visible = !self.is_service_visible(name);
        self.set_service_visibility(name, visible)?;
        Ok(visible)
    }

    pub fn pinned_position_enabled(&self) -> bool {
        self.config.general.pinned_position_enabled
    }

    pub fn set_pinned_position_enabled(&mut self, enabled: bool) -> Result<()> {
        self.config.general.pinned_position_enabled = enabled;
        self.persist()
    }

    pub fn pinned_frame(&self) -> Option<PinnedFrame> {
        self.config.general.pinned_frame
    }

    pub fn save_pinned_frame(&mut self, frame: PinnedFrame) -> Result<()> {
        self.config.general.pinned_frame = Some(frame);
        self.persist()
    }

    pub fn hotkey(&self) -> HotkeyConfig {
        self.config.hotkey
    }

    pub fn set_hotkey(&mut self, key_code: u32, modifiers: u32) -> Result<()> {
        self.config.hotkey = HotkeyConfig {
            key_code,
            modifiers,
        };
        self.persist()
    }

    pub fn reset_hotkey(&mut self) -> Result<()> {
        let default = HotkeyConfig::default();
        self.set_hotkey(default.key_code, default.modifiers)
    }

    pub fn hotkey_display(&self) -> String {
        self.config.hotkey.display()
    }

    pub fn api_keys(&self) -> &ApiKeys {
        &self.config.api_keys
    }

    pub fn set_api_keys(&mut self, keys: ApiKeys) -> Result<()> {
        self.config.api_keys = keys;
        self.persist()
    }

    pub fn voice(&self) -> VoiceConfig {
        self.config.voice
    }

    pub fn last_used_service(&self) -> Option<&str> {
        self.config.general.last_used_service.as_deref()
    }

    pub fn set_last_used_service(&mut self, name: Option<String>) -> Result<()> {
        self.config.general.last_used_service = name;
        self.persist()
    }

    /// Reset service visibility to registry defaults; the hotkey is kept
    pub fn reset_to_defaults(&mut self) -> Result<()> {
        self.config.services.visibility = self.defaults.clone();
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use url::Url;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::builtin(Url::parse("file:///tmp/index.html").unwrap())
    }

    #[test]
    fn test_creates_file_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let store = PreferenceStore::open(&path, &registry()).unwrap();

        assert!(path.exists());
        assert!(!store.always_on_top());
        assert_eq!(store.hotkey(), HotkeyConfig::default());
        assert_eq!(store.hotkey_display(), "⌘E");
        assert!(store.is_service_visible("ChatGPT"));
        assert!(!store.is_service_visible("Gemini"));
    }

    #[test]
    fn test_mutations_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        {
            let mut store = PreferenceStore::open(&path, &registry()).unwrap();
            assert!(store.set_always_on_top(true).unwrap());
            assert!(!store.set_always_on_top(true).unwrap());
            store.set_service_visibility("Claude", false).unwrap();
            store.set_hotkey(keys::KEY_Q, modifiers::CMD | modifiers::SHIFT).unwrap();
            store.set_pinned_position_enabled(true).unwrap();
            store
                .save_pinned_frame(PinnedFrame {
                    x: 10.0,
                    y: 20.0,
                    width: 400.0,
                    height: 600.0,
                })
                .unwrap();
            store
                .set_api_keys(ApiKeys {
                    gemini: String::new(),
                    chatgpt: "sk-test".to_string(),
                })
                .unwrap();
        }

        let store = PreferenceStore::open(&path, &registry()).unwrap();
        assert!(store.always_on_top());
        assert!(!store.is_service_visible("Claude"));
        assert_eq!(store.hotkey_display(), "⇧⌘Q");
        assert!(store.pinned_position_enabled());
        assert_eq!(store.pinned_frame().unwrap().width, 400.0);
        assert_eq!(store.api_keys().chatgpt, "sk-test");
    }

    #[test]
    fn test_new_services_get_default_visibility() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[services.visibility]\nGemini = true\n").unwrap();

        let store = PreferenceStore::open(&path, &registry()).unwrap();

        // saved value wins, missing ones are filled in
        assert!(store.is_service_visible("Gemini"));
        assert!(!store.is_service_visible("Pi"));
        assert!(store.is_service_visible("Copilot"));
        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains("Copilot"));
    }

    #[test]
    fn test_reset_keeps_hotkey() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let mut store = PreferenceStore::open(&path, &registry()).unwrap();

        store.set_service_visibility("ChatGPT", false).unwrap();
        store.set_hotkey(keys::KEY_A, modifiers::CONTROL).unwrap();
        store.reset_to_defaults().unwrap();

        assert!(store.is_service_visible("ChatGPT"));
        assert_eq!(store.hotkey().key_code, keys::KEY_A);

        store.reset_hotkey().unwrap();
        assert_eq!(store.hotkey(), HotkeyConfig::default());
    }

    #[test]
    fn test_reload_picks_up_hand_edits() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let mut store = PreferenceStore::open(&path, &registry()).unwrap();

        let mut edited = store.config().clone();
        edited.api_keys.gemini = "g-key".to_string();
        edited.services.visibility.remove("Claude");
        edited.save(&path).unwrap();

        store.reload().unwrap();
        assert_eq!(store.api_keys().gemini, "g-key");
        assert!(store.is_service_visible("Claude"));
        assert!(store.config().services.visibility.contains_key("Claude"));
    }

    #[test]
    fn test_voice_defaults() {
        let voice = VoiceConfig::default();
        assert_eq!(voice.stop_debounce(), Duration::from_secs(2));
        assert_eq!(voice.grace_window(), Duration::from_secs(3));
        assert_eq!(voice.blocking_probe_timeout(), Duration::from_millis(50));
    }
}
