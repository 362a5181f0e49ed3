//! Scripts injected into hosted pages
//!
//! Templates live next to this file and are compiled in. Selector-driven
//! scripts get their provider table substituted at render time; everything
//! else is returned as-is.

mod selectors;

pub use selectors::{Provider, SelectorTable, COPILOT, GENERIC};

const BOOTSTRAP: &str = include_str!("js/bootstrap.js");
const CREDENTIAL_BLOCKER: &str = include_str!("js/credential_blocker.js");
const DETECTOR_GENERIC: &str = include_str!("js/detector_generic.js");
const DETECTOR_AGGRESSIVE: &str = include_str!("js/detector_aggressive.js");
const AUDIO_CLEANUP_MONITOR: &str = include_str!("js/audio_cleanup_monitor.js");
const STOP_GENERIC: &str = include_str!("js/stop_generic.js");
const STOP_AGGRESSIVE: &str = include_str!("js/stop_aggressive.js");
const PERMISSION_GENERIC: &str = include_str!("js/permission_generic.js");
const PERMISSION_CHATGPT: &str = include_str!("js/permission_chatgpt.js");
const KEYCHAIN_BLOCKER: &str = include_str!("js/keychain_blocker.js");
const CLEAR_STORAGE: &str = include_str!("js/clear_storage.js");
const VOICE_UI_PROBE: &str = include_str!("js/voice_ui_probe.js");
const PRIME_GENERIC: &str = include_str!("js/prime_generic.js");
const PRIME_CHATGPT: &str = include_str!("js/prime_chatgpt.js");

fn json_list(items: &[&str]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn render(template: &str, provider: Provider) -> String {
    let table = provider.selectors();
    let tag = provider
        .tag()
        .map(|t| format!("'{}'", t))
        .unwrap_or_else(|| "null".to_string());
    template
        .replace("__VOICE_UI__", &json_list(table.voice_ui))
        .replace("__STOP_CONTROLS__", &json_list(table.stop_controls))
        .replace("__VOICE_CONTAINERS__", &json_list(table.voice_containers))
        .replace("__POLL_MS__", &table.poll_ms.to_string())
        .replace("__TABLE_VERSION__", &table.version.to_string())
        .replace("__SERVICE_TAG__", &tag)
}

/// Document-start script for every page: message helper, capture hook, typing detection
pub fn bootstrap() -> &'static str {
    BOOTSTRAP
}

/// Document-start removal of the credential management API
pub fn credential_blocker() -> &'static str {
    CREDENTIAL_BLOCKER
}

/// Voice-activity detector, guarded by a page-global flag
pub fn voice_detector(provider: Provider) -> String {
    let template = if provider.is_aggressive() {
        DETECTOR_AGGRESSIVE
    } else {
        DETECTOR_GENERIC
    };
    render(template, provider)
}

/// Periodic audio release monitor for the aggressive provider
pub fn audio_cleanup_monitor(provider: Provider) -> String {
    render(AUDIO_CLEANUP_MONITOR, provider)
}

/// Stop all capture in a page
pub fn stop_audio(provider: Provider) -> String {
    if provider.is_aggressive() {
        render(STOP_AGGRESSIVE, provider)
    } else {
        STOP_GENERIC.to_string()
    }
}

/// The simple stop script regardless of provider
pub fn stop_audio_simple() -> &'static str {
    STOP_GENERIC
}

pub fn permission_fixer(provider: Provider) -> &'static str {
    match provider {
        Provider::ChatGpt => PERMISSION_CHATGPT,
        _ => PERMISSION_GENERIC,
    }
}

pub fn keychain_blocker() -> &'static str {
    KEYCHAIN_BLOCKER
}

pub fn clear_storage() -> &'static str {
    CLEAR_STORAGE
}

/// Expression evaluating to `true` while the provider's voice UI is on screen
pub fn voice_ui_probe(provider: Provider) -> String {
    render(VOICE_UI_PROBE, provider)
}

/// Nudge a page into holding media permission without keeping the mic open
pub fn prime_microphone(provider: Provider) -> &'static str {
    match provider {
        Provider::ChatGpt => PRIME_CHATGPT,
        _ => PRIME_GENERIC,
    }
}
