//! Versioned DOM selector tables
//!
//! The voice detector has no API to ask a page whether its microphone is
//! live, so it watches for provider markup instead. Each provider's markup
//! lives in one table here; bump `version` whenever a table changes so logs
//! show which revision a page was running.

/// Which detector variant a page gets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Generic,
    ChatGpt,
    /// Copilot's voice UI is the least predictable; it gets the aggressive scripts
    Copilot,
}

impl Provider {
    /// Select a provider from the page's current host name
    pub fn from_host(host: Option<&str>) -> Self {
        match host {
            Some(h) if h.contains("copilot.microsoft.com") => Provider::Copilot,
            Some(h) if h.contains("chat.openai.com") => Provider::ChatGpt,
            _ => Provider::Generic,
        }
    }

    pub fn is_aggressive(self) -> bool {
        self == Provider::Copilot
    }

    pub fn selectors(self) -> &'static SelectorTable {
        match self {
            Provider::Copilot => &COPILOT,
            Provider::ChatGpt | Provider::Generic => &GENERIC,
        }
    }

    /// Tag pages include in their messages, if any
    pub fn tag(self) -> Option<&'static str> {
        match self {
            Provider::Copilot => Some("copilot"),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct SelectorTable {
    pub version: u32,
    /// Any match means "voice recording in progress"
    pub voice_ui: &'static [&'static str],
    /// Controls whose click ends a recording
    pub stop_controls: &'static [&'static str],
    /// Elements hidden by the force-stop script
    pub voice_containers: &'static [&'static str],
    /// Detector poll period
    pub poll_ms: u32,
}

pub static GENERIC: SelectorTable = SelectorTable {
    version: 3,
    voice_ui: &[
        // ChatGPT
        r#"[aria-label="Stop recording"]"#,
        r#"[aria-label="Voice input enabled"]"#,
        ".voice-input-active",
        ".recording-button-active",
        // Copilot (classic layout)
        r#"[aria-label="Stop voice input"]"#,
        ".voice-input-container:not(.hidden)",
        r#"[data-testid="voice-input-button"].active"#,
        // common
        ".voice-recording",
        ".microphone-active",
        ".recording-active",
        r#"[data-voice-active="true"]"#,
    ],
    stop_controls: &[
        r#"[aria-label="Stop recording"]"#,
        r#"[aria-label="Stop voice input"]"#,
        ".voice-stop-button",
        ".close-voice-button",
        "button.voice-close",
        r#"[data-testid="voice-stop-button"]"#,
        r#"[aria-label="Stop listening"]"#,
    ],
    voice_containers: &[],
    poll_ms: 500,
};

pub static COPILOT: SelectorTable = SelectorTable {
    version: 4,
    voice_ui: &[
        r#"[aria-label="Stop voice input"]"#,
        ".voice-input-container:not(.hidden)",
        r#"[data-testid="voice-input-button"].active"#,
        ".voice-input-active",
        ".sydney-voice-input",
        r#"[aria-label="Voice input in progress"]"#,
        r#"[aria-label="Listening..."]"#,
        r#"[aria-label="Recording in progress"]"#,
        ".voice-active",
        ".microphone-pulse",
        ".listening-animation",
        ".voice-typing-indicator",
        ".voice-animation",
        ".voice-wave",
        ".voice-pulse",
        ".microphone-animation-container",
        r#"[data-recording="true"]"#,
        r#"button[aria-pressed="true"][aria-label*="voice"]"#,
        r#"button.active[aria-label*="voice"]"#,
    ],
    stop_controls: &[
        r#"[aria-label="Stop voice input"]"#,
        r#"[aria-label="Stop recording"]"#,
        r#"[aria-label="Stop listening"]"#,
        r#"button[aria-label*="stop"]"#,
        "button.voice-stop-button",
        "button.voice-cancel",
        "button.close-voice-button",
        "button.voice-close",
    ],
    voice_containers: &[
        ".voice-input-container:not(.hidden)",
        r#"[data-testid="voice-input-button"].active"#,
        ".voice-input-active",
        ".sydney-voice-input",
    ],
    poll_ms: 300,
};
