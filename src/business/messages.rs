//! Page-to-host channel messages
//!
//! Pages post JSON objects shaped `{type, reason?, service?}`; the typing
//! hooks post `{action}` instead. Several page scripts use different names
//! for the same event, so parsing folds them into one `PageEvent`.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    action: Option<String>,
    reason: Option<String>,
    service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    VoiceStopped,
    VoiceStarted,
    PermissionDenied,
    CredentialPrompt,
    VoiceActivity,
    Typing,
    InputFocused,
    InputBlurred,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMessage {
    pub event: PageEvent,
    pub reason: Option<String>,
    pub service: Option<String>,
}

impl PageMessage {
    /// Stop reasons that mean the user explicitly ended the call
    pub fn requires_immediate_stop(&self) -> bool {
        self.event == PageEvent::VoiceStopped
            && matches!(
                self.reason.as_deref(),
                Some("userClosed" | "escKey" | "uiClosed" | "hiddenAudioDetected" | "intervalCheck")
            )
    }
}

fn classify(kind: &str) -> PageEvent {
    match kind {
        "voiceChatStopped" | "streamEnded" | "recordingStopped" | "audioStopped"
        | "forcedAudioStop" | "uiClosed" => PageEvent::VoiceStopped,
        "voiceChatStarted" | "voiceButtonClicked" | "streamCreated" | "recordingStarted" => {
            PageEvent::VoiceStarted
        }
        "permissionDenied" | "streamError" | "permissionError" => PageEvent::PermissionDenied,
        "credentialPrompt" => PageEvent::CredentialPrompt,
        "voiceActivityDetected" => PageEvent::VoiceActivity,
        other => PageEvent::Unknown(other.to_string()),
    }
}

pub fn parse(body: &str) -> Result<PageMessage, serde_json::Error> {
    let raw: RawMessage = serde_json::from_str(body)?;

    let event = match (raw.kind.as_deref(), raw.action.as_deref()) {
        (Some(kind), _) => classify(kind),
        (None, Some("typing")) => PageEvent::Typing,
        (None, Some("focusInput" | "focus_input")) => PageEvent::InputFocused,
        (None, Some("blurInput")) => PageEvent::InputBlurred,
        (None, Some(action)) => PageEvent::Unknown(action.to_string()),
        (None, None) => PageEvent::Unknown(String::new()),
    };

    Ok(PageMessage {
        event,
        reason: raw.reason,
        service: raw.service,
    })
}
