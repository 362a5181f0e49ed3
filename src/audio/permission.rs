//! Microphone permission
//!
//! Requested once, eagerly, at start-up so that hosted pages never trigger
//! the OS prompt themselves. A denial is only logged.

use cpal::traits::{DeviceTrait, HostTrait};
use std::sync::mpsc::Sender;

/// OS-level microphone authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicrophoneAuthorization {
    NotDetermined,
    Restricted,
    Denied,
    Authorized,
    /// No capture device, or the platform cannot say
    Unavailable,
}

impl MicrophoneAuthorization {
    pub fn is_granted(self) -> bool {
        self == MicrophoneAuthorization::Authorized
    }
}

/// Name of the default input device, if there is one
pub fn default_input_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_input_device().and_then(|d| d.name().ok())
}

/// Whether the default input device can be opened for configuration
#[cfg_attr(target_os = "macos", allow(dead_code))]
fn probe_input_device() -> MicrophoneAuthorization {
    let host = cpal::default_host();
    match host.default_input_device() {
        Some(device) => match device.default_input_config() {
            Ok(config) => {
                tracing::debug!(
                    "Input device {} at {} Hz",
                    device.name().unwrap_or_default(),
                    config.sample_rate().0
                );
                MicrophoneAuthorization::Authorized
            }
            Err(e) => {
                tracing::warn!("Input device not usable: {}", e);
                MicrophoneAuthorization::Denied
            }
        },
        None => MicrophoneAuthorization::Unavailable,
    }
}

pub fn microphone_authorization() -> MicrophoneAuthorization {
    #[cfg(target_os = "macos")]
    return crate::platform::macos::microphone_authorization();
    #[cfg(not(target_os = "macos"))]
    probe_input_device()
}

/// Request microphone access once. `granted` receives `true` when access was
/// newly granted by the user, so hosted pages can be patched again.
pub fn request_microphone_permission(granted: Sender<bool>) {
    match microphone_authorization() {
        MicrophoneAuthorization::NotDetermined => {
            tracing::info!("Requesting system microphone permission");
            #[cfg(target_os = "macos")]
            crate::platform::macos::request_microphone_access(move |ok| {
                if ok {
                    tracing::info!("System microphone permission granted");
                } else {
                    tracing::warn!("System microphone permission denied");
                }
                let _ = granted.send(ok);
            });
            #[cfg(not(target_os = "macos"))]
            {
                let ok = probe_input_device().is_granted();
                let _ = granted.send(ok);
            }
        }
        MicrophoneAuthorization::Authorized => {
            tracing::info!("System microphone permission already granted");
        }
        MicrophoneAuthorization::Denied | MicrophoneAuthorization::Restricted => {
            tracing::warn!("System microphone permission denied; voice input will be unavailable");
        }
        MicrophoneAuthorization::Unavailable => {
            tracing::warn!("No microphone available");
        }
    }
}
