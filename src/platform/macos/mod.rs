#![allow(unexpected_cfgs)]
//! macOS integration: microphone authorization via `AVCaptureDevice` and the
//! local key monitor

mod key_monitor;

pub use key_monitor::KeyMonitor;

use block::ConcreteBlock;
use cocoa::base::id;
use objc::runtime::{Class, BOOL, NO};
use objc::{msg_send, sel, sel_impl};

use crate::audio::MicrophoneAuthorization;

#[link(name = "AVFoundation", kind = "framework")]
extern "C" {
    static AVMediaTypeAudio: id;
}

fn capture_device_class() -> Option<&'static Class> {
    Class::get("AVCaptureDevice")
}

/// Whether this app is the active application
pub fn app_is_active() -> bool {
    unsafe {
        let app = cocoa::appkit::NSApp();
        if app.is_null() {
            return false;
        }
        let active: BOOL = msg_send![app, isActive];
        active != NO
    }
}

/// Current authorization status for audio capture
pub fn microphone_authorization() -> MicrophoneAuthorization {
    let Some(class) = capture_device_class() else {
        return MicrophoneAuthorization::Unavailable;
    };
    let status: isize = unsafe { msg_send![class, authorizationStatusForMediaType: AVMediaTypeAudio] };
    match status {
        0 => MicrophoneAuthorization::NotDetermined,
        1 => MicrophoneAuthorization::Restricted,
        2 => MicrophoneAuthorization::Denied,
        3 => MicrophoneAuthorization::Authorized,
        _ => MicrophoneAuthorization::Unavailable,
    }
}

/// Ask the OS for microphone access; `on_result` runs on an arbitrary thread
pub fn request_microphone_access<F>(on_result: F)
where
    F: Fn(bool) + Send + 'static,
{
    let Some(class) = capture_device_class() else {
        on_result(false);
        return;
    };

    let handler = ConcreteBlock::new(move |granted: BOOL| {
        on_result(granted != NO);
    });
    let handler = handler.copy();

    unsafe {
        let _: () = msg_send![class,
            requestAccessForMediaType: AVMediaTypeAudio
            completionHandler: &*handler];
    }
}
