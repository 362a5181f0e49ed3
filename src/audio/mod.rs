//! Audio module for microphone permission

mod permission;

pub use permission::{
    default_input_device_name, microphone_authorization, request_microphone_permission,
    MicrophoneAuthorization,
};
