//! Application-local key event monitor
//!
//! Installed with `addLocalMonitorForEventsMatchingMask:handler:`, so it only
//! sees events destined for this app's windows. Returning nil from the
//! handler swallows the event before the web view gets it.

use block::ConcreteBlock;
use cocoa::appkit::NSEventMask;
use cocoa::base::{id, nil};
use objc::runtime::Class;
use objc::{msg_send, sel, sel_impl};

use crate::data::keys::modifiers;

const NS_EVENT_TYPE_FLAGS_CHANGED: u64 = 12;

const NS_SHIFT: u64 = 1 << 17;
const NS_CONTROL: u64 = 1 << 18;
const NS_OPTION: u64 = 1 << 19;
const NS_COMMAND: u64 = 1 << 20;

/// Cocoa `modifierFlags` to the Carbon mask used everywhere else
pub fn carbon_modifiers(flags: u64) -> u32 {
    let mut mask = 0;
    if flags & NS_SHIFT != 0 {
        mask |= modifiers::SHIFT;
    }
    if flags & NS_CONTROL != 0 {
        mask |= modifiers::CONTROL;
    }
    if flags & NS_OPTION != 0 {
        mask |= modifiers::OPTION;
    }
    if flags & NS_COMMAND != 0 {
        mask |= modifiers::CMD;
    }
    mask
}

pub struct KeyMonitor {
    handle: Option<usize>,
}

impl KeyMonitor {
    /// `allow(key_code, carbon_modifiers, modifier_only)` returns whether the
    /// event is delivered. Runs on the main thread.
    pub fn install<F>(allow: F) -> Option<Self>
    where
        F: Fn(u32, u32, bool) -> bool + 'static,
    {
        let class = Class::get("NSEvent")?;
        let block = ConcreteBlock::new(move |event: id| -> id {
            unsafe {
                let kind: u64 = msg_send![event, type];
                let flags: u64 = msg_send![event, modifierFlags];
                let modifier_only = kind == NS_EVENT_TYPE_FLAGS_CHANGED;
                let key_code: u16 = if modifier_only { 0 } else { msg_send![event, keyCode] };

                if allow(key_code as u32, carbon_modifiers(flags), modifier_only) {
                    event
                } else {
                    nil
                }
            }
        });
        let block = block.copy();

        let mask = NSEventMask::NSKeyDownMask | NSEventMask::NSFlagsChangedMask;
        let monitor: id = unsafe {
            msg_send![class,
                addLocalMonitorForEventsMatchingMask: mask.bits()
                handler: &*block]
        };
        if monitor.is_null() {
            tracing::warn!("Failed to install key monitor");
            return None;
        }
        tracing::debug!("Key monitor installed");
        Some(Self {
            handle: Some(monitor as usize),
        })
    }

    pub fn remove(&mut self) {
        if let (Some(handle), Some(class)) = (self.handle.take(), Class::get("NSEvent")) {
            unsafe {
                let _: () = msg_send![class, removeMonitor: handle as id];
            }
        }
    }
}

impl Drop for KeyMonitor {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cocoa_flags_map_to_carbon() {
        assert_eq!(carbon_modifiers(NS_COMMAND), modifiers::CMD);
        assert_eq!(
            carbon_modifiers(NS_SHIFT | NS_OPTION | 0x100),
            modifiers::SHIFT | modifiers::OPTION
        );
        assert_eq!(carbon_modifiers(0), 0);
    }
}
