//! Global hotkey provider backed by `global-hotkey`
//!
//! The binding is stored as a Carbon key code and modifier mask; this module
//! maps it onto `global_hotkey`'s key types.

use anyhow::{anyhow, Result};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::HotkeyProvider;
use crate::data::keys::{self, modifiers};
use crate::data::HotkeyConfig;

fn letter_code(letter: char) -> Option<Code> {
    let code = match letter {
        'A' => Code::KeyA,
        'B' => Code::KeyB,
        'C' => Code::KeyC,
        'D' => Code::KeyD,
        'E' => Code::KeyE,
        'F' => Code::KeyF,
        'G' => Code::KeyG,
        'H' => Code::KeyH,
        'I' => Code::KeyI,
        'J' => Code::KeyJ,
        'K' => Code::KeyK,
        'L' => Code::KeyL,
        'M' => Code::KeyM,
        'N' => Code::KeyN,
        'O' => Code::KeyO,
        'P' => Code::KeyP,
        'Q' => Code::KeyQ,
        'R' => Code::KeyR,
        'S' => Code::KeyS,
        'T' => Code::KeyT,
        'U' => Code::KeyU,
        'V' => Code::KeyV,
        'W' => Code::KeyW,
        'X' => Code::KeyX,
        'Y' => Code::KeyY,
        'Z' => Code::KeyZ,
        _ => return None,
    };
    Some(code)
}

fn digit_code(digit: char) -> Option<Code> {
    let code = match digit {
        '0' => Code::Digit0,
        '1' => Code::Digit1,
        '2' => Code::Digit2,
        '3' => Code::Digit3,
        '4' => Code::Digit4,
        '5' => Code::Digit5,
        '6' => Code::Digit6,
        '7' => Code::Digit7,
        '8' => Code::Digit8,
        '9' => Code::Digit9,
        _ => return None,
    };
    Some(code)
}

fn function_code(n: u8) -> Option<Code> {
    const CODES: [Code; 20] = [
        Code::F1,
        Code::F2,
        Code::F3,
        Code::F4,
        Code::F5,
        Code::F6,
        Code::F7,
        Code::F8,
        Code::F9,
        Code::F10,
        Code::F11,
        Code::F12,
        Code::F13,
        Code::F14,
        Code::F15,
        Code::F16,
        Code::F17,
        Code::F18,
        Code::F19,
        Code::F20,
    ];
    CODES.get(usize::from(n).checked_sub(1)?).copied()
}

/// Map a Carbon key code onto a `global_hotkey` code
pub fn carbon_to_code(key_code: u32) -> Option<Code> {
    if let Some(letter) = keys::key_code_to_letter(key_code) {
        return letter_code(letter);
    }
    if let Some(digit) = keys::key_code_to_digit(key_code) {
        return digit_code(digit);
    }
    if let Some(n) = keys::function_key_number(key_code) {
        return function_code(n);
    }
    match key_code {
        keys::KEY_SPACE => Some(Code::Space),
        keys::KEY_ESCAPE => Some(Code::Escape),
        keys::KEY_RETURN => Some(Code::Enter),
        keys::KEY_TAB => Some(Code::Tab),
        keys::KEY_DELETE => Some(Code::Backspace),
        _ => None,
    }
}

pub fn carbon_to_modifiers(mask: u32) -> Modifiers {
    let mut mods = Modifiers::empty();
    if mask & modifiers::CMD != 0 {
        mods |= Modifiers::SUPER;
    }
    if mask & modifiers::SHIFT != 0 {
        mods |= Modifiers::SHIFT;
    }
    if mask & modifiers::OPTION != 0 {
        mods |= Modifiers::ALT;
    }
    if mask & modifiers::CONTROL != 0 {
        mods |= Modifiers::CONTROL;
    }
    mods
}

pub fn hotkey_from_config(config: &HotkeyConfig) -> Result<HotKey> {
    let code = carbon_to_code(config.key_code)
        .ok_or_else(|| anyhow!("Unsupported hotkey key code {:#04x}", config.key_code))?;
    let mods = carbon_to_modifiers(config.modifiers);
    Ok(HotKey::new(if mods.is_empty() { None } else { Some(mods) }, code))
}

/// Registers one system-wide hotkey. Must be created on the main thread.
pub struct GlobalHotkeyProvider {
    manager: GlobalHotKeyManager,
    hotkey: HotKey,
    is_active: Arc<AtomicBool>,
}

impl GlobalHotkeyProvider {
    pub fn new(config: &HotkeyConfig) -> Result<Self> {
        let hotkey = hotkey_from_config(config)?;
        let manager = GlobalHotKeyManager::new()?;
        manager.register(hotkey)?;
        tracing::info!("Registered global hotkey {}", config.display());

        Ok(Self {
            manager,
            hotkey,
            is_active: Arc::new(AtomicBool::new(true)),
        })
    }
}

impl HotkeyProvider for GlobalHotkeyProvider {
    fn on_trigger(&self, callback: Box<dyn Fn() + Send + Sync + 'static>) {
        let id = self.hotkey.id();
        let is_active = self.is_active.clone();
        GlobalHotKeyEvent::set_event_handler(Some(move |event: GlobalHotKeyEvent| {
            if is_active.load(Ordering::SeqCst)
                && event.id == id
                && event.state == HotKeyState::Pressed
            {
                callback();
            }
        }));
    }

    fn stop(&self) {
        if self.is_active.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.manager.unregister(self.hotkey) {
                tracing::warn!("Failed to unregister hotkey: {}", e);
            }
        }
    }
}

impl Drop for GlobalHotkeyProvider {
    fn drop(&mut self) {
        self.stop();
    }
}
