//! Keyboard allow-list
//!
//! While the popup is key, every key event is run through one ordered rule
//! list and the first matching rule decides. Anything no rule passes is
//! swallowed so stray shortcuts never reach the hosted pages.

use crate::data::keys::{self, modifiers};
use crate::data::HotkeyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Block,
}

/// What currently has keyboard focus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    WebContent,
    TextInput,
    Custom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key_code: u32,
    /// Carbon modifier mask
    pub modifiers: u32,
    /// A modifier key went up or down with no other key
    pub modifier_only: bool,
}

impl KeyEvent {
    pub fn key(key_code: u32, modifiers: u32) -> Self {
        Self {
            key_code,
            modifiers,
            modifier_only: false,
        }
    }

    pub fn flags_changed(modifiers: u32) -> Self {
        Self {
            key_code: 0,
            modifiers,
            modifier_only: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyContext {
    pub focus: Option<NodeKind>,
    pub from_menu: bool,
    pub voice_ui_visible: bool,
}

impl KeyContext {
    fn in_text_input(&self) -> bool {
        self.focus == Some(NodeKind::TextInput)
    }
}

const EDIT_MODIFIERS: u32 = modifiers::CMD | modifiers::CONTROL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatcher {
    Any,
    ModifierOnly,
    /// The configured global hotkey
    Hotkey,
    /// Exact key and modifier mask
    Exact(u32, u32),
    /// Key with any modifiers
    Key(u32),
    /// No command or control modifier
    PlainTyping,
}

impl KeyMatcher {
    fn matches(&self, event: &KeyEvent, hotkey: &HotkeyConfig) -> bool {
        if event.modifier_only {
            return matches!(self, KeyMatcher::Any | KeyMatcher::ModifierOnly);
        }
        match self {
            KeyMatcher::Any => true,
            KeyMatcher::ModifierOnly => false,
            KeyMatcher::Hotkey => {
                event.key_code == hotkey.key_code && event.modifiers == hotkey.modifiers
            }
            KeyMatcher::Exact(code, mods) => event.key_code == *code && event.modifiers == *mods,
            KeyMatcher::Key(code) => event.key_code == *code,
            KeyMatcher::PlainTyping => event.modifiers & EDIT_MODIFIERS == 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    VoiceUiVisible,
    InTextInput,
    NotInTextInput,
    FromMenu,
}

impl Condition {
    fn holds(self, ctx: &KeyContext) -> bool {
        match self {
            Condition::Always => true,
            Condition::VoiceUiVisible => ctx.voice_ui_visible,
            Condition::InTextInput => ctx.in_text_input(),
            Condition::NotInTextInput => !ctx.in_text_input(),
            Condition::FromMenu => ctx.from_menu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRule {
    pub matcher: KeyMatcher,
    pub when: Condition,
    pub verdict: Verdict,
}

impl KeyRule {
    pub fn new(matcher: KeyMatcher, when: Condition, verdict: Verdict) -> Self {
        Self {
            matcher,
            when,
            verdict,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyPolicy {
    rules: Vec<KeyRule>,
    hotkey: HotkeyConfig,
}

impl KeyPolicy {
    pub fn new(rules: Vec<KeyRule>, hotkey: HotkeyConfig) -> Self {
        Self { rules, hotkey }
    }

    pub fn with_defaults(hotkey: HotkeyConfig) -> Self {
        use Condition::*;
        use KeyMatcher::*;
        use Verdict::*;

        let mut rules = vec![
            KeyRule::new(ModifierOnly, Always, Pass),
            KeyRule::new(Any, VoiceUiVisible, Pass),
            KeyRule::new(Hotkey, Always, Pass),
            KeyRule::new(Key(keys::KEY_ESCAPE), Always, Block),
            KeyRule::new(Key(keys::KEY_RETURN), NotInTextInput, Block),
            KeyRule::new(Exact(keys::KEY_Q, modifiers::CMD), FromMenu, Pass),
            KeyRule::new(Exact(keys::KEY_Q, modifiers::CMD), Always, Block),
            KeyRule::new(PlainTyping, InTextInput, Pass),
        ];
        for key in [
            keys::KEY_A,
            keys::KEY_C,
            keys::KEY_V,
            keys::KEY_X,
            keys::KEY_Z,
            keys::KEY_Y,
        ] {
            rules.push(KeyRule::new(Exact(key, modifiers::CMD), InTextInput, Pass));
        }
        rules.push(KeyRule::new(Any, Always, Block));

        Self::new(rules, hotkey)
    }

    pub fn set_hotkey(&mut self, hotkey: HotkeyConfig) {
        self.hotkey = hotkey;
    }

    pub fn rules(&self) -> &[KeyRule] {
        &self.rules
    }

    /// First matching rule wins; no match blocks
    pub fn evaluate(&self, event: &KeyEvent, ctx: &KeyContext) -> Verdict {
        self.rules
            .iter()
            .find(|rule| rule.when.holds(ctx) && rule.matcher.matches(event, &self.hotkey))
            .map(|rule| rule.verdict)
            .unwrap_or(Verdict::Block)
    }
}
