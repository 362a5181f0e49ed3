//! Process-wide voice chat state
//!
//! Only page messages move this state. An active flag whose last activity is
//! older than the grace window is treated as stale and cleared by `decay`.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameActive,
    BecameInactive,
    Unchanged,
}

#[derive(Debug)]
pub struct VoiceChatState {
    active: bool,
    last_activity: Option<Instant>,
    active_services: BTreeSet<String>,
    grace_window: Duration,
}

impl VoiceChatState {
    pub fn new(grace_window: Duration) -> Self {
        Self {
            active: false,
            last_activity: None,
            active_services: BTreeSet::new(),
            grace_window,
        }
    }

    pub fn set_active(&mut self, active: bool, now: Instant) -> Transition {
        let was = self.active;
        self.active = active;
        if active {
            self.last_activity = Some(now);
        }
        match (was, active) {
            (false, true) => Transition::BecameActive,
            (true, false) => Transition::BecameInactive,
            _ => Transition::Unchanged,
        }
    }

    /// Record activity without changing the flag
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }

    /// Raw flag, ignoring staleness
    pub fn flag(&self) -> bool {
        self.active
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.last_activity
            .map(|t| now.saturating_duration_since(t) <= self.grace_window)
            .unwrap_or(false)
    }

    /// Active and heard from within the grace window
    pub fn is_active(&self, now: Instant) -> bool {
        self.active && self.is_fresh(now)
    }

    /// Clear a stale active flag. Returns true if it was cleared.
    pub fn decay(&mut self, now: Instant) -> bool {
        if self.active && !self.is_fresh(now) {
            self.active = false;
            self.active_services.clear();
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.active = false;
        self.last_activity = None;
        self.active_services.clear();
    }

    pub fn add_service(&mut self, service: &str) {
        self.active_services.insert(service.to_string());
    }

    pub fn remove_service(&mut self, service: &str) {
        self.active_services.remove(service);
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.active_services.contains(service)
    }

    pub fn active_services(&self) -> impl Iterator<Item = &str> {
        self.active_services.iter().map(String::as_str)
    }
}
