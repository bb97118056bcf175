/*!
 * Hidden keyword trigger
 * Watches keystrokes for the admin keyword and decides which modal to open
 */
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::auth::clock::{Clock, SystemClock};

pub const KEYWORD: &str = "deviem";

/// Keystrokes further apart than this start a fresh sequence.
pub const INACTIVITY_WINDOW_MS: i64 = 2_000;

/// Upper bound on clients tracked at once.
pub const MAX_TRACKED_CLIENTS: usize = 1_024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAction {
    None,
    OpenLogin,
    OpenAdminPanel,
}

pub struct KeywordTrigger {
    keyword: Vec<char>,
    buffer: VecDeque<char>,
    last_key_at: Option<DateTime<Utc>>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl KeywordTrigger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let keyword: Vec<char> = KEYWORD.chars().collect();
        Self {
            buffer: VecDeque::with_capacity(keyword.len()),
            keyword,
            last_key_at: None,
            window: Duration::milliseconds(INACTIVITY_WINDOW_MS),
            clock,
        }
    }

    /// Feeds one key. Named keys such as `Shift` or `Enter` are ignored.
    /// `authenticated` is whether the typing client holds a live session.
    pub fn press(&mut self, key: &str, authenticated: bool) -> TriggerAction {
        let mut chars = key.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return TriggerAction::None;
        };

        let now = self.clock.now();
        if self.is_idle(now) {
            self.buffer.clear();
        }
        self.last_key_at = Some(now);

        self.buffer.extend(c.to_lowercase());
        while self.buffer.len() > self.keyword.len() {
            self.buffer.pop_front();
        }

        if !self.buffer.iter().eq(self.keyword.iter()) {
            return TriggerAction::None;
        }

        self.buffer.clear();
        if authenticated {
            tracing::info!("admin keyword entered with a live session");
            TriggerAction::OpenAdminPanel
        } else {
            tracing::info!("admin keyword entered, prompting for login");
            TriggerAction::OpenLogin
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_key_at = None;
    }

    /// True when the next key would start a fresh sequence anyway.
    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.last_key_at.is_some_and(|last| now - last > self.window)
    }
}

/// One keyword buffer per client, so visitors never share a sequence.
pub struct TriggerRegistry {
    triggers: HashMap<String, KeywordTrigger>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), MAX_TRACKED_CLIENTS)
    }
}

impl TriggerRegistry {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            triggers: HashMap::new(),
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn press(&mut self, client: &str, key: &str, authenticated: bool) -> TriggerAction {
        if !self.triggers.contains_key(client) {
            self.make_room();
        }
        let clock = self.clock.clone();
        self.triggers
            .entry(client.to_string())
            .or_insert_with(|| KeywordTrigger::new(clock))
            .press(key, authenticated)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Drops idle buffers, then the least recently used one if still full.
    fn make_room(&mut self) {
        let now = self.clock.now();
        self.triggers.retain(|_, t| !t.is_idle(now));

        if self.triggers.len() < self.capacity {
            return;
        }
        let oldest = self
            .triggers
            .iter()
            .min_by_key(|(_, t)| t.last_key_at)
            .map(|(client, _)| client.clone());
        if let Some(client) = oldest {
            tracing::debug!(client = %client, "evicting keyword buffer");
            self.triggers.remove(&client);
        }
    }
}
