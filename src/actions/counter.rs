use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;

use crate::render::{FormatContext, keys, named_format};

pub const DEFAULT_INITIAL: i64 = 0;
pub const DEFAULT_STEP: i64 = 1;
pub const DEFAULT_COOLDOWN: u64 = 0;
pub const DEFAULT_DELAY: u64 = 0;
pub const DEFAULT_EACH: u64 = 0;
pub const DEFAULT_MESSAGE: &str = "{NAME} has value : {CURRENT_VALUE}";

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Counters are mutated from the command context and read by delivery tasks.
pub type SharedCounter = Arc<Mutex<Counter>>;

// ── Policy ──────────────────────────────────────────────────────────────────

/// User-configurable behaviour of a counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub initial: i64,
    pub step: i64,
    /// Seconds between two mutations before a notification is eligible again.
    pub cooldown: u64,
    /// Seconds a notification waits before delivery.
    pub delay: u64,
    /// Minimum absolute change since the last delivered notification.
    pub each: u64,
    pub message: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL,
            step: DEFAULT_STEP,
            cooldown: DEFAULT_COOLDOWN,
            delay: DEFAULT_DELAY,
            each: DEFAULT_EACH,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }
}

/// Value-tracking state restored from the journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub current: i64,
    pub minimum: i64,
    pub maximum: i64,
}

// ── Mutations ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Increment,
    Decrement,
    Reset,
    Recreate,
}

// ── Counter ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct Counter {
    name: String,
    policy: Policy,

    current: i64,
    previous: i64,
    previous_notified: i64,
    minimum: i64,
    maximum: i64,

    last_change: DateTime<Utc>,
    /// Decaying seconds left before the cooldown is over; negative means idle.
    cooldown_remaining: i64,
    created_at: DateTime<Utc>,
}

impl Counter {
    pub fn new(name: impl Into<String>, policy: Policy) -> Self {
        Self::created_at(name, policy, Utc::now())
    }

    pub fn created_at(name: impl Into<String>, policy: Policy, now: DateTime<Utc>) -> Self {
        let initial = policy.initial;
        Self {
            name: name.into(),
            policy,
            current: initial,
            previous: initial,
            previous_notified: initial,
            minimum: initial,
            maximum: initial,
            last_change: now,
            cooldown_remaining: -1,
            created_at: now,
        }
    }

    pub fn into_shared(self) -> SharedCounter {
        Arc::new(Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut Policy {
        &mut self.policy
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    pub fn previous(&self) -> i64 {
        self.previous
    }

    pub fn previous_notified(&self) -> i64 {
        self.previous_notified
    }

    pub fn minimum(&self) -> i64 {
        self.minimum
    }

    pub fn maximum(&self) -> i64 {
        self.maximum
    }

    pub fn cooldown_remaining(&self) -> i64 {
        self.cooldown_remaining
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            current: self.current,
            minimum: self.minimum,
            maximum: self.maximum,
        }
    }

    /// Renaming does not touch the registry key; go through the registry.
    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Overwrite tracked values without running any change bookkeeping.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.current = snapshot.current;
        self.previous = snapshot.current;
        self.previous_notified = snapshot.current;
        self.minimum = snapshot.minimum.min(snapshot.current);
        self.maximum = snapshot.maximum.max(snapshot.current);
    }

    /// Apply `op` with an explicit value, or the counter's own default for it.
    pub fn apply(&mut self, op: Op, value: Option<i64>) {
        self.apply_at(op, value, Utc::now());
    }

    pub fn apply_at(&mut self, op: Op, value: Option<i64>, now: DateTime<Utc>) {
        match op {
            Op::Increment => self.increment_at(value.unwrap_or(self.policy.step), now),
            Op::Decrement => self.decrement_at(value.unwrap_or(self.policy.step), now),
            Op::Reset => self.reset_at(value.unwrap_or(self.policy.initial), now),
            Op::Recreate => self.recreate_at(value.unwrap_or(self.policy.initial), now),
        }
    }

    pub fn reset(&mut self, value: i64) {
        self.reset_at(value, Utc::now());
    }

    pub fn reset_default(&mut self) {
        self.reset(self.policy.initial);
    }

    pub fn reset_at(&mut self, value: i64, now: DateTime<Utc>) {
        self.pre_change(now);
        self.current = value;
        self.collapse_range();
    }

    /// Like [`reset`](Self::reset), but also swallows any pending interval.
    pub fn recreate(&mut self, value: i64) {
        self.recreate_at(value, Utc::now());
    }

    pub fn recreate_default(&mut self) {
        self.recreate(self.policy.initial);
    }

    pub fn recreate_at(&mut self, value: i64, now: DateTime<Utc>) {
        self.reset_at(value, now);
        self.previous_notified = self.current;
    }

    pub fn increment(&mut self, step: i64) {
        self.increment_at(step, Utc::now());
    }

    pub fn increment_default(&mut self) {
        self.increment(self.policy.step);
    }

    pub fn increment_at(&mut self, step: i64, now: DateTime<Utc>) {
        self.pre_change(now);
        self.current = self.current.saturating_add(step);
        self.post_change();
    }

    pub fn decrement(&mut self, step: i64) {
        self.decrement_at(step, Utc::now());
    }

    pub fn decrement_default(&mut self) {
        self.decrement(self.policy.step);
    }

    pub fn decrement_at(&mut self, step: i64, now: DateTime<Utc>) {
        self.pre_change(now);
        self.current = self.current.saturating_sub(step);
        self.post_change();
    }

    /// Cooldown of 0 never throttles.
    pub fn has_active_cooldown(&self) -> bool {
        let cooldown = i64::try_from(self.policy.cooldown).unwrap_or(i64::MAX);
        cooldown != 0 && self.cooldown_remaining < cooldown
    }

    pub fn has_minimum_interval(&self) -> bool {
        self.current.abs_diff(self.previous_notified) >= self.policy.each
    }

    pub fn notification_eligible(&self) -> bool {
        !self.has_active_cooldown() && self.has_minimum_interval()
    }

    /// Call once per delivered notification, after delivery.
    pub fn mark_notified(&mut self) {
        self.previous_notified = self.current;
    }

    pub fn format_context(&self) -> FormatContext {
        let mut ctx = FormatContext::new();
        ctx.insert(keys::NAME, &self.name)
            .insert(keys::INITIAL, self.policy.initial)
            .insert(keys::STEP, self.policy.step)
            .insert(keys::COOLDOWN, self.policy.cooldown)
            .insert(keys::DELAY, self.policy.delay)
            .insert(keys::EACH, self.policy.each)
            .insert(keys::PREVIOUS_VALUE, self.previous)
            .insert(keys::CURRENT_VALUE, self.current)
            .insert(keys::MINIMUM_VALUE, self.minimum)
            .insert(keys::MAXIMUM_VALUE, self.maximum);
        ctx
    }

    pub fn render_message(&self) -> String {
        named_format(&self.policy.message, &self.format_context())
    }

    pub fn info(&self) -> String {
        format!(
            "Name : {}\nCreated at : {}\nInitial : {}\nStep : {}\nCooldown : {}\nDelay : {}\n\
             Each : {}\nMessage : {}\nCurrent : {}\nPrevious : {}\nMinimum : {}\nMaximum : {}\n\
             Last change : {}\nCooldown remaining : {}",
            self.name,
            local_time(self.created_at),
            self.policy.initial,
            self.policy.step,
            self.policy.cooldown,
            self.policy.delay,
            self.policy.each,
            self.policy.message,
            self.current,
            self.previous,
            self.minimum,
            self.maximum,
            local_time(self.last_change),
            self.cooldown_remaining,
        )
    }

    /// Runs before the value changes.
    fn pre_change(&mut self, now: DateTime<Utc>) {
        self.previous = self.current;

        let elapsed = (now - self.last_change).num_seconds().max(0);
        self.cooldown_remaining -= elapsed;
        if self.cooldown_remaining < 0 {
            self.cooldown_remaining = i64::try_from(self.policy.cooldown).unwrap_or(i64::MAX);
        }
        // Two changes within the same second must not both become eligible.
        if elapsed == 0 {
            self.cooldown_remaining -= 1;
        }
        self.last_change = now;
    }

    /// Runs after the value changed.
    fn post_change(&mut self) {
        self.minimum = self.minimum.min(self.current);
        self.maximum = self.maximum.max(self.current);
    }

    fn collapse_range(&mut self) {
        self.minimum = self.current;
        self.maximum = self.current;
        self.previous = self.current;
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format(TIME_FORMAT).to_string()
}
