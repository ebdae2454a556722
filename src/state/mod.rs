//! The registry owns every counter, listener and imbrication.
//!
//! Deleting a counter does not cascade: listeners and imbrications naming it
//! stay registered and fail with `NotFound` when used.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::actions::counter::{Counter, Policy, SharedCounter, Snapshot};
use crate::actions::imbrication::Imbrication;
use crate::actions::listener::ListenerKey;
use crate::error::{CounterError, CounterResult, EntityKind};
use crate::journal::ReplayRecord;

#[derive(Default)]
pub struct Registry {
    counters: BTreeMap<String, SharedCounter>,
    listeners: BTreeMap<ListenerKey, String>,
    imbrications: BTreeMap<String, Imbrication>,
}

/// Names may not be empty or contain whitespace, so they stay single tokens
/// in commands and journal lines.
pub fn validate_name(kind: EntityKind, name: &str) -> CounterResult<()> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(CounterError::InvalidArgument(format!(
            "invalid {kind} name `{name}`"
        )));
    }
    Ok(())
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Counters ────────────────────────────────────────────────────────────

    pub fn create_counter(&mut self, name: &str, policy: Policy) -> CounterResult<SharedCounter> {
        validate_name(EntityKind::Counter, name)?;
        if self.counters.contains_key(name) {
            return Err(CounterError::already_exists(EntityKind::Counter, name));
        }
        let counter = Counter::new(name, policy).into_shared();
        self.counters.insert(name.to_string(), counter.clone());
        info!(counter = %name, "counter created");
        Ok(counter)
    }

    pub fn delete_counter(&mut self, name: &str) -> CounterResult<()> {
        self.counters
            .remove(name)
            .map(|_| info!(counter = %name, "counter deleted"))
            .ok_or_else(|| CounterError::not_found(EntityKind::Counter, name))
    }

    pub fn counter(&self, name: &str) -> CounterResult<SharedCounter> {
        self.counters
            .get(name)
            .cloned()
            .ok_or_else(|| CounterError::not_found(EntityKind::Counter, name))
    }

    /// Re-key a counter under `to` and update its name.
    pub fn rename_counter(&mut self, from: &str, to: &str) -> CounterResult<()> {
        validate_name(EntityKind::Counter, to)?;
        if self.counters.contains_key(to) {
            return Err(CounterError::already_exists(EntityKind::Counter, to));
        }
        let counter = self
            .counters
            .remove(from)
            .ok_or_else(|| CounterError::not_found(EntityKind::Counter, from))?;
        counter.lock().set_name(to);
        self.counters.insert(to.to_string(), counter);
        info!(from = %from, to = %to, "counter renamed");
        Ok(())
    }

    /// Whether the counter's latest change should produce a notification.
    pub fn notification_due(&self, name: &str) -> CounterResult<bool> {
        Ok(self.counter(name)?.lock().notification_eligible())
    }

    pub fn counter_names(&self) -> impl Iterator<Item = &str> {
        self.counters.keys().map(String::as_str)
    }

    // ── Listeners ───────────────────────────────────────────────────────────

    pub fn create_listener(&mut self, key: ListenerKey, counter: &str) -> CounterResult<()> {
        validate_name(EntityKind::Listener, &key.owner)?;
        validate_name(EntityKind::Listener, &key.alias)?;
        if !self.counters.contains_key(counter) {
            return Err(CounterError::not_found(EntityKind::Counter, counter));
        }
        if self.listeners.contains_key(&key) {
            return Err(CounterError::already_exists(EntityKind::Listener, key.to_string()));
        }
        info!(listener = %key, counter = %counter, "listener created");
        self.listeners.insert(key, counter.to_string());
        Ok(())
    }

    pub fn delete_listener(&mut self, key: &ListenerKey) -> CounterResult<()> {
        self.listeners
            .remove(key)
            .map(|_| info!(listener = %key, "listener deleted"))
            .ok_or_else(|| CounterError::not_found(EntityKind::Listener, key.to_string()))
    }

    /// The counter name a listener points at; it may no longer exist.
    pub fn resolve_listener(&self, key: &ListenerKey) -> CounterResult<&str> {
        self.listeners
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| CounterError::not_found(EntityKind::Listener, key.to_string()))
    }

    pub fn listeners(&self) -> impl Iterator<Item = (&ListenerKey, &str)> {
        self.listeners.iter().map(|(k, v)| (k, v.as_str()))
    }

    // ── Imbrications ────────────────────────────────────────────────────────

    pub fn create_imbrication(
        &mut self,
        name: &str,
        main: &str,
        sub: &str,
        message: &str,
    ) -> CounterResult<()> {
        validate_name(EntityKind::Imbrication, name)?;
        if self.imbrications.contains_key(name) {
            return Err(CounterError::already_exists(EntityKind::Imbrication, name));
        }
        let missing: Vec<&str> = [main, sub]
            .into_iter()
            .filter(|n| !self.counters.contains_key(*n))
            .collect();
        if !missing.is_empty() {
            return Err(CounterError::not_found(EntityKind::Counter, missing.join(", ")));
        }
        if main == sub {
            return Err(CounterError::InvalidState(format!(
                "imbrication `{name}` needs two distinct counters, got `{main}` twice"
            )));
        }
        self.imbrications
            .insert(name.to_string(), Imbrication::new(name, main, sub, message));
        info!(imbrication = %name, main = %main, sub = %sub, "imbrication created");
        Ok(())
    }

    pub fn delete_imbrication(&mut self, name: &str) -> CounterResult<()> {
        self.imbrications
            .remove(name)
            .map(|_| info!(imbrication = %name, "imbrication deleted"))
            .ok_or_else(|| CounterError::not_found(EntityKind::Imbrication, name))
    }

    pub fn imbrication(&self, name: &str) -> CounterResult<&Imbrication> {
        self.imbrications
            .get(name)
            .ok_or_else(|| CounterError::not_found(EntityKind::Imbrication, name))
    }

    pub fn imbrication_names(&self) -> impl Iterator<Item = &str> {
        self.imbrications.keys().map(String::as_str)
    }

    /// Resolve the main and sub counters of an imbrication.
    pub fn imbricated_counters(&self, name: &str) -> CounterResult<(SharedCounter, SharedCounter)> {
        let imb = self.imbrication(name)?;
        Ok((self.counter(imb.main())?, self.counter(imb.sub())?))
    }

    pub fn start_session(&mut self, name: &str) -> CounterResult<()> {
        let (_, sub) = self.imbricated_counters(name)?;
        let imb = self.imbrication_mut(name)?;
        imb.start_session(&sub.lock());
        debug!(imbrication = %name, start = imb.session().0, "session started");
        Ok(())
    }

    pub fn stop_session(&mut self, name: &str) -> CounterResult<()> {
        let (_, sub) = self.imbricated_counters(name)?;
        let imb = self.imbrication_mut(name)?;
        imb.stop_session(&sub.lock());
        debug!(imbrication = %name, diff = imb.diff(), "session stopped");
        Ok(())
    }

    /// Render an imbrication against the current state of its counters.
    pub fn render_imbrication(&self, name: &str) -> CounterResult<String> {
        let (main, sub) = self.imbricated_counters(name)?;
        let imb = self.imbrication(name)?;
        let (main, sub) = (main.lock(), sub.lock());
        Ok(imb.render(&main, &sub))
    }

    fn imbrication_mut(&mut self, name: &str) -> CounterResult<&mut Imbrication> {
        self.imbrications
            .get_mut(name)
            .ok_or_else(|| CounterError::not_found(EntityKind::Imbrication, name))
    }

    // ── Replay ──────────────────────────────────────────────────────────────

    /// Journal record describing the current state of a counter.
    pub fn counter_record(&self, name: &str) -> CounterResult<ReplayRecord> {
        let counter = self.counter(name)?;
        let counter = counter.lock();
        Ok(ReplayRecord::Counter {
            name: counter.name().to_string(),
            policy: counter.policy().clone(),
            snapshot: counter.snapshot(),
        })
    }

    pub fn imbrication_record(&self, name: &str) -> CounterResult<ReplayRecord> {
        let imb = self.imbrication(name)?;
        let (start, end) = imb.session();
        Ok(ReplayRecord::Imbrication {
            name: imb.name().to_string(),
            main: imb.main().to_string(),
            sub: imb.sub().to_string(),
            start,
            end,
            message: imb.message().to_string(),
        })
    }

    /// Records that rebuild the whole registry, counters first.
    pub fn snapshot(&self) -> Vec<ReplayRecord> {
        let counters = self
            .counter_names()
            .filter_map(|name| self.counter_record(name).ok());
        let listeners = self.listeners().map(|(key, counter)| ReplayRecord::Listener {
            owner: key.owner.clone(),
            alias: key.alias.clone(),
            counter: counter.to_string(),
        });
        let imbrications = self
            .imbrication_names()
            .filter_map(|name| self.imbrication_record(name).ok());
        counters.chain(listeners).chain(imbrications).collect()
    }

    /// Apply one journal record. Upserts overwrite existing entries.
    ///
    /// Listeners and imbrications are restored even when their counters are
    /// gone, matching what the registry held when the record was written.
    pub fn apply(&mut self, record: ReplayRecord) -> CounterResult<()> {
        match record {
            ReplayRecord::Counter {
                name,
                policy,
                snapshot,
            } => self.upsert_counter(&name, policy, snapshot),
            ReplayRecord::CounterDeleted { name } => self.delete_counter(&name),
            ReplayRecord::CounterRenamed { from, to } => self.rename_counter(&from, &to),
            ReplayRecord::Listener {
                owner,
                alias,
                counter,
            } => {
                validate_name(EntityKind::Listener, &owner)?;
                validate_name(EntityKind::Listener, &alias)?;
                self.listeners.insert(ListenerKey::new(owner, alias), counter);
                Ok(())
            }
            ReplayRecord::ListenerDeleted { owner, alias } => {
                self.delete_listener(&ListenerKey::new(owner, alias))
            }
            ReplayRecord::Imbrication {
                name,
                main,
                sub,
                start,
                end,
                message,
            } => {
                validate_name(EntityKind::Imbrication, &name)?;
                let mut imb = Imbrication::new(name.as_str(), main, sub, message);
                imb.restore_session(start, end);
                self.imbrications.insert(name, imb);
                Ok(())
            }
            ReplayRecord::ImbricationDeleted { name } => self.delete_imbrication(&name),
        }
    }

    fn upsert_counter(&mut self, name: &str, policy: Policy, snapshot: Snapshot) -> CounterResult<()> {
        let counter = match self.counter(name) {
            Ok(existing) => {
                *existing.lock().policy_mut() = policy;
                existing
            }
            Err(_) => self.create_counter(name, policy)?,
        };
        counter.lock().restore(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(names: &[&str]) -> Registry {
        let mut reg = Registry::new();
        for name in names {
            reg.create_counter(name, Policy::default()).unwrap();
        }
        reg
    }

    #[test]
    fn duplicate_create_leaves_first_counter_untouched() {
        let mut reg = registry_with(&["c"]);
        reg.counter("c").unwrap().lock().increment(5);

        let err = reg
            .create_counter(
                "c",
                Policy {
                    initial: 100,
                    ..Policy::default()
                },
            )
            .unwrap_err();
        assert_eq!(err, CounterError::already_exists(EntityKind::Counter, "c"));
        let c = reg.counter("c").unwrap();
        assert_eq!(c.lock().current(), 5);
        assert_eq!(c.lock().policy().initial, 0);
    }

    #[test]
    fn rejects_names_with_whitespace() {
        let mut reg = Registry::new();
        assert!(matches!(
            reg.create_counter("two words", Policy::default()),
            Err(CounterError::InvalidArgument(_))
        ));
    }

    #[test]
    fn delete_reports_missing_counter() {
        let mut reg = registry_with(&["c"]);
        reg.delete_counter("c").unwrap();
        assert_eq!(
            reg.delete_counter("c"),
            Err(CounterError::not_found(EntityKind::Counter, "c"))
        );
    }

    #[test]
    fn listener_requires_existing_counter_and_unique_key() {
        let mut reg = registry_with(&["deaths"]);
        let key = ListenerKey::new("bob", "!d");

        assert!(matches!(
            reg.create_listener(key.clone(), "kills"),
            Err(CounterError::NotFound {
                kind: EntityKind::Counter,
                ..
            })
        ));
        reg.create_listener(key.clone(), "deaths").unwrap();
        assert!(matches!(
            reg.create_listener(key.clone(), "deaths"),
            Err(CounterError::AlreadyExists { .. })
        ));
        assert_eq!(reg.resolve_listener(&key), Ok("deaths"));
    }

    #[test]
    fn deleting_a_counter_leaves_dangling_references() {
        let mut reg = registry_with(&["games", "kills"]);
        let key = ListenerKey::new("bob", "!k");
        reg.create_listener(key.clone(), "kills").unwrap();
        reg.create_imbrication("session", "games", "kills", "{DIFF}")
            .unwrap();

        reg.delete_counter("kills").unwrap();

        assert_eq!(reg.resolve_listener(&key), Ok("kills"));
        assert!(reg.imbrication("session").is_ok());
        assert_eq!(
            reg.start_session("session"),
            Err(CounterError::not_found(EntityKind::Counter, "kills"))
        );
    }

    #[test]
    fn imbrication_reports_every_missing_counter() {
        let mut reg = registry_with(&["games"]);
        assert_eq!(
            reg.create_imbrication("s", "nope", "zip", "{DIFF}"),
            Err(CounterError::not_found(EntityKind::Counter, "nope, zip"))
        );
        assert!(matches!(
            reg.create_imbrication("s", "games", "games", "{DIFF}"),
            Err(CounterError::InvalidState(_))
        ));
    }

    #[test]
    fn session_scenario() {
        let mut reg = registry_with(&["m", "s"]);
        reg.create_imbrication("imb", "m", "s", "{DIFF} {START} {END}")
            .unwrap();
        reg.start_session("imb").unwrap();
        let sub = reg.counter("s").unwrap();
        sub.lock().increment(3);
        sub.lock().increment(3);
        reg.stop_session("imb").unwrap();

        assert_eq!(reg.render_imbrication("imb").unwrap(), "6 0 6");
        assert_eq!(reg.imbrication("imb").unwrap().diff(), 6);
    }

    #[test]
    fn rename_rekeys_the_counter() {
        let mut reg = registry_with(&["a", "b"]);
        assert!(matches!(
            reg.rename_counter("a", "b"),
            Err(CounterError::AlreadyExists { .. })
        ));
        reg.rename_counter("a", "z").unwrap();
        assert!(reg.counter("a").is_err());
        assert_eq!(reg.counter("z").unwrap().lock().name(), "z");
    }

    #[test]
    fn snapshot_rebuilds_an_equal_registry() {
        let mut reg = registry_with(&["games", "kills"]);
        reg.counter("kills").unwrap().lock().increment(4);
        reg.create_listener(ListenerKey::new("bob", "!k"), "kills")
            .unwrap();
        reg.create_imbrication("session", "games", "kills", "{DIFF}")
            .unwrap();
        reg.stop_session("session").unwrap();

        let records = reg.snapshot();
        let mut copy = Registry::new();
        for record in records.clone() {
            copy.apply(record).unwrap();
        }
        assert_eq!(copy.snapshot(), records);
        assert_eq!(copy.imbrication("session").unwrap().session(), (0, 4));
    }

    #[test]
    fn snapshot_keeps_dangling_references() {
        let mut reg = registry_with(&["games", "kills", "deaths"]);
        reg.create_listener(ListenerKey::new("bob", "!k"), "kills")
            .unwrap();
        reg.create_listener(ListenerKey::new("bob", "!d"), "deaths")
            .unwrap();
        reg.create_imbrication("session", "games", "kills", "{DIFF}")
            .unwrap();
        reg.create_imbrication("run", "deaths", "games", "{DIFF}")
            .unwrap();
        reg.delete_counter("kills").unwrap();
        reg.rename_counter("deaths", "falls").unwrap();

        let records = reg.snapshot();
        let mut copy = Registry::new();
        for record in records.clone() {
            copy.apply(record).unwrap();
        }

        assert_eq!(copy.snapshot(), records);
        assert_eq!(copy.listeners().count(), 2);
        assert_eq!(copy.resolve_listener(&ListenerKey::new("bob", "!d")), Ok("deaths"));
        assert_eq!(copy.imbrication_names().collect::<Vec<_>>(), vec!["run", "session"]);
        assert_eq!(
            copy.start_session("session"),
            Err(CounterError::not_found(EntityKind::Counter, "kills"))
        );
    }

    #[test]
    fn replayed_upserts_overwrite() {
        let mut reg = Registry::new();
        let record = |current| ReplayRecord::Counter {
            name: "c".into(),
            policy: Policy::default(),
            snapshot: Snapshot {
                current,
                minimum: 0,
                maximum: current,
            },
        };
        reg.apply(record(3)).unwrap();
        reg.apply(record(8)).unwrap();
        assert_eq!(reg.counter("c").unwrap().lock().current(), 8);
        reg.apply(ReplayRecord::CounterDeleted { name: "c".into() })
            .unwrap();
        assert!(reg.counter("c").is_err());
    }
}
