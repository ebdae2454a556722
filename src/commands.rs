//! The user-facing command surface.
//!
//! Every command returns one status line (possibly multi-line for `Info` and
//! listings). Malformed text is rejected by the parser before the registry is
//! touched, and every successful durable change writes one journal record.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info, warn};

use crate::actions::counter::{Op, Policy};
use crate::actions::listener::{AliasCommand, ListenerKey};
use crate::config::Config;
use crate::delivery::{Delivery, DeliveryScheduler};
use crate::error::{CounterError, CounterResult, EntityKind};
use crate::journal::{DiscardJournal, ReplayRecord, ReplaySink};
use crate::state::Registry;

#[derive(Parser, Debug)]
#[command(name = "counters", no_binary_name = true)]
struct CommandLine {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
#[command(rename_all = "lower")]
pub enum Command {
    /// Create a counter.
    Create(CreateArgs),
    /// Delete a counter.
    Delete { name: String },
    /// Reset a counter to its initial value and forget the pending interval.
    Recreate { name: String },
    /// Reset a counter to a value, or to its initial value.
    Reset {
        name: String,
        #[arg(allow_negative_numbers = true)]
        value: Option<i64>,
    },
    /// Increment a counter by a step, or by its own step.
    Incr {
        name: String,
        #[arg(allow_negative_numbers = true)]
        step: Option<i64>,
    },
    /// Decrement a counter by a step, or by its own step.
    Decr {
        name: String,
        #[arg(allow_negative_numbers = true)]
        step: Option<i64>,
    },
    /// Show everything about a counter.
    Info { name: String },
    /// Set one property of a counter.
    Set {
        name: String,
        #[arg(value_enum, ignore_case = true)]
        property: Property,
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Render the message of a counter.
    Print { name: String },
    /// List counters.
    List,
    /// Let a chat user trigger a counter through an alias.
    CreateListener {
        name: String,
        nickname: Option<String>,
        alias: Option<String>,
    },
    DeleteListener { nickname: String, alias: String },
    ListListeners,
    /// Pair a main and a sub counter under a session message.
    Imbricate {
        main: String,
        sub: String,
        name: String,
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        template: Vec<String>,
    },
    DeleteImbrication { name: String },
    /// Start a session.
    Start { name: String },
    /// Stop a session and announce it.
    Stop { name: String },
    ListImbrications,
    /// List counters, listeners and imbrications.
    ListAll,
}

#[derive(Args, Debug, Default, PartialEq, Eq)]
pub struct CreateArgs {
    #[arg(short, long, allow_negative_numbers = true)]
    pub initial: Option<i64>,
    #[arg(short, long, allow_negative_numbers = true)]
    pub step: Option<i64>,
    #[arg(short, long)]
    pub cooldown: Option<u64>,
    #[arg(short, long)]
    pub delay: Option<u64>,
    #[arg(short, long)]
    pub each: Option<u64>,
    #[arg(short, long, allow_hyphen_values = true)]
    pub message: Option<String>,
    pub name: String,
}

impl CreateArgs {
    fn policy(&self, defaults: &Policy) -> Policy {
        Policy {
            initial: self.initial.unwrap_or(defaults.initial),
            step: self.step.unwrap_or(defaults.step),
            cooldown: self.cooldown.unwrap_or(defaults.cooldown),
            delay: self.delay.unwrap_or(defaults.delay),
            each: self.each.unwrap_or(defaults.each),
            message: self
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| defaults.message.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Property {
    Name,
    Initial,
    Step,
    Cooldown,
    Delay,
    Each,
    Message,
}

impl Property {
    pub fn as_str(self) -> &'static str {
        match self {
            Property::Name => "NAME",
            Property::Initial => "INITIAL",
            Property::Step => "STEP",
            Property::Cooldown => "COOLDOWN",
            Property::Delay => "DELAY",
            Property::Each => "EACH",
            Property::Message => "MESSAGE",
        }
    }
}

/// Parse a command line. The verb is case-insensitive.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut args = split_args(line);
    let Some(verb) = args.first_mut() else {
        return Err("empty command".to_string());
    };
    *verb = verb.to_ascii_lowercase();
    CommandLine::try_parse_from(args)
        .map(|cli| cli.command)
        .map_err(|e| e.render().to_string().trim_end().to_string())
}

/// Split on whitespace, keeping `"quoted groups"` together. Inside quotes a
/// backslash escapes the next character.
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}

// ── Module ──────────────────────────────────────────────────────────────────

/// Command context: owns the registry and hands eligible notifications to
/// the scheduler. All mutations happen here, one command at a time.
pub struct CountersModule {
    config: Config,
    registry: Registry,
    scheduler: DeliveryScheduler,
    journal: Box<dyn ReplaySink>,
}

impl CountersModule {
    pub fn new(config: Config, delivery: Arc<dyn Delivery>) -> Self {
        Self {
            config,
            registry: Registry::new(),
            scheduler: DeliveryScheduler::new(delivery),
            journal: Box::new(DiscardJournal),
        }
    }

    /// Send records of later changes to `journal`.
    pub fn with_journal(mut self, journal: Box<dyn ReplaySink>) -> Self {
        self.journal = journal;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Rebuild state from journal records without re-journaling them.
    pub fn replay(&mut self, records: impl IntoIterator<Item = ReplayRecord>) -> usize {
        let mut applied = 0;
        for record in records {
            let line = record.to_string();
            match self.registry.apply(record) {
                Ok(()) => applied += 1,
                Err(err) => warn!(record = %line, error = %err, "journal record not applied"),
            }
        }
        info!(applied, "journal replayed");
        applied
    }

    /// Run one command typed by `sender` and return its status line.
    pub fn execute(&mut self, sender: &str, line: &str) -> String {
        debug!(sender = %sender, line = %line, "command");
        let command = match parse(line) {
            Ok(command) => command,
            Err(usage) => return usage,
        };
        self.dispatch(sender, command)
            .unwrap_or_else(|err| err.to_string())
    }

    /// Route chat text through the listeners of `nick`. Text that does not
    /// start with one of their aliases is ignored.
    pub fn handle_chat(&mut self, nick: &str, text: &str) -> Option<String> {
        let alias = AliasCommand::parse(text)?;
        let key = ListenerKey::new(nick, alias.alias);
        let counter = self.registry.resolve_listener(&key).ok()?.to_string();
        debug!(listener = %key, counter = %counter, "listener triggered");
        Some(self.execute(nick, &alias.expand(&counter)))
    }

    /// Cancel pending deliveries and wait for their tasks.
    pub async fn shutdown(&mut self) {
        self.scheduler.shutdown().await;
    }

    pub fn dispatch(&mut self, sender: &str, command: Command) -> CounterResult<String> {
        match command {
            Command::Create(args) => self.create(args),
            Command::Delete { name } => self.delete(&name),
            Command::Recreate { name } => self.mutate(&name, Op::Recreate, None),
            Command::Reset { name, value } => self.mutate(&name, Op::Reset, value),
            Command::Incr { name, step } => self.mutate(&name, Op::Increment, step),
            Command::Decr { name, step } => self.mutate(&name, Op::Decrement, step),
            Command::Info { name } => Ok(self.registry.counter(&name)?.lock().info()),
            Command::Set {
                name,
                property,
                value,
            } => self.set(&name, property, &value.join(" ")),
            Command::Print { name } => Ok(self.registry.counter(&name)?.lock().render_message()),
            Command::List => Ok(self.list_counters()),
            Command::CreateListener {
                name,
                nickname,
                alias,
            } => {
                let owner = nickname.unwrap_or_else(|| sender.to_string());
                let alias = alias.unwrap_or_else(|| name.clone());
                self.create_listener(ListenerKey::new(owner, alias), &name)
            }
            Command::DeleteListener { nickname, alias } => {
                self.delete_listener(ListenerKey::new(nickname, alias))
            }
            Command::ListListeners => Ok(self.list_listeners()),
            Command::Imbricate {
                main,
                sub,
                name,
                template,
            } => self.imbricate(&name, &main, &sub, &template.join(" ")),
            Command::DeleteImbrication { name } => self.delete_imbrication(&name),
            Command::Start { name } => self.start(&name),
            Command::Stop { name } => self.stop(&name),
            Command::ListImbrications => Ok(self.list_imbrications()),
            Command::ListAll => Ok(format!(
                "{}\n{}\n{}",
                self.list_counters(),
                self.list_listeners(),
                self.list_imbrications()
            )),
        }
    }

    fn record(&mut self, record: ReplayRecord) {
        self.journal.record(&record);
    }

    fn record_counter(&mut self, name: &str) -> CounterResult<()> {
        let record = self.registry.counter_record(name)?;
        self.record(record);
        Ok(())
    }

    fn record_imbrication(&mut self, name: &str) -> CounterResult<()> {
        let record = self.registry.imbrication_record(name)?;
        self.record(record);
        Ok(())
    }

    // ── Counters ────────────────────────────────────────────────────────────

    fn create(&mut self, args: CreateArgs) -> CounterResult<String> {
        let policy = args.policy(&self.config.defaults);
        self.registry.create_counter(&args.name, policy)?;
        self.record_counter(&args.name)?;
        Ok(format!("Counter added : {}", args.name))
    }

    fn delete(&mut self, name: &str) -> CounterResult<String> {
        self.registry.delete_counter(name)?;
        self.scheduler.cancel_scope(EntityKind::Counter, name);
        self.record(ReplayRecord::CounterDeleted {
            name: name.to_string(),
        });
        Ok(format!("Counter deleted : {name}"))
    }

    fn mutate(&mut self, name: &str, op: Op, value: Option<i64>) -> CounterResult<String> {
        let counter = self.registry.counter(name)?;
        let (old, new) = {
            let mut c = counter.lock();
            let old = c.current();
            c.apply(op, value);
            (old, c.current())
        };
        self.record_counter(name)?;

        let mut status = format!("{name} : {old} -> {new}");
        if self.registry.notification_due(name)? {
            self.scheduler.schedule(counter, None);
            info!(counter = %name, old, new, "counter changed, notification scheduled");
        } else {
            debug!(counter = %name, old, new, "counter changed, notification throttled");
            status.push_str(" (no notification)");
        }
        Ok(status)
    }

    fn set(&mut self, name: &str, property: Property, value: &str) -> CounterResult<String> {
        let counter = self.registry.counter(name)?;
        if property == Property::Name {
            self.registry.rename_counter(name, value)?;
            self.scheduler.rename_scope(EntityKind::Counter, name, value);
            self.record(ReplayRecord::CounterRenamed {
                from: name.to_string(),
                to: value.to_string(),
            });
            return Ok(format!("{name} : NAME set to {value}"));
        }

        {
            let mut c = counter.lock();
            let policy = c.policy_mut();
            match property {
                Property::Initial => policy.initial = parse_number(property, value)?,
                Property::Step => policy.step = parse_number(property, value)?,
                Property::Cooldown => policy.cooldown = parse_number(property, value)?,
                Property::Delay => policy.delay = parse_number(property, value)?,
                Property::Each => policy.each = parse_number(property, value)?,
                Property::Message => policy.message = value.to_string(),
                Property::Name => {}
            }
        }
        self.record_counter(name)?;
        Ok(format!("{name} : {} set to {value}", property.as_str()))
    }

    fn list_counters(&self) -> String {
        let names: Vec<&str> = self.registry.counter_names().collect();
        format!("Your counters : {}", names.join(", "))
    }

    // ── Listeners ───────────────────────────────────────────────────────────

    fn create_listener(&mut self, key: ListenerKey, counter: &str) -> CounterResult<String> {
        self.registry.create_listener(key.clone(), counter)?;
        let status = format!("Listener added : {key} -> {counter}");
        self.record(ReplayRecord::Listener {
            owner: key.owner,
            alias: key.alias,
            counter: counter.to_string(),
        });
        Ok(status)
    }

    fn delete_listener(&mut self, key: ListenerKey) -> CounterResult<String> {
        self.registry.delete_listener(&key)?;
        let status = format!("Listener deleted : {key}");
        self.record(ReplayRecord::ListenerDeleted {
            owner: key.owner,
            alias: key.alias,
        });
        Ok(status)
    }

    fn list_listeners(&self) -> String {
        let listeners: Vec<String> = self
            .registry
            .listeners()
            .map(|(key, counter)| format!("{key} -> {counter}"))
            .collect();
        format!("Your listeners : {}", listeners.join(", "))
    }

    // ── Imbrications ────────────────────────────────────────────────────────

    fn imbricate(&mut self, name: &str, main: &str, sub: &str, template: &str) -> CounterResult<String> {
        self.registry.create_imbrication(name, main, sub, template)?;
        self.record_imbrication(name)?;
        Ok(format!("Imbrication added : {name} ({main} / {sub})"))
    }

    fn delete_imbrication(&mut self, name: &str) -> CounterResult<String> {
        self.registry.delete_imbrication(name)?;
        self.scheduler.cancel_scope(EntityKind::Imbrication, name);
        self.record(ReplayRecord::ImbricationDeleted {
            name: name.to_string(),
        });
        Ok(format!("Imbrication deleted : {name}"))
    }

    fn start(&mut self, name: &str) -> CounterResult<String> {
        self.registry.start_session(name)?;
        self.record_imbrication(name)?;
        let (start, _) = self.registry.imbrication(name)?.session();
        Ok(format!("Session started : {name} (start = {start})"))
    }

    /// Close the session, count it on the main counter and announce it.
    fn stop(&mut self, name: &str) -> CounterResult<String> {
        self.registry.stop_session(name)?;
        let (main, _) = self.registry.imbricated_counters(name)?;
        let (main_name, delay) = {
            let mut m = main.lock();
            m.increment_default();
            (m.name().to_string(), m.policy().delay)
        };
        self.record_counter(&main_name)?;
        self.record_imbrication(name)?;

        let message = self.registry.render_imbrication(name)?;
        self.scheduler.schedule_message(
            EntityKind::Imbrication,
            name,
            Duration::from_secs(delay),
            message.clone(),
        );
        info!(imbrication = %name, "session stopped, announcement scheduled");
        Ok(format!("Session stopped : {message}"))
    }

    fn list_imbrications(&self) -> String {
        let imbrications: Vec<String> = self
            .registry
            .imbrication_names()
            .filter_map(|name| self.registry.imbrication(name).ok())
            .map(|imb| format!("{} ({} / {})", imb.name(), imb.main(), imb.sub()))
            .collect();
        format!("Your imbrications : {}", imbrications.join(", "))
    }
}

fn parse_number<T: std::str::FromStr>(property: Property, value: &str) -> CounterResult<T> {
    value.trim().parse().map_err(|_| {
        CounterError::InvalidArgument(format!(
            "`{value}` is not a valid value for {}",
            property.as_str()
        ))
    })
}
