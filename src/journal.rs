//! Replay journal: one line per durable state change.
//!
//! Lines read `<kind> <name...> [key=value...]` with fields in a fixed order.
//! String fields are JSON-quoted so templates survive spaces and quotes.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::actions::counter::{Policy, Snapshot};
use crate::actions::ids;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplayRecord {
    Counter {
        name: String,
        policy: Policy,
        snapshot: Snapshot,
    },
    CounterDeleted {
        name: String,
    },
    CounterRenamed {
        from: String,
        to: String,
    },
    Listener {
        owner: String,
        alias: String,
        counter: String,
    },
    ListenerDeleted {
        owner: String,
        alias: String,
    },
    Imbrication {
        name: String,
        main: String,
        sub: String,
        start: i64,
        end: i64,
        message: String,
    },
    ImbricationDeleted {
        name: String,
    },
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown record kind `{0}`")]
    UnknownKind(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("malformed field `{field}`: {reason}")]
    Malformed { field: &'static str, reason: String },
}

impl fmt::Display for ReplayRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayRecord::Counter {
                name,
                policy,
                snapshot,
            } => write!(
                f,
                "{} {name} initial={} step={} cooldown={} delay={} each={} current={} minimum={} maximum={} message={}",
                ids::COUNTER,
                policy.initial,
                policy.step,
                policy.cooldown,
                policy.delay,
                policy.each,
                snapshot.current,
                snapshot.minimum,
                snapshot.maximum,
                quote(&policy.message),
            ),
            ReplayRecord::CounterDeleted { name } => write!(f, "{} {name}", ids::COUNTER_DELETED),
            ReplayRecord::CounterRenamed { from, to } => {
                write!(f, "{} {from} to={to}", ids::COUNTER_RENAMED)
            }
            ReplayRecord::Listener {
                owner,
                alias,
                counter,
            } => write!(f, "{} {owner} {alias} counter={counter}", ids::LISTENER),
            ReplayRecord::ListenerDeleted { owner, alias } => {
                write!(f, "{} {owner} {alias}", ids::LISTENER_DELETED)
            }
            ReplayRecord::Imbrication {
                name,
                main,
                sub,
                start,
                end,
                message,
            } => write!(
                f,
                "{} {name} main={main} sub={sub} start={start} end={end} message={}",
                ids::IMBRICATION,
                quote(message),
            ),
            ReplayRecord::ImbricationDeleted { name } => {
                write!(f, "{} {name}", ids::IMBRICATION_DELETED)
            }
        }
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

impl FromStr for ReplayRecord {
    type Err = JournalError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(line.trim());
        let kind = fields.word("kind")?;

        let record = match kind {
            ids::COUNTER => {
                let name = fields.word("name")?.to_string();
                let policy = Policy {
                    initial: fields.number("initial")?,
                    step: fields.number("step")?,
                    cooldown: fields.number("cooldown")?,
                    delay: fields.number("delay")?,
                    each: fields.number("each")?,
                    message: String::new(),
                };
                let snapshot = Snapshot {
                    current: fields.number("current")?,
                    minimum: fields.number("minimum")?,
                    maximum: fields.number("maximum")?,
                };
                let message = fields.quoted("message")?;
                ReplayRecord::Counter {
                    name,
                    policy: Policy { message, ..policy },
                    snapshot,
                }
            }
            ids::COUNTER_DELETED => ReplayRecord::CounterDeleted {
                name: fields.word("name")?.to_string(),
            },
            ids::COUNTER_RENAMED => ReplayRecord::CounterRenamed {
                from: fields.word("name")?.to_string(),
                to: fields.value("to")?.to_string(),
            },
            ids::LISTENER => ReplayRecord::Listener {
                owner: fields.word("owner")?.to_string(),
                alias: fields.word("alias")?.to_string(),
                counter: fields.value("counter")?.to_string(),
            },
            ids::LISTENER_DELETED => ReplayRecord::ListenerDeleted {
                owner: fields.word("owner")?.to_string(),
                alias: fields.word("alias")?.to_string(),
            },
            ids::IMBRICATION => ReplayRecord::Imbrication {
                name: fields.word("name")?.to_string(),
                main: fields.value("main")?.to_string(),
                sub: fields.value("sub")?.to_string(),
                start: fields.number("start")?,
                end: fields.number("end")?,
                message: fields.quoted("message")?,
            },
            ids::IMBRICATION_DELETED => ReplayRecord::ImbricationDeleted {
                name: fields.word("name")?.to_string(),
            },
            other => return Err(JournalError::UnknownKind(other.to_string())),
        };
        Ok(record)
    }
}

/// Cursor over the fields of one journal line.
struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    fn word(&mut self, field: &'static str) -> Result<&'a str, JournalError> {
        let rest = self.rest.trim_start();
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if end == 0 {
            return Err(JournalError::MissingField(field));
        }
        let (word, tail) = rest.split_at(end);
        self.rest = tail;
        Ok(word)
    }

    /// Unquoted `key=value`.
    fn value(&mut self, field: &'static str) -> Result<&'a str, JournalError> {
        let word = self.word(field)?;
        word.strip_prefix(field)
            .and_then(|w| w.strip_prefix('='))
            .ok_or(JournalError::MissingField(field))
    }

    fn number<T: FromStr>(&mut self, field: &'static str) -> Result<T, JournalError>
    where
        T::Err: fmt::Display,
    {
        self.value(field)?
            .parse()
            .map_err(|e: T::Err| JournalError::Malformed {
                field,
                reason: e.to_string(),
            })
    }

    /// JSON-quoted `key="value"`.
    fn quoted(&mut self, field: &'static str) -> Result<String, JournalError> {
        let rest = self.rest.trim_start();
        let body = rest
            .strip_prefix(field)
            .and_then(|r| r.strip_prefix('='))
            .ok_or(JournalError::MissingField(field))?;

        let mut stream = serde_json::Deserializer::from_str(body).into_iter::<String>();
        let value = match stream.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) => {
                return Err(JournalError::Malformed {
                    field,
                    reason: e.to_string(),
                });
            }
            None => return Err(JournalError::MissingField(field)),
        };
        self.rest = &body[stream.byte_offset()..];
        Ok(value)
    }
}

// ── Sinks ───────────────────────────────────────────────────────────────────

/// Receives one record per durable state change.
pub trait ReplaySink: Send {
    fn record(&mut self, record: &ReplayRecord);
}

/// Drops every record; state lives only as long as the process.
#[derive(Debug, Default)]
pub struct DiscardJournal;

impl ReplaySink for DiscardJournal {
    fn record(&mut self, record: &ReplayRecord) {
        debug!(record = %record, "journal disabled, record dropped");
    }
}

/// Keeps record lines in memory; clones share the same lines.
#[derive(Clone, Debug, Default)]
pub struct MemoryJournal {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryJournal {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl ReplaySink for MemoryJournal {
    fn record(&mut self, record: &ReplayRecord) {
        self.lines.lock().push(record.to_string());
    }
}

/// Append-only journal file.
pub struct FileJournal {
    path: PathBuf,
    file: File,
}

impl FileJournal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every parsable record; bad lines are skipped.
    pub fn load(&self) -> Result<Vec<ReplayRecord>, JournalError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ReplayRecord>() {
                Ok(record) => records.push(record),
                Err(err) => warn!(line = idx + 1, error = %err, "skipping journal line"),
            }
        }
        debug!(path = %self.path.display(), records = records.len(), "journal loaded");
        Ok(records)
    }

    /// Replace the journal with `records`, then keep appending to it.
    pub fn compact(&mut self, records: &[ReplayRecord]) -> Result<(), JournalError> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = File::create(&tmp)?;
            for record in records {
                writeln!(out, "{record}")?;
            }
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        debug!(path = %self.path.display(), records = records.len(), "journal compacted");
        Ok(())
    }
}

impl ReplaySink for FileJournal {
    fn record(&mut self, record: &ReplayRecord) {
        let res = writeln!(self.file, "{record}").and_then(|_| self.file.flush());
        if let Err(err) = res {
            warn!(path = %self.path.display(), error = %err, "failed to write journal record");
        }
    }
}
