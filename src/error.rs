use std::fmt;

use thiserror::Error;

use crate::actions::ids;

/// The kind of entity a command addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Counter,
    Listener,
    Imbrication,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Counter => ids::COUNTER,
            EntityKind::Listener => ids::LISTENER,
            EntityKind::Imbrication => ids::IMBRICATION,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every failure is recoverable: `Display` is the status line shown to the user.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CounterError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },
    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: EntityKind, name: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl CounterError {
    pub fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        CounterError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: EntityKind, name: impl Into<String>) -> Self {
        CounterError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }
}

pub type CounterResult<T> = Result<T, CounterError>;
