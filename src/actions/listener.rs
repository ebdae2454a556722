use std::fmt;

/// Key of a listener: the chat user allowed to trigger it and the alias they type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerKey {
    pub owner: String,
    pub alias: String,
}

impl ListenerKey {
    pub fn new(owner: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            alias: alias.into(),
        }
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.alias)
    }
}

/// Counter verbs a listener may trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Incr,
    Decr,
    Reset,
    Print,
    Info,
}

impl Trigger {
    pub fn verb(self) -> &'static str {
        match self {
            Trigger::Incr => "incr",
            Trigger::Decr => "decr",
            Trigger::Reset => "reset",
            Trigger::Print => "print",
            Trigger::Info => "info",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "incr" | "+" => Some(Trigger::Incr),
            "decr" | "-" => Some(Trigger::Decr),
            "reset" => Some(Trigger::Reset),
            "print" => Some(Trigger::Print),
            "info" => Some(Trigger::Info),
            _ => None,
        }
    }
}

/// Inbound chat text split into an alias and the command it asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasCommand<'a> {
    pub alias: &'a str,
    pub trigger: Option<Trigger>,
    pub args: Vec<&'a str>,
}

impl<'a> AliasCommand<'a> {
    /// `<alias> [verb] [args...]`. A second token that is not a verb is
    /// kept as an argument. Text carrying flags such as `--help` is not a
    /// listener command.
    pub fn parse(text: &'a str) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let alias = tokens.next()?;
        let mut args: Vec<&str> = tokens.collect();
        let trigger = args.first().and_then(|t| Trigger::parse(t));
        if trigger.is_some() {
            args.remove(0);
        }
        if args.iter().any(|a| is_flag(a)) {
            return None;
        }
        Some(Self {
            alias,
            trigger,
            args,
        })
    }

    /// Rebuild the command with the counter's real name in place of the alias.
    pub fn expand(&self, counter: &str) -> String {
        let verb = self.trigger.unwrap_or(Trigger::Incr).verb();
        let mut line = format!("{verb} {counter}");
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Negative numbers are values, not flags.
fn is_flag(arg: &str) -> bool {
    arg.len() > 1 && arg.starts_with('-') && arg.parse::<i64>().is_err()
}
