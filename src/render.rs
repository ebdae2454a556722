//! Named-placeholder rendering of counter and imbrication messages.
//!
//! A template holds `{KEY}` placeholders, and `{{NS}KEY}` placeholders that
//! resolve `KEY` inside the namespace `NS`. Placeholders without a value in
//! the context are copied through unchanged.
//!
//! Every render builds its own [`FormatContext`]; nothing is shared between
//! calls, so delivery tasks can render concurrently.

use std::collections::HashMap;

/// Placeholder keys every counter exposes.
pub mod keys {
    pub const NAME: &str = "NAME";
    pub const INITIAL: &str = "INITIAL";
    pub const STEP: &str = "STEP";
    pub const COOLDOWN: &str = "COOLDOWN";
    pub const DELAY: &str = "DELAY";
    pub const EACH: &str = "EACH";
    pub const PREVIOUS_VALUE: &str = "PREVIOUS_VALUE";
    pub const CURRENT_VALUE: &str = "CURRENT_VALUE";
    pub const MINIMUM_VALUE: &str = "MINIMUM_VALUE";
    pub const MAXIMUM_VALUE: &str = "MAXIMUM_VALUE";

    pub const DIFF: &str = "DIFF";
    pub const START: &str = "START";
    pub const END: &str = "END";

    /// Namespace of the main counter inside an imbrication template.
    pub const MAIN: &str = "MAIN";
    /// Namespace of the sub counter inside an imbrication template.
    pub const SUB: &str = "SUB";
}

#[derive(Clone, Debug, Default)]
pub struct FormatContext {
    values: HashMap<String, String>,
    scoped: HashMap<String, HashMap<String, String>>,
}

impl FormatContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Move every plain key of `other` under `namespace`.
    pub fn insert_namespace(&mut self, namespace: &str, other: FormatContext) -> &mut Self {
        self.scoped
            .entry(namespace.to_string())
            .or_default()
            .extend(other.values);
        self
    }

    pub fn get(&self, namespace: Option<&str>, key: &str) -> Option<&str> {
        match namespace {
            None => self.values.get(key),
            Some(ns) => self.scoped.get(ns)?.get(key),
        }
        .map(String::as_str)
    }
}

/// Substitute every recognized placeholder of `template`.
pub fn named_format(template: &str, ctx: &FormatContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open..];

        let resolved = parse_placeholder(rest)
            .and_then(|p| ctx.get(p.namespace, p.key).map(|value| (value, p.len)));
        match resolved {
            Some((value, len)) => {
                out.push_str(value);
                rest = &rest[len..];
            }
            None => {
                out.push('{');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Join a rendered message with an optional trailing message.
pub fn compose(message: String, extra: Option<&str>) -> String {
    match extra.map(str::trim) {
        Some(extra) if !extra.is_empty() => format!("{message} {extra}"),
        _ => message,
    }
}

struct Placeholder<'a> {
    namespace: Option<&'a str>,
    key: &'a str,
    len: usize,
}

fn parse_placeholder(s: &str) -> Option<Placeholder<'_>> {
    let body = s.strip_prefix('{')?;

    if let Some(scoped) = body.strip_prefix('{') {
        let (namespace, after) = take_ident(scoped)?;
        let after = after.strip_prefix('}')?;
        let (key, after) = take_ident(after)?;
        after.strip_prefix('}')?;
        return Some(Placeholder {
            namespace: Some(namespace),
            key,
            len: namespace.len() + key.len() + 4,
        });
    }

    let (key, after) = take_ident(body)?;
    after.strip_prefix('}')?;
    Some(Placeholder {
        namespace: None,
        key,
        len: key.len() + 2,
    })
}

fn take_ident(s: &str) -> Option<(&str, &str)> {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    (end > 0).then(|| s.split_at(end))
}
