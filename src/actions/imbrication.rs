use crate::actions::counter::Counter;
use crate::render::{FormatContext, keys, named_format};

/// A main counter paired with a sub counter, reporting how far the sub
/// counter moved during one session.
///
/// Counters are referenced by name and resolved through the registry when
/// used, so deleting one leaves the imbrication in place with a dangling name.
///
/// Sessions are not guarded: stopping without starting, or starting twice,
/// simply overwrites the stored snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Imbrication {
    name: String,
    main: String,
    sub: String,
    message: String,
    session_start: i64,
    session_end: i64,
}

impl Imbrication {
    pub fn new(
        name: impl Into<String>,
        main: impl Into<String>,
        sub: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            main: main.into(),
            sub: sub.into(),
            message: message.into(),
            session_start: 0,
            session_end: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn main(&self) -> &str {
        &self.main
    }

    pub fn sub(&self) -> &str {
        &self.sub
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn session(&self) -> (i64, i64) {
        (self.session_start, self.session_end)
    }

    pub fn restore_session(&mut self, start: i64, end: i64) {
        self.session_start = start;
        self.session_end = end;
    }

    pub fn start_session(&mut self, sub: &Counter) {
        self.session_start = sub.current();
    }

    pub fn stop_session(&mut self, sub: &Counter) {
        self.session_end = sub.current();
    }

    pub fn diff(&self) -> i64 {
        self.session_end.saturating_sub(self.session_start)
    }

    pub fn format_context(&self, main: &Counter, sub: &Counter) -> FormatContext {
        let mut ctx = FormatContext::new();
        ctx.insert(keys::DIFF, self.diff())
            .insert(keys::START, self.session_start)
            .insert(keys::END, self.session_end)
            .insert_namespace(keys::MAIN, main.format_context())
            .insert_namespace(keys::SUB, sub.format_context());
        ctx
    }

    /// Render the message. Neither counter is touched.
    pub fn render(&self, main: &Counter, sub: &Counter) -> String {
        named_format(&self.message, &self.format_context(main, sub))
    }
}
