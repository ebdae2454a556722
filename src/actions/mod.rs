pub mod counter;
pub mod imbrication;
pub mod listener;

/// Entity kinds, also used as the leading token of journal records.
pub mod ids {
    pub const COUNTER: &str = "counter";
    pub const LISTENER: &str = "listener";
    pub const IMBRICATION: &str = "imbrication";

    pub const COUNTER_DELETED: &str = const_format::concatcp!(COUNTER, ".deleted");
    pub const COUNTER_RENAMED: &str = const_format::concatcp!(COUNTER, ".renamed");
    pub const LISTENER_DELETED: &str = const_format::concatcp!(LISTENER, ".deleted");
    pub const IMBRICATION_DELETED: &str = const_format::concatcp!(IMBRICATION, ".deleted");
}
