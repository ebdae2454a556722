use std::sync::Arc;
use std::time::Duration;

use chat_counters::journal::{MemoryJournal, ReplayRecord};
use chat_counters::{Config, CountersModule, Delivery};
use parking_lot::Mutex;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<String>>,
}

impl Delivery for Outbox {
    fn destinations(&self) -> Vec<String> {
        vec!["#run".to_string()]
    }

    fn deliver(&self, destination: &str, message: &str) {
        self.sent.lock().push(format!("{destination} {message}"));
    }
}

fn module() -> (CountersModule, Arc<Outbox>, MemoryJournal) {
    let outbox = Arc::new(Outbox::default());
    let journal = MemoryJournal::default();
    let module = CountersModule::new(Config::default(), outbox.clone())
        .with_journal(Box::new(journal.clone()));
    (module, outbox, journal)
}

async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn increments_are_announced_after_the_delay() {
    let (mut m, outbox, _) = module();
    m.execute("owner", r#"create -d 5 -m "{NAME}: {PREVIOUS_VALUE} -> {CURRENT_VALUE}" deaths"#);
    assert_eq!(m.execute("owner", "incr deaths 2"), "deaths : 0 -> 2");

    settle(4).await;
    assert!(outbox.sent.lock().is_empty());
    settle(2).await;
    assert_eq!(*outbox.sent.lock(), vec!["#run deaths: 0 -> 2"]);

    let c = m.registry().counter("deaths").unwrap();
    assert_eq!(c.lock().previous_notified(), 2);
    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deleting_a_counter_cancels_its_pending_notification() {
    let (mut m, outbox, _) = module();
    m.execute("owner", "create -d 30 deaths");
    m.execute("owner", "incr deaths");
    assert_eq!(m.execute("owner", "delete deaths"), "Counter deleted : deaths");

    settle(60).await;
    assert!(outbox.sent.lock().is_empty());
    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn renamed_counter_keeps_its_pending_notification_cancellable() {
    let (mut m, outbox, _) = module();
    m.execute("owner", "create -d 30 deaths");
    m.execute("owner", "incr deaths");
    m.execute("owner", "set deaths name falls");
    assert_eq!(m.execute("owner", "delete falls"), "Counter deleted : falls");

    settle(60).await;
    assert!(outbox.sent.lock().is_empty());
    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn dangling_listener_survives_replay() {
    let (mut m, _, journal) = module();
    m.execute("owner", "create games");
    m.execute("owner", "create kills");
    m.execute("owner", "createlistener kills bob !k");
    m.execute("owner", "imbricate games kills session {DIFF}");
    m.execute("owner", "delete kills");

    let snapshot = m.registry().snapshot();
    let (mut copy, _, _) = module();
    assert_eq!(copy.replay(snapshot), 3);
    assert_eq!(copy.execute("owner", "listlisteners"), "Your listeners : bob/!k -> kills");
    assert_eq!(
        copy.execute("owner", "listimbrications"),
        "Your imbrications : session (games / kills)"
    );
    assert_eq!(copy.handle_chat("bob", "!k"), Some("counter not found: kills".to_string()));

    let records: Vec<ReplayRecord> = journal.lines().iter().map(|l| l.parse().unwrap()).collect();
    let (mut from_journal, _, _) = module();
    assert_eq!(from_journal.replay(records), 5);
    assert_eq!(from_journal.registry().snapshot(), m.registry().snapshot());

    m.shutdown().await;
    copy.shutdown().await;
    from_journal.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_notifications() {
    let (mut m, outbox, _) = module();
    m.execute("owner", "create -d 30 deaths");
    m.execute("owner", "incr deaths");
    let counter = m.registry().counter("deaths").unwrap();

    m.shutdown().await;
    settle(60).await;
    assert!(outbox.sent.lock().is_empty());
    assert_eq!(counter.lock().previous_notified(), 0);
}

#[tokio::test(start_paused = true)]
async fn listeners_route_chat_to_their_counter() {
    let (mut m, outbox, _) = module();
    m.execute("owner", "create deaths");
    assert_eq!(
        m.execute("owner", "createlistener deaths bob !d"),
        "Listener added : bob/!d -> deaths"
    );

    assert_eq!(m.handle_chat("bob", "!d"), Some("deaths : 0 -> 1".to_string()));
    assert_eq!(m.handle_chat("bob", "!d decr 3"), Some("deaths : 1 -> -2".to_string()));
    assert_eq!(m.handle_chat("alice", "!d"), None);
    assert_eq!(m.handle_chat("bob", "hello there"), None);
    assert_eq!(m.handle_chat("bob", "!d reset --help"), None);
    assert_eq!(m.handle_chat("bob", "!d -h"), None);

    settle(1).await;
    assert_eq!(outbox.sent.lock().len(), 2);

    // The listener outlives its counter and fails when used.
    m.execute("owner", "delete deaths");
    assert_eq!(
        m.handle_chat("bob", "!d"),
        Some("counter not found: deaths".to_string())
    );
    m.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn imbrication_session_is_announced() {
    let (mut m, outbox, _) = module();
    m.execute("owner", "create -c 600 games");
    m.execute("owner", "create -e 1000 kills");
    m.execute(
        "owner",
        "imbricate games kills session Game {{MAIN}CURRENT_VALUE}: {DIFF} {{SUB}NAME} ({START} -> {END})",
    );

    assert_eq!(m.execute("owner", "start session"), "Session started : session (start = 0)");
    m.execute("owner", "incr kills 3");
    m.execute("owner", "incr kills 3");
    assert_eq!(
        m.execute("owner", "stop session"),
        "Session stopped : Game 1: 6 kills (0 -> 6)"
    );

    settle(1).await;
    assert_eq!(*outbox.sent.lock(), vec!["#run Game 1: 6 kills (0 -> 6)"]);
    m.shutdown().await;
}

#[test]
fn imbrication_needs_both_counters() {
    let (mut m, _, journal) = module();
    m.execute("owner", "create games");
    assert_eq!(
        m.execute("owner", "imbricate games kills session {DIFF}"),
        "counter not found: kills"
    );
    assert_eq!(journal.lines().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn journal_replays_into_an_identical_module() {
    let (mut m, _, journal) = module();
    m.execute("owner", "create -i 10 -s 2 -m \"{NAME} = {CURRENT_VALUE}\" deaths");
    m.execute("owner", "create kills");
    m.execute("owner", "incr deaths");
    m.execute("owner", "set deaths cooldown 15");
    m.execute("owner", "createlistener deaths bob !d");
    m.execute("owner", "imbricate deaths kills session {DIFF}");
    m.execute("owner", "set kills name frags");
    m.execute("owner", "incr nope");
    m.execute("owner", "deletelistener bob !d");

    let lines = journal.lines();
    assert_eq!(lines.len(), 8);
    assert_eq!(
        lines[0],
        r#"counter deaths initial=10 step=2 cooldown=0 delay=0 each=0 current=10 minimum=10 maximum=10 message="{NAME} = {CURRENT_VALUE}""#
    );
    assert_eq!(lines[6], "counter.renamed kills to=frags");
    assert_eq!(lines[7], "listener.deleted bob !d");

    let records: Vec<ReplayRecord> = lines.iter().map(|l| l.parse().unwrap()).collect();
    let (mut copy, _, _) = module();
    assert_eq!(copy.replay(records), 8);

    assert_eq!(copy.execute("owner", "print deaths"), "deaths = 12");
    assert_eq!(copy.execute("owner", "list"), "Your counters : deaths, frags");
    assert_eq!(copy.execute("owner", "listlisteners"), "Your listeners : ");
    let deaths = copy.registry().counter("deaths").unwrap();
    assert_eq!(deaths.lock().policy().cooldown, 15);

    m.shutdown().await;
    copy.shutdown().await;
}
