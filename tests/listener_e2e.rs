use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};

use serial_listener::predicates::{any, ends_with, exactly, starts_with};
use serial_listener::{
    CallbackError, ChannelFeeder, ChannelSource, ConfigError, DeviceError, Handlers, Infallible,
    Listener, ListenerError, ListenerState, RegexTokenizer, Token,
};

type Log = Arc<Mutex<Vec<String>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn source() -> (ChannelSource, ChannelFeeder) {
    ChannelSource::pair(Duration::from_millis(5))
}

fn recorder(log: &Log, tag: &'static str) -> Infallible<impl Fn(&Token) + Send + Sync> {
    let log = Arc::clone(log);
    Infallible(move |t: &Token| log.lock().unwrap().push(format!("{tag}:{t}")))
}

fn eventually(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn exception_log() -> (Log, Handlers) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let handlers = Handlers::default()
        .on_exception(move |e: &ListenerError| sink.lock().unwrap().push(e.to_string()));
    (log, handlers)
}

#[test]
fn ping_callback_runs_once_per_matching_token() {
    init_tracing();
    let listener = Listener::new();
    let log: Log = Arc::default();
    listener.create_filter(exactly("PING"), recorder(&log, "ping")).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("PING\rPONG\rPI").unwrap();
    feeder.send("NG\r").unwrap();

    eventually("two pings", || log.lock().unwrap().len() == 2);
    thread::sleep(Duration::from_millis(30));
    listener.stop_listening().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["ping:PING", "ping:PING"]);
    assert_eq!(listener.stats().tokens, 3);
}

#[test]
fn filters_fire_in_registration_order_per_token() {
    let listener = Listener::new();
    let log: Log = Arc::default();
    listener.create_filter(starts_with("X"), recorder(&log, "first")).unwrap();
    listener.create_filter(any(), recorder(&log, "second")).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("X1\rX2\rY\r").unwrap();

    eventually("all deliveries", || log.lock().unwrap().len() == 5);
    listener.stop_listening().unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["first:X1", "second:X1", "first:X2", "second:X2", "second:Y"]
    );
}

#[test]
fn removed_filter_stops_receiving() {
    let listener = Listener::new();
    let log: Log = Arc::default();
    let handle = listener.create_filter(exactly("A"), recorder(&log, "a")).unwrap();
    listener.create_filter(exactly("END"), recorder(&log, "end")).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("A\r").unwrap();
    eventually("first A", || log.lock().unwrap().len() == 1);

    assert!(listener.remove_filter(&handle).unwrap());
    assert!(!handle.is_registered());
    assert!(!listener.remove_filter(&handle).unwrap());

    feeder.send("A\rEND\r").unwrap();
    eventually("sentinel", || log.lock().unwrap().iter().any(|l| l == "end:END"));
    listener.stop_listening().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["a:A", "end:END"]);
}

#[test]
fn buffered_filter_keeps_latest_matches() {
    let listener = Listener::new();
    let buffered = listener.create_buffered_filter(starts_with("V"), 2).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("V1\rnoise\rV2\rV3\r").unwrap();

    eventually("eviction", || buffered.evicted() == 1);
    assert!(buffered.wait_for_count(2, Duration::from_secs(1)));
    assert!(!buffered.wait_for_count(3, Duration::from_secs(1)));

    let drained: Vec<String> = buffered.drain().iter().map(ToString::to_string).collect();
    assert_eq!(drained, vec!["V2", "V3"]);
    assert!(buffered.is_empty());
    listener.stop_listening().unwrap();
}

#[test]
fn blocking_filter_times_out_then_receives() {
    let listener = Listener::new();
    let ready = listener.create_blocking_filter(ends_with("READY")).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();

    let started = Instant::now();
    assert!(ready.wait(Duration::from_millis(40)).is_none());
    assert!(started.elapsed() >= Duration::from_millis(40));

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        feeder.send("BOOTING\rSYSTEM READY\r").unwrap();
        feeder
    });

    let token = ready.wait(Duration::from_secs(5)).expect("token before timeout");
    assert_eq!(token, "SYSTEM READY");
    let _feeder = sender.join().unwrap();
    listener.stop_listening().unwrap();
}

#[test]
fn stop_joins_threads_and_clears_filters() {
    let listener = Listener::new();
    let log: Log = Arc::default();
    listener.create_filter(any(), recorder(&log, "any")).unwrap();
    let _blocking = listener.create_blocking_filter(exactly("OK")).unwrap();

    let (src, _feeder) = source();
    listener.start_listening(src).unwrap();
    assert_eq!(listener.state(), ListenerState::Listening);

    listener.stop_listening().unwrap();
    assert_eq!(listener.state(), ListenerState::Idle);
    assert_eq!(listener.filter_count().unwrap(), 0);
    assert_eq!(listener.pending_dispatches(), 0);
}

#[test]
fn partial_token_is_discarded_across_restart() {
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let listener = Listener::builder()
        .handlers(
            Handlers::default()
                .on_default_token(move |t: &Token| sink.lock().unwrap().push(t.to_string())),
        )
        .build()
        .unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("HALF").unwrap();
    eventually("partial read", || listener.stats().bytes_read == 4);
    listener.stop_listening().unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("DONE\r").unwrap();
    eventually("token after restart", || !log.lock().unwrap().is_empty());
    listener.stop_listening().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["DONE"]);
}

#[test]
fn disconnect_is_reported_and_listener_can_restart() {
    let (errors, handlers) = exception_log();
    let listener = Listener::builder().handlers(handlers).build().unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    drop(feeder);

    eventually("stopping after disconnect", || listener.state() == ListenerState::Stopping);
    assert!(!listener.is_listening());
    assert!(matches!(listener.take_device_error(), Some(DeviceError::Disconnected { .. })));
    assert!(listener.take_device_error().is_none());
    assert_eq!(errors.lock().unwrap().len(), 1);

    let (closed, _feeder) = source();
    closed.close();
    let err = listener.start_listening(closed).unwrap_err();
    assert!(matches!(err, ListenerError::Config(ConfigError::SourceNotOpen)));
    assert_eq!(listener.state(), ListenerState::Stopping);

    let log: Log = Arc::default();
    listener.create_filter(exactly("BACK"), recorder(&log, "back")).unwrap();
    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("BACK\r").unwrap();
    eventually("delivery after restart", || log.lock().unwrap().len() == 1);
    listener.stop_listening().unwrap();
}

#[test]
fn callback_failures_do_not_stop_listening() {
    let (errors, handlers) = exception_log();
    let listener = Listener::builder().handlers(handlers).build().unwrap();
    let log: Log = Arc::default();

    listener
        .create_filter(exactly("BAD"), |_: &Token| -> Result<(), CallbackError> {
            Err("rejected".into())
        })
        .unwrap();
    listener
        .create_filter(exactly("BOOM"), Infallible(|_: &Token| panic!("callback bug")))
        .unwrap();
    listener.create_filter(exactly("GOOD"), recorder(&log, "good")).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("BAD\rBOOM\rGOOD\r").unwrap();

    eventually("good token", || log.lock().unwrap().len() == 1);
    assert!(listener.is_listening());
    listener.stop_listening().unwrap();

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("rejected"));
    assert!(errors[1].contains("callback bug"));
    assert_eq!(listener.stats().callback_failures, 2);
}

#[test]
fn panicking_predicate_is_skipped() {
    let warnings: Log = Arc::default();
    let sink = Arc::clone(&warnings);
    let listener = Listener::builder()
        .handlers(
            Handlers::default()
                .on_warning(move |m: &str| sink.lock().unwrap().push(m.to_string())),
        )
        .build()
        .unwrap();
    let log: Log = Arc::default();

    let faulty = |t: &Token| -> bool {
        assert!(t.as_str() != "T", "predicate bug");
        false
    };
    listener.create_filter(faulty, recorder(&log, "never")).unwrap();
    listener.create_filter(any(), recorder(&log, "any")).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("T\r").unwrap();
    eventually("fallthrough delivery", || log.lock().unwrap().len() == 1);
    listener.stop_listening().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["any:T"]);
    assert!(warnings.lock().unwrap().iter().any(|w| w.contains("predicate bug")));
    assert_eq!(listener.stats().predicate_failures, 1);
}

#[test]
fn stop_from_inside_callback() {
    let listener = Arc::new(Listener::new());
    let weak: Weak<Listener> = Arc::downgrade(&listener);
    listener
        .create_filter(
            exactly("QUIT"),
            Infallible(move |_: &Token| {
                if let Some(listener) = weak.upgrade() {
                    listener.stop_listening().unwrap();
                }
            }),
        )
        .unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("QUIT\r").unwrap();

    eventually("idle after self-stop", || listener.state() == ListenerState::Idle);
    assert_eq!(listener.filter_count().unwrap(), 0);
    listener.stop_listening().unwrap();
}

#[test]
fn tokenizer_swap_applies_to_later_reads() {
    let log: Log = Arc::default();
    let listener = Listener::new();
    listener.create_filter(any(), recorder(&log, "t")).unwrap();
    listener.set_tokenizer(RegexTokenizer::new(r"\r\n").unwrap()).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("L1\r\nL2\r\n").unwrap();
    eventually("two lines", || log.lock().unwrap().len() == 2);
    listener.stop_listening().unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["t:L1", "t:L2"]);
}

#[test]
fn dropping_listener_stops_threads() {
    let (src, feeder) = source();
    {
        let listener = Listener::new();
        listener.start_listening(src).unwrap();
    }
    assert!(feeder.send("late\r").is_err());
}

/// A callback that signals `started`, then blocks until `release` fires.
fn gate(
    started: crossbeam_channel::Sender<()>,
    release: Receiver<()>,
) -> Infallible<impl Fn(&Token) + Send + Sync> {
    Infallible(move |_: &Token| {
        let _ = started.send(());
        let _ = release.recv_timeout(Duration::from_secs(5));
    })
}

#[test]
fn queued_match_survives_filter_removal() {
    let listener = Listener::new();
    let log: Log = Arc::default();
    let (started_tx, started) = bounded(1);
    let (release, release_rx) = bounded(1);
    listener.create_filter(exactly("HOLD"), gate(started_tx, release_rx)).unwrap();
    let late = listener.create_filter(exactly("F"), recorder(&log, "f")).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("HOLD\rF\r").unwrap();

    started.recv_timeout(Duration::from_secs(5)).unwrap();
    eventually("F queued behind HOLD", || listener.pending_dispatches() == 1);
    assert!(listener.remove_filter(&late).unwrap());
    release.send(()).unwrap();

    eventually("queued delivery", || log.lock().unwrap().len() == 1);
    listener.stop_listening().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["f:F"]);
}

#[test]
fn remove_all_filters_retracts_queued_matches() {
    let listener = Listener::new();
    let log: Log = Arc::default();
    let (started_tx, started) = bounded(1);
    let (release, release_rx) = bounded(1);
    listener.create_filter(exactly("HOLD"), gate(started_tx, release_rx)).unwrap();
    listener.create_filter(exactly("F"), recorder(&log, "f")).unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("HOLD\rF\r").unwrap();

    started.recv_timeout(Duration::from_secs(5)).unwrap();
    eventually("F queued behind HOLD", || listener.pending_dispatches() == 1);
    assert_eq!(listener.remove_all_filters().unwrap(), 2);
    release.send(()).unwrap();

    listener.create_filter(exactly("END"), recorder(&log, "end")).unwrap();
    feeder.send("END\r").unwrap();
    eventually("sentinel", || !log.lock().unwrap().is_empty());
    listener.stop_listening().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["end:END"]);
}

#[test]
fn overlapping_stops_both_wait_for_shutdown() {
    let listener = Arc::new(Listener::new());
    let (started_tx, started) = bounded(1);
    listener
        .create_filter(
            exactly("SLOW"),
            Infallible(move |_: &Token| {
                let _ = started_tx.send(());
                thread::sleep(Duration::from_millis(300));
            }),
        )
        .unwrap();

    let (src, feeder) = source();
    listener.start_listening(src).unwrap();
    feeder.send("SLOW\r").unwrap();
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    let first = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.stop_listening())
    };
    eventually("first stop under way", || listener.state() == ListenerState::Stopping);

    listener.stop_listening().unwrap();
    assert_eq!(listener.state(), ListenerState::Idle);
    assert_eq!(listener.filter_count().unwrap(), 0);

    first.join().unwrap().unwrap();
}
