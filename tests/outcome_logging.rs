//! Each probe attempt is reported by exactly one log line.
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use tlsreach::address::{enumerate, Resolver};
use tlsreach::geo::NoGeo;
use tlsreach::output::Output;
use tlsreach::probe::{Policy, TlsProbe};
use tlsreach::scanner::{Scanner, Tally};

const OUTCOME_PREFIXES: [&str; 5] = [
    "Cannot resolve",
    "Cannot dial",
    "TLS handshake failed",
    "Connected to",
    "Feasible",
];

struct Recorder {
    lines: Mutex<Vec<(Level, String, String)>>,
}

impl Log for Recorder {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.lines.lock().push((
            record.level(),
            record.target().to_owned(),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {}
}

static RECORDER: Recorder = Recorder {
    lines: parking_lot::const_mutex(Vec::new()),
};

#[tokio::test]
async fn one_log_line_per_attempt() {
    log::set_logger(&RECORDER).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let probe = TlsProbe::new(
        port,
        Duration::from_millis(300),
        Policy::default(),
        Resolver::new(None, false).await,
        Arc::new(NoGeo),
    )
    .unwrap();
    let output = Output::open(Vec::new(), None);
    let scanner = Scanner::new(
        Arc::new(probe),
        output.sender(),
        NonZeroUsize::new(1).unwrap(),
        port,
        &[],
    );

    let targets = ["127.0.0.1", "does-not-exist.invalid"].map(str::to_owned);
    let tally = scanner.run(enumerate(stream::iter(targets), false)).await;
    drop(scanner);
    output.close().await.unwrap();

    assert_eq!(tally, Tally { probed: 2, feasible: 0 });

    let lines = RECORDER.lines.lock();
    let outcomes: Vec<&str> = lines
        .iter()
        .map(|(_, _, message)| message.as_str())
        .filter(|message| OUTCOME_PREFIXES.iter().any(|p| message.starts_with(p)))
        .collect();
    assert_eq!(outcomes.len(), 2, "{outcomes:?}");
    assert!(outcomes.iter().any(|m| m.starts_with("Cannot dial 127.0.0.1: ")));
    assert!(outcomes
        .iter()
        .any(|m| m.starts_with("Cannot resolve does-not-exist.invalid: ")));

    assert!(lines.iter().all(|(_, target, _)| {
        !target.starts_with("tlsreach::probe")
            && !target.starts_with("tlsreach::address")
            && !target.starts_with("tlsreach::geo")
    }));
}
