//! Core functionality for actual scanning behaviour.
//!
//! A fixed pool of workers drains the host queue. Bounded hosts are probed
//! once. The unbounded seed host turns the worker that received it into the
//! leader of a walk: it claims the shared [`Frontier`], spawns the remaining
//! walkers and walks itself until the frontier runs dry or the scan is
//! cancelled.
mod frontier;

pub use frontier::Frontier;

use std::num::NonZeroUsize;
use std::ops::AddAssign;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::address::{Direction, Host};
use crate::output::{format_record, ExtraField, OutputError, RecordSender};
use crate::probe::{Outcome, Probe, ProbeResult};

/// Counts of what a scan did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    /// Probe attempts, one per host.
    pub probed: u64,
    /// Records handed to the output.
    pub feasible: u64,
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.probed += rhs.probed;
        self.feasible += rhs.feasible;
    }
}

/// How a walker picks the edge it moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heading {
    Fixed(Direction),
    /// Used by a lone walker so neither edge starves.
    Alternating,
}

impl Heading {
    /// Walker `index` out of `walkers`: even indices ascend, odd descend.
    const fn for_walker(index: usize, walkers: usize) -> Self {
        if walkers == 1 {
            Self::Alternating
        } else if index % 2 == 0 {
            Self::Fixed(Direction::Increment)
        } else {
            Self::Fixed(Direction::Decrement)
        }
    }
}

/// Probes one host and reports it: one log line per attempt, one record per
/// feasible result.
#[derive(Clone)]
struct Reporter {
    probe: Arc<dyn Probe>,
    sink: RecordSender,
    extra: Arc<[ExtraField]>,
    port: u16,
    cancel: CancellationToken,
}

impl Reporter {
    async fn scan(&self, host: Host, tally: &mut Tally) -> ProbeResult {
        let result = self.probe.probe(host).await;
        tally.probed += 1;
        log_result(&result);
        if result.feasible() {
            if let Some(record) = format_record(&result, &self.extra, self.port) {
                match self.sink.send(record).await {
                    Ok(()) => tally.feasible += 1,
                    Err(e) => self.abort(&result.host, &e),
                }
            }
        }
        result
    }

    /// Results have nowhere to go, so the scan stops.
    fn abort(&self, host: &Host, e: &OutputError) {
        if !self.cancel.is_cancelled() {
            error!("Cannot record {host}: {e}. Stopping scan");
            self.cancel.cancel();
        }
    }
}

fn log_result(result: &ProbeResult) {
    let host = &result.host;
    match &result.outcome {
        Outcome::Unresolvable(e) => debug!("Cannot resolve {}: {e}", host.origin()),
        Outcome::Unreachable(e) => debug!("Cannot dial {host}: {e}"),
        Outcome::HandshakeFailed(e) => debug!("TLS handshake failed with {host}: {e}"),
        Outcome::Negotiated(h) => {
            let version = h.version.map_or("unknown", |v| v.as_str());
            if h.feasible {
                info!(
                    "Feasible {host} tls={version} alpn={} cert={} issuer={:?} geo={}",
                    h.alpn, h.cert_domain, h.cert_issuer, h.geo
                );
            } else {
                debug!(
                    "Connected to {host} tls={version} alpn={} cert={} issuer={:?} geo={}",
                    h.alpn, h.cert_domain, h.cert_issuer, h.geo
                );
            }
        }
    }
}

/// The scan engine.
///
/// `workers` is both the size of the bounded pool and the number of walkers
/// an unbounded scan runs.
pub struct Scanner {
    workers: NonZeroUsize,
    walk_limit: Option<u64>,
    cancel: CancellationToken,
    reporter: Reporter,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("workers", &self.workers)
            .field("walk_limit", &self.walk_limit)
            .finish_non_exhaustive()
    }
}

impl Scanner {
    pub fn new(
        probe: Arc<dyn Probe>,
        sink: RecordSender,
        workers: NonZeroUsize,
        port: u16,
        extra: &[ExtraField],
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            workers,
            walk_limit: None,
            cancel: cancel.clone(),
            reporter: Reporter {
                probe,
                sink,
                extra: Arc::from(extra),
                port,
                cancel,
            },
        }
    }

    /// Caps how many steps each direction of an unbounded walk takes.
    #[must_use]
    pub const fn with_walk_limit(mut self, limit: Option<u64>) -> Self {
        self.walk_limit = limit;
        self
    }

    /// Cancelling this token stops walkers between steps, aborts in-flight
    /// probes and makes idle workers exit. The scan cancels it itself when
    /// the output stops accepting records.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.reporter.cancel = cancel.clone();
        self.cancel = cancel;
        self
    }

    /// Runs the pool until the host queue is closed and drained, every walk
    /// has ended, or the scan is cancelled. Returns what was done.
    pub async fn run(&self, hosts: mpsc::Receiver<Host>) -> Tally {
        let hosts = Arc::new(Mutex::new(hosts));
        let frontier = Arc::new(Frontier::new(self.walk_limit));
        let workers = self.workers.get();

        debug!("Start scanning with {workers} workers, walk limit {:?}", self.walk_limit);

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let worker = Worker {
                id,
                workers,
                hosts: Arc::clone(&hosts),
                frontier: Arc::clone(&frontier),
                cancel: self.cancel.clone(),
                reporter: self.reporter.clone(),
            };
            pool.spawn(worker.run());
        }

        let mut tally = Tally::default();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(worker_tally) => tally += worker_tally,
                Err(e) => error!("Scan worker failed: {e}"),
            }
        }
        debug!("Scan finished: {tally:?}");
        tally
    }
}

struct Worker {
    id: usize,
    workers: usize,
    hosts: Arc<Mutex<mpsc::Receiver<Host>>>,
    frontier: Arc<Frontier>,
    cancel: CancellationToken,
    reporter: Reporter,
}

impl Worker {
    async fn run(self) -> Tally {
        let mut tally = Tally::default();
        while let Some(host) = self.next_host().await {
            let unbounded = host.is_unbounded();
            let result = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.reporter.scan(host, &mut tally) => result,
            };
            if unbounded {
                tally += self.lead_walk(&result.host).await;
            }
        }
        debug!("Worker {} done", self.id);
        tally
    }

    async fn next_host(&self) -> Option<Host> {
        let mut hosts = self.hosts.lock().await;
        tokio::select! {
            () = self.cancel.cancelled() => None,
            host = hosts.recv() => host,
        }
    }

    /// Claims the frontier at the seed, spawns `workers - 1` walkers and
    /// joins the walk as walker 0.
    async fn lead_walk(&self, seed: &Host) -> Tally {
        let Some(seed_address) = seed.address() else {
            error!("Cannot start walking from {}: no address", seed.origin());
            return Tally::default();
        };
        if !self.frontier.claim(seed_address) {
            debug!("Frontier already claimed, not walking from {seed_address}");
            return Tally::default();
        }
        info!("Walking outward from {seed_address} with {} walkers", self.workers);

        let mut walkers = JoinSet::new();
        for index in 1..self.workers {
            walkers.spawn(walk(
                Heading::for_walker(index, self.workers),
                Arc::clone(&self.frontier),
                self.reporter.clone(),
                self.cancel.clone(),
            ));
        }

        let mut tally = walk(
            Heading::for_walker(0, self.workers),
            Arc::clone(&self.frontier),
            self.reporter.clone(),
            self.cancel.clone(),
        )
        .await;
        while let Some(joined) = walkers.join_next().await {
            match joined {
                Ok(walker_tally) => tally += walker_tally,
                Err(e) => error!("Walker failed: {e}"),
            }
        }
        tally
    }
}

/// Steps the frontier and probes each new address until the frontier has
/// nothing left for this heading or the scan is cancelled. The frontier lock
/// is only held inside [`Frontier::advance`], never across a probe.
async fn walk(
    heading: Heading,
    frontier: Arc<Frontier>,
    reporter: Reporter,
    cancel: CancellationToken,
) -> Tally {
    let mut tally = Tally::default();
    let mut direction = match heading {
        Heading::Fixed(direction) => direction,
        Heading::Alternating => Direction::Decrement,
    };
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = match heading {
            Heading::Fixed(_) => frontier.advance(direction),
            Heading::Alternating => {
                direction = direction.reverse();
                frontier
                    .advance(direction)
                    .or_else(|| frontier.advance(direction.reverse()))
            }
        };
        let Some(address) = next else {
            debug!("Frontier exhausted for {heading:?}");
            break;
        };
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = reporter.scan(Host::stepped(address), &mut tally) => {}
        }
    }
    tally
}
