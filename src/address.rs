//! Turns target strings into a lazy stream of [`Host`]s.
//!
//! A target is a literal IP, a CIDR block, a domain name, or a file /
//! crawled page holding one such entry per line. Hosts are produced by a
//! background task into a bounded channel, so a slow scan applies
//! backpressure and a `/8` is never materialised in memory.
mod resolve;
mod step;

pub use resolve::Resolver;
pub use step::{checked_step, step, Direction};

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;

use cidr_utils::cidr::{IpCidr, IpInet};
use futures::{stream, Stream, StreamExt};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// How many hosts the enumerator may run ahead of the workers.
pub const QUEUE_CAPACITY: usize = 256;

static DOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\-.]+$").expect("domain pattern is valid"));

/// Where a [`Host`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Ip,
    Cidr,
    Domain,
}

/// A single scan target.
///
/// `origin` is the text the host was derived from (the literal address, the
/// whole CIDR line, or the domain) and stays untouched for the host's
/// lifetime. Domains carry no address until a worker resolves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    address: Option<IpAddr>,
    origin: String,
    kind: HostKind,
    unbounded: bool,
}

impl Host {
    /// A literal address.
    pub fn ip(address: IpAddr, origin: impl Into<String>) -> Self {
        Self {
            address: Some(address),
            origin: origin.into(),
            kind: HostKind::Ip,
            unbounded: false,
        }
    }

    /// One address out of an expanded CIDR block. Never unbounded.
    pub fn cidr(address: IpAddr, origin: impl Into<String>) -> Self {
        Self {
            address: Some(address),
            origin: origin.into(),
            kind: HostKind::Cidr,
            unbounded: false,
        }
    }

    /// A domain, resolved at probe time.
    pub fn domain(name: impl Into<String>) -> Self {
        Self {
            address: None,
            origin: name.into(),
            kind: HostKind::Domain,
            unbounded: false,
        }
    }

    /// Marks a literal or domain host as the seed of an unbounded walk.
    /// CIDR hosts stay bounded.
    #[must_use]
    pub fn into_unbounded(mut self) -> Self {
        self.unbounded = self.kind != HostKind::Cidr;
        self
    }

    /// Same origin and kind, with `address` filled in.
    #[must_use]
    pub fn with_address(&self, address: IpAddr) -> Self {
        Self {
            address: Some(address),
            ..self.clone()
        }
    }

    /// The host a frontier step produces: a bounded literal whose origin is
    /// the stepped address itself.
    #[must_use]
    pub fn stepped(address: IpAddr) -> Self {
        Self::ip(address, address.to_string())
    }

    pub const fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub const fn kind(&self) -> HostKind {
        self.kind
    }

    pub const fn is_unbounded(&self) -> bool {
        self.unbounded
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) if addr.to_string() != self.origin => write!(f, "{addr} ({})", self.origin),
            Some(addr) => write!(f, "{addr}"),
            None => f.write_str(&self.origin),
        }
    }
}

/// What a single target line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Ip(IpAddr),
    Cidr(IpCidr),
    Domain(String),
}

/// Classifies one trimmed, non-empty line.
///
/// Literal addresses win over CIDRs, CIDRs over domains. IPv6 literals and
/// blocks are rejected unless `ipv6` is set. The prefix of a CIDR is masked,
/// so `10.0.0.9/30` means `10.0.0.8/30`.
///
/// ```rust
/// # use tlsreach::address::{parse_target, Target};
/// assert!(matches!(parse_target("10.0.0.0/30", false), Some(Target::Cidr(_))));
/// assert!(matches!(parse_target("example.com", false), Some(Target::Domain(_))));
/// assert_eq!(parse_target("::1", false), None);
/// ```
pub fn parse_target(line: &str, ipv6: bool) -> Option<Target> {
    classify(line).filter(|target| ipv6 || !target.is_ipv6())
}

/// [`parse_target`] without the IPv6 policy.
fn classify(line: &str) -> Option<Target> {
    if let Ok(ip) = IpAddr::from_str(line) {
        return Some(Target::Ip(ip));
    }
    if line.contains('/') {
        if let Ok(inet) = IpInet::from_str(line) {
            return Some(Target::Cidr(inet.network()));
        }
    }
    DOMAIN
        .is_match(line)
        .then(|| Target::Domain(line.to_owned()))
}

impl Target {
    pub fn is_ipv6(&self) -> bool {
        match self {
            Self::Ip(ip) => ip.is_ipv6(),
            Self::Cidr(cidr) => cidr.is_ipv6(),
            Self::Domain(_) => false,
        }
    }
}

/// Every host a line expands to, in ascending order for CIDRs.
fn expand(line: String, ipv6: bool) -> Box<dyn Iterator<Item = Host> + Send> {
    match classify(&line) {
        Some(target) if target.is_ipv6() && !ipv6 => {
            debug!("Skipping {line:?}, IPv6 is disabled");
            Box::new(std::iter::empty())
        }
        Some(Target::Ip(ip)) => Box::new(std::iter::once(Host::ip(ip, line))),
        Some(Target::Cidr(cidr)) => {
            Box::new(cidr.iter().map(move |c| Host::cidr(c.address(), line.clone())))
        }
        Some(Target::Domain(name)) => Box::new(std::iter::once(Host::domain(name))),
        None => {
            warn!("Not a valid IP, IP CIDR or domain: {line:?}");
            Box::new(std::iter::empty())
        }
    }
}

/// Spawns the enumerator over a stream of target lines.
///
/// Blank lines are skipped and unparseable lines are dropped with a warning.
/// Nothing produced here is ever unbounded. The channel closes once `lines`
/// is exhausted, which is what ends a bounded scan.
pub fn enumerate<S>(lines: S, ipv6: bool) -> mpsc::Receiver<Host>
where
    S: Stream<Item = String> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(async move {
        let mut lines = Box::pin(lines);
        while let Some(line) = lines.next().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            for host in expand(line.to_owned(), ipv6) {
                if tx.send(host).await.is_err() {
                    // every worker is gone
                    return;
                }
            }
        }
    });
    rx
}

/// Enumerates the single `--addr` value.
///
/// A CIDR expands like any other line. A lone literal address or domain is
/// emitted once, marked unbounded when `walk` is set so the engine grows the
/// scan outward from it.
pub fn enumerate_address(address: &str, ipv6: bool, walk: bool) -> mpsc::Receiver<Host> {
    let address = address.trim().to_owned();
    match parse_target(&address, ipv6) {
        Some(Target::Cidr(_)) | None => enumerate(stream::once(async move { address }), ipv6),
        Some(target) => {
            let host = match target {
                Target::Ip(ip) => Host::ip(ip, address),
                _ => Host::domain(address),
            };
            let host = if walk {
                info!("Enable infinite mode from {host}");
                host.into_unbounded()
            } else {
                host
            };
            let (tx, rx) = mpsc::channel(1);
            tokio::spawn(async move {
                let _ = tx.send(host).await;
            });
            rx
        }
    }
}

/// Streams the lines of a target file without reading it up front.
pub async fn read_lines(path: &Path) -> io::Result<impl Stream<Item = String> + Send + 'static> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    Ok(stream::poll_fn(move |cx| {
        Pin::new(&mut lines)
            .poll_next_line(cx)
            .map(Result::ok)
            .map(Option::flatten)
    }))
}
