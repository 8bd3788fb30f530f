use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use env_logger::Env;
use futures::stream;
use log::{info, warn};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tlsreach::address::{enumerate, enumerate_address, read_lines, Host, Resolver};
use tlsreach::crawl::crawl;
use tlsreach::geo::{GeoLookup, MaxMindGeo};
use tlsreach::input::{Config, Opts, ScanConfig, TargetSource};
use tlsreach::output::{header, Output};
use tlsreach::probe::{Policy, TlsProbe};
use tlsreach::scanner::{Scanner, Tally};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    let level = if opts.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    let scan = ScanConfig::try_from(&opts)?;

    if !opts.no_banner {
        print_opening(&scan);
    }

    if let Some(limit) = opts.ulimit {
        adjust_ulimit_size(limit);
    }

    let resolver = Resolver::new(scan.resolver.as_deref(), scan.ipv6).await;
    let geo: Arc<dyn GeoLookup> = Arc::new(MaxMindGeo::open(&scan.geo_db));
    let probe = TlsProbe::new(
        scan.port,
        scan.timeout,
        Policy::new(scan.target_version),
        resolver,
        geo,
    )
    .context("building the TLS client")?;

    let hosts = match &scan.source {
        TargetSource::Address(addr) => enumerate_address(addr, scan.ipv6, scan.walk),
        TargetSource::File(path) => {
            let lines = read_lines(path)
                .await
                .with_context(|| format!("cannot open target file {}", path.display()))?;
            enumerate(lines, scan.ipv6)
        }
        TargetSource::Url(url) => {
            let domains = crawl(url, scan.timeout)
                .await
                .with_context(|| format!("cannot crawl {url}"))?;
            enumerate(stream::iter(domains), scan.ipv6)
        }
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping scan");
            on_ctrl_c.cancel();
        }
    });

    info!(
        "TLS scanner running on port {} with {} workers, start scan at: {}",
        scan.port,
        scan.workers,
        chrono::Local::now().to_rfc3339()
    );

    let parts = ScannerParts {
        probe: Arc::new(probe),
        scan: &scan,
        cancel,
    };
    let tally = match &scan.output {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?;
            run(parts, hosts, Output::open(file, Some(header(&scan.fields)))).await?
        }
        None => run(parts, hosts, Output::open(tokio::io::stdout(), None)).await?,
    };

    info!(
        "Scan finished: {} probed, {} feasible",
        tally.probed, tally.feasible
    );
    Ok(())
}

/// Parts needed to build the [`Scanner`] once the output is open.
struct ScannerParts<'a> {
    probe: Arc<TlsProbe>,
    scan: &'a ScanConfig,
    cancel: CancellationToken,
}

async fn run<W>(
    parts: ScannerParts<'_>,
    hosts: mpsc::Receiver<Host>,
    output: Output<W>,
) -> anyhow::Result<Tally>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let scanner = Scanner::new(
        parts.probe,
        output.sender(),
        parts.scan.workers,
        parts.scan.port,
        &parts.scan.fields,
    )
    .with_walk_limit(parts.scan.walk_limit)
    .with_cancellation(parts.cancel);

    let tally = scanner.run(hosts).await;
    drop(scanner);
    output.close().await.context("writing results")?;
    Ok(tally)
}

fn print_opening(scan: &ScanConfig) {
    let target = match &scan.source {
        TargetSource::Address(addr) if scan.walk => format!("{addr} (walking outward)"),
        TargetSource::Address(addr) => addr.clone(),
        TargetSource::File(path) => path.display().to_string(),
        TargetSource::Url(url) => url.clone(),
    };
    eprintln!("{}", "tlsreach: looking for TLS 1.3 + h2 hosts".bold().green());
    eprintln!(
        "{} {}  {} {}  {} {}s",
        "target".cyan(),
        target,
        "port".cyan(),
        scan.port,
        "timeout".cyan(),
        scan.timeout.as_secs()
    );
}

#[cfg(unix)]
fn adjust_ulimit_size(limit: u64) {
    use rlimit::Resource;

    if Resource::NOFILE.set(limit, limit).is_ok() {
        info!("Automatically increasing ulimit value to {limit}.");
    } else {
        warn!("Failed to set ulimit value.");
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_limit: u64) {
    warn!("Setting the ulimit is only supported on unix.");
}
