//! This crate exposes the internal functionality of the `tlsreach` scanner.
//!
//! `tlsreach` looks for hosts that complete a TLS 1.3 handshake, agree on
//! `h2` over ALPN and present a certificate with a subject and an issuer.
//! Such hosts make good camouflage targets for TLS-mimicking proxies, which
//! is what the tool is mostly used to find.
//!
//! ## Architecture Overview
//!
//! 1. **Enumeration**: [`address`] turns an IP, CIDR, domain, file or crawled
//!    page ([`crawl`]) into a bounded stream of [`Host`](address::Host)s.
//! 2. **Scanning**: [`scanner::Scanner`] runs a fixed pool of workers over
//!    that stream. A lone IP or domain instead seeds an endless walk that
//!    grows outward in both directions from it.
//! 3. **Probing**: [`probe::TlsProbe`] dials, handshakes without verifying
//!    certificates and classifies the result with [`probe::Policy`].
//! 4. **Output**: [`output::Output`] serializes feasible records from all
//!    workers into one CSV sink.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tlsreach::address::{enumerate_address, Resolver};
//! use tlsreach::geo::NoGeo;
//! use tlsreach::output::Output;
//! use tlsreach::probe::{Policy, TlsProbe};
//! use tlsreach::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let probe = TlsProbe::new(
//!         443,
//!         Duration::from_secs(5),
//!         Policy::default(),
//!         Resolver::new(None, false).await,
//!         Arc::new(NoGeo),
//!     )?;
//!     let output = Output::open(tokio::io::stdout(), None);
//!     let scanner = Scanner::new(
//!         Arc::new(probe),
//!         output.sender(),
//!         NonZeroUsize::new(8).unwrap(),
//!         443,
//!         &[],
//!     )
//!     .with_walk_limit(Some(256));
//!
//!     // Walk 256 addresses up and down from the seed.
//!     let tally = scanner.run(enumerate_address("93.184.216.34", false, true)).await;
//!     drop(scanner);
//!     output.close().await?;
//!
//!     println!("{} probed, {} feasible", tally.probed, tally.feasible);
//!     Ok(())
//! }
//! ```
#![allow(clippy::needless_doctest_main)]

pub mod address;

pub mod crawl;

pub mod geo;

pub mod input;

pub mod output;

pub mod probe;

pub mod scanner;
