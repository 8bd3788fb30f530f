//! Serializes records from many workers into one sink.
//!
//! Workers never touch the sink. They send finished lines to an [`Output`]
//! task which owns the writer and writes them one at a time, in the order
//! they arrive, so records cannot interleave.
use std::fmt::Write as _;

use clap::ValueEnum;
use log::error;
use serde_derive::Deserialize;
use thiserror::Error;
use tokio::io::{self, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::probe::{Handshake, ProbeResult};

/// Column names of the fixed fields.
pub const HEADER: &str = "IP,ORIGIN,CERT_DOMAIN,CERT_ISSUER,GEO_CODE";

const CAPACITY: usize = 64;

/// Optional trailing columns.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtraField {
    /// Port that was probed.
    Port,
    /// Negotiated TLS version.
    Tls,
    /// Negotiated ALPN protocol.
    Alpn,
}

impl ExtraField {
    const fn column(self) -> &'static str {
        match self {
            Self::Port => "PORT",
            Self::Tls => "TLS",
            Self::Alpn => "ALPN",
        }
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output writer failed: {0}")]
    Io(#[from] io::Error),
    #[error("output task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("output is closed")]
    Closed,
}

/// Header line for the given extra columns, newline terminated.
pub fn header(extra: &[ExtraField]) -> String {
    let mut line = HEADER.to_owned();
    for field in extra {
        line.push(',');
        line.push_str(field.column());
    }
    line.push('\n');
    line
}

/// Formats a feasible result as one CSV line:
/// `address,origin,cert_domain,"cert_issuer",geo[,extra...]`.
///
/// Returns `None` for results without a handshake or without an address.
pub fn format_record(result: &ProbeResult, extra: &[ExtraField], port: u16) -> Option<String> {
    let handshake: &Handshake = result.handshake()?;
    let address = result.host.address()?;
    let mut line = format!(
        "{address},{},{},\"{}\",{}",
        result.host.origin(),
        handshake.cert_domain,
        handshake.cert_issuer.replace('"', "\"\""),
        handshake.geo,
    );
    for field in extra {
        let _ = match field {
            ExtraField::Port => write!(line, ",{port}"),
            ExtraField::Tls => write!(
                line,
                ",{}",
                handshake.version.map_or("", |v| v.as_str())
            ),
            ExtraField::Alpn => write!(line, ",{}", handshake.alpn),
        };
    }
    line.push('\n');
    Some(line)
}

/// Cheap, cloneable handle workers use to submit records.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<String>,
}

impl RecordSender {
    /// Queues one complete line. Fails once the output task has stopped,
    /// either because it was closed or because the writer failed.
    pub async fn send(&self, record: String) -> Result<(), OutputError> {
        self.tx.send(record).await.map_err(|_| OutputError::Closed)
    }
}

/// The aggregator task and the handle feeding it.
#[derive(Debug)]
pub struct Output<W> {
    sender: RecordSender,
    task: JoinHandle<io::Result<W>>,
}

impl<W> Output<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Starts the aggregator over `writer`. `header` is written once before
    /// any record; pass `None` for sinks that are not persistent.
    pub fn open(writer: W, header: Option<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(CAPACITY);
        let task = tokio::spawn(async move {
            let written = write_records(BufWriter::new(writer), header, &mut rx).await;
            if let Err(e) = &written {
                error!("Output writer failed, no further records will be written: {e}");
            }
            written
        });
        Self {
            sender: RecordSender { tx },
            task,
        }
    }

    pub fn sender(&self) -> RecordSender {
        self.sender.clone()
    }

    /// Drops this handle's sender, waits until every queued record has been
    /// written, flushes and hands the writer back.
    ///
    /// Clones obtained through [`sender`](Self::sender) must be dropped first
    /// or this waits forever.
    pub async fn close(self) -> Result<W, OutputError> {
        drop(self.sender);
        Ok(self.task.await??)
    }
}

async fn write_records<W>(
    mut writer: BufWriter<W>,
    header: Option<String>,
    rx: &mut mpsc::Receiver<String>,
) -> io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    if let Some(header) = header {
        writer.write_all(header.as_bytes()).await?;
        writer.flush().await?;
    }
    while let Some(record) = rx.recv().await {
        writer.write_all(record.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(writer.into_inner())
}
