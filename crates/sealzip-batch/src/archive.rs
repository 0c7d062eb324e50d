//! Streaming ZIP packaging
//!
//! One task owns the ZIP writer. Entries are queued to it as byte streams
//! and written one after another in stored (uncompressed) mode; the archive
//! bytes go out through a bounded channel, so a slow consumer stalls the
//! writer, which stalls the entry source, which stalls its cipher task.
//!
//! ```text
//! append(name, stream) ──► [command queue] ──► writer task ──► ChannelWriter ──► ArchiveStream
//!                                                  │
//!                               EntryDrained ◄─────┘ (entry fully consumed)
//! ```

use async_zip::base::write::ZipFileWriter;
use async_zip::{Compression, ZipEntryBuilder};
use bytes::Bytes;
use futures::io::AsyncWriteExt as _;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::{debug, warn};

/// Archive bytes as they are produced. Ends with an `Err` item if the
/// archive was aborted.
pub type ArchiveStream = ReceiverStream<io::Result<Bytes>>;

pub type EntryStream = BoxStream<'static, io::Result<Bytes>>;

const ABORT_NOTICE_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip writer failed: {0}")]
    Zip(#[from] async_zip::error::ZipError),

    #[error("archive output failed: {0}")]
    Io(#[from] io::Error),

    #[error("entry source failed: {0}")]
    Source(io::Error),

    #[error("archive aborted: {0}")]
    Aborted(String),

    #[error("archive writer is no longer running")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub entry_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Depth of the output channel and the entry queue
    pub channel_depth: usize,
    /// Coalescing buffer in front of the output channel
    pub chunk_size: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            channel_depth: 16,
            chunk_size: 64 * 1024,
        }
    }
}

enum Command {
    Entry {
        name: String,
        source: EntryStream,
        drained: oneshot::Sender<Result<u64, String>>,
    },
    Finalize,
}

/// Resolves once the writer has consumed every byte of one entry.
#[derive(Debug)]
pub struct EntryDrained(oneshot::Receiver<Result<u64, String>>);

impl EntryDrained {
    pub async fn wait(self) -> Result<u64, ArchiveError> {
        match self.0.await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(message)) => Err(ArchiveError::Aborted(message)),
            Err(_) => Err(ArchiveError::Closed),
        }
    }
}

/// Cloneable handle for queueing entries from concurrent tasks.
#[derive(Clone)]
pub struct ArchiveAppender {
    tx: mpsc::Sender<Command>,
}

impl ArchiveAppender {
    /// Queue an entry and return without waiting for it to be written.
    pub async fn append<S>(&self, name: impl Into<String>, source: S) -> Result<EntryDrained, ArchiveError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let (drained, rx) = oneshot::channel();
        self.tx
            .send(Command::Entry {
                name: name.into(),
                source: source.boxed(),
                drained,
            })
            .await
            .map_err(|_| ArchiveError::Closed)?;
        Ok(EntryDrained(rx))
    }

    /// Queue an entry and wait until it has been fully written.
    pub async fn append_await<S>(&self, name: impl Into<String>, source: S) -> Result<u64, ArchiveError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.append(name, source).await?.wait().await
    }

    /// True once the writer has stopped accepting entries.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct StreamingArchiver {
    appender: ArchiveAppender,
    task: JoinHandle<Result<ArchiveSummary, ArchiveError>>,
    cancel: CancellationToken,
}

impl StreamingArchiver {
    /// Start the writer task. Must be called from within a tokio runtime.
    pub fn new(opts: &ArchiveOptions) -> (Self, ArchiveStream) {
        Self::with_cancel(opts, CancellationToken::new())
    }

    /// Like `new`, aborting when `cancel` fires.
    pub fn with_cancel(opts: &ArchiveOptions, cancel: CancellationToken) -> (Self, ArchiveStream) {
        let depth = opts.channel_depth.max(1);
        let (out_tx, out_rx) = mpsc::channel(depth);
        let (cmd_tx, cmd_rx) = mpsc::channel(depth);

        let task = tokio::spawn(run(cmd_rx, out_tx, opts.chunk_size.max(1), cancel.clone()));
        let archiver = Self {
            appender: ArchiveAppender { tx: cmd_tx },
            task,
            cancel,
        };
        (archiver, ReceiverStream::new(out_rx))
    }

    pub fn appender(&self) -> ArchiveAppender {
        self.appender.clone()
    }

    /// Token that aborts the archive when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn append<S>(&self, name: impl Into<String>, source: S) -> Result<EntryDrained, ArchiveError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.appender.append(name, source).await
    }

    pub async fn append_await<S>(&self, name: impl Into<String>, source: S) -> Result<u64, ArchiveError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.appender.append_await(name, source).await
    }

    /// Write the central directory after every queued entry and wait for the
    /// output to be flushed into the channel.
    pub async fn finalize(self) -> Result<ArchiveSummary, ArchiveError> {
        let sent = self.appender.tx.send(Command::Finalize).await;
        let result = join(self.task).await;
        match (sent, result) {
            (Err(_), Ok(_)) => Err(ArchiveError::Closed),
            (_, result) => result,
        }
    }

    /// Tear the archive down. The output stream ends with an error item and
    /// every pending entry source is dropped.
    pub async fn abort(self, reason: &str) {
        warn!(reason, "aborting archive");
        self.cancel.cancel();
        let _ = join(self.task).await;
    }
}

async fn join(task: JoinHandle<Result<ArchiveSummary, ArchiveError>>) -> Result<ArchiveSummary, ArchiveError> {
    task.await
        .map_err(|e| ArchiveError::Aborted(format!("writer task failed: {e}")))?
}

async fn run(
    mut commands: mpsc::Receiver<Command>,
    out: mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
    cancel: CancellationToken,
) -> Result<ArchiveSummary, ArchiveError> {
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ArchiveError::Aborted("cancelled".into())),
        result = pump(&mut commands, &out, chunk_size) => result,
    };

    if let Err(e) = &result {
        commands.close();
        notify_aborted(out);
        debug!(error = %e, "archive writer stopped");
    }
    result
}

/// Push the terminal error item without waiting on a stalled consumer. If
/// the channel is full the notice is handed to a detached task that gives
/// up after `ABORT_NOTICE_GRACE`.
fn notify_aborted(out: mpsc::Sender<io::Result<Bytes>>) {
    match out.try_send(Err(io::Error::other("archive aborted"))) {
        Err(TrySendError::Full(item)) => {
            tokio::spawn(async move {
                let _ = tokio::time::timeout(ABORT_NOTICE_GRACE, out.send(item)).await;
            });
        }
        Ok(()) | Err(TrySendError::Closed(_)) => {}
    }
}

async fn pump(
    commands: &mut mpsc::Receiver<Command>,
    out: &mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
) -> Result<ArchiveSummary, ArchiveError> {
    let sink = BufWriter::with_capacity(chunk_size, ChannelWriter::new(out.clone()));
    let mut writer = ZipFileWriter::with_tokio(sink);
    let mut summary = ArchiveSummary::default();

    loop {
        match commands.recv().await {
            Some(Command::Entry {
                name,
                source,
                drained,
            }) => match write_entry(&mut writer, &name, source).await {
                Ok(bytes) => {
                    summary.entries += 1;
                    summary.entry_bytes += bytes;
                    debug!(entry = %name, bytes, "archive entry written");
                    let _ = drained.send(Ok(bytes));
                }
                Err(e) => {
                    let _ = drained.send(Err(e.to_string()));
                    return Err(e);
                }
            },
            Some(Command::Finalize) => break,
            None => return Err(ArchiveError::Aborted("archiver dropped".into())),
        }
    }

    let mut sink = writer.close().await?.into_inner();
    sink.shutdown().await?;
    debug!(entries = summary.entries, bytes = summary.entry_bytes, "archive finalized");
    Ok(summary)
}

async fn write_entry<W>(
    writer: &mut ZipFileWriter<W>,
    name: &str,
    mut source: EntryStream,
) -> Result<u64, ArchiveError>
where
    W: futures::io::AsyncWrite + Unpin,
{
    let builder = ZipEntryBuilder::new(name.to_string().into(), Compression::Stored);
    let mut entry = writer.write_entry_stream(builder).await?;

    let mut written = 0u64;
    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(ArchiveError::Source)?;
        entry.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    entry.close().await?;
    Ok(written)
}

/// `AsyncWrite` over a bounded channel: each write waits for channel
/// capacity, then becomes one stream item.
pub struct ChannelWriter {
    tx: PollSender<io::Result<Bytes>>,
}

impl ChannelWriter {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self {
            tx: PollSender::new(tx),
        }
    }
}

fn consumer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away")
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if ready!(self.tx.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(consumer_gone()));
        }
        self.tx
            .send_item(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| consumer_gone())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}
