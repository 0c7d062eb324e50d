//! Frame encryption and decryption over async byte streams
//!
//! Both directions run as a spawned task writing into a bounded channel.
//! Callers get the output stream back immediately and can forward it while
//! the task is still running; `Completion` resolves with the frame metadata
//! once the last byte has been handed to the channel.
//!
//! Decryption never releases plaintext before the tag verifies. Ciphertext
//! is authenticated while it is spooled to an anonymous temp file, then
//! decrypted from the spool once GHASH matches.

use bytes::{Bytes, BytesMut};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::error::CipherError;
use crate::gcm::{self, GcmSealer};
use crate::holdback::Holdback;
use crate::kdf::{derive_key_async, KdfProfile};
use crate::{HEADER_LEN, IV_LEN, SALT_LEN, TAG_LEN};

/// Output of a cipher task. Ends with an `Err` item if the task failed.
pub type FrameStream = ReceiverStream<io::Result<Bytes>>;

#[derive(Debug, Clone)]
pub struct CipherOptions {
    pub profile: KdfProfile,
    /// Read size per chunk
    pub chunk_size: usize,
    /// Output channel capacity, in chunks
    pub channel_depth: usize,
    /// Directory for the decrypt-side ciphertext spool (default: OS temp)
    pub spool_dir: Option<PathBuf>,
}

impl Default for CipherOptions {
    fn default() -> Self {
        Self {
            profile: KdfProfile::V1,
            chunk_size: 64 * 1024,
            channel_depth: 8,
            spool_dir: None,
        }
    }
}

/// Result of a completed encrypt or decrypt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMeta {
    pub plaintext_bytes: u64,
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Handle on the spawned cipher task
#[derive(Debug)]
pub struct Completion(JoinHandle<Result<FrameMeta, CipherError>>);

impl Completion {
    pub async fn wait(self) -> Result<FrameMeta, CipherError> {
        match self.0.await {
            Ok(result) => result,
            Err(e) => Err(CipherError::Io(io::Error::other(format!(
                "cipher task failed: {e}"
            )))),
        }
    }

    pub fn abort(&self) {
        self.0.abort();
    }
}

pub struct CipherJob {
    pub output: FrameStream,
    pub completion: Completion,
}

/// Decrypt progress. Every path to `Done` passes through `Authenticating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptState {
    AwaitingHeader,
    Streaming,
    AwaitingTrailer,
    Authenticating,
    Done,
    AuthFailed,
}

impl DecryptState {
    pub fn can_advance_to(self, next: DecryptState) -> bool {
        use DecryptState::*;
        matches!(
            (self, next),
            (AwaitingHeader, Streaming)
                | (Streaming, AwaitingTrailer)
                | (AwaitingTrailer, Authenticating)
                | (Authenticating, Done)
                | (Authenticating, AuthFailed)
        )
    }

    fn advance(self, next: DecryptState) -> DecryptState {
        debug_assert!(
            self.can_advance_to(next),
            "invalid decrypt transition {self:?} -> {next:?}"
        );
        trace!(from = ?self, to = ?next, "decrypt state");
        next
    }
}

/// Start encrypting `source` into a frame.
///
/// Must be called from within a tokio runtime.
pub fn encrypt<R>(source: R, password: SecretString, opts: &CipherOptions) -> CipherJob
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(opts.channel_depth.max(1));
    let opts = opts.clone();
    let handle = tokio::spawn(async move {
        let result = seal(source, password, &opts, &tx).await;
        if let Err(e) = &result {
            report(&tx, e).await;
        }
        result
    });
    CipherJob {
        output: ReceiverStream::new(rx),
        completion: Completion(handle),
    }
}

/// Start decrypting a frame read from `source`.
///
/// Must be called from within a tokio runtime.
pub fn decrypt<R>(source: R, password: SecretString, opts: &CipherOptions) -> CipherJob
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(opts.channel_depth.max(1));
    let opts = opts.clone();
    let handle = tokio::spawn(async move {
        let result = open(source, password, &opts, &tx).await;
        if let Err(e) = &result {
            report(&tx, e).await;
        }
        result
    });
    CipherJob {
        output: ReceiverStream::new(rx),
        completion: Completion(handle),
    }
}

type Tx = mpsc::Sender<io::Result<Bytes>>;

async fn send(tx: &Tx, bytes: Bytes) -> Result<(), CipherError> {
    tx.send(Ok(bytes))
        .await
        .map_err(|_| CipherError::SinkClosed)
}

/// Terminate the output stream with an error item. Internal details stay
/// in the `Completion` result; the stream carries only the public message.
async fn report(tx: &Tx, err: &CipherError) {
    let item = match err {
        CipherError::SinkClosed => return,
        CipherError::TruncatedHeader => CipherError::TruncatedHeader.into_io(),
        CipherError::Authentication => CipherError::Authentication.into_io(),
        other => io::Error::other(other.public_message()),
    };
    let _ = tx.send(Err(item)).await;
}

async fn seal<R>(
    mut source: R,
    password: SecretString,
    opts: &CipherOptions,
    tx: &Tx,
) -> Result<FrameMeta, CipherError>
where
    R: AsyncRead + Unpin,
{
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let key = derive_key_async(password, salt, opts.profile).await?;
    let mut sealer = GcmSealer::new(&key, &iv);
    drop(key);

    let mut header = BytesMut::with_capacity(HEADER_LEN);
    header.extend_from_slice(&salt);
    header.extend_from_slice(&iv);
    send(tx, header.freeze()).await?;

    let mut total = 0u64;
    loop {
        let mut buf = BytesMut::with_capacity(opts.chunk_size);
        let n = source.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
        sealer.process(&mut buf)?;
        total += n as u64;
        send(tx, buf.freeze()).await?;
    }

    let tag = sealer.finish();
    send(tx, Bytes::copy_from_slice(&tag)).await?;

    debug!(bytes = total, "frame sealed");
    Ok(FrameMeta {
        plaintext_bytes: total,
        salt,
        iv,
        tag,
    })
}

async fn open<R>(
    mut source: R,
    password: SecretString,
    opts: &CipherOptions,
    tx: &Tx,
) -> Result<FrameMeta, CipherError>
where
    R: AsyncRead + Unpin,
{
    let state = DecryptState::AwaitingHeader;

    let mut header = [0u8; HEADER_LEN];
    if let Err(e) = source.read_exact(&mut header).await {
        return Err(match e.kind() {
            io::ErrorKind::UnexpectedEof => CipherError::TruncatedHeader,
            _ => CipherError::Io(e),
        });
    }
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    salt.copy_from_slice(&header[..SALT_LEN]);
    iv.copy_from_slice(&header[SALT_LEN..]);

    let key = derive_key_async(password, salt, opts.profile).await?;
    let (mut keystream, mut auth) = gcm::stages(&key, &iv);
    drop(key);

    let state = state.advance(DecryptState::Streaming);
    let dir = opts.spool_dir.clone();
    let spool = tokio::task::spawn_blocking(move || match dir {
        Some(dir) => tempfile::tempfile_in(dir),
        None => tempfile::tempfile(),
    })
    .await
    .map_err(io::Error::other)??;
    let mut spool = tokio::fs::File::from_std(spool);

    let mut holdback = Holdback::new(TAG_LEN);
    loop {
        let mut buf = BytesMut::with_capacity(opts.chunk_size);
        let n = source.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
        if let Some(ciphertext) = holdback.process(&buf) {
            auth.absorb(&ciphertext);
            spool.write_all(&ciphertext).await?;
        }
    }

    let state = state.advance(DecryptState::AwaitingTrailer);
    let trailer = holdback.finish();

    let state = state.advance(DecryptState::Authenticating);
    let ciphertext_len = auth.len();
    if let Err(e) = auth.verify(&trailer) {
        state.advance(DecryptState::AuthFailed);
        debug!(ciphertext_len, "frame authentication failed");
        return Err(e);
    }
    state.advance(DecryptState::Done);

    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&trailer);

    spool.flush().await?;
    spool.seek(SeekFrom::Start(0)).await?;

    let mut total = 0u64;
    loop {
        let mut buf = BytesMut::with_capacity(opts.chunk_size);
        let n = spool.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
        keystream.process(&mut buf)?;
        total += n as u64;
        send(tx, buf.freeze()).await?;
    }

    debug!(bytes = total, "frame opened");
    Ok(FrameMeta {
        plaintext_bytes: total,
        salt,
        iv,
        tag,
    })
}
