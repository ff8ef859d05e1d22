//! Background stream pumps
//!
//! A pump moves bytes from a child stream into a sink on a background task.
//! Without an identifier it copies verbatim; with one it goes line by line
//! and prefixes each line, which is what the merge helpers want when several
//! children share the parent's terminal. A collector is a pump whose sink is
//! an in-memory buffer.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

/// Background copier from a child stream into a sink, with a join primitive.
pub struct StreamPump {
    worker: JoinHandle<std::io::Result<()>>,
}

impl StreamPump {
    pub fn spawn<R, W>(reader: R, writer: W, identifier: Option<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let worker = tokio::spawn(copy_stream(reader, writer, identifier));
        Self { worker }
    }

    /// Wait for the source stream to drain.
    pub async fn join(self) -> std::io::Result<()> {
        match self.worker.await {
            Ok(result) => result,
            Err(join_err) => Err(std::io::Error::other(join_err)),
        }
    }
}

async fn copy_stream<R, W>(
    reader: R,
    mut writer: W,
    identifier: Option<String>,
) -> std::io::Result<()>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
{
    match identifier {
        None => {
            let mut reader = reader;
            tokio::io::copy(&mut reader, &mut writer).await?;
            writer.flush().await
        }
        Some(identifier) => {
            let mut lines = BufReader::new(reader).lines();
            while let Some(line) = lines.next_line().await? {
                let tagged = format!("[{identifier}] {line}\n");
                writer.write_all(tagged.as_bytes()).await?;
            }
            writer.flush().await
        }
    }
}

/// A pump that collects a stream into a data buffer.
pub struct StreamCollector {
    buffer: Arc<Mutex<Vec<u8>>>,
    pump: StreamPump,
}

impl StreamCollector {
    pub fn start<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = SharedBuffer(Arc::clone(&buffer));
        let pump = StreamPump::spawn(reader, sink, None);
        Self { buffer, pump }
    }

    /// Snapshot of what has been collected so far.
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(|err| err.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Wait for the stream to drain and return everything collected.
    pub async fn join(self) -> std::io::Result<String> {
        self.pump.join().await?;
        let buffer = self.buffer.lock().unwrap_or_else(|err| err.into_inner());
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// `AsyncWrite` adapter appending into a shared buffer.
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut buffer = self.0.lock().unwrap_or_else(|err| err.into_inner());
        buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
