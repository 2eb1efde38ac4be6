//! Newline-delimited text over any async byte stream.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

/// Yields inbound lines with the terminator and trailing whitespace removed.
///
/// Bytes that are not valid UTF-8 are replaced with U+FFFD rather than
/// failing the read.
pub struct LineReader<R> {
    reader: BufReader<R>,
    // Survives cancellation of `read_line` so no bytes are lost.
    pending: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    /// Returns `Ok(None)` once the peer has closed its side.
    ///
    /// Cancel safe: a line that was partially read when the future was
    /// dropped is returned by the next call.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let bytes = self.reader.read_until(b'\n', &mut self.pending).await?;
        if bytes == 0 && self.pending.is_empty() {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        Ok(Some(line))
    }
}

/// Writes one line at a time, appending `\n` and flushing after each.
pub struct LineWriter<W> {
    writer: BufWriter<W>,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }

    /// Flushes and closes the write direction.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}
