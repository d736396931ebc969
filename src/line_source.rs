use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::LineError;
use crate::protocol::normalize_escapes;

/// One framed record from the server, with line terminators and stray
/// carriage returns removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine(String);

impl RawLine {
    fn from_frame(frame: &[u8]) -> Self {
        let text = String::from_utf8_lossy(frame);
        let cleaned: String = text.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        RawLine(cleaned.trim().to_string())
    }

    /// The record exactly as framed on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The record with textual escape markers turned into control characters.
    pub fn display(&self) -> Cow<'_, str> {
        normalize_escapes(&self.0)
    }
}

/// Yields newline-framed records from a buffered byte stream.
pub struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
    read_timeout: Option<Duration>,
}

impl<R: AsyncBufRead + Unpin> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            read_timeout: None,
        }
    }

    pub fn with_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Waits for the next complete line.
    ///
    /// Bytes of an unfinished line stay buffered across a timeout, and are
    /// dropped if the peer closes before sending the terminator.
    pub async fn read_line(&mut self) -> Result<RawLine, LineError> {
        let n = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.reader.read_until(b'\n', &mut self.buf))
                .await
                .map_err(|_| LineError::Timeout(limit))??,
            None => self.reader.read_until(b'\n', &mut self.buf).await?,
        };

        if n == 0 || self.buf.last() != Some(&b'\n') {
            self.buf.clear();
            return Err(LineError::EndOfStream);
        }

        let line = RawLine::from_frame(&self.buf);
        self.buf.clear();
        Ok(line)
    }
}
