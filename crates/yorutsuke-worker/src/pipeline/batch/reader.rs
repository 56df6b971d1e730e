//! Line-by-line reading of result files.

use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use yorutsuke_object::ObjectStoreClient;

use crate::Result;

/// One non-blank line of a result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawLine {
    /// One-based line number, counting blank lines.
    pub number: u64,
    /// Line content without surrounding whitespace; empty when oversized.
    pub bytes: Vec<u8>,
    /// Set when the line exceeded the cap and was skipped unread.
    pub oversized: bool,
}

/// Streams a result file without buffering it whole.
///
/// Lines are split on `\n` at the byte level, so a line that is not valid
/// UTF-8 is handed to the caller instead of aborting the stream. At most
/// `max_line_bytes` of a line are held; the rest of a longer line is
/// consumed and dropped.
pub(crate) struct ResultReader {
    inner: StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>,
    buf: Vec<u8>,
    line_number: u64,
    max_line_bytes: usize,
}

impl ResultReader {
    /// Opens the object at `key`.
    pub async fn open(objects: &ObjectStoreClient, key: &str, max_line_bytes: usize) -> Result<Self> {
        let stream = objects
            .get_stream(key)
            .await?
            .map_err(io::Error::other)
            .boxed();
        Ok(Self::new(stream, max_line_bytes))
    }

    /// Wraps an already opened byte stream.
    pub fn new(stream: BoxStream<'static, io::Result<Bytes>>, max_line_bytes: usize) -> Self {
        Self {
            inner: StreamReader::new(stream),
            buf: Vec::new(),
            line_number: 0,
            max_line_bytes,
        }
    }

    /// Returns the next non-blank line, or `None` at the end of the file.
    pub async fn next_line(&mut self) -> Result<Option<RawLine>> {
        loop {
            self.buf.clear();
            let Some(oversized) = self.read_capped_line().await? else {
                return Ok(None);
            };

            self.line_number += 1;
            if oversized {
                return Ok(Some(RawLine {
                    number: self.line_number,
                    bytes: Vec::new(),
                    oversized,
                }));
            }

            let trimmed = self.buf.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }

            return Ok(Some(RawLine {
                number: self.line_number,
                bytes: trimmed.to_vec(),
                oversized,
            }));
        }
    }

    /// Reads through the next `\n` into `buf`.
    ///
    /// Returns `None` at the end of the stream, otherwise whether the line
    /// was longer than the cap.
    async fn read_capped_line(&mut self) -> Result<Option<bool>> {
        let mut consumed = 0_usize;
        let mut oversized = false;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok((consumed > 0).then_some(oversized));
            }

            let (take, content, complete) = match available.iter().position(|b| *b == b'\n') {
                Some(newline) => (newline + 1, newline, true),
                None => (available.len(), available.len(), false),
            };

            if !oversized && self.buf.len() + content <= self.max_line_bytes {
                self.buf.extend_from_slice(&available[..take]);
            } else {
                oversized = true;
                self.buf.clear();
            }

            self.inner.consume(take);
            consumed += take;
            if complete {
                return Ok(Some(oversized));
            }
        }
    }
}
