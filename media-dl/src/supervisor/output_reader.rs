//! Record-oriented reading of child process output.
//!
//! The extraction tool redraws its progress line with carriage returns when it
//! thinks it is talking to a terminal, and with newlines when `--newline` is
//! passed. Splitting on either keeps progress visible as soon as it is written.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Longest record kept, in bytes. Anything past this is discarded until the
/// next delimiter.
const MAX_RECORD_BYTES: usize = 64 * 1024;

/// Yields trimmed, non-empty text records delimited by `\n` or `\r`.
///
/// `next_record` is cancel safe, so it can sit in a `tokio::select!` next to
/// other branches without losing partially read output.
pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
        }
    }

    /// Returns the next record, or `None` at end of stream.
    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(self.take_pending());
            }

            match buf.iter().position(|&b| matches!(b, b'\n' | b'\r')) {
                Some(idx) => {
                    append_bounded(&mut self.pending, &buf[..idx]);
                    self.reader.consume(idx + 1);
                    if let Some(record) = self.take_pending() {
                        return Ok(Some(record));
                    }
                }
                None => {
                    let n = buf.len();
                    append_bounded(&mut self.pending, buf);
                    self.reader.consume(n);
                }
            }
        }
    }

    fn take_pending(&mut self) -> Option<String> {
        let record = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!record.is_empty()).then_some(record)
    }
}

fn append_bounded(pending: &mut Vec<u8>, bytes: &[u8]) {
    let room = MAX_RECORD_BYTES.saturating_sub(pending.len());
    pending.extend_from_slice(&bytes[..bytes.len().min(room)]);
}
