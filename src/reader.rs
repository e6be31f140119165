use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CallError;
use crate::pending::PendingRegistry;
use crate::protocol::{InboundEvent, SseDecoder};
use crate::session::{HandshakeOutcome, Session};

/// Maximum bytes per SSE line (1 MiB).
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Sole consumer of a session's inbound event stream.
///
/// Decodes SSE frames, records the handshake on the [`Session`] and hands
/// replies to the [`PendingRegistry`]. Delivery is a non-blocking
/// `oneshot` send, so a slow caller never stalls the stream.
pub struct StreamReader {
    session: Arc<Session>,
    pending: Arc<PendingRegistry>,
}

impl StreamReader {
    pub fn new(session: Arc<Session>, pending: Arc<PendingRegistry>) -> Self {
        Self { session, pending }
    }

    /// Spawn the read loop over `source`.
    ///
    /// # Panics
    ///
    /// Panics if a reader was already started for this session.
    pub fn start<R>(self, source: R) -> JoinHandle<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        assert!(
            self.session.claim_reader(),
            "stream reader already running for this session"
        );
        tokio::spawn(self.run(source))
    }

    async fn run<R>(self, mut source: R)
    where
        R: AsyncBufRead + Unpin,
    {
        // Closes the session even if the task is aborted mid-read.
        let _closer = CloseOnDrop {
            session: Arc::clone(&self.session),
            pending: Arc::clone(&self.pending),
        };

        let mut decoder = SseDecoder::new();
        let mut raw = Vec::new();

        loop {
            match read_line(&mut source, &mut raw, MAX_LINE_BYTES).await {
                Ok(Line::Complete) => {}
                Ok(Line::Oversized(bytes)) => {
                    warn!(bytes, limit = MAX_LINE_BYTES, "discarding oversized event line");
                    decoder = SseDecoder::new();
                    continue;
                }
                Ok(Line::Eof) => {
                    if let Some(event) = decoder.finish() {
                        self.dispatch(InboundEvent::classify(event));
                    }
                    info!("event stream ended");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "event stream read failed");
                    break;
                }
            }

            let line = match std::str::from_utf8(&raw) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "discarding non-utf8 event line");
                    continue;
                }
            };

            if let Some(event) = decoder.push_line(line) {
                self.dispatch(InboundEvent::classify(event));
            }
        }
    }

    fn dispatch(&self, event: InboundEvent) {
        match event {
            InboundEvent::Handshake { session_id } => {
                match self.session.apply_handshake(session_id.clone()) {
                    HandshakeOutcome::Opened => info!(%session_id, "session established"),
                    HandshakeOutcome::Unchanged => {
                        warn!(%session_id, "repeated handshake for current session")
                    }
                    HandshakeOutcome::Refreshed { previous } => warn!(
                        %previous,
                        %session_id,
                        pending_len = self.pending.len(),
                        "session id rotated by server; keeping pending calls"
                    ),
                    HandshakeOutcome::Ignored => {
                        warn!(%session_id, "handshake after stream close ignored")
                    }
                }
            }

            InboundEvent::Reply { id, outcome } => {
                let outcome = outcome.map_err(CallError::from);
                if !self.pending.resolve(&id, outcome) {
                    warn!(%id, "discarding reply with no pending call (late or duplicate)");
                }
            }

            InboundEvent::Notification { method, .. } => {
                debug!(%method, "ignoring server notification");
            }

            InboundEvent::Malformed { raw, reason } => {
                warn!(%reason, raw = %truncate(&raw, 200), "discarding malformed event");
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Complete,
    /// Total length of the discarded line, newline included.
    Oversized(usize),
    Eof,
}

/// Read one line into `buf`, buffering at most `limit + 1` bytes.
///
/// The remainder of a longer line is consumed and dropped without being
/// buffered.
async fn read_line<R>(source: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *source)
        .take(limit as u64 + 1)
        .read_until(b'\n', buf)
        .await?;
    if n == 0 {
        return Ok(Line::Eof);
    }
    if n <= limit {
        return Ok(Line::Complete);
    }

    let mut total = n;
    if buf.last() != Some(&b'\n') {
        total += skip_line(source).await?;
    }
    buf.clear();
    Ok(Line::Oversized(total))
}

/// Consume bytes up to and including the next newline (or EOF).
async fn skip_line<R>(source: &mut R) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let (used, done) = {
            let chunk = source.fill_buf().await?;
            if chunk.is_empty() {
                return Ok(skipped);
            }
            match chunk.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (chunk.len(), false),
            }
        };
        source.consume(used);
        skipped += used;
        if done {
            return Ok(skipped);
        }
    }
}

struct CloseOnDrop {
    session: Arc<Session>,
    pending: Arc<PendingRegistry>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.session.close();
        let failed = self.pending.close_all();
        info!(failed, "event stream closed");
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn long_lines_are_skipped_without_buffering() {
        let input = b"short\n0123456789abcdef\nnext\ntail";
        let mut source = tokio::io::BufReader::with_capacity(4, &input[..]);
        let mut buf = Vec::new();

        assert_eq!(read_line(&mut source, &mut buf, 8).await.unwrap(), Line::Complete);
        assert_eq!(buf, b"short\n");

        assert_eq!(
            read_line(&mut source, &mut buf, 8).await.unwrap(),
            Line::Oversized(17)
        );
        assert!(buf.is_empty());

        assert_eq!(read_line(&mut source, &mut buf, 8).await.unwrap(), Line::Complete);
        assert_eq!(buf, b"next\n");

        assert_eq!(read_line(&mut source, &mut buf, 8).await.unwrap(), Line::Complete);
        assert_eq!(buf, b"tail");

        assert_eq!(read_line(&mut source, &mut buf, 8).await.unwrap(), Line::Eof);
    }

    #[tokio::test]
    async fn line_of_exactly_limit_bytes_is_kept() {
        let mut source = &b"1234567\n"[..];
        let mut buf = Vec::new();
        assert_eq!(read_line(&mut source, &mut buf, 8).await.unwrap(), Line::Complete);
        assert_eq!(buf, b"1234567\n");
    }
}
