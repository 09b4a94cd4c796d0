//! Per-destination size-and-time-bounded line buffer.
//!
//! Two actors touch a `TagBuffer`: the owning Processor worker
//! (`write_line`) and a dedicated flusher task (`flush_if_due`, driven
//! by a 30s tick). The mutex is `parking_lot`, matching this crate's
//! use of it for narrow, synchronous critical sections (see
//! elsewhere in this crate) — the channel send that a flush
//! can trigger always happens after the guard is dropped, since an
//! async send can't be awaited while a sync mutex guard is held.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::model::{Batch, Tag};

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

struct BufferState {
    data: Vec<u8>,
    lines: usize,
    next_flush_at: Instant,
}

pub struct TagBuffer {
    tag: Tag,
    capacity: usize,
    state: Mutex<BufferState>,
    out: mpsc::Sender<Batch>,
}

impl TagBuffer {
    pub fn new(tag: Tag, capacity: usize, out: mpsc::Sender<Batch>) -> Self {
        Self {
            tag,
            capacity,
            state: Mutex::new(BufferState {
                data: Vec::new(),
                lines: 0,
                next_flush_at: Instant::now() + FLUSH_INTERVAL,
            }),
            out,
        }
    }

    /// Append `line`, flushing first if it would overflow `capacity`.
    /// A single line larger than `capacity` is still written whole —
    /// capacity is a soft lower bound on flush size, not a hard cap on
    /// record size.
    pub async fn write_line(&self, line: &[u8]) {
        let batch = {
            let mut state = self.state.lock();
            let overflow = state.data.len() + line.len() > self.capacity;
            let batch = if overflow {
                self.flush_locked(&mut state)
            } else {
                None
            };
            state.data.extend_from_slice(line);
            state.lines += 1;
            batch
        };
        self.send(batch).await;
    }

    /// Flush if the 30s deadline has passed; called by the flusher task.
    pub async fn flush_if_due(&self) {
        let batch = {
            let mut state = self.state.lock();
            if Instant::now() >= state.next_flush_at {
                self.flush_locked(&mut state)
            } else {
                None
            }
        };
        self.send(batch).await;
    }

    /// Unconditional flush, used once per buffer during shutdown.
    pub async fn flush_now(&self) {
        let batch = {
            let mut state = self.state.lock();
            self.flush_locked(&mut state)
        };
        self.send(batch).await;
    }

    fn flush_locked(&self, state: &mut BufferState) -> Option<Batch> {
        state.next_flush_at = Instant::now() + FLUSH_INTERVAL;
        if state.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut state.data);
        let lines = std::mem::replace(&mut state.lines, 0);
        Some(Batch {
            tag: self.tag.clone(),
            data,
            lines,
        })
    }

    async fn send(&self, batch: Option<Batch>) {
        if let Some(batch) = batch {
            if self.out.send(batch).await.is_err() {
                tracing::warn!(tag = %self.tag, "resultChan closed while flushing tag buffer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn flushes_on_overflow_and_keeps_oversized_line() {
        let (tx, mut rx) = mpsc::channel(8);
        let buffer = Arc::new(TagBuffer::new(Tag::from("nginx:"), 10, tx));

        buffer.write_line(b"12345").await;
        buffer.write_line(b"678901234567890").await; // overflows, triggers flush

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.data, b"12345");
        assert_eq!(batch.lines, 1);

        buffer.flush_now().await;
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.data, b"678901234567890");
        assert_eq!(batch.lines, 1);
    }

    #[tokio::test]
    async fn empty_flush_is_a_noop() {
        let (tx, mut rx) = mpsc::channel(8);
        let buffer = TagBuffer::new(Tag::from("nginx:"), 10, tx);
        buffer.flush_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn accumulates_until_capacity() {
        let (tx, mut rx) = mpsc::channel(8);
        let buffer = TagBuffer::new(Tag::from("nginx:"), 1024, tx);
        buffer.write_line(&vec![b'a'; 500]).await;
        buffer.write_line(&vec![b'b'; 550]).await;
        assert!(rx.try_recv().is_err());
        buffer.flush_now().await;
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.data.len(), 1050);
        assert_eq!(batch.lines, 2);
    }
}
