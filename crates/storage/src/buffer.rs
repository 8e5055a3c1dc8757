//! Per-session write coalescing.
//!
//! One pending merged update and at most one scheduled flush timer per
//! session. A new update for an already-buffered session cancels the timer,
//! merges fields last-write-wins, and is rescheduled by the coordinator —
//! exactly one physical write per session per flush window regardless of
//! update frequency.

use std::collections::HashMap;

use sessionvault_core::SessionUpdate;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Pending {
    update: SessionUpdate,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
pub struct WriteBuffer {
    pending: HashMap<String, Pending>,
}

impl WriteBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `update` into the session's pending entry, cancelling any
    /// scheduled timer. The caller reschedules via [`set_timer`].
    ///
    /// [`set_timer`]: WriteBuffer::set_timer
    pub fn merge(&mut self, session_id: &str, update: SessionUpdate) {
        match self.pending.get_mut(session_id) {
            Some(entry) => {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                entry.update.merge(update);
            },
            None => {
                self.pending.insert(session_id.to_owned(), Pending { update, timer: None });
            },
        }
    }

    /// Attach the flush timer for a buffered session. Any previous timer
    /// was already cancelled by [`merge`](WriteBuffer::merge).
    pub fn set_timer(&mut self, session_id: &str, timer: JoinHandle<()>) {
        if let Some(entry) = self.pending.get_mut(session_id) {
            if let Some(old) = entry.timer.replace(timer) {
                old.abort();
            }
        } else {
            // Flush raced us and drained the entry; the new timer will
            // find nothing to do.
            timer.abort();
        }
    }

    /// Remove and return the pending update, cancelling its timer.
    pub fn take(&mut self, session_id: &str) -> Option<SessionUpdate> {
        self.pending.remove(session_id).map(|entry| {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            entry.update
        })
    }

    /// Drain everything, cancelling all timers. Used on shutdown.
    pub fn drain(&mut self) -> Vec<(String, SessionUpdate)> {
        self.pending
            .drain()
            .map(|(id, entry)| {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                (id, entry.update)
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_merge_never_queue() {
        let mut buffer = WriteBuffer::new();
        buffer.merge("s1", SessionUpdate { is_connected: Some(true), ..Default::default() });
        buffer.merge(
            "s1",
            SessionUpdate { phone_number: Some("123".to_string()), ..Default::default() },
        );

        assert_eq!(buffer.len(), 1);
        let merged = buffer.take("s1").unwrap();
        assert_eq!(merged.is_connected, Some(true));
        assert_eq!(merged.phone_number.as_deref(), Some("123"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn take_on_empty_is_none() {
        let mut buffer = WriteBuffer::new();
        assert!(buffer.take("nope").is_none());
    }

    #[tokio::test]
    async fn merge_cancels_scheduled_timer() {
        let mut buffer = WriteBuffer::new();
        buffer.merge("s1", SessionUpdate::default());

        let timer = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        buffer.set_timer("s1", timer);

        buffer.merge("s1", SessionUpdate { detected: Some(true), ..Default::default() });

        // The drained entry must carry no live timer after the second merge.
        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.detected, Some(true));
    }
}
