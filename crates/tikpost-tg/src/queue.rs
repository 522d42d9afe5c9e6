//! In-memory FIFO of videos waiting for their publication slot.
use crate::prelude::*;
use crate::{err, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

pub(crate) const QUEUE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Submission {
    /// Link that needs to be resolved into a video before publication
    Link { url: Url },

    /// Video that was uploaded to telegram directly
    Uploaded {
        file_id: String,
        caption: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum QueueError {
    #[error("Video collection mode is off, the submission is not accepted")]
    NotCollecting,

    #[error("The video queue is full (capacity: {capacity})")]
    Full { capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueStats {
    pub(crate) len: usize,
    pub(crate) added: u64,
    pub(crate) taken: u64,
    pub(crate) collecting: bool,
}

pub(crate) struct SubmissionQueue {
    items: Mutex<VecDeque<Submission>>,
    capacity: usize,
    pushed: Notify,
    collecting: AtomicBool,
    added: AtomicU64,
    taken: AtomicU64,
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }
}

impl SubmissionQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Default::default(),
            capacity,
            pushed: Notify::new(),
            collecting: AtomicBool::new(false),
            added: AtomicU64::new(0),
            taken: AtomicU64::new(0),
        }
    }

    pub(crate) fn push(&self, submission: Submission) -> Result {
        if !self.is_collecting() {
            return Err(err!(QueueError::NotCollecting));
        }

        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(err!(QueueError::Full {
                    capacity: self.capacity
                }));
            }
            items.push_back(submission);
        }

        self.added.fetch_add(1, Ordering::Relaxed);
        self.pushed.notify_one();

        Ok(())
    }

    /// Waits until a submission is available or the timeout elapses
    pub(crate) async fn pop_timeout(&self, timeout: Duration) -> Option<Submission> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(submission) = self.try_pop() {
                return Some(submission);
            }

            // `notify_one` stores a permit if nobody is waiting, so a push
            // that happens between `try_pop` and here isn't lost
            if tokio::time::timeout_at(deadline, self.pushed.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    fn try_pop(&self) -> Option<Submission> {
        let submission = self.items.lock().pop_front()?;
        self.taken.fetch_add(1, Ordering::Relaxed);
        Some(submission)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns the number of dropped submissions
    pub(crate) fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let len = items.len();
        items.clear();
        len
    }

    pub(crate) fn set_collecting(&self, collecting: bool) {
        self.collecting.store(collecting, Ordering::SeqCst);
        info!(collecting, "Toggled video collection mode");
    }

    pub(crate) fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    pub(crate) fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            added: self.added.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
            collecting: self.is_collecting(),
        }
    }
}

/// Finds all TikTok video links in the free-form text. The query part of
/// the link is dropped, it only carries tracking parameters.
pub(crate) fn extract_tiktok_links(text: &str) -> Vec<Url> {
    lazy_regex::regex!(r"https?://(?:www\.|vm\.|vt\.)?tiktok\.com/[^?\s]+"i)
        .find_iter(text)
        .filter_map(|link| Url::parse(link.as_str()).ok())
        .collect()
}
