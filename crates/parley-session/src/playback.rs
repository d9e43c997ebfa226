//! FIFO of pending TTS/playback payloads for one session.

use std::collections::VecDeque;

use serde::Serialize;
use serde_json::Value;

/// Pending playback payloads plus processing flags.
///
/// The queue lives behind the owning session's mutex, so `interrupt`
/// clears items and resets flags in one critical section.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    items: VecDeque<Value>,
    is_processing: bool,
    media_cancelled: bool,
}

/// Point-in-time view of a playback queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackStatus {
    pub pending: usize,
    pub is_processing: bool,
    pub media_cancelled: bool,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload and return the new queue length.
    pub fn enqueue(&mut self, payload: Value) -> usize {
        self.items.push_back(payload);
        self.items.len()
    }

    /// Pop the next payload. Yields nothing while media is cancelled.
    pub fn dequeue(&mut self) -> Option<Value> {
        if self.media_cancelled {
            return None;
        }
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn set_processing(&mut self, processing: bool) {
        self.is_processing = processing;
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn is_media_cancelled(&self) -> bool {
        self.media_cancelled
    }

    /// Drop every pending payload, stop processing and mark media cancelled.
    ///
    /// Returns how many payloads were discarded.
    pub fn interrupt(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        self.is_processing = false;
        self.media_cancelled = true;
        cleared
    }

    /// Allow playback again after an interrupt.
    pub fn resume_media(&mut self) {
        self.media_cancelled = false;
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            pending: self.items.len(),
            is_processing: self.is_processing,
            media_cancelled: self.media_cancelled,
        }
    }
}
