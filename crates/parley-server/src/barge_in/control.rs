//! Per-connection voice activity flags and cancellation handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::BoxError;

/// Speech synthesis resource bound to a connection.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Stop producing audio immediately.
    async fn stop(&self) -> Result<(), BoxError>;
}

struct LastTrigger {
    source: String,
    at: Instant,
}

/// Barge-in state for one connection.
///
/// Created with the connection and dropped with it. The synthesis loop
/// reports its progress through the `*_started`/`*_finished` methods and
/// polls [`cancellation_token`](Self::cancellation_token) to learn when the
/// user has interrupted it.
pub struct VoiceControl {
    is_synthesizing: AtomicBool,
    audio_playing: AtomicBool,
    tts_cancel_requested: AtomicBool,
    inflight: AtomicBool,
    last_trigger: Mutex<Option<LastTrigger>>,
    cancel: Mutex<CancellationToken>,
    synthesizer: Mutex<Option<Arc<dyn SpeechSynthesizer>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Point-in-time view of a connection's voice state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceStatus {
    pub is_synthesizing: bool,
    pub audio_playing: bool,
    pub tts_cancel_requested: bool,
    pub barge_in_inflight: bool,
    pub last_barge_in_trigger: Option<String>,
    pub active_tasks: usize,
}

impl Default for VoiceControl {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceControl {
    pub fn new() -> Self {
        Self {
            is_synthesizing: AtomicBool::new(false),
            audio_playing: AtomicBool::new(false),
            tts_cancel_requested: AtomicBool::new(false),
            inflight: AtomicBool::new(false),
            last_trigger: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            synthesizer: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Synthesis began. Clears any pending cancel request and returns the
    /// token the synthesis loop should watch.
    pub fn synthesis_started(&self) -> CancellationToken {
        self.tts_cancel_requested.store(false, Ordering::SeqCst);
        self.is_synthesizing.store(true, Ordering::SeqCst);
        let mut cancel = self.cancel.lock();
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
        cancel.clone()
    }

    pub fn synthesis_finished(&self) {
        self.is_synthesizing.store(false, Ordering::SeqCst);
    }

    pub fn audio_started(&self) {
        self.audio_playing.store(true, Ordering::SeqCst);
    }

    pub fn audio_finished(&self) {
        self.audio_playing.store(false, Ordering::SeqCst);
    }

    pub fn is_synthesizing(&self) -> bool {
        self.is_synthesizing.load(Ordering::SeqCst)
    }

    pub fn is_audio_playing(&self) -> bool {
        self.audio_playing.load(Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.tts_cancel_requested.load(Ordering::SeqCst)
    }

    pub fn is_inflight(&self) -> bool {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Whether there is assistant output a barge-in could interrupt.
    pub fn is_active(&self) -> bool {
        self.is_synthesizing() || self.is_audio_playing() || self.is_cancel_requested()
    }

    /// Token cancelled on the next barge-in.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Bind the synthesizer stopped on barge-in, returning the previous one.
    pub fn bind_synthesizer(
        &self,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.synthesizer.lock().replace(synthesizer)
    }

    pub fn unbind_synthesizer(&self) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.synthesizer.lock().take()
    }

    /// Track an orchestration task so barge-in can cancel it.
    pub fn track_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Number of tracked tasks still running.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }

    pub fn status(&self) -> VoiceStatus {
        VoiceStatus {
            is_synthesizing: self.is_synthesizing(),
            audio_playing: self.is_audio_playing(),
            tts_cancel_requested: self.is_cancel_requested(),
            barge_in_inflight: self.is_inflight(),
            last_barge_in_trigger: self
                .last_trigger
                .lock()
                .as_ref()
                .map(|last| last.source.clone()),
            active_tasks: self.active_tasks(),
        }
    }

    /// Claim the handling pass. Returns `false` if one is already running.
    pub(crate) fn try_begin(&self) -> bool {
        self.inflight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        self.inflight.store(false, Ordering::SeqCst);
    }

    /// Whether `source` started a handling pass within `window`.
    pub(crate) fn debounced(&self, source: &str, window: Duration) -> bool {
        self.last_trigger.lock().as_ref().is_some_and(|previous| {
            previous.source == source && previous.at.elapsed() < window
        })
    }

    /// Stamp the trigger that claimed the current pass.
    pub(crate) fn record_trigger(&self, source: &str) {
        *self.last_trigger.lock() = Some(LastTrigger {
            source: source.to_string(),
            at: Instant::now(),
        });
    }

    pub(crate) fn halt(&self) {
        self.is_synthesizing.store(false, Ordering::SeqCst);
        self.audio_playing.store(false, Ordering::SeqCst);
        self.tts_cancel_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn synthesizer(&self) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.synthesizer.lock().clone()
    }

    /// Cancel the current token and arm a fresh one for the next turn.
    pub(crate) fn signal_cancel(&self) {
        let mut cancel = self.cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    pub(crate) fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock())
    }

    /// Cancel everything for a connection that is going away.
    pub(crate) fn teardown(&self) {
        self.cancel.lock().cancel();
        for task in self.take_tasks() {
            task.abort();
        }
        self.synthesizer.lock().take();
        self.is_synthesizing.store(false, Ordering::SeqCst);
        self.audio_playing.store(false, Ordering::SeqCst);
    }
}
