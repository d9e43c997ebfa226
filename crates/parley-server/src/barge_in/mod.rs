//! Barge-in: stop assistant output when the user starts talking over it.
//!
//! A handling pass for one connection runs these steps in order:
//!
//! 1. claim the connection's inflight flag (a concurrent trigger is dropped)
//! 2. clear the synthesizing/playing flags and request TTS cancellation
//! 3. stop the bound speech synthesizer
//! 4. cancel the connection's token and interrupt the session playback queue
//! 5. abort tracked orchestration tasks, giving each a short grace period
//! 6. tell the client with `tts_cancelled` and `audio_stop` envelopes
//! 7. release the inflight flag, whatever happened above
//!
//! Failures in steps 3 to 6 are logged and never abort the pass.

mod control;

pub use control::{SpeechSynthesizer, VoiceControl, VoiceStatus};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use parley_session::SessionRegistry;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BargeInConfig;
use crate::connections::{ConnectionId, ConnectionRegistry, Envelope};

/// Envelope topic for voice control notices.
pub const VOICE_TOPIC: &str = "voice";

/// Why a trigger did not start a handling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    UnknownConnection,
    Inflight,
    Debounced,
    /// Nothing was being synthesized or played.
    Idle,
}

/// Result of one barge-in trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum BargeInOutcome {
    Handled,
    Suppressed(SuppressReason),
}

/// Counters for `/stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BargeInStats {
    pub handled: u64,
    pub suppressed: u64,
    pub pending_requests: usize,
}

#[derive(Debug)]
struct BargeInRequest {
    connection_id: ConnectionId,
    trigger: String,
    stage: String,
}

struct Dispatcher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct CoordinatorInner {
    registry: ConnectionRegistry,
    sessions: Option<SessionRegistry>,
    config: BargeInConfig,
    requests: mpsc::UnboundedSender<BargeInRequest>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<BargeInRequest>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
    handled: AtomicU64,
    suppressed: AtomicU64,
}

/// Clears the inflight flag when the pass ends, including on unwind.
struct InflightGuard<'a>(&'a VoiceControl);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Coordinates barge-in handling across connections.
///
/// Cloning is cheap; clones share the same coordinator.
#[derive(Clone)]
pub struct BargeInCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl BargeInCoordinator {
    pub fn new(registry: ConnectionRegistry, config: BargeInConfig) -> Self {
        let (requests, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(CoordinatorInner {
                registry,
                sessions: None,
                config,
                requests,
                receiver: Mutex::new(Some(receiver)),
                dispatcher: Mutex::new(None),
                handled: AtomicU64::new(0),
                suppressed: AtomicU64::new(0),
            }),
        }
    }

    /// Create a coordinator that also interrupts session playback queues.
    pub fn with_sessions(
        registry: ConnectionRegistry,
        sessions: SessionRegistry,
        config: BargeInConfig,
    ) -> Self {
        let (requests, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(CoordinatorInner {
                registry,
                sessions: Some(sessions),
                config,
                requests,
                receiver: Mutex::new(Some(receiver)),
                dispatcher: Mutex::new(None),
                handled: AtomicU64::new(0),
                suppressed: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BargeInConfig {
        &self.inner.config
    }

    /// Queue a trigger for the dispatcher. Callable from any thread,
    /// including ones outside the runtime.
    ///
    /// Requests queued before [`start`](Self::start) are handled once it
    /// runs. Returns `false` after [`shutdown`](Self::shutdown).
    pub fn request(&self, connection_id: ConnectionId, trigger: &str, stage: &str) -> bool {
        let request = BargeInRequest {
            connection_id,
            trigger: trigger.to_string(),
            stage: stage.to_string(),
        };
        match self.inner.requests.send(request) {
            Ok(()) => true,
            Err(_) => {
                debug!(connection_id = %connection_id, trigger, stage, "Barge-in dispatcher stopped, request dropped");
                false
            }
        }
    }

    /// Start the dispatcher that drains [`request`](Self::request)s.
    ///
    /// Must be called from within a tokio runtime. Later calls do nothing.
    pub fn start(&self) {
        let Some(receiver) = self.inner.receiver.lock().take() else {
            return;
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_dispatcher(
            Arc::downgrade(&self.inner),
            receiver,
            cancel.clone(),
        ));
        *self.inner.dispatcher.lock() = Some(Dispatcher { cancel, handle });
        debug!("Barge-in dispatcher started");
    }

    /// Stop the dispatcher, letting in-progress passes finish.
    pub async fn shutdown(&self) {
        // Dropping an unstarted receiver makes later requests fail fast.
        self.inner.receiver.lock().take();

        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.cancel.cancel();
            if let Err(e) = dispatcher.handle.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "Barge-in dispatcher ended abnormally");
            }
        }
        info!("Barge-in coordinator shut down");
    }

    pub fn stats(&self) -> BargeInStats {
        BargeInStats {
            handled: self.inner.handled.load(Ordering::Relaxed),
            suppressed: self.inner.suppressed.load(Ordering::Relaxed),
            pending_requests: self.inner.receiver.lock().as_ref().map_or(0, |r| r.len()),
        }
    }

    fn suppressed(
        &self,
        connection_id: ConnectionId,
        trigger: &str,
        reason: SuppressReason,
    ) -> BargeInOutcome {
        self.inner.suppressed.fetch_add(1, Ordering::Relaxed);
        trace!(connection_id = %connection_id, trigger, ?reason, "Barge-in suppressed");
        BargeInOutcome::Suppressed(reason)
    }

    /// Run a handling pass on the current task.
    pub async fn handle(
        &self,
        connection_id: ConnectionId,
        trigger: &str,
        stage: &str,
    ) -> BargeInOutcome {
        let Some(voice) = self.inner.registry.voice(connection_id) else {
            return self.suppressed(connection_id, trigger, SuppressReason::UnknownConnection);
        };
        if voice.is_inflight() {
            return self.suppressed(connection_id, trigger, SuppressReason::Inflight);
        }
        if voice.debounced(trigger, self.inner.config.debounce) {
            return self.suppressed(connection_id, trigger, SuppressReason::Debounced);
        }
        if !voice.is_active() {
            return self.suppressed(connection_id, trigger, SuppressReason::Idle);
        }
        if !voice.try_begin() {
            return self.suppressed(connection_id, trigger, SuppressReason::Inflight);
        }
        voice.record_trigger(trigger);

        let _guard = InflightGuard(&voice);
        self.run_pass(connection_id, &voice, trigger, stage).await;
        self.inner.handled.fetch_add(1, Ordering::Relaxed);
        BargeInOutcome::Handled
    }

    async fn run_pass(
        &self,
        connection_id: ConnectionId,
        voice: &VoiceControl,
        trigger: &str,
        stage: &str,
    ) {
        info!(connection_id = %connection_id, trigger, stage, "Barge-in: cancelling assistant output");

        voice.halt();

        if let Some(synthesizer) = voice.synthesizer()
            && let Err(e) = synthesizer.stop().await
        {
            warn!(connection_id = %connection_id, stage, error = %e, "Failed to stop synthesizer");
        }

        voice.signal_cancel();
        let info = self.inner.registry.connection(connection_id);
        let session_id = info.as_ref().and_then(|i| i.session_id.clone());
        if let (Some(sessions), Some(session_id)) = (&self.inner.sessions, &session_id)
            && let Some(session) = sessions.get_session(session_id)
        {
            let cleared = session.interrupt_playback();
            debug!(connection_id = %connection_id, session_id = %session_id, cleared, "Playback queue interrupted");
        }

        let tasks = voice.take_tasks();
        let (aborted, abandoned) = self.cancel_tasks(tasks).await;
        if aborted > 0 {
            debug!(connection_id = %connection_id, aborted, abandoned, "Orchestration tasks cancelled");
        }

        let payload = json!({ "trigger": trigger, "stage": stage });
        for kind in ["tts_cancelled", "audio_stop"] {
            let mut envelope = Envelope::new(kind, VOICE_TOPIC).with_payload(payload.clone());
            if let Some(session_id) = &session_id {
                envelope = envelope.with_session(session_id.clone());
            }
            if !self.inner.registry.send_to(connection_id, &envelope) {
                debug!(connection_id = %connection_id, kind, "Control message not delivered");
            }
        }
    }

    /// Abort each task and wait up to the grace period for it to end.
    /// Returns how many were running and how many outlived the grace period.
    async fn cancel_tasks(&self, tasks: Vec<JoinHandle<()>>) -> (usize, usize) {
        let grace = self.inner.config.task_grace;
        let running: Vec<JoinHandle<()>> = tasks.into_iter().filter(|t| !t.is_finished()).collect();
        let count = running.len();

        let waits = running.into_iter().map(|handle| async move {
            handle.abort();
            tokio::time::timeout(grace, handle).await.is_err()
        });
        let abandoned = futures::future::join_all(waits)
            .await
            .into_iter()
            .filter(|timed_out| *timed_out)
            .count();
        (count, abandoned)
    }
}

async fn run_dispatcher(
    coordinator: Weak<CoordinatorInner>,
    mut receiver: mpsc::UnboundedReceiver<BargeInRequest>,
    cancel: CancellationToken,
) {
    let mut passes = JoinSet::new();
    loop {
        while passes.try_join_next().is_some() {}

        let request = tokio::select! {
            () = cancel.cancelled() => break,
            request = receiver.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let Some(inner) = coordinator.upgrade() else {
            break;
        };
        let coordinator = BargeInCoordinator { inner };
        passes.spawn(async move {
            let outcome = coordinator
                .handle(request.connection_id, &request.trigger, &request.stage)
                .await;
            trace!(connection_id = %request.connection_id, ?outcome, "Barge-in request processed");
        });
    }

    while let Some(result) = passes.join_next().await {
        if let Err(e) = result
            && e.is_panic()
        {
            warn!(error = %e, "Barge-in pass panicked");
        }
    }
}
