// session: the capture loop (acquire, capture, classify, render).
//
// One controller owns one media stream and at most one in-flight
// classification. Every capture aborts the previous outstanding call, and a
// completion is only rendered if it still belongs to the latest capture of the
// live session, so overlays never go backwards and nothing renders after stop.
// Spawned work (ticks, the once-mode cycle) only holds a `Weak` to the shared
// state across awaits, so dropping the last handle releases the device even
// while a call is outstanding.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::ai::{AiError, Classifier, Detection};
use crate::capture::{now_iso, DeviceError, Frame, MediaDevice, MediaStream};
use crate::render::{self, RenderedDetection};
use crate::sink::{record_event, EventSink, LogSink};
use crate::webhook::WebhookClient;

pub mod types;
pub use types::*;

/// Grabs run on the blocking pool, outside the session lock.
type SharedStream = Arc<Mutex<Box<dyn MediaStream>>>;

fn lock_stream(stream: &SharedStream) -> MutexGuard<'_, Box<dyn MediaStream>> {
    stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    state: SessionState,
    config: SessionConfig,
    stream: Option<SharedStream>,
    /// Abort handle of the outstanding classification, if any.
    pending: Option<AbortHandle>,
    /// Repeating ticker (continuous) or the single-shot task (once).
    timer: Option<JoinHandle<()>>,
    /// Bumped on every start.
    session: u64,
    /// Id of the latest capture issued. Never reset.
    cycle: u64,
}

impl Inner {
    fn is_current(&self, session: u64, cycle: u64) -> bool {
        self.session == session && self.cycle == cycle && self.state.is_active()
    }

    /// Abort the outstanding call, stop every track, cancel the timer. In that order.
    fn teardown(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        if let Some(stream) = self.stream.take() {
            lock_stream(&stream).stop();
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    device: Arc<dyn MediaDevice>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn EventSink>,
    webhook: Option<Arc<WebhookClient>>,
    state_tx: watch::Sender<SessionState>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_running(&self, session: u64) -> bool {
        let inner = self.lock();
        inner.session == session && inner.state.is_active()
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    /// Caller holds the lock, so the error cannot race a later stop.
    fn emit_error(&self, cycle: u64, err: &SessionError) {
        log::warn!("Capture cycle {} failed: {}", cycle, err);
        let payload = ErrorPayload {
            cycle,
            kind: err.kind().to_string(),
            message: err.to_string(),
            timestamp: now_iso(),
        };
        record_event("error", &payload);
        self.sink.on_error(&payload);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.state.is_active() {
            log::info!("Capture controller dropped while running, releasing device");
        }
        inner.teardown();
    }
}

/// Drives a capture session against a device, a classifier and a sink.
///
/// Cloning is cheap and every clone controls the same session. The session is
/// torn down when the last clone is dropped.
#[derive(Clone)]
pub struct CaptureLoopController {
    shared: Arc<Shared>,
}

pub struct ControllerBuilder {
    device: Arc<dyn MediaDevice>,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn EventSink>,
    webhook: Option<Arc<WebhookClient>>,
}

impl ControllerBuilder {
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn webhook(mut self, webhook: Option<WebhookClient>) -> Self {
        self.webhook = webhook.map(Arc::new);
        self
    }

    pub fn build(self) -> CaptureLoopController {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        CaptureLoopController {
            shared: Arc::new(Shared {
                device: self.device,
                classifier: self.classifier,
                sink: self.sink,
                webhook: self.webhook,
                state_tx,
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    config: SessionConfig::default(),
                    stream: None,
                    pending: None,
                    timer: None,
                    session: 0,
                    cycle: 0,
                }),
            }),
        }
    }
}

impl CaptureLoopController {
    /// Start building a controller. Events go to a [`LogSink`] unless a sink is set.
    pub fn builder(device: Arc<dyn MediaDevice>, classifier: Arc<dyn Classifier>) -> ControllerBuilder {
        ControllerBuilder {
            device,
            classifier,
            sink: Arc::new(LogSink),
            webhook: None,
        }
    }

    pub fn new(
        device: Arc<dyn MediaDevice>,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::builder(device, classifier).sink(sink).build()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Config of the current (or last) session.
    pub fn config(&self) -> SessionConfig {
        self.shared.lock().config.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Resolve once no session is active.
    pub async fn wait_stopped(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| !s.is_active()).await;
    }

    /// Tracks still live on the owned stream.
    pub fn active_tracks(&self) -> usize {
        self.shared
            .lock()
            .stream
            .as_ref()
            .map_or(0, |s| lock_stream(s).active_tracks())
    }

    /// Acquire the device and begin capturing.
    ///
    /// Continuous mode captures immediately and then every `interval_ms`;
    /// once mode runs a single cycle and stops. Starting an active session
    /// restarts it.
    pub async fn start(&self, config: SessionConfig) -> Result<(), SessionError> {
        config.validate()?;
        if self.state().is_active() {
            log::info!("Restarting capture session");
            self.stop();
        }

        let stream = self
            .shared
            .device
            .acquire(&config.constraints)
            .await
            .map_err(SessionError::DeviceUnavailable)?;

        let mut inner = self.shared.lock();
        if inner.state.is_active() {
            // A concurrent start won the race while we were acquiring.
            inner.teardown();
        }
        inner.session += 1;
        let session = inner.session;
        inner.stream = Some(Arc::new(Mutex::new(stream)));
        inner.config = config.clone();

        let handle = match config.mode {
            Mode::Continuous => {
                self.shared.set_state(&mut inner, SessionState::Running);
                spawn_ticker(
                    Arc::downgrade(&self.shared),
                    Duration::from_millis(config.interval_ms),
                    session,
                )
            }
            Mode::Once => {
                self.shared.set_state(&mut inner, SessionState::RunningOnce);
                let weak = Arc::downgrade(&self.shared);
                tokio::spawn(async move {
                    let _ = run_cycle(weak.clone(), Some(session)).await;
                    if let Some(shared) = weak.upgrade() {
                        shared.finish_once(session);
                    }
                })
            }
        };
        inner.timer = Some(handle);

        log::info!(
            "Capture session {} started on {} with {} ({:?}, every {}ms, min {}%)",
            session,
            self.shared.device.name(),
            self.shared.classifier.name(),
            config.mode,
            config.interval_ms,
            config.min_confidence
        );
        Ok(())
    }

    /// Abort the outstanding classification, release the device, cancel the
    /// timer and clear the overlay. No-op when nothing is running.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if !inner.state.is_active() {
            return;
        }
        inner.teardown();
        self.shared.set_state(&mut inner, SessionState::Stopped);
        record_event("clear", &serde_json::Value::Null);
        self.shared.sink.on_clear();
        log::info!("Capture session {} stopped", inner.session);
    }

    /// Run one capture cycle now: grab, classify, filter, sort, emit.
    ///
    /// Supersedes any outstanding classification of this session. Returns
    /// [`SessionError::Aborted`] (without emitting anything) when this cycle is
    /// itself superseded or the session stops first.
    pub async fn capture_once(&self) -> Result<Vec<RenderedDetection>, SessionError> {
        run_cycle(Arc::downgrade(&self.shared), None).await
    }
}

impl Shared {
    /// Take the next cycle id for the running session and abort whatever
    /// classification is still outstanding.
    fn claim_cycle(&self, expected: Option<u64>) -> Result<(u64, u64, SharedStream), SessionError> {
        let mut inner = self.lock();
        if !inner.state.is_active() {
            return Err(SessionError::NotRunning);
        }
        if expected.is_some_and(|s| s != inner.session) {
            return Err(SessionError::Aborted);
        }
        let stream = inner.stream.clone().ok_or(SessionError::NotRunning)?;
        inner.cycle += 1;
        let cycle = inner.cycle;
        if let Some(previous) = inner.pending.take() {
            log::debug!("Cycle {} supersedes an outstanding classification", cycle);
            previous.abort();
        }
        Ok((inner.session, cycle, stream))
    }

    /// Hand a grabbed frame to the classifier, unless a newer capture or a
    /// stop got in while it was being grabbed.
    fn issue(
        &self,
        session: u64,
        cycle: u64,
        grabbed: Result<Frame, DeviceError>,
    ) -> Result<(Arc<Frame>, ClassifyTask), SessionError> {
        let mut inner = self.lock();
        if !inner.is_current(session, cycle) {
            return Err(SessionError::Aborted);
        }
        let frame = match grabbed {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                let err = SessionError::FrameUnavailable(e);
                self.emit_error(cycle, &err);
                return Err(err);
            }
        };
        log::debug!(
            "Cycle {}: classifying {}x{} frame",
            cycle,
            frame.width,
            frame.height
        );

        let classifier = Arc::clone(&self.classifier);
        let task_frame = Arc::clone(&frame);
        let task = tokio::spawn(async move { classifier.classify(&task_frame).await });
        inner.pending = Some(task.abort_handle());
        Ok((frame, task))
    }

    /// Render or report a finished classification if it is still the latest
    /// capture of the live session.
    fn complete(
        &self,
        session: u64,
        cycle: u64,
        frame: Arc<Frame>,
        outcome: Result<Vec<Detection>, AiError>,
    ) -> Result<Vec<RenderedDetection>, SessionError> {
        let mut inner = self.lock();
        if !inner.is_current(session, cycle) {
            log::debug!("Dropping stale result of cycle {}", cycle);
            return Err(SessionError::Aborted);
        }
        inner.pending = None;

        match outcome {
            Ok(detections) => {
                let raw = detections.len();
                let rendered = render::prepare(
                    detections,
                    inner.config.min_confidence,
                    inner.config.sort,
                    frame.width,
                    frame.height,
                );
                log::debug!("Cycle {}: {} of {} detections kept", cycle, rendered.len(), raw);
                let payload = ResultPayload {
                    cycle,
                    timestamp: frame.timestamp.clone(),
                    frame_width: frame.width,
                    frame_height: frame.height,
                    detections: rendered.clone(),
                };
                record_event("result", &payload);
                self.sink.on_result(&payload);
                drop(inner);

                if let Some(webhook) = &self.webhook {
                    webhook.fire(payload, frame);
                }
                Ok(rendered)
            }
            Err(e) => {
                let err = SessionError::ClassificationFailed(e);
                self.emit_error(cycle, &err);
                Err(err)
            }
        }
    }

    /// End of a once-mode session: release everything but keep the overlay.
    fn finish_once(&self, session: u64) {
        let mut inner = self.lock();
        if inner.session != session || !inner.state.is_active() {
            return;
        }
        // This is the running task's own handle; detach rather than abort it.
        drop(inner.timer.take());
        inner.teardown();
        self.set_state(&mut inner, SessionState::Stopped);
        log::info!("Capture session {} finished its single cycle", session);
    }
}

type ClassifyTask = JoinHandle<Result<Vec<Detection>, AiError>>;

fn upgrade(shared: &Weak<Shared>) -> Result<Arc<Shared>, SessionError> {
    shared.upgrade().ok_or(SessionError::Aborted)
}

/// One capture cycle: grab, classify, filter, sort, emit.
///
/// Strong references are only taken between awaits.
async fn run_cycle(
    shared: Weak<Shared>,
    expected: Option<u64>,
) -> Result<Vec<RenderedDetection>, SessionError> {
    let (session, cycle, stream) = upgrade(&shared)?.claim_cycle(expected)?;

    let grabbed = tokio::task::spawn_blocking(move || lock_stream(&stream).grab())
        .await
        .unwrap_or_else(|e| Err(DeviceError::FrameUnavailable(format!("grab task failed: {e}"))));

    let (frame, task) = upgrade(&shared)?.issue(session, cycle, grabbed)?;

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_cancelled() => {
            log::debug!("Cycle {} aborted", cycle);
            return Err(SessionError::Aborted);
        }
        Err(e) => Err(AiError::ModelError(format!("classifier task failed: {e}"))),
    };

    upgrade(&shared)?.complete(session, cycle, frame, outcome)
}

/// Repeating timer. Holds only a weak reference so dropping the last
/// controller handle ends the loop.
fn spawn_ticker(shared: Weak<Shared>, period: Duration, session: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // The first tick completes immediately.
            ticker.tick().await;
            if !shared.upgrade().is_some_and(|s| s.is_running(session)) {
                break;
            }
            // Not awaited: the next tick must be able to supersede a slow call.
            tokio::spawn(run_cycle(shared.clone(), Some(session)));
        }
        log::debug!("Ticker for session {} exited", session);
    })
}
