//! Identification and enrollment sessions.
//!
//! Each session runs on its own blocking task and owns the camera for its
//! whole lifetime. Identification resolves to exactly one [`Outcome`]; at most
//! one ledger write happens per session, after the winning frame is scanned
//! and before the camera is released.

use crate::store::{AttendanceLedger, EmployeeDirectory, NewEmployee, StoreError};
use base64::Engine as _;
use ponto_core::{
    DetectParams, DetectorError, DirectoryEntry, EnrollmentForm, FaceHasher, FaceLocator,
    Fingerprint, HammingMatcher, HashError, Matcher, NearestMatch, ValidationError,
};
use ponto_hw::frame::FACE_BOX_COLOR;
use ponto_hw::{
    CameraDevice, CameraError, CaptureSession, DeviceSlot, Frame, FrameError, SessionError, SlotGuard,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

const OVERLAY_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture device busy")]
    Busy,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("hash error: {0}")]
    Hash(#[from] HashError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("session task failed: {0}")]
    TaskFailed(String),
}

/// Engine tunables. See `Config::engine_settings` for the defaults' source.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub match_threshold: u32,
    pub identify_window: Duration,
    pub enroll_window: Duration,
    pub frame_pacing: Duration,
    pub identify_params: DetectParams,
    pub enroll_params: DetectParams,
    pub jpeg_quality: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            match_threshold: 15,
            identify_window: Duration::from_secs(5),
            enroll_window: Duration::from_secs(10),
            frame_pacing: Duration::from_millis(30),
            identify_params: DetectParams::identification(),
            enroll_params: DetectParams::enrollment(),
            jpeg_quality: 80,
        }
    }
}

impl EngineSettings {
    fn policy(&self) -> DecisionPolicy {
        DecisionPolicy {
            threshold: self.match_threshold,
            window: self.identify_window,
        }
    }
}

/// Terminal result of an identification session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Identified {
        employee_id: i64,
        name: String,
        registration_number: String,
        distance: u32,
        event_id: i64,
        portrait_base64: String,
    },
    Rejected {
        best_distance: u32,
        employee_id: i64,
    },
    NoFaceDetected,
    Cancelled,
    Error {
        message: String,
    },
}

impl Outcome {
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Identified { .. } => "identified",
            Outcome::Rejected { .. } => "rejected",
            Outcome::NoFaceDetected => "no_face_detected",
            Outcome::Cancelled => "cancelled",
            Outcome::Error { .. } => "error",
        }
    }
}

/// Terminal result of an enrollment capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnrollmentOutcome {
    Captured {
        fingerprint: Fingerprint,
        detections: u32,
    },
    NoFaceDetected,
    Cancelled,
    Error {
        message: String,
    },
}

impl EnrollmentOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            EnrollmentOutcome::Captured { .. } => "captured",
            EnrollmentOutcome::NoFaceDetected => "no_face_detected",
            EnrollmentOutcome::Cancelled => "cancelled",
            EnrollmentOutcome::Error { .. } => "error",
        }
    }
}

// --- Decision policy ---

/// Acceptance threshold and time budget of an identification session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionPolicy {
    /// Largest Hamming distance accepted as a match.
    pub threshold: u32,
    pub window: Duration,
}

/// Closest roster entry to one frame's face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub nearest: NearestMatch,
    pub entry: DirectoryEntry,
}

/// How a [`MatchSession`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Accepted(Candidate),
    Rejected(Candidate),
    NoFace,
    Cancelled,
}

/// Per-session decision state. Resolves exactly once.
#[derive(Debug)]
pub struct MatchSession {
    policy: DecisionPolicy,
    best: Option<Candidate>,
    resolved: bool,
}

impl MatchSession {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self {
            policy,
            best: None,
            resolved: false,
        }
    }

    /// Feed one frame's result. Returns the resolution on the transition to a
    /// terminal state, `None` while scanning and on every call after that.
    ///
    /// The first frame at or under the threshold wins immediately; otherwise
    /// the window expiring rejects with the best candidate seen, if any.
    pub fn observe(&mut self, frame_best: Option<Candidate>, elapsed: Duration) -> Option<Resolution> {
        if self.resolved {
            return None;
        }

        if let Some(candidate) = frame_best {
            let improves = self
                .best
                .as_ref()
                .map_or(true, |b| candidate.nearest.distance < b.nearest.distance);
            if improves {
                self.best = Some(candidate.clone());
            }
            if candidate.nearest.distance <= self.policy.threshold {
                self.resolved = true;
                return Some(Resolution::Accepted(candidate));
            }
        }

        if elapsed >= self.policy.window {
            self.resolved = true;
            return Some(match self.best.clone() {
                Some(best) => Resolution::Rejected(best),
                None => Resolution::NoFace,
            });
        }

        None
    }

    /// Resolve as cancelled unless already resolved.
    pub fn cancel(&mut self) -> Option<Resolution> {
        if self.resolved {
            return None;
        }
        self.resolved = true;
        Some(Resolution::Cancelled)
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.best.as_ref()
    }
}

// --- UI notifications ---

/// Fire-and-forget message for whatever UI is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Frame { session: Uuid, jpeg: Vec<u8> },
    Status { session: Uuid, text: String },
    Finished { session: Uuid, outcome_json: String },
}

/// Pushes [`UiEvent`]s without waiting for anyone to read them.
#[derive(Debug, Clone)]
pub struct UiNotifier {
    tx: Option<mpsc::UnboundedSender<UiEvent>>,
}

impl UiNotifier {
    pub fn new(tx: mpsc::UnboundedSender<UiEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    fn push(&self, event: UiEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::debug!("ui receiver gone, dropping event");
            }
        }
    }

    pub fn frame(&self, session: Uuid, frame: &Frame, quality: u8) {
        if self.tx.is_none() {
            return;
        }
        match frame.encode_jpeg(quality) {
            Ok(jpeg) => self.push(UiEvent::Frame { session, jpeg }),
            Err(e) => tracing::warn!(error = %e, "failed to encode ui frame"),
        }
    }

    pub fn status(&self, session: Uuid, text: String) {
        self.push(UiEvent::Status { session, text });
    }

    pub fn finished<T: Serialize>(&self, session: Uuid, outcome: &T) {
        match serde_json::to_string(outcome) {
            Ok(outcome_json) => self.push(UiEvent::Finished { session, outcome_json }),
            Err(e) => tracing::warn!(error = %e, "failed to serialize outcome"),
        }
    }
}

fn countdown_text(window: Duration, elapsed: Duration) -> String {
    format!("{} seconds remaining", window.saturating_sub(elapsed).as_secs())
}

// --- Sessions ---

/// Cooperative stop flag, checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a session task needs besides its collaborators.
#[derive(Clone)]
struct SessionContext {
    id: Uuid,
    cancel: CancelToken,
    notifier: UiNotifier,
}

/// Handle to a running session task. Stop it through [`Engine::cancel_active`].
pub struct SessionHandle<T> {
    pub id: Uuid,
    task: tokio::task::JoinHandle<T>,
}

impl<T> SessionHandle<T> {
    /// Wait for the session's terminal outcome.
    pub async fn join(self) -> Result<T, EngineError> {
        self.task
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))
    }
}

/// Services a session depends on.
pub struct Collaborators {
    pub camera: Arc<dyn CameraDevice>,
    pub slot: DeviceSlot,
    pub locator: Arc<dyn FaceLocator>,
    pub hasher: Arc<dyn FaceHasher>,
    pub directory: Arc<dyn EmployeeDirectory>,
    pub ledger: Arc<dyn AttendanceLedger>,
}

/// Face captured during enrollment, waiting for the form to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentCandidate {
    pub fingerprint: Fingerprint,
    /// JPEG of the face crop, stored as the portrait.
    pub portrait_jpeg: Vec<u8>,
}

/// Snapshot for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub busy: bool,
    pub session: Option<Uuid>,
    pub session_kind: Option<&'static str>,
    pub enrollment_pending: bool,
}

struct ActiveSession {
    id: Uuid,
    kind: &'static str,
    cancel: CancelToken,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Starts capture sessions and holds the enrollment candidate between capture and submit.
pub struct Engine {
    deps: Arc<Collaborators>,
    settings: EngineSettings,
    notifier: UiNotifier,
    active: Mutex<Option<ActiveSession>>,
    pending_enrollment: Arc<Mutex<Option<EnrollmentCandidate>>>,
}

impl Engine {
    pub fn new(deps: Collaborators, settings: EngineSettings, notifier: UiNotifier) -> Self {
        Self {
            deps: Arc::new(deps),
            settings,
            notifier,
            active: Mutex::new(None),
            pending_enrollment: Arc::new(Mutex::new(None)),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Claim the camera and record the new session as active under one lock.
    fn begin_session(&self, kind: &'static str) -> Result<(SessionContext, SlotGuard), EngineError> {
        let mut active = lock(&self.active);
        let guard = self.deps.slot.try_acquire().ok_or(EngineError::Busy)?;
        let ctx = SessionContext {
            id: Uuid::new_v4(),
            cancel: CancelToken::default(),
            notifier: self.notifier.clone(),
        };
        *active = Some(ActiveSession {
            id: ctx.id,
            kind,
            cancel: ctx.cancel.clone(),
        });
        tracing::info!(session = %ctx.id, kind, "session started");
        Ok((ctx, guard))
    }

    /// Start an identification session. Fails fast if the camera is taken.
    pub fn start_identification(&self) -> Result<SessionHandle<Outcome>, EngineError> {
        let (ctx, guard) = self.begin_session("identification")?;

        let deps = Arc::clone(&self.deps);
        let settings = self.settings.clone();
        let task_ctx = ctx.clone();
        let task = tokio::task::spawn_blocking(move || {
            let outcome = run_identification(&deps, &settings, &task_ctx, guard);
            tracing::info!(session = %task_ctx.id, outcome = outcome.kind(), "identification finished");
            task_ctx.notifier.finished(task_ctx.id, &outcome);
            outcome
        });

        Ok(SessionHandle { id: ctx.id, task })
    }

    /// Start an enrollment capture. Any previously captured candidate is discarded.
    pub fn start_enrollment(&self) -> Result<SessionHandle<EnrollmentOutcome>, EngineError> {
        let (ctx, guard) = self.begin_session("enrollment")?;
        *lock(&self.pending_enrollment) = None;

        let deps = Arc::clone(&self.deps);
        let settings = self.settings.clone();
        let pending = Arc::clone(&self.pending_enrollment);
        let task_ctx = ctx.clone();
        let task = tokio::task::spawn_blocking(move || {
            let (outcome, candidate) = run_enrollment(&deps, &settings, &task_ctx, guard);
            if let Some(candidate) = candidate {
                *lock(&pending) = Some(candidate);
            }
            tracing::info!(session = %task_ctx.id, outcome = outcome.kind(), "enrollment capture finished");
            task_ctx.notifier.finished(task_ctx.id, &outcome);
            outcome
        });

        Ok(SessionHandle { id: ctx.id, task })
    }

    /// Signal the running session to stop. Returns false when nothing is running.
    pub fn cancel_active(&self) -> bool {
        let active = lock(&self.active);
        if !self.deps.slot.is_busy() {
            return false;
        }
        match active.as_ref() {
            Some(active) => {
                tracing::info!(session = %active.id, "cancel requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Validate the form against the captured face and insert the employee.
    /// The candidate is kept if validation or the insert fails.
    pub fn submit_enrollment(&self, form: &EnrollmentForm) -> Result<i64, EngineError> {
        let mut pending = lock(&self.pending_enrollment);
        let candidate = pending.as_ref();
        let enrollment = ponto_core::enrollment::validate(form, candidate.map(|c| &c.fingerprint))?;
        let portrait = candidate.map(|c| c.portrait_jpeg.clone()).unwrap_or_default();

        let id = self.deps.directory.insert(&NewEmployee {
            enrollment,
            portrait,
        })?;
        *pending = None;
        Ok(id)
    }

    /// Drop the captured candidate. Returns whether there was one.
    pub fn discard_enrollment(&self) -> bool {
        lock(&self.pending_enrollment).take().is_some()
    }

    pub fn status(&self) -> EngineStatus {
        let busy = self.deps.slot.is_busy();
        let active = lock(&self.active);
        let current = active.as_ref().filter(|_| busy);
        EngineStatus {
            busy,
            session: current.map(|a| a.id),
            session_kind: current.map(|a| a.kind),
            enrollment_pending: lock(&self.pending_enrollment).is_some(),
        }
    }
}

/// One located and fingerprinted face.
struct FaceSample {
    fingerprint: Fingerprint,
    crop: Frame,
}

/// Read a frame, locate the first face, fingerprint it and push the
/// annotated frame to the UI.
fn capture_face(
    deps: &Collaborators,
    ctx: &SessionContext,
    capture: &mut CaptureSession,
    params: &DetectParams,
    jpeg_quality: u8,
) -> Result<Option<FaceSample>, EngineError> {
    let mut frame = capture.read_frame()?;
    let gray = frame.to_gray()?;
    let faces = deps.locator.locate(&gray, frame.width, frame.height, params)?;

    let Some(rect) = faces.first().copied() else {
        ctx.notifier.frame(ctx.id, &frame, jpeg_quality);
        return Ok(None);
    };
    if faces.len() > 1 {
        tracing::debug!(count = faces.len(), "multiple faces, using the first");
    }

    let crop = frame.crop(&rect)?;
    let fingerprint = deps.hasher.fingerprint(&crop.data, crop.width, crop.height)?;

    frame.draw_rect(&rect, FACE_BOX_COLOR, OVERLAY_THICKNESS);
    ctx.notifier.frame(ctx.id, &frame, jpeg_quality);

    Ok(Some(FaceSample { fingerprint, crop }))
}

/// Scan the current roster for the frame's face.
fn identify_frame(
    deps: &Collaborators,
    ctx: &SessionContext,
    capture: &mut CaptureSession,
    settings: &EngineSettings,
) -> Result<Option<Candidate>, EngineError> {
    let Some(sample) = capture_face(deps, ctx, capture, &settings.identify_params, settings.jpeg_quality)? else {
        return Ok(None);
    };

    let mut roster = deps.directory.scan_all()?;
    let Some(nearest) = HammingMatcher.nearest(&sample.fingerprint, &roster) else {
        tracing::debug!(roster = roster.len(), "face located but nothing enrolled to compare");
        return Ok(None);
    };
    tracing::debug!(
        session = %ctx.id,
        employee = nearest.employee_id,
        distance = nearest.distance,
        "frame scanned"
    );

    let entry = roster.swap_remove(nearest.index);
    Ok(Some(Candidate { nearest, entry }))
}

fn record_attendance(ledger: &dyn AttendanceLedger, accepted: Candidate) -> Outcome {
    let now = chrono::Local::now().naive_local();
    match ledger.append(now, accepted.nearest.employee_id) {
        Ok(event_id) => Outcome::Identified {
            employee_id: accepted.nearest.employee_id,
            name: accepted.entry.name,
            registration_number: accepted.entry.registration_number,
            distance: accepted.nearest.distance,
            event_id,
            portrait_base64: base64::engine::general_purpose::STANDARD.encode(&accepted.entry.portrait),
        },
        Err(e) => {
            tracing::error!(employee = accepted.nearest.employee_id, error = %e, "attendance write failed");
            Outcome::Error { message: e.to_string() }
        }
    }
}

fn run_identification(
    deps: &Collaborators,
    settings: &EngineSettings,
    ctx: &SessionContext,
    guard: SlotGuard,
) -> Outcome {
    let mut capture = match CaptureSession::open_with_guard(deps.camera.as_ref(), guard) {
        Ok(capture) => capture,
        Err(e) => {
            tracing::warn!(session = %ctx.id, error = %e, "failed to open capture session");
            return Outcome::Error { message: e.to_string() };
        }
    };

    let mut session = MatchSession::new(settings.policy());
    let started = Instant::now();

    let resolution = loop {
        if ctx.cancel.is_cancelled() {
            if let Some(resolution) = session.cancel() {
                break resolution;
            }
        }

        let frame_best = match identify_frame(deps, ctx, &mut capture, settings) {
            Ok(best) => best,
            Err(e) => {
                tracing::warn!(session = %ctx.id, error = %e, "identification aborted");
                return Outcome::Error { message: e.to_string() };
            }
        };

        let elapsed = started.elapsed();
        ctx.notifier
            .status(ctx.id, countdown_text(settings.identify_window, elapsed));

        if let Some(resolution) = session.observe(frame_best, elapsed) {
            break resolution;
        }

        std::thread::sleep(settings.frame_pacing);
    };

    if let Some(best) = session.best() {
        tracing::debug!(
            session = %ctx.id,
            employee = best.nearest.employee_id,
            distance = best.nearest.distance,
            "best candidate"
        );
    }

    let outcome = match resolution {
        Resolution::Accepted(candidate) => record_attendance(deps.ledger.as_ref(), candidate),
        Resolution::Rejected(best) => Outcome::Rejected {
            best_distance: best.nearest.distance,
            employee_id: best.nearest.employee_id,
        },
        Resolution::NoFace => Outcome::NoFaceDetected,
        Resolution::Cancelled => Outcome::Cancelled,
    };

    // Release only after the outcome (and any ledger write) is settled
    drop(capture);
    outcome
}

fn run_enrollment(
    deps: &Collaborators,
    settings: &EngineSettings,
    ctx: &SessionContext,
    guard: SlotGuard,
) -> (EnrollmentOutcome, Option<EnrollmentCandidate>) {
    let mut capture = match CaptureSession::open_with_guard(deps.camera.as_ref(), guard) {
        Ok(capture) => capture,
        Err(e) => {
            tracing::warn!(session = %ctx.id, error = %e, "failed to open capture session");
            return (EnrollmentOutcome::Error { message: e.to_string() }, None);
        }
    };

    let started = Instant::now();
    let mut candidate: Option<EnrollmentCandidate> = None;
    let mut detections = 0u32;

    loop {
        if ctx.cancel.is_cancelled() {
            return (EnrollmentOutcome::Cancelled, None);
        }

        let sample = capture_face(deps, ctx, &mut capture, &settings.enroll_params, settings.jpeg_quality)
            .and_then(|sample| match sample {
                Some(p) => Ok(Some(EnrollmentCandidate {
                    fingerprint: p.fingerprint,
                    portrait_jpeg: p.crop.encode_jpeg(settings.jpeg_quality)?,
                })),
                None => Ok(None),
            });

        match sample {
            // Latest detection replaces the previous candidate
            Ok(Some(latest)) => {
                detections += 1;
                candidate = Some(latest);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(session = %ctx.id, error = %e, "enrollment capture aborted");
                return (EnrollmentOutcome::Error { message: e.to_string() }, None);
            }
        }

        let elapsed = started.elapsed();
        let remaining = countdown_text(settings.enroll_window, elapsed);
        let text = if candidate.is_some() {
            format!("Face captured, {remaining}")
        } else {
            remaining
        };
        ctx.notifier.status(ctx.id, text);

        if elapsed >= settings.enroll_window {
            break;
        }
        std::thread::sleep(settings.frame_pacing);
    }

    drop(capture);
    match candidate {
        Some(c) => (
            EnrollmentOutcome::Captured {
                fingerprint: c.fingerprint,
                detections,
            },
            Some(c),
        ),
        None => (EnrollmentOutcome::NoFaceDetected, None),
    }
}
