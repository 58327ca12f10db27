use crate::engine::{Engine, EngineError, UiEvent};
use crate::store::SqliteStore;
use base64::Engine as _;
use ponto_core::EnrollmentForm;
use std::sync::Arc;
use tokio::sync::mpsc;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.ponto.Checkpoint1";
pub const OBJECT_PATH: &str = "/org/ponto/Checkpoint1";

/// D-Bus interface for the attendance checkpoint daemon.
///
/// Bus name: org.ponto.Checkpoint1
/// Object path: /org/ponto/Checkpoint1
pub struct CheckpointService {
    engine: Arc<Engine>,
    store: Arc<SqliteStore>,
    camera: String,
}

impl CheckpointService {
    pub fn new(engine: Arc<Engine>, store: Arc<SqliteStore>, camera: String) -> Self {
        Self {
            engine,
            store,
            camera,
        }
    }
}

fn to_fdo(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Validation(v) => zbus::fdo::Error::InvalidArgs(v.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.ponto.Checkpoint1")]
impl CheckpointService {
    /// Run one identification session and return its outcome as JSON.
    async fn identify(&self) -> zbus::fdo::Result<String> {
        let handle = self.engine.start_identification().map_err(to_fdo)?;
        tracing::info!(session = %handle.id, "identify requested");
        let outcome = handle.join().await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Capture a face for enrollment and return the capture outcome as JSON.
    async fn capture_enrollment(&self) -> zbus::fdo::Result<String> {
        let handle = self.engine.start_enrollment().map_err(to_fdo)?;
        tracing::info!(session = %handle.id, "enrollment capture requested");
        let outcome = handle.join().await.map_err(to_fdo)?;
        to_json(&outcome)
    }

    /// Store the captured face under the given identity. Returns the new employee id.
    async fn submit_enrollment(
        &self,
        name: &str,
        registration_number: &str,
        organization_id: &str,
        national_id: &str,
    ) -> zbus::fdo::Result<i64> {
        let form = EnrollmentForm {
            name: name.to_string(),
            registration_number: registration_number.to_string(),
            organization_id: organization_id.to_string(),
            national_id: national_id.to_string(),
        };
        let id = self.engine.submit_enrollment(&form).map_err(|e| {
            tracing::warn!(error = %e, "enrollment rejected");
            to_fdo(e)
        })?;
        tracing::info!(employee = id, registration_number, "employee enrolled");
        Ok(id)
    }

    /// Drop the captured face without storing it.
    async fn discard_enrollment(&self) -> zbus::fdo::Result<bool> {
        Ok(self.engine.discard_enrollment())
    }

    /// Stop the running session, if any.
    async fn cancel(&self) -> zbus::fdo::Result<bool> {
        Ok(self.engine.cancel_active())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let engine = self.engine.status();
        let employees = self
            .store
            .employee_count()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": self.camera,
            "busy": engine.busy,
            "session": engine.session.map(|id| id.to_string()),
            "session_kind": engine.session_kind,
            "enrollment_pending": engine.enrollment_pending,
            "employees": employees,
            "match_threshold": self.engine.settings().match_threshold,
        })
        .to_string())
    }

    /// Attendance events not yet marked as synchronized, as a JSON array.
    async fn pending_events(&self) -> zbus::fdo::Result<String> {
        let events = self
            .store
            .pending_events()
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&events)
    }

    /// Flag the given attendance events as synchronized. Returns how many changed.
    async fn mark_synced(&self, ids: Vec<i64>) -> zbus::fdo::Result<u64> {
        let changed = self
            .store
            .mark_synced(&ids)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        tracing::info!(requested = ids.len(), changed, "events marked synced");
        Ok(changed as u64)
    }

    /// Annotated camera frame, JPEG encoded as base64.
    #[zbus(signal)]
    async fn frame_ready(emitter: &SignalEmitter<'_>, session: &str, jpeg_base64: &str) -> zbus::Result<()>;

    /// Human-readable progress text, e.g. a countdown.
    #[zbus(signal)]
    async fn status_changed(emitter: &SignalEmitter<'_>, session: &str, text: &str) -> zbus::Result<()>;

    /// Terminal outcome of a session, as JSON.
    #[zbus(signal)]
    async fn session_finished(emitter: &SignalEmitter<'_>, session: &str, outcome_json: &str) -> zbus::Result<()>;
}

/// Relay engine UI events as D-Bus signals until the engine side closes.
pub async fn forward_ui_events(
    conn: zbus::Connection,
    mut events: mpsc::UnboundedReceiver<UiEvent>,
) -> zbus::Result<()> {
    let emitter = SignalEmitter::new(&conn, OBJECT_PATH)?;

    while let Some(event) = events.recv().await {
        let sent = match event {
            UiEvent::Frame { session, jpeg } => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&jpeg);
                CheckpointService::frame_ready(&emitter, &session.to_string(), &encoded).await
            }
            UiEvent::Status { session, text } => {
                CheckpointService::status_changed(&emitter, &session.to_string(), &text).await
            }
            UiEvent::Finished { session, outcome_json } => {
                CheckpointService::session_finished(&emitter, &session.to_string(), &outcome_json).await
            }
        };
        if let Err(e) = sent {
            tracing::debug!(error = %e, "failed to emit ui signal");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ponto_core::ValidationError;

    #[test]
    fn test_validation_maps_to_invalid_args() {
        let err = to_fdo(EngineError::Validation(ValidationError::MissingName));
        assert!(matches!(err, zbus::fdo::Error::InvalidArgs(_)));
    }

    #[test]
    fn test_busy_maps_to_failed() {
        match to_fdo(EngineError::Busy) {
            zbus::fdo::Error::Failed(msg) => assert_eq!(msg, "capture device busy"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
