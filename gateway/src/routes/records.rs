use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde::Serialize;
use tokio::sync::{mpsc::error::TrySendError, oneshot};

use relay::{AppendOutcome, RawRecord};

use crate::state::{IntakeRequest, SharedState};

/// Response body for an accepted record.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub offset: u64,
}

/// `POST /` and `POST /records`
///
/// Validates one `RawRecord` and appends it to the upstream log:
///
/// - 200 with the log offset when stored,
/// - 409 when a record with the same key was stored before,
/// - 400 for malformed JSON or a record the codec rejects,
/// - 503 when the intake queue is full or shutting down.
pub async fn submit_record(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), (StatusCode, String)> {
    let record: RawRecord = serde_json::from_slice(&body).map_err(|e| {
        state.metrics.intake.malformed.inc();
        (StatusCode::BAD_REQUEST, format!("malformed record: {e}"))
    })?;

    if let Err(e) = relay::parse_with(&record, state.key_source) {
        state.metrics.intake.malformed.inc();
        tracing::debug!(key = %record.key, reason = e.reason(), "record rejected at intake");
        return Err((
            StatusCode::BAD_REQUEST,
            format!("rejected ({}): {e}", e.reason()),
        ));
    }

    let (reply, rx) = oneshot::channel();
    state
        .intake
        .try_send(IntakeRequest { record, reply })
        .map_err(|e| {
            state.metrics.intake.overloaded.inc();
            match e {
                TrySendError::Full(_) => unavailable("intake queue full"),
                TrySendError::Closed(_) => unavailable("intake is shutting down"),
            }
        })?;

    match rx.await {
        Ok(Ok(AppendOutcome::Appended { offset })) => {
            state.metrics.intake.accepted.inc();
            Ok((
                StatusCode::OK,
                Json(SubmitResponse {
                    status: "accepted",
                    offset,
                }),
            ))
        }
        Ok(Ok(AppendOutcome::Duplicate)) => {
            state.metrics.intake.duplicate.inc();
            Err((StatusCode::CONFLICT, "Existing key".to_string()))
        }
        Ok(Err(e)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to store record: {e}"),
        )),
        Err(_) => Err(unavailable("intake is shutting down")),
    }
}

fn unavailable(msg: &str) -> (StatusCode, String) {
    (StatusCode::SERVICE_UNAVAILABLE, msg.to_string())
}
