use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use relay::{LogError, UpstreamLog};

use crate::state::SharedState;

/// Pipeline progress as seen from the upstream log.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Last committed cursor; `null` until the first batch lands.
    pub committed_cursor: Option<u64>,
    /// Offset one past the newest stored record.
    pub head: u64,
    /// Records stored but not yet covered by the committed cursor.
    pub lag: u64,
}

/// `GET /status`
///
/// A `committed_cursor` that stops moving while `lag` grows means batches
/// are failing to land.
pub async fn status(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<StatusResponse>), (StatusCode, String)> {
    let internal = |e: LogError| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());

    let committed = state.log.committed_cursor().map_err(internal)?;
    let head = state.log.head().map_err(internal)?;
    let committed_offset = committed.map(|c| c.offset());

    Ok((
        StatusCode::OK,
        Json(StatusResponse {
            committed_cursor: committed_offset,
            head: head.offset(),
            lag: head.offset().saturating_sub(committed_offset.unwrap_or(0)),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use relay::{Cursor, KeySource, MemoryLog, MetricsRegistry, RawRecord, RecordKind, UpstreamLog};
    use tokio::sync::mpsc;

    use crate::state::AppState;

    fn record(key: &str) -> RawRecord {
        RawRecord {
            key: key.to_string(),
            kind: RecordKind::Hash,
            hash_to_verify: String::new(),
            account: String::new(),
            block_id: 0,
        }
    }

    #[tokio::test]
    async fn reports_lag_behind_the_committed_cursor() {
        let log = Arc::new(MemoryLog::from_records(vec![
            record("a"),
            record("b"),
            record("c"),
        ]));
        log.commit_cursor(Cursor(1)).expect("commit");

        let (tx, _rx) = mpsc::channel(1);
        let state = Arc::new(AppState {
            intake: tx,
            log,
            metrics: Arc::new(MetricsRegistry::new().expect("registry")),
            key_source: KeySource::RecordKey,
        });

        let (code, Json(resp)) = status(State(state)).await.expect("status");
        assert_eq!(code, StatusCode::OK);
        assert_eq!(resp.committed_cursor, Some(1));
        assert_eq!(resp.head, 3);
        assert_eq!(resp.lag, 2);
    }
}
