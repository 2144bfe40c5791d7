// HTTP request handlers
use crate::application::query_service::QueryService;
use crate::application::snapshot_store::MachinePhase;
use crate::domain::machine::{MachineId, MachineSnapshot};
use crate::infrastructure::chunked_json::chunked_json_stream;
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestRequest {
    pub machine_ids: Vec<MachineId>,
}

#[derive(Deserialize)]
pub struct StreamQuery {
    /// Comma-separated machine ids; all machines when absent
    pub ids: Option<String>,
}

/// Snapshot plus its lifecycle phase and freshness at response time
#[derive(Serialize)]
pub struct MachineView {
    #[serde(flatten)]
    pub snapshot: MachineSnapshot,
    pub phase: MachinePhase,
    pub stale: bool,
}

impl MachineView {
    fn new(query: &QueryService, snapshot: MachineSnapshot) -> Self {
        let stale = query.is_stale(&snapshot);
        let phase = query.phase(&snapshot.machine_id);
        Self {
            snapshot,
            phase,
            stale,
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// All known machines
pub async fn list_machines(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    let views: Vec<MachineView> = state
        .query
        .all()
        .into_iter()
        .map(|s| MachineView::new(&state.query, s))
        .collect();
    respond(&views, &headers).await
}

/// One machine; unknown ids get the placeholder snapshot
pub async fn get_machine(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let view = MachineView::new(&state.query, state.query.get(&id));
    respond(&view, &headers).await
}

pub async fn get_summary(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    respond(&state.query.summary(), &headers).await
}

pub async fn get_connection(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.query.connection_state())
}

pub async fn get_diagnostics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.query.diagnostics())
}

/// Replace the set of machines the dashboard is watching
pub async fn put_interest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InterestRequest>,
) -> impl IntoResponse {
    tracing::debug!("Interest set replaced with {} machines", request.machine_ids.len());
    state.registry.set_interest(request.machine_ids);
    Json(state.registry.interest())
}

/// Stream snapshot changes: the current snapshots first, then one frame per
/// flush that touched a watched machine.
pub async fn stream_snapshots(
    Query(params): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let compress = accepts_brotli(&headers);
    let filter = parse_ids(params.ids.as_deref());
    let query = state.query.clone();
    let shutdown = state.shutdown.clone();
    let mut updates = query.subscribe_updates();

    let stream = async_stream::stream! {
        yield select_views(&query, query.all().into_iter().map(|s| s.machine_id), &filter);

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                next = updates.recv() => Some(next),
            };
            let Some(next) = next else {
                tracing::debug!("Snapshot stream closed for shutdown");
                break;
            };

            match next {
                Ok(update) => {
                    let views = select_views(&query, update.changed.into_iter(), &filter);
                    if !views.is_empty() {
                        yield views;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Snapshot stream lagged by {} updates; resending all", skipped);
                    yield select_views(&query, query.all().into_iter().map(|s| s.machine_id), &filter);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    match chunked_json_stream(stream, compress) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

async fn respond<T: Serialize>(data: &T, headers: &HeaderMap) -> Response {
    match json_response(data, accepts_brotli(headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

fn parse_ids(ids: Option<&str>) -> Option<HashSet<MachineId>> {
    let ids: HashSet<MachineId> = ids?
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() { None } else { Some(ids) }
}

fn select_views<I>(query: &QueryService, ids: I, filter: &Option<HashSet<MachineId>>) -> Vec<MachineView>
where
    I: Iterator<Item = MachineId>,
{
    let ids: Vec<MachineId> = ids
        .filter(|id| filter.as_ref().map_or(true, |f| f.contains(id)))
        .collect();
    query
        .get_many(&ids)
        .into_iter()
        .map(|snapshot| MachineView::new(query, snapshot))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connection_manager::{ConnectionHandle, ConnectionManager};
    use crate::application::ingestion_buffer::IngestionBuffer;
    use crate::application::snapshot_store::SnapshotStore;
    use crate::application::status_reporter::StatusReporter;
    use crate::application::subscription_registry::SubscriptionRegistry;
    use crate::application::test_support::ScriptedTransport;
    use crate::domain::machine::RawSample;
    use crate::infrastructure::config::ConnectionSettings;
    use crate::infrastructure::sample_mapper::payload_to_sample;
    use bytes::Bytes;
    use chrono::Utc;
    use futures::{Stream, StreamExt};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        state: Arc<AppState>,
        store: Arc<SnapshotStore>,
        connection: ConnectionHandle,
    }

    fn fixture() -> Fixture {
        let connection = ConnectionManager::new(
            Arc::new(ScriptedTransport::default()),
            ConnectionSettings::default(),
        )
        .open("http://weld-hub:3001");
        let store = Arc::new(SnapshotStore::new(250, chrono::Duration::seconds(30)));
        let buffer = Arc::new(IngestionBuffer::new());
        let registry = Arc::new(SubscriptionRegistry::new(connection.clone(), buffer.clone()));
        let reporter = StatusReporter::new(store.clone(), registry.clone());
        let query = QueryService::new(store.clone(), buffer, reporter, connection.clone());

        Fixture {
            state: Arc::new(AppState {
                query,
                registry,
                shutdown: CancellationToken::new(),
            }),
            store,
            connection,
        }
    }

    fn batch(readings: &[(&str, f64)]) -> HashMap<MachineId, RawSample> {
        readings
            .iter()
            .map(|(id, current)| {
                let payload = json!({ "current": current, "status": "running", "timestamp": 1_000 });
                (id.to_string(), payload_to_sample(id, &payload, Utc::now()))
            })
            .collect()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn open_stream(state: &Arc<AppState>, ids: Option<&str>) -> Response {
        stream_snapshots(
            Query(StreamQuery {
                ids: ids.map(str::to_string),
            }),
            HeaderMap::new(),
            State(state.clone()),
        )
        .await
    }

    /// Next length-prefixed frame, decoded; `None` once the stream ended.
    async fn next_frame<S>(frames: &mut S) -> Option<Value>
    where
        S: Stream<Item = Result<Bytes, axum::Error>> + Unpin,
    {
        let chunk = tokio::time::timeout(Duration::from_secs(5), frames.next())
            .await
            .expect("no frame within 5s")?
            .unwrap();
        let (len, payload) = chunk.split_at(4);
        assert_eq!(u32::from_be_bytes(len.try_into().unwrap()) as usize, payload.len());
        Some(serde_json::from_slice(payload).unwrap())
    }

    fn ids_of(frame: &Value) -> Vec<&str> {
        frame
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["machineId"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids(None), None);
        assert_eq!(parse_ids(Some(" , ")), None);

        let ids = parse_ids(Some("WM-001, WM-002,,")).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("WM-002"));
    }

    #[tokio::test]
    async fn test_put_interest_replaces_set() {
        let fx = fixture();

        let request = InterestRequest {
            machine_ids: vec!["WM-2".to_string(), "WM-1".to_string(), " ".to_string()],
        };
        let response = put_interest(State(fx.state.clone()), Json(request))
            .await
            .into_response();
        assert_eq!(body_json(response).await, json!(["WM-1", "WM-2"]));

        let request = InterestRequest {
            machine_ids: vec!["WM-3".to_string()],
        };
        put_interest(State(fx.state.clone()), Json(request)).await;
        assert_eq!(fx.state.registry.interest().len(), 1);
        assert!(fx.state.registry.interest().contains("WM-3"));

        let request = InterestRequest { machine_ids: vec![] };
        let response = put_interest(State(fx.state.clone()), Json(request))
            .await
            .into_response();
        assert_eq!(body_json(response).await, json!([]));
        assert!(fx.state.registry.interest().is_empty());

        fx.connection.close().await;
    }

    #[tokio::test]
    async fn test_unknown_machine_is_placeholder() {
        let fx = fixture();

        let response = get_machine(Path("ghost".to_string()), HeaderMap::new(), State(fx.state.clone())).await;
        let json = body_json(response).await;

        assert_eq!(json["machineId"], "ghost");
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["phase"], "unknown");
        assert_eq!(json["stale"], true);
        assert_eq!(json["current"], 0.0);
        assert_eq!(json["currentSeries"], json!([]));

        fx.connection.close().await;
    }

    #[tokio::test]
    async fn test_machines_and_summary_reflect_store() {
        let fx = fixture();
        fx.store.apply_flush(batch(&[("m2", 2.0), ("m1", 1.0)]));

        let json = body_json(list_machines(HeaderMap::new(), State(fx.state.clone())).await).await;
        assert_eq!(ids_of(&json), vec!["m1", "m2"]);
        assert_eq!(json[0]["phase"], "seeded");
        assert_eq!(json[0]["stale"], false);

        let json = body_json(get_summary(HeaderMap::new(), State(fx.state.clone())).await).await;
        assert_eq!(json["total"], 2);
        assert_eq!(json["running"], 2);

        fx.connection.close().await;
    }

    #[tokio::test]
    async fn test_stream_starts_full_then_sends_filtered_changes() {
        let fx = fixture();
        fx.store.apply_flush(batch(&[("m1", 1.0), ("m2", 2.0)]));

        let mut all = Box::pin(open_stream(&fx.state, None).await.into_body().into_data_stream());
        let mut only_m1 = Box::pin(
            open_stream(&fx.state, Some("m1"))
                .await
                .into_body()
                .into_data_stream(),
        );

        assert_eq!(ids_of(&next_frame(&mut all).await.unwrap()), vec!["m1", "m2"]);
        assert_eq!(ids_of(&next_frame(&mut only_m1).await.unwrap()), vec!["m1"]);

        fx.store.apply_flush(batch(&[("m2", 5.0)]));
        fx.store.apply_flush(batch(&[("m1", 7.0)]));

        let frame = next_frame(&mut all).await.unwrap();
        assert_eq!(ids_of(&frame), vec!["m2"]);
        assert_eq!(frame[0]["current"], 5.0);

        // The m2-only flush produced nothing for this client
        let frame = next_frame(&mut only_m1).await.unwrap();
        assert_eq!(ids_of(&frame), vec!["m1"]);
        assert_eq!(frame[0]["current"], 7.0);
        assert_eq!(frame[0]["phase"], "updating");

        fx.connection.close().await;
    }

    #[tokio::test]
    async fn test_lagging_stream_gets_full_resend() {
        let fx = fixture();
        fx.store.apply_flush(batch(&[("m1", 0.0), ("m2", 2.0)]));

        let mut frames = Box::pin(open_stream(&fx.state, None).await.into_body().into_data_stream());
        assert_eq!(ids_of(&next_frame(&mut frames).await.unwrap()), vec!["m1", "m2"]);

        // More updates than the broadcast channel holds
        for i in 1..70 {
            fx.store.apply_flush(batch(&[("m1", i as f64)]));
        }

        let frame = next_frame(&mut frames).await.unwrap();
        assert_eq!(ids_of(&frame), vec!["m1", "m2"]);
        assert_eq!(frame[0]["current"], 69.0);

        fx.connection.close().await;
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let fx = fixture();

        let mut frames = Box::pin(open_stream(&fx.state, None).await.into_body().into_data_stream());
        assert_eq!(next_frame(&mut frames).await, Some(json!([])));

        fx.state.shutdown.cancel();
        assert_eq!(next_frame(&mut frames).await, None);

        fx.connection.close().await;
    }
}
