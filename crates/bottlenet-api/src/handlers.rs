//! Control endpoints: membership, round trigger, dispatch and the sink.

use std::sync::Arc;

use actix_web::http::header::{self, ContentType};
use actix_web::{web, HttpRequest, HttpResponse};
use bottlenet_cluster::{ClusterError, LivenessGuard, FINAL_STATUS_HEADER, SINK_SUCCESS};
use bottlenet_core::Node;
use futures_util::StreamExt;
use tracing::debug;

use crate::error::ApiError;
use crate::AppState;

/// `POST /join`: validate and register a peer, then hold the response
/// open as its liveness channel.
///
/// The body stream parks until process shutdown; a client disconnect
/// drops it early. Either way the guard travels with the stream, so the
/// peer leaves the roster exactly when the connection does.
pub async fn join(state: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, ApiError> {
    let peer: Node = serde_json::from_slice(&body).map_err(ClusterError::from)?;
    let addr = peer.addr.clone();
    state.node.roster().add_peer(peer)?;

    let guard = LivenessGuard::new(Arc::clone(state.node.roster()), addr);
    let shutdown = state.shutdown.clone();
    let liveness = futures_util::stream::once(async move {
        shutdown.cancelled().await;
        drop(guard);
        Ok::<web::Bytes, std::io::Error>(web::Bytes::new())
    });

    Ok(HttpResponse::Ok()
        .content_type(ContentType::octet_stream())
        .streaming(liveness))
}

/// `POST /start`: run a measurement round and answer with the indented
/// result map. Triggered once per round by the operator.
pub async fn start(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let results = state.node.run_round().await?;
    let body = serde_json::to_string_pretty(&results).map_err(ClusterError::from)?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::json())
        .body(body))
}

/// `POST /dispatch`: probe the assigned remotes and return them
/// annotated with the measured samples.
pub async fn dispatch(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let remotes: Vec<Node> = serde_json::from_slice(&body).map_err(ClusterError::from)?;
    debug!(remotes = remotes.len(), "dispatch received");
    let annotated = state.node.run_dispatch(remotes).await?;
    Ok(HttpResponse::Ok().json(annotated))
}

/// `POST /perf`: the sink. Absorbs the flood body into a discard counter
/// without buffering and reports the outcome through the `FinalStatus`
/// response header. The response is only written once the body has been
/// consumed, so the header reflects the complete read.
pub async fn perf(req: HttpRequest, mut payload: web::Payload) -> HttpResponse {
    let expected: Option<u64> = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok());
    let Some(expected) = expected else {
        return final_status("missing content length");
    };

    let mut received = 0u64;
    loop {
        match payload.next().await {
            Some(Ok(chunk)) => received += chunk.len() as u64,
            Some(Err(err)) => return final_status(&err.to_string()),
            None if received == expected => return final_status(SINK_SUCCESS),
            None => return final_status(&format!("short read: expected {expected} found {received}")),
        }
    }
}

fn final_status(status: &str) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((FINAL_STATUS_HEADER, status))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use bottlenet_cluster::FloodProfile;
    use bottlenet_core::{ClusterKind, NodeKind};
    use tokio_util::sync::CancellationToken;

    fn test_state(kind: ClusterKind, self_kind: NodeKind) -> Arc<AppState> {
        Arc::new(
            AppState::new(
                kind,
                Node::new(self_kind, "10.0.0.1:7007"),
                FloodProfile::default(),
                CancellationToken::new(),
            )
            .unwrap(),
        )
    }

    async fn body_text(response: actix_web::dev::ServiceResponse) -> String {
        let bytes = test::read_body(response).await;
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[actix_web::test]
    async fn malformed_join_is_a_500_with_a_text_body() {
        let state = test_state(ClusterKind::Mesh, NodeKind::SelfNode);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(Arc::clone(&state)))
                .route("/join", web::post().to(join)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/join")
            .set_payload(r#"{"NodeType": 99, "Addr": ""}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);
        let body = body_text(resp).await;
        assert!(!body.is_empty());
        assert_eq!(state.node.roster().peer_count(), 0);
    }

    #[actix_web::test]
    async fn join_with_wrong_kind_leaves_the_roster_unchanged() {
        let state = test_state(ClusterKind::Mesh, NodeKind::SelfNode);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(Arc::clone(&state)))
                .route("/join", web::post().to(join)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/join")
            .set_json(Node::new(NodeKind::Client, "10.0.0.2:7007"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);
        let body = body_text(resp).await;
        assert!(body.contains("kind mismatch"), "unexpected body: {body}");
        assert_eq!(state.node.roster().peer_count(), 0);
    }

    #[actix_web::test]
    async fn dispatch_on_a_server_node_probes_nothing() {
        let state = test_state(ClusterKind::ClientServer, NodeKind::Server);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state))
                .route("/dispatch", web::post().to(dispatch)),
        )
        .await;

        let remotes = vec![
            Node::new(NodeKind::Client, "10.0.0.2:7007"),
            Node::new(NodeKind::Server, "10.0.0.3:7007"),
        ];
        let req = test::TestRequest::post()
            .uri("/dispatch")
            .set_json(&remotes)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let annotated: Vec<Node> = serde_json::from_str(&body_text(resp).await).unwrap();
        assert!(annotated.is_empty());
    }

    #[actix_web::test]
    async fn perf_sink_acknowledges_a_complete_body() {
        let app =
            test::init_service(App::new().route("/perf", web::post().to(perf))).await;
        let payload = vec![0u8; 4096];
        let req = test::TestRequest::post()
            .uri("/perf")
            .insert_header((header::CONTENT_LENGTH, 4096usize))
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get(FINAL_STATUS_HEADER).unwrap(),
            SINK_SUCCESS
        );
    }

    #[actix_web::test]
    async fn perf_sink_reports_short_reads() {
        let app =
            test::init_service(App::new().route("/perf", web::post().to(perf))).await;
        let req = test::TestRequest::post()
            .uri("/perf")
            .set_payload(vec![0u8; 1024])
            .insert_header((header::CONTENT_LENGTH, 8192usize))
            .to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp
            .headers()
            .get(FINAL_STATUS_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(status, "short read: expected 8192 found 1024");
    }

    #[actix_web::test]
    async fn perf_sink_requires_a_content_length() {
        let app =
            test::init_service(App::new().route("/perf", web::post().to(perf))).await;
        let req = test::TestRequest::post().uri("/perf").to_request();
        let resp = test::call_service(&app, req).await;
        let status = resp
            .headers()
            .get(FINAL_STATUS_HEADER)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(status, "missing content length");
    }

    #[actix_web::test]
    async fn start_on_a_lonely_coordinator_returns_its_empty_entry() {
        let state = test_state(ClusterKind::Mesh, NodeKind::SelfNode);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(state))
                .route("/start", web::post().to(start)),
        )
        .await;

        let req = test::TestRequest::post().uri("/start").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let results: bottlenet_core::RoundResults =
            serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results["10.0.0.1:7007"].is_empty());
    }
}
