//! A real server and a real hub client: fragments rendered from an HTTP
//! request and from a hub invocation both arrive as `ReceiveStreamElement`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use turbopush_client::{
    ClientError, ConnectionState, HubConnection, StreamObserver, StreamSourceRegistry,
};
use turbopush_server::{
    hub_routes, string_argument, AppState, CookieTempDataProvider, HubCallerContext, HubHandler,
    HubMethodError, MiniJinjaViewEngine, ProblemResponse, RenderingServices, RequestState,
    TurboStreamResponse,
};
use turbopush_shared::{Destination, TURBO_STREAM_CONTENT_TYPE};

const HUB_PATH: &str = "/hubs/turbo-stream";
const TEST_VIEW: &str = r#"<turbo-stream target="messages" action="append"><template><div data-testid="message">{{ model }}</div></template></turbo-stream>"#;
const WAIT: Duration = Duration::from_secs(5);

struct TestHub;

#[async_trait]
impl HubHandler for TestHub {
    async fn invoke(
        &self,
        caller: &HubCallerContext,
        method: &str,
        arguments: Vec<Value>,
    ) -> Result<(), HubMethodError> {
        match method {
            "SendMessage" => {
                let text = string_argument(method, &arguments, 0)?;
                caller.send_partial_view(Destination::All, "_Test", text).await?;
                Ok(())
            }
            _ => Err(HubMethodError::UnknownMethod(method.to_string())),
        }
    }
}

#[derive(Deserialize)]
struct SendQuery {
    message: String,
}

async fn send_view(
    State(state): State<AppState>,
    request: RequestState,
    Query(query): Query<SendQuery>,
) -> Result<StatusCode, ProblemResponse> {
    state
        .dispatcher
        .send_partial_view_from_request(&request, Destination::All, Some("_Test"), query.message)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn preview(
    mut request: RequestState,
    Query(query): Query<SendQuery>,
) -> Result<TurboStreamResponse, ProblemResponse> {
    Ok(request
        .turbo_stream_partial_view(Some("_Test"), Value::String(query.message))
        .await?)
}

async fn spawn_server() -> (SocketAddr, AppState) {
    let engine = MiniJinjaViewEngine::from_sources([("shared/_Test.html", TEST_VIEW)]).unwrap();
    let services = RenderingServices::new(
        Arc::new(engine),
        Arc::new(CookieTempDataProvider::default()),
    );
    let state = AppState::new(services, Arc::new(TestHub));

    let app = Router::new()
        .route("/send-view", get(send_view))
        .route("/preview", get(preview))
        .merge(hub_routes(HUB_PATH))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

/// Stream sources live outside the page in these tests.
struct NoPage;

impl StreamSourceRegistry for NoPage {
    fn connect_stream_source(&self, _observer: &StreamObserver) {}
    fn disconnect_stream_source(&self, _observer: &StreamObserver) {}
}

struct Client {
    connection: HubConnection,
    // Handlers hold the observer weakly, so it has to outlive the test body.
    _observer: StreamObserver,
    elements: mpsc::UnboundedReceiver<String>,
}

async fn wait_for_connections(state: &AppState, count: usize) {
    timeout(WAIT, async {
        while state.hub.connection_count().await != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never reached the expected connection count");
}

async fn connect(addr: SocketAddr, state: &AppState) -> Client {
    let connection = HubConnection::new();
    let observer = StreamObserver::new(connection.clone(), Arc::new(NoPage));
    let (tx, elements) = mpsc::unbounded_channel();
    observer.add_listener(move |event| {
        let _ = tx.send(event.data.clone());
    });
    observer.attach();

    connection
        .start(&format!("ws://{addr}{HUB_PATH}"))
        .await
        .unwrap();
    wait_for_connections(state, 1).await;

    Client {
        connection,
        _observer: observer,
        elements,
    }
}

async fn next_element(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(WAIT, rx.recv())
        .await
        .expect("no stream element within timeout")
        .expect("element channel closed")
}

fn assert_message(element: &str, text: &str) {
    assert!(element.starts_with("<turbo-stream"), "{element}");
    assert_eq!(
        element
            .matches(&format!(r#"<div data-testid="message">{text}</div>"#))
            .count(),
        1,
        "{element}"
    );
}

#[tokio::test]
async fn http_request_pushes_fragment_to_hub_client() {
    let (addr, state) = spawn_server().await;
    let mut client = connect(addr, &state).await;

    let response = reqwest::get(format!("http://{addr}/send-view?message=hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    assert_message(&next_element(&mut client.elements).await, "hello");
    client.connection.stop();
}

#[tokio::test]
async fn hub_invocation_pushes_fragment_to_hub_client() {
    let (addr, state) = spawn_server().await;
    let mut client = connect(addr, &state).await;

    timeout(WAIT, client.connection.invoke("SendMessage", vec![Value::from("from hub")]))
        .await
        .unwrap()
        .unwrap();

    assert_message(&next_element(&mut client.elements).await, "from hub");
    client.connection.stop();
}

#[tokio::test]
async fn unknown_hub_method_fails_the_invocation() {
    let (addr, state) = spawn_server().await;
    let mut client = connect(addr, &state).await;

    let err = timeout(WAIT, client.connection.invoke("Nope", vec![]))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, ClientError::Invocation { ref method, .. } if method == "Nope"));
    assert!(client.elements.try_recv().is_err());
    client.connection.stop();
}

#[tokio::test]
async fn restarted_connection_stays_usable() {
    let (addr, state) = spawn_server().await;
    let mut client = connect(addr, &state).await;
    let url = format!("ws://{addr}{HUB_PATH}");

    // Restart without waiting; the first socket winds down after the second is up.
    client.connection.stop();
    client.connection.start(&url).await.unwrap();
    wait_for_connections(&state, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(client.connection.state(), ConnectionState::Connected);
    client
        .connection
        .send("SendMessage", vec![Value::from("after restart")])
        .unwrap();
    assert_message(&next_element(&mut client.elements).await, "after restart");
    client.connection.stop();
}

#[tokio::test]
async fn partial_view_renders_into_the_response() {
    let (addr, _state) = spawn_server().await;

    let response = reqwest::get(format!("http://{addr}/preview?message=inline"))
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        TURBO_STREAM_CONTENT_TYPE
    );
    assert_message(&response.text().await.unwrap(), "inline");
}
