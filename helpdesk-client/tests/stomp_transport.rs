//! STOMP transport against a local axum WebSocket broker.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header::COOKIE},
    response::Response,
    routing::get,
};
use client::{
    ConnectionState, PushSession, Subscription, Topic, TransportError,
    push::{BrokerConnection, Connector},
    stomp::StompConnector,
};
use shared::models::Ticket;
use tokio::{net::TcpListener, sync::mpsc, time::timeout};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

const TICKET: &str = r#"{"id":12,"header":"VPN down","status":"urgent","createdAt":"2025-04-02T10:15:00Z","userId":5,"adminId":9,"viewedByUser":false,"viewedByAdmin":false}"#;

#[derive(Clone, Default)]
struct Broker {
    received: Arc<Mutex<Vec<String>>>,
    cookies: Arc<Mutex<Vec<String>>>,
    reject: bool,
}

fn header<'a>(frame: &'a str, name: &str) -> Option<&'a str> {
    frame
        .lines()
        .skip(1)
        .take_while(|line| !line.is_empty())
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
}

async fn upgrade(
    State(broker): State<Broker>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(cookie) = headers.get(COOKIE).and_then(|value| value.to_str().ok()) {
        broker.cookies.lock().unwrap().push(cookie.to_string());
    }
    ws.on_upgrade(move |socket| run_broker(socket, broker))
}

async fn run_broker(mut socket: WebSocket, broker: Broker) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame = text.as_str().to_string();
        broker.received.lock().unwrap().push(frame.clone());

        if frame.starts_with("CONNECT\n") {
            let reply = if broker.reject {
                "ERROR\nmessage:Bad credentials\n\nlogin required\0"
            } else {
                "CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0"
            };
            if socket.send(Message::Text(reply.into())).await.is_err() {
                return;
            }
        } else if frame.starts_with("SUBSCRIBE\n") {
            let id = header(&frame, "id").unwrap_or_default();
            let destination = header(&frame, "destination").unwrap_or_default();
            let payload = format!(
                "MESSAGE\nsubscription:{id}\ndestination:{destination}\nmessage-id:1\ncontent-length:{}\n\n{TICKET}\0",
                TICKET.len()
            );
            let (head, tail) = payload.split_at(payload.len() / 2);
            for chunk in ["\n", head, tail] {
                if socket.send(Message::Text(chunk.to_string().into())).await.is_err() {
                    return;
                }
            }
        } else if frame.starts_with("DISCONNECT\n") {
            return;
        }
    }
}

impl Broker {
    /// Frames are recorded on the broker task; wait until `prefix` shows up.
    async fn saw(&self, prefix: &str) -> bool {
        timeout(WAIT, async {
            loop {
                if self
                    .received
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|frame| frame.starts_with(prefix))
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}

async fn serve(broker: Broker) -> Url {
    let app = Router::new()
        .route("/ws/websocket", get(upgrade))
        .with_state(broker);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("ws://{addr}/ws/websocket")).unwrap()
}

#[tokio::test]
async fn handshake_subscribe_and_receive() {
    let broker = Broker::default();
    let url = serve(broker.clone()).await;
    let connector = StompConnector::new(url);

    let mut connection = connector.connect().await.unwrap();
    connection
        .subscribe("sub-0", "/topic/tickets/new")
        .await
        .unwrap();
    let message = timeout(WAIT, connection.next_message()).await.unwrap().unwrap();

    assert_eq!(message.subscription.as_deref(), Some("sub-0"));
    assert_eq!(message.destination, "/topic/tickets/new");
    let ticket: Ticket = serde_json::from_str(&message.body).unwrap();
    assert_eq!(ticket.id, 12);

    connection.close(&["sub-0".to_string()]).await;
    assert!(broker.saw("DISCONNECT\n").await);
    let received = broker.received.lock().unwrap().clone();
    assert!(received[0].starts_with("CONNECT\naccept-version:1.2\n"));
    assert!(received[0].contains("heart-beat:0,0"));
    assert!(received.iter().any(|frame| frame.starts_with("UNSUBSCRIBE\nid:sub-0\n")));
}

#[tokio::test]
async fn session_cookie_rides_the_upgrade_request() {
    let broker = Broker::default();
    let url = serve(broker.clone()).await;
    let connector = StompConnector::new(url).with_cookie("session=abc; remember=1");

    let mut connection = connector.connect().await.unwrap();
    connection.close(&[]).await;

    assert_eq!(
        broker.cookies.lock().unwrap().as_slice(),
        ["session=abc; remember=1".to_string()]
    );
}

#[tokio::test]
async fn error_frame_fails_the_handshake() {
    let broker = Broker {
        reject: true,
        ..Broker::default()
    };
    let url = serve(broker).await;

    let error = StompConnector::new(url).connect().await.err().unwrap();

    match error {
        TransportError::Broker { message, details } => {
            assert_eq!(message, "Bad credentials");
            assert_eq!(details.as_deref(), Some("login required"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn unreachable_broker_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = Url::parse(&format!("ws://{addr}/ws/websocket")).unwrap();

    let error = StompConnector::new(url).connect().await.err().unwrap();
    assert!(matches!(error, TransportError::Connect { .. }));
}

#[tokio::test]
async fn secure_broker_url_attempts_a_tls_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });
    let url = Url::parse(&format!("wss://{addr}/ws/websocket")).unwrap();

    let error = StompConnector::new(url).connect().await.err().unwrap();
    let TransportError::Connect { message, .. } = error else {
        panic!("expected a connect error, got {error:?}");
    };
    assert!(!message.contains("not compiled in"), "{message}");
}

#[tokio::test]
async fn push_session_delivers_typed_events_over_stomp() {
    let broker = Broker::default();
    let url = serve(broker.clone()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = Subscription::json(Topic::NewTickets, move |ticket: Ticket| {
        let _ = tx.send(ticket);
    });

    let session = PushSession::open(
        Arc::new(StompConnector::new(url)),
        vec![subscription],
        Duration::from_millis(100),
    );
    let ticket = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(ticket.header, "VPN down");
    assert_eq!(session.state(), ConnectionState::Connected);

    session.close().await;
    assert!(broker.saw("UNSUBSCRIBE\nid:sub-0\n").await);
    assert!(broker.saw("DISCONNECT\n").await);
}
