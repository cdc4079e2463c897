use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use codblog_core::{
    ChannelConnector, ChannelError, ConnectionPhase, LogAlerts, NotificationChannelManager,
    ReconnectPolicy, UnreadCount, WsConnector,
};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

/// Accepts one WebSocket client and runs `script` on it. Returns the base
/// URL and the request path the client asked for.
async fn serve_once<F, Fut>(script: F) -> (String, oneshot::Receiver<String>)
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base_url = format!("ws://{}", listener.local_addr().expect("addr"));
    let (path_tx, path_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let record_path =
            move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let _ = path_tx.send(request.uri().path().to_string());
                Ok(response)
            };
        let socket = tokio_tungstenite::accept_hdr_async(stream, record_path)
            .await
            .expect("handshake");
        script(socket).await;
    });
    (base_url, path_rx)
}

/// Reads until the client goes away.
async fn drain(mut socket: ServerSocket) {
    while let Some(Ok(_)) = socket.next().await {}
}

#[tokio::test]
async fn ws_connector_yields_text_and_binary_until_close() {
    let (base_url, path_rx) = serve_once(|mut socket| async move {
        let frames = [
            Message::Text(r#"{"type":"count_update","unread_count":3}"#.to_string()),
            Message::Binary(b"binary frame".to_vec()),
            Message::Binary(vec![0xff, 0xfe]),
            Message::Close(None),
        ];
        for frame in frames {
            socket.send(frame).await.expect("send");
        }
        drain(socket).await;
    })
    .await;

    let frames = WsConnector
        .connect(&format!("{}/ws/notifications/7/", base_url))
        .await
        .expect("connect");
    let items = tokio::time::timeout(WAIT, frames.collect::<Vec<_>>())
        .await
        .expect("stream ends after close");

    assert_eq!(path_rx.await.expect("path"), "/ws/notifications/7/");
    assert_eq!(items.len(), 3);
    assert_eq!(
        items[0].as_ref().expect("text"),
        r#"{"type":"count_update","unread_count":3}"#
    );
    assert_eq!(items[1].as_ref().expect("binary"), "binary frame");
    assert!(matches!(items[2], Err(ChannelError::Transport(_))));
}

#[tokio::test]
async fn ws_connector_ends_stream_after_transport_error() {
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let (base_url, _path_rx) = serve_once(|mut socket| async move {
        socket
            .send(Message::Text("first".to_string()))
            .await
            .expect("send");
        // A frame header with every reserved bit set.
        socket
            .get_mut()
            .write_all(&[0xF1, 0x00])
            .await
            .expect("write raw");
        // Keep the TCP connection open so only the error can end the stream.
        let _ = done_rx.await;
    })
    .await;

    let frames = WsConnector
        .connect(&format!("{}/ws/notifications/7/", base_url))
        .await
        .expect("connect");
    let items = tokio::time::timeout(WAIT, frames.collect::<Vec<_>>())
        .await
        .expect("stream ends after error");
    let _ = done_tx.send(());

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().expect("text"), "first");
    assert!(matches!(items[1], Err(ChannelError::WebSocket(_))));
}

#[tokio::test]
async fn manager_opens_user_channel_over_websocket() {
    let (base_url, path_rx) = serve_once(|mut socket| async move {
        socket
            .send(Message::Text(
                r#"{"type":"count_update","unread_count":5}"#.to_string(),
            ))
            .await
            .expect("send");
        drain(socket).await;
    })
    .await;

    let unread = UnreadCount::new();
    let manager = NotificationChannelManager::new(
        Arc::new(WsConnector),
        base_url,
        ReconnectPolicy::default(),
        WAIT,
        unread.clone(),
        Arc::new(LogAlerts),
    );
    manager.connect(Some(42));

    let mut counts = unread.subscribe();
    tokio::time::timeout(WAIT, async {
        loop {
            let seen = *counts.borrow_and_update();
            if seen == 5 {
                break;
            }
            counts.changed().await.expect("counter alive");
        }
    })
    .await
    .expect("count update delivered");

    assert_eq!(path_rx.await.expect("path"), "/ws/notifications/42/");
    assert_eq!(manager.phase(), ConnectionPhase::Open);
    manager.teardown();
    assert_eq!(manager.phase(), ConnectionPhase::Idle);
}
