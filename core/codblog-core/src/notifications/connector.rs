use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

/// Inbound text frames of one connection. The stream ending means the
/// connection closed.
pub type FrameStream = BoxStream<'static, Result<String, ChannelError>>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Opens notification channel connections.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FrameStream, ChannelError>;
}

/// WebSocket transport.
///
/// Ping replies are handled by tungstenite while the stream is polled. A
/// transport error is yielded once and then ends the stream, so the
/// connection is always reported closed after it fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, ChannelError> {
        let (socket, response) = tokio_tungstenite::connect_async(url).await?;
        tracing::debug!(url, status = %response.status(), "Notification channel handshake complete");

        let frames = stream::unfold(Some(socket), |socket| async move {
            let mut socket = socket?;
            loop {
                match socket.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text), Some(socket))),
                    Ok(Message::Binary(bytes)) => {
                        let text = String::from_utf8(bytes)
                            .map_err(|err| ChannelError::Transport(err.to_string()));
                        return Some((text, Some(socket)));
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "Notification channel close frame");
                    }
                    Ok(_) => {}
                    // Dropping the socket here ends the stream without
                    // polling a failed connection again.
                    Err(err) => return Some((Err(ChannelError::from(err)), None)),
                }
            }
        });
        Ok(frames.boxed())
    }
}
