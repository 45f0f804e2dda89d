// Network reader: accepts the loader's WebSocket connection and forwards its
// text frames to the dispatcher.

use async_trait::async_trait;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

/// Events emitted by the reader to the dispatcher loop.
#[derive(Debug, PartialEq)]
pub enum ReaderEvent {
    /// The loader connected.
    Connected { addr: String },
    /// The current loader connection ended.
    Disconnected,
    /// A text frame (raw JSON string).
    Message(String),
}

/// Source of incoming byte-stream connections.
#[async_trait]
pub trait Listener: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Wait for the next connection. `Ok(None)` means no more connections
    /// will arrive.
    async fn accept(&mut self) -> anyhow::Result<Option<(Self::Stream, String)>>;
}

/// TCP listener on the loopback interface.
pub struct TungsteniteListener {
    inner: TcpListener,
}

impl TungsteniteListener {
    pub async fn bind(port: u16) -> anyhow::Result<Self> {
        let inner = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}

#[async_trait]
impl Listener for TungsteniteListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> anyhow::Result<Option<(TcpStream, String)>> {
        let (stream, addr) = self.inner.accept().await?;
        Ok(Some((stream, addr.to_string())))
    }
}

/// Accept one connection at a time from `listener`, perform the WebSocket
/// handshake and forward text frames through `tx`. Returns when the listener
/// is exhausted or the receiver is dropped.
pub async fn run<L: Listener>(mut listener: L, tx: mpsc::Sender<ReaderEvent>) -> anyhow::Result<()> {
    while let Some((stream, addr)) = listener.accept().await? {
        info!("Accepted connection from {addr}");

        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("WebSocket handshake failed for {addr}: {e}");
                continue;
            }
        };

        if tx
            .send(ReaderEvent::Connected { addr: addr.clone() })
            .await
            .is_err()
        {
            break;
        }

        if process_message_stream(ws_stream, &tx, &addr).await.is_err() {
            break;
        }

        if tx.send(ReaderEvent::Disconnected).await.is_err() {
            break;
        }
    }

    Ok(())
}

/// Forward text payloads from `stream` through `tx` until the peer closes or
/// errors. Returns `Err(())` if the receiver is gone.
pub async fn process_message_stream<St>(
    mut stream: St,
    tx: &mpsc::Sender<ReaderEvent>,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if tx.send(ReaderEvent::Message(text.to_string())).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, SinkExt};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::Error as WsError;

    /// Hands out pre-made in-memory connections.
    struct DuplexListener {
        rx: mpsc::Receiver<DuplexStream>,
    }

    #[async_trait]
    impl Listener for DuplexListener {
        type Stream = DuplexStream;

        async fn accept(&mut self) -> anyhow::Result<Option<(DuplexStream, String)>> {
            Ok(self.rx.recv().await.map(|s| (s, "duplex".to_string())))
        }
    }

    const LOBBY: &str = r#"{"type":"LOBBY","payload":{"gameId":7,"teamOne":[]}}"#;
    const HEARTBEAT: &str = r#"{"type":"HEARTBEAT"}"#;

    #[tokio::test]
    async fn loader_frames_forwarded_until_close() {
        let (tx, mut rx) = mpsc::channel(64);
        let frames = stream::iter(vec![
            Ok(Message::Text(LOBBY.into())),
            Ok(Message::Ping(vec![].into())),
            Ok(Message::Binary(vec![0x7b].into())),
            Ok(Message::Text(HEARTBEAT.into())),
            Ok(Message::Close(None)),
            Ok(Message::Text(LOBBY.into())),
        ]);

        process_message_stream(frames, &tx, "loader").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), ReaderEvent::Message(LOBBY.into()));
        assert_eq!(rx.recv().await.unwrap(), ReaderEvent::Message(HEARTBEAT.into()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatcher_gone_ends_connection_with_error() {
        let (tx, rx) = mpsc::channel(64);
        drop(rx);

        let frames = stream::iter(vec![Ok::<_, WsError>(Message::Text(HEARTBEAT.into()))]);
        assert!(process_message_stream(frames, &tx, "loader").await.is_err());
    }

    #[tokio::test]
    async fn run_reports_connection_lifecycle() {
        let (conn_tx, conn_rx) = mpsc::channel(1);
        let (tx, mut rx) = mpsc::channel(64);
        let server = tokio::spawn(run(DuplexListener { rx: conn_rx }, tx));

        let (client, server_side) = tokio::io::duplex(4096);
        conn_tx.send(server_side).await.unwrap();

        let (mut ws, _) = tokio_tungstenite::client_async("ws://localhost/", client)
            .await
            .unwrap();
        ws.send(Message::Text("frame".into())).await.unwrap();
        ws.close(None).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ReaderEvent::Connected {
                addr: "duplex".into()
            }
        );
        assert_eq!(rx.recv().await.unwrap(), ReaderEvent::Message("frame".into()));
        assert_eq!(rx.recv().await.unwrap(), ReaderEvent::Disconnected);

        drop(conn_tx);
        server.await.unwrap().unwrap();
    }
}
