//! Text-frame transport used by relay sessions, with a WebSocket
//! implementation that can dial through a SOCKS5 proxy.

use std::pin::Pin;

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};
use tokio_tungstenite::client_async_tls;
use url::Url;

use crate::error::{Error, Result};

/// Outbound half: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;
/// Inbound half: yields text frames and ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A full-duplex, message-oriented connection split into its two directions.
/// Closing the sink closes the connection gracefully.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new(
        sink: impl Sink<String, Error = Error> + Send + 'static,
        stream: impl Stream<Item = Result<String>> + Send + 'static,
    ) -> Self {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
pub async fn connect(relay: &str, socks_proxy: Option<&str>) -> Result<Connection> {
    let url = Url::parse(relay).map_err(|e| Error::Connection(format!("invalid url: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(Error::Connection(format!(
            "unsupported scheme `{}`",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| Error::Connection("missing host".into()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::Connection("missing port".into()))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = socks_proxy {
        let socks = Socks5Stream::connect(proxy, (host, port))
            .await
            .map_err(|e| Error::Connection(format!("socks proxy {proxy}: {e}")))?;
        Box::new(socks)
    } else {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Connection(format!("{host}:{port}: {e}")))?;
        Box::new(tcp)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    let (ws_sink, ws_stream) = ws.split();

    let sink = ws_sink
        .sink_map_err(Error::from)
        .with(|text: String| future::ready(Ok::<_, Error>(Message::Text(text))));
    let stream = ws_stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(other) => {
                    tracing::trace!(len = other.len(), "ignoring non-text frame");
                    None
                }
                Err(e) => Some(Err(Error::from(e))),
            })
        });
    Ok(Connection::new(sink, stream))
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
