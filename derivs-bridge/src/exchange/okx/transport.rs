use super::subscribe_request;
use crate::{
    config::StreamConfig,
    error::DataError,
    event::InstrumentId,
    streams::{FeedFrames, FeedTransport, timeout::TimeoutStream},
};
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt, stream::SplitStream};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, protocol::CloseFrame},
};
use tracing::{debug, info};
use url::Url;

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// [`FeedTransport`] over the `Okx` public WebSocket.
///
/// Each session subscribes to the liquidation-orders channel, keeps the socket alive with
/// WebSocket pings and ends once no frame has arrived within
/// [`StreamConfig::read_timeout`].
#[derive(Debug, Clone)]
pub struct OkxTransport {
    config: StreamConfig,
}

impl OkxTransport {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FeedTransport for OkxTransport {
    async fn connect(&self, instrument: &InstrumentId) -> Result<FeedFrames, DataError> {
        let url = Url::parse(&self.config.url)
            .map_err(|error| DataError::Socket(format!("invalid url {}: {error}", self.config.url)))?;

        debug!(%url, %instrument, "connecting to Okx public WebSocket");
        let (websocket, _) = connect_async(url.as_str()).await?;
        let (mut write, read) = websocket.split();

        write
            .send(Message::Text(subscribe_request(instrument).into()))
            .await?;
        info!(%instrument, "sent liquidation-orders subscription");

        let ping_interval = self.config.ping_interval;
        let ping_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + ping_interval,
                ping_interval,
            );
            loop {
                interval.tick().await;
                if write.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!("failed to send ping, connection likely dead");
                    break;
                }
            }
        });

        Ok(OkxFrames {
            inner: TimeoutStream::new(read, self.config.read_timeout()),
            ping_task,
        }
        .boxed())
    }
}

/// Text frames of one `Okx` session. Control frames are consumed, the keepalive task is
/// aborted when the stream is dropped.
struct OkxFrames {
    inner: TimeoutStream<WsRead>,
    ping_task: JoinHandle<()>,
}

impl Stream for OkxFrames {
    type Item = Result<String, DataError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let message = match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(message)) => message,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            };

            match message {
                Ok(Message::Text(text)) => return Poll::Ready(Some(Ok(text.to_string()))),
                Ok(Message::Close(frame)) => {
                    return Poll::Ready(Some(Err(DataError::Socket(close_reason(frame)))));
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {
                    continue;
                }
                Err(error) => return Poll::Ready(Some(Err(DataError::from(error)))),
            }
        }
    }
}

impl Drop for OkxFrames {
    fn drop(&mut self) {
        self.ping_task.abort();
    }
}

fn close_reason(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(frame) => format!("closed by server: {} {}", frame.code, frame.reason),
        None => "closed by server".to_string(),
    }
}
