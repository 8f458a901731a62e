use super::{FeedFrames, FeedTransport};
use crate::{
    cluster::ClusterWindow,
    event::InstrumentId,
    exchange::okx::liquidation::{OkxFrame, parse_frame},
};
use futures::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why a single session ended.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum SessionEnd {
    Terminal,
    Ended,
    Shutdown,
}

/// Maintains a live liquidation-orders subscription for one instrument, forwarding every
/// parsed event to the owning [`ClusterWindow`].
///
/// [`StreamConnection::run`] never gives up: connection failures, terminal read errors,
/// idle timeouts and stream termination are all followed by a fixed backoff and a fresh
/// connection. It only returns once the shutdown signal fires.
#[derive(Debug)]
pub struct StreamConnection<Transport> {
    instrument: InstrumentId,
    transport: Arc<Transport>,
    window: Arc<ClusterWindow>,
    reconnect_backoff: Duration,
}

impl<Transport> StreamConnection<Transport>
where
    Transport: FeedTransport,
{
    pub fn new(
        instrument: InstrumentId,
        transport: Arc<Transport>,
        window: Arc<ClusterWindow>,
        reconnect_backoff: Duration,
    ) -> Self {
        Self {
            instrument,
            transport,
            window,
            reconnect_backoff,
        }
    }

    /// Run the connect, consume, backoff loop until `shutdown` is set to `true` (or its
    /// sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(instrument = %self.instrument, "starting liquidation feed");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let end = tokio::select! {
                end = self.session() => end,
                _ = shutdown_signal(&mut shutdown) => SessionEnd::Shutdown,
            };

            if end == SessionEnd::Shutdown {
                break;
            }

            debug!(
                instrument = %self.instrument,
                ?end,
                backoff_secs = self.reconnect_backoff.as_secs_f64(),
                "liquidation feed reconnecting after backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_backoff) => {}
                _ = shutdown_signal(&mut shutdown) => break,
            }
        }

        info!(instrument = %self.instrument, "liquidation feed stopped");
    }

    async fn session(&self) -> SessionEnd {
        match self.transport.connect(&self.instrument).await {
            Ok(frames) => {
                info!(instrument = %self.instrument, "liquidation feed connected");
                self.consume(frames).await
            }
            Err(error) => {
                warn!(instrument = %self.instrument, %error, "failed to connect liquidation feed");
                SessionEnd::Terminal
            }
        }
    }

    async fn consume(&self, mut frames: FeedFrames) -> SessionEnd {
        while let Some(frame) = frames.next().await {
            let frame = match frame.and_then(|text| parse_frame(&text, &self.instrument)) {
                Ok(frame) => frame,
                Err(error) if error.is_terminal() => {
                    warn!(instrument = %self.instrument, %error, "liquidation feed session failed");
                    return SessionEnd::Terminal;
                }
                Err(error) => {
                    debug!(instrument = %self.instrument, %error, "skipping malformed liquidation frame");
                    continue;
                }
            };

            match frame {
                OkxFrame::Liquidations(events) => {
                    for event in events {
                        self.window.add(event);
                    }
                }
                OkxFrame::Subscribed => {
                    info!(instrument = %self.instrument, "subscribed to liquidation-orders");
                }
                OkxFrame::Heartbeat => {}
                OkxFrame::Event { event, code, msg } => {
                    warn!(
                        instrument = %self.instrument,
                        %event,
                        code = code.as_deref().unwrap_or_default(),
                        msg = msg.as_deref().unwrap_or_default(),
                        "liquidation feed event"
                    );
                }
            }
        }

        warn!(instrument = %self.instrument, "liquidation feed stream ended");
        SessionEnd::Ended
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WindowConfig,
        error::DataError,
        streams::mock::{MockTransport, Session},
    };

    const BACKOFF: Duration = Duration::from_secs(3);

    fn liquidation(price: u32, size: u32, side: &str) -> Result<String, DataError> {
        Ok(format!(
            r#"{{"arg":{{"channel":"liquidation-orders","instId":"BTC-USDT-SWAP"}},"data":[{{"px":"{price}","sz":"{size}","side":"{side}"}}]}}"#
        ))
    }

    fn spawn_connection(
        transport: Arc<MockTransport>,
    ) -> (
        Arc<ClusterWindow>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<()>,
    ) {
        let window = Arc::new(ClusterWindow::new(WindowConfig::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = StreamConnection::new(
            InstrumentId::from("BTC-USDT-SWAP"),
            transport,
            Arc::clone(&window),
            BACKOFF,
        );
        (window, shutdown_tx, tokio::spawn(connection.run(shutdown_rx)))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_are_skipped_without_reconnect() {
        let transport = Arc::new(MockTransport::new([Session::Frames(vec![
            Ok(r#"{"event":"subscribe","arg":{"channel":"liquidation-orders","instId":"BTC-USDT-SWAP"}}"#.to_string()),
            liquidation(100, 60, "sell"),
            Ok("{not json".to_string()),
            Ok("pong".to_string()),
            liquidation(101, 50, "sell"),
            liquidation(109, 100, "sell"),
        ])]));
        let (window, shutdown_tx, task) = spawn_connection(Arc::clone(&transport));

        wait_until(|| window.len() == 3).await;
        assert_eq!(transport.connects(), 1);

        let nearest = window.nearest(105.0).unwrap();
        assert_eq!(nearest.up_pct, None);
        let down = nearest.down_pct.unwrap();
        assert!((down - 5.0 / 105.0).abs() < 1e-12);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_reconnects_after_backoff() {
        let transport = Arc::new(MockTransport::new([
            Session::Frames(vec![
                liquidation(100, 60, "sell"),
                Err(DataError::Socket("connection reset".to_string())),
                liquidation(200, 60, "sell"),
            ]),
            Session::Frames(vec![liquidation(300, 60, "buy")]),
        ]));
        let started = tokio::time::Instant::now();
        let (window, shutdown_tx, task) = spawn_connection(Arc::clone(&transport));

        wait_until(|| window.len() == 2).await;
        assert!(started.elapsed() >= BACKOFF);
        assert!(transport.connects() >= 2);

        let snapshot = window.clusters();
        assert_eq!(snapshot.down.len(), 1);
        assert_eq!(snapshot.down[0].price, 100.0);
        assert_eq!(snapshot.up.len(), 1);
        assert_eq!(snapshot.up[0].price, 300.0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_retry_indefinitely() {
        let transport = Arc::new(MockTransport::new([
            Session::Refused,
            Session::Refused,
            Session::Refused,
            Session::Frames(vec![liquidation(100, 60, "buy")]),
        ]));
        let (window, shutdown_tx, task) = spawn_connection(Arc::clone(&transport));

        wait_until(|| window.len() == 1).await;
        assert!(transport.connects() >= 4);
        assert_eq!(window.clusters().up[0].notional_usd, 6_000.0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_reconnects() {
        let transport = Arc::new(MockTransport::new([
            Session::Frames(vec![]),
            Session::Frames(vec![]),
        ]));
        let (_window, shutdown_tx, task) = spawn_connection(Arc::clone(&transport));

        wait_until(|| transport.connects() == 3).await;

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(transport.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_session_and_backoff() {
        // Silent session
        let transport = Arc::new(MockTransport::default());
        let (_window, shutdown_tx, task) = spawn_connection(Arc::clone(&transport));
        wait_until(|| transport.connects() == 1).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        // Waiting out the backoff
        let transport = Arc::new(MockTransport::new([Session::Refused]));
        let (_window, shutdown_tx, task) = spawn_connection(Arc::clone(&transport));
        wait_until(|| transport.connects() == 1).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_for_other_instruments_are_ignored() {
        let transport = Arc::new(MockTransport::new([Session::Frames(vec![
            Ok(r#"{"data":[{"instId":"ETH-USDT-SWAP","details":[{"bkPx":"3000","sz":"10","side":"sell"}]}]}"#.to_string()),
            Ok(r#"{"data":[{"instId":"BTC-USDT-SWAP","details":[{"bkPx":"50000","sz":"1","side":"sell"}]}]}"#.to_string()),
        ])]));
        let (window, shutdown_tx, task) = spawn_connection(transport);

        wait_until(|| !window.is_empty()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(window.len(), 1);
        assert_eq!(window.clusters().down[0].price, 50_000.0);
        assert_eq!(window.clusters().events, 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
