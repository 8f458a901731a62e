use crate::{
    cluster::{ClusterWindow, NearestLiquidations},
    config::{StreamConfig, WindowConfig},
    error::DataError,
    event::InstrumentId,
    streams::{FeedTransport, connection::StreamConnection},
};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

/// Handle to one instrument's live liquidation feed and its [`ClusterWindow`].
#[derive(Debug)]
pub struct FeedHandle {
    instrument: InstrumentId,
    window: Arc<ClusterWindow>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedHandle {
    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    pub fn window(&self) -> &Arc<ClusterWindow> {
        &self.window
    }

    /// Nearest liquidation clusters around `mark_price`, see [`ClusterWindow::nearest`].
    pub fn nearest_pct(&self, mark_price: f64) -> Result<NearestLiquidations, DataError> {
        self.window.nearest(mark_price)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Signal the feed task to stop and wait for it to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(instrument = %self.instrument, %error, "liquidation feed task failed");
            }
        }
    }
}

/// Process-wide map of [`InstrumentId`] to [`FeedHandle`].
///
/// The first request for an instrument spawns its [`StreamConnection`]. Lookup, insertion
/// and spawn happen under one lock, so concurrent first requests share a single feed.
#[derive(Debug)]
pub struct FeedRegistry<Transport> {
    transport: Arc<Transport>,
    stream: StreamConfig,
    window: WindowConfig,
    feeds: Mutex<FnvHashMap<InstrumentId, Arc<FeedHandle>>>,
}

impl<Transport> FeedRegistry<Transport>
where
    Transport: FeedTransport,
{
    pub fn new(transport: Transport, stream: StreamConfig, window: WindowConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            stream,
            window,
            feeds: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Existing [`FeedHandle`] for `instrument`, or a freshly spawned one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_or_create(&self, instrument: impl Into<InstrumentId>) -> Arc<FeedHandle> {
        let instrument = instrument.into();
        let mut feeds = self.feeds.lock();

        if let Some(handle) = feeds.get(&instrument) {
            return Arc::clone(handle);
        }

        let handle = Arc::new(self.spawn_feed(instrument.clone()));
        feeds.insert(instrument, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, instrument: &InstrumentId) -> Option<Arc<FeedHandle>> {
        self.feeds.lock().get(instrument).cloned()
    }

    /// Instruments with a registered feed, sorted.
    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut instruments = self.feeds.lock().keys().cloned().collect::<Vec<_>>();
        instruments.sort();
        instruments
    }

    /// Stop every feed and empty the registry.
    pub async fn shutdown(&self) {
        let handles = self
            .feeds
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect::<Vec<_>>();

        info!(feeds = handles.len(), "shutting down liquidation feeds");
        futures::future::join_all(handles.iter().map(|handle| handle.shutdown())).await;
    }

    fn spawn_feed(&self, instrument: InstrumentId) -> FeedHandle {
        info!(%instrument, "registering liquidation feed");

        let window = Arc::new(ClusterWindow::new(self.window));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = StreamConnection::new(
            instrument.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&window),
            self.stream.reconnect_backoff,
        );
        let task = tokio::spawn(connection.run(shutdown_rx));

        FeedHandle {
            instrument,
            window,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }
}
