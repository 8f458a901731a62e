use crate::{error::DataError, event::InstrumentId};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Reconnecting run loop feeding a [`ClusterWindow`](crate::cluster::ClusterWindow).
pub mod connection;

/// Idle read deadline wrapper for streams.
pub mod timeout;

/// Stream of raw text frames from one subscribed session.
///
/// An `Err` item with [`DataError::is_terminal`] ends the session, as does the end of the
/// stream.
pub type FeedFrames = BoxStream<'static, Result<String, DataError>>;

/// Opens a subscribed liquidation-orders session for an instrument.
///
/// Implemented for the live venue by [`OkxTransport`](crate::exchange::okx::transport::OkxTransport).
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn connect(&self, instrument: &InstrumentId) -> Result<FeedFrames, DataError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    /// Scripted session for [`MockTransport`].
    pub(crate) enum Session {
        /// Connection attempt fails.
        Refused,
        /// Yields the frames then ends the stream.
        Frames(Vec<Result<String, DataError>>),
    }

    /// [`FeedTransport`] replaying scripted sessions. Once the script is exhausted every
    /// connection stays open and silent.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        sessions: Mutex<VecDeque<Session>>,
        connects: AtomicUsize,
    }

    impl MockTransport {
        pub(crate) fn new(sessions: impl IntoIterator<Item = Session>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into_iter().collect()),
                connects: AtomicUsize::new(0),
            }
        }

        pub(crate) fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedTransport for MockTransport {
        async fn connect(&self, _: &InstrumentId) -> Result<FeedFrames, DataError> {
            self.connects.fetch_add(1, Ordering::SeqCst);

            match self.sessions.lock().pop_front() {
                Some(Session::Refused) => Err(DataError::Socket("connection refused".to_string())),
                Some(Session::Frames(frames)) => Ok(futures::stream::iter(frames).boxed()),
                None => Ok(futures::stream::pending().boxed()),
            }
        }
    }
}
