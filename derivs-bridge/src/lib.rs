//! # Derivs-Bridge
//! Read-only derivatives market state for OKX perpetual swaps.
//!
//! Two kinds of data are joined into one composite snapshot:
//! * REST backed fields (funding, mark/index, basis, open interest change, long/short ratio)
//!   fetched concurrently through a [`DerivsSource`](aggregate::DerivsSource) behind a short
//!   lived [`ExpiringCache`](cache::ExpiringCache).
//! * Liquidation clusters, maintained by one long lived
//!   [`StreamConnection`](streams::connection::StreamConnection) per instrument feeding a
//!   sliding [`ClusterWindow`](cluster::ClusterWindow). Feeds are created lazily by the
//!   [`FeedRegistry`](registry::FeedRegistry) on first request.
//!
//! Every upstream failure narrows to an absent field, the snapshot itself never fails.

/// [`DerivsAggregator`](aggregate::DerivsAggregator), the [`DerivsSource`](aggregate::DerivsSource)
/// seam and the response schema.
pub mod aggregate;

/// Expiring key/value cache used for REST responses.
pub mod cache;

/// Sliding window of liquidation events and nearest-cluster queries.
pub mod cluster;

/// Configuration with environment overrides.
pub mod config;

/// Lenient serde deserialisers for exchange payloads.
pub mod de;

/// All [`Error`](std::error::Error)s generated in `derivs-bridge`.
pub mod error;

/// Normalised liquidation event and instrument types.
pub mod event;

/// Exchange integrations.
pub mod exchange;

/// Process-wide map of live liquidation feeds.
pub mod registry;

/// Feed transport seam, reconnecting connection loop and stream utilities.
pub mod streams;

pub use aggregate::{DerivsAggregator, DerivsQuery, DerivsResponse, DerivsSource};
pub use cluster::{ClusterWindow, NearestLiquidations};
pub use config::BridgeConfig;
pub use error::DataError;
pub use event::{InstrumentId, LiquidationEvent, Side};
pub use registry::{FeedHandle, FeedRegistry};
