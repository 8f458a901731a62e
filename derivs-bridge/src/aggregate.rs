//! Composite derivatives snapshot.
//!
//! A [`DerivsAggregator`] fans out to a [`DerivsSource`] for the REST backed fields and to
//! the [`FeedRegistry`] for the live liquidation clusters, then joins everything into one
//! [`DerivsResponse`]. Every field is best-effort: an upstream failure is logged and the
//! field is reported as `null`.

use crate::{
    cluster::{ClusterSnapshot, NearestLiquidations},
    error::DataError,
    event::InstrumentId,
    registry::{FeedHandle, FeedRegistry},
    streams::FeedTransport,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default perpetual swap queried when the caller does not name one.
pub const DEFAULT_INST_ID: &str = "BTC-USDT-SWAP";
pub const DEFAULT_INDEX_ID: &str = "BTC-USDT";
pub const DEFAULT_CCY: &str = "BTC";
pub const DEFAULT_PERIOD: &str = "15m";
pub const DEFAULT_INST_TYPE: &str = "SWAP";

/// Funding rate of a perpetual swap.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct FundingRate {
    pub funding_rate: Option<f64>,
    /// Whole minutes until the next funding event, never negative.
    pub funding_eta_min: Option<i64>,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct MarkPrice {
    pub mark_price: Option<f64>,
    /// Exchange timestamp, verbatim.
    pub ts: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct IndexTicker {
    pub index_px: Option<f64>,
    /// Exchange timestamp, verbatim.
    pub ts: Option<String>,
}

/// Contract specification of an instrument.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct InstrumentMeta {
    pub inst_id: String,
    pub inst_type: String,
    pub inst_family: Option<String>,
    pub settle_ccy: Option<String>,
    pub ct_val: Option<f64>,
    pub ct_mult: Option<f64>,
    pub ct_val_ccy: Option<String>,
    pub ct_type: Option<String>,
    pub tick_sz: Option<f64>,
    pub lot_sz: Option<f64>,
    pub min_sz: Option<f64>,
    pub max_lever: Option<f64>,
    pub state: Option<String>,
    pub list_time: Option<i64>,
    pub exp_time: Option<i64>,
}

/// Upstream REST collaborator for the composite snapshot.
///
/// Implemented for the live venue by
/// [`OkxRestClient`](crate::exchange::okx::rest::OkxRestClient).
#[async_trait]
pub trait DerivsSource: Send + Sync + 'static {
    async fn fetch_funding_rate(&self, inst_id: &str) -> Result<FundingRate, DataError>;

    async fn fetch_mark_price(&self, inst_id: &str) -> Result<MarkPrice, DataError>;

    async fn fetch_index_ticker(&self, index_id: &str) -> Result<IndexTicker, DataError>;

    /// Perpetual premium over the index as a fraction, `(mark - index) / index`.
    async fn fetch_basis(&self, inst_id: &str, index_id: &str) -> Result<Option<f64>, DataError>;

    /// Open interest percent change over `period`.
    async fn fetch_open_interest_change(
        &self,
        ccy: &str,
        period: &str,
    ) -> Result<Option<f64>, DataError>;

    /// Long/short account ratio over `period`.
    async fn fetch_long_short_ratio(
        &self,
        ccy: &str,
        period: &str,
    ) -> Result<Option<f64>, DataError>;

    async fn fetch_instrument_meta(
        &self,
        inst_id: &str,
        inst_type: &str,
    ) -> Result<Option<InstrumentMeta>, DataError>;
}

/// Query parameters of the composite snapshot.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DerivsQuery {
    #[serde(rename = "instId")]
    pub inst_id: String,
    #[serde(rename = "indexId")]
    pub index_id: String,
    pub ccy: String,
    pub period: String,
}

impl Default for DerivsQuery {
    fn default() -> Self {
        Self {
            inst_id: DEFAULT_INST_ID.to_string(),
            index_id: DEFAULT_INDEX_ID.to_string(),
            ccy: DEFAULT_CCY.to_string(),
            period: DEFAULT_PERIOD.to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct DerivsResponse {
    pub derivs: Derivs,
    pub market_refs: MarketRefs,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Derivs {
    pub funding_rate: Option<f64>,
    pub funding_eta_min: Option<i64>,
    pub perp_basis_annualized: Option<f64>,
    pub oi_change_15m: Option<f64>,
    pub long_short_ratio: Option<f64>,
    pub nearest_liq_up_pct: Option<f64>,
    pub nearest_liq_dn_pct: Option<f64>,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct MarketRefs {
    pub mark_price: Option<f64>,
    pub index_px: Option<f64>,
    pub ts: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct MetaResponse {
    pub meta: Option<InstrumentMeta>,
}

/// Joins REST fetches and live liquidation clusters into a [`DerivsResponse`].
#[derive(Debug)]
pub struct DerivsAggregator<Source, Transport> {
    source: Arc<Source>,
    registry: Arc<FeedRegistry<Transport>>,
}

impl<Source, Transport> DerivsAggregator<Source, Transport>
where
    Source: DerivsSource,
    Transport: FeedTransport,
{
    pub fn new(source: Arc<Source>, registry: Arc<FeedRegistry<Transport>>) -> Self {
        Self { source, registry }
    }

    pub fn registry(&self) -> &Arc<FeedRegistry<Transport>> {
        &self.registry
    }

    /// Composite snapshot for `query`. Never fails, missing data is reported as `None`.
    ///
    /// The liquidation feed for `query.inst_id` is registered before any upstream fetch, so
    /// the first request warms its window even if the caller abandons it.
    pub async fn derivs(&self, query: &DerivsQuery) -> DerivsResponse {
        let feed = self.registry.get_or_create(query.inst_id.as_str());

        let (funding, mark, index, basis, oi_change, long_short) = tokio::join!(
            self.source.fetch_funding_rate(&query.inst_id),
            self.source.fetch_mark_price(&query.inst_id),
            self.source.fetch_index_ticker(&query.index_id),
            self.source.fetch_basis(&query.inst_id, &query.index_id),
            self.source.fetch_open_interest_change(&query.ccy, &query.period),
            self.source.fetch_long_short_ratio(&query.ccy, &query.period),
        );

        let funding = settle("funding_rate", funding).unwrap_or_default();
        let mark = settle("mark_price", mark).unwrap_or_default();
        let index = settle("index_ticker", index).unwrap_or_default();
        let basis = settle("basis", basis).flatten();
        let oi_change = settle("oi_change", oi_change).flatten();
        let long_short = settle("long_short_ratio", long_short).flatten();

        let mark_price = finite(mark.mark_price);
        let nearest = nearest_liquidations(&feed, mark_price);

        DerivsResponse {
            derivs: Derivs {
                funding_rate: finite(funding.funding_rate),
                funding_eta_min: funding.funding_eta_min,
                perp_basis_annualized: finite(basis),
                oi_change_15m: finite(oi_change),
                long_short_ratio: finite(long_short),
                nearest_liq_up_pct: finite(nearest.up_pct),
                nearest_liq_dn_pct: finite(nearest.down_pct),
            },
            market_refs: MarketRefs {
                mark_price,
                index_px: finite(index.index_px),
                ts: mark.ts.or(index.ts),
            },
        }
    }

    /// Contract specification for `inst_id`, `None` when unknown or unavailable.
    pub async fn meta(&self, inst_id: &str, inst_type: &str) -> MetaResponse {
        MetaResponse {
            meta: settle(
                "instrument_meta",
                self.source.fetch_instrument_meta(inst_id, inst_type).await,
            )
            .flatten(),
        }
    }

    /// Current cluster buckets of an already tracked instrument.
    pub fn clusters(&self, inst_id: &str) -> Option<ClusterSnapshot> {
        self.registry
            .get(&InstrumentId::from(inst_id))
            .map(|feed| feed.window().clusters())
    }
}

/// Best-effort cluster lookup, `None` on both sides without a usable mark price.
fn nearest_liquidations(feed: &FeedHandle, mark_price: Option<f64>) -> NearestLiquidations {
    let instrument = feed.instrument();

    let Some(mark_price) = mark_price.filter(|mark| *mark > 0.0) else {
        debug!(%instrument, "no usable mark price, skipping liquidation cluster lookup");
        return NearestLiquidations::default();
    };

    feed.nearest_pct(mark_price).unwrap_or_else(|error| {
        warn!(%instrument, %error, "liquidation cluster lookup failed");
        NearestLiquidations::default()
    })
}

fn settle<T>(field: &'static str, result: Result<T, DataError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(field, %error, "upstream fetch failed, reporting null");
            None
        }
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|value| value.is_finite())
}
