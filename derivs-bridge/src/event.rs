use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Exchange instrument identifier, eg/ "BTC-USDT-SWAP".
#[derive(
    Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, From, Deserialize, Serialize,
)]
pub struct InstrumentId(pub SmolStr);

impl InstrumentId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for InstrumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InstrumentId {
    fn from(id: String) -> Self {
        Self(SmolStr::from(id))
    }
}

impl AsRef<str> for InstrumentId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Side of a liquidation order.
///
/// A `Sell` liquidation closes a long into falling prices and forms a "down" cluster, a `Buy`
/// liquidation closes a short into rising prices and forms an "up" cluster.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Default,
    Display,
    Deserialize,
    Serialize,
)]
#[serde(from = "String", rename_all = "lowercase")]
pub enum Side {
    #[default]
    #[display("buy")]
    Buy,
    #[display("sell")]
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl From<&str> for Side {
    /// Anything starting with "sell" (any case) is a [`Side::Sell`], everything else a
    /// [`Side::Buy`].
    fn from(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("sell") => Side::Sell,
            _ => Side::Buy,
        }
    }
}

impl From<String> for Side {
    fn from(raw: String) -> Self {
        Side::from(raw.as_str())
    }
}

/// Normalised liquidation event held by a [`ClusterWindow`](crate::cluster::ClusterWindow).
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct LiquidationEvent {
    /// Local receive time, the only clock used for window trimming.
    pub received_at: DateTime<Utc>,
    /// Exchange-provided timestamp, when available.
    pub exchange_time: Option<DateTime<Utc>>,
    pub price: f64,
    pub side: Side,
    /// `price * size`.
    pub notional_usd: f64,
}

impl LiquidationEvent {
    /// Construct a [`LiquidationEvent`] received now.
    pub fn new(price: f64, size: f64, side: Side, exchange_time: Option<DateTime<Utc>>) -> Self {
        Self::received_at(Utc::now(), price, size, side, exchange_time)
    }

    pub fn received_at(
        received_at: DateTime<Utc>,
        price: f64,
        size: f64,
        side: Side,
        exchange_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            received_at,
            exchange_time,
            price,
            side,
            notional_usd: price * size,
        }
    }
}
