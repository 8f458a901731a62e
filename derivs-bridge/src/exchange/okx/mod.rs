use crate::event::InstrumentId;
use serde::Serialize;
use serde_json::json;

/// Liquidation-orders frame types and parsing.
pub mod liquidation;

/// REST response models and their normalisation.
pub mod market;

/// Cached REST client implementing [`DerivsSource`](crate::aggregate::DerivsSource).
pub mod rest;

/// Live WebSocket [`FeedTransport`](crate::streams::FeedTransport).
pub mod transport;

/// `Okx` public WebSocket base url.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-api-resources-and-support>
pub const BASE_URL_OKX_WS: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// `Okx` REST base url.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-api-resources-and-support>
pub const BASE_URL_OKX_REST: &str = "https://www.okx.com";

/// Text frame `Okx` answers an application level "ping" with.
pub const PONG_OKX: &str = "pong";

/// Type that names an `Okx` WebSocket channel.
///
/// See docs: <https://www.okx.com/docs-v5/en/#websocket-api-public-channel>
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct OkxChannel(pub &'static str);

impl OkxChannel {
    /// `Okx` liquidation orders channel.
    ///
    /// See docs: <https://www.okx.com/docs-v5/en/#websocket-api-public-channel-liquidation-orders-channel>
    pub const LIQUIDATION_ORDERS: Self = Self("liquidation-orders");
}

impl AsRef<str> for OkxChannel {
    fn as_ref(&self) -> &str {
        self.0
    }
}

/// Build the subscribe request for the liquidation-orders channel of one instrument.
pub fn subscribe_request(instrument: &InstrumentId) -> String {
    json!({
        "op": "subscribe",
        "args": [{
            "channel": OkxChannel::LIQUIDATION_ORDERS.as_ref(),
            "instId": instrument.as_str(),
        }]
    })
    .to_string()
}
