use super::{OkxChannel, PONG_OKX};
use crate::{
    de::{de_lenient_epoch_ms, de_lenient_f64, de_lenient_string},
    error::DataError,
    event::{InstrumentId, LiquidationEvent, Side},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Normalised outcome of one `Okx` liquidation-orders text frame.
#[derive(Clone, PartialEq, Debug)]
pub enum OkxFrame {
    /// "pong" reply to an application level ping.
    Heartbeat,
    /// Subscription acknowledgement.
    Subscribed,
    /// Any other `event` message, eg/ "error" or "notice".
    Event {
        event: String,
        code: Option<String>,
        msg: Option<String>,
    },
    /// Liquidations for the subscribed instrument, possibly empty.
    Liquidations(Vec<LiquidationEvent>),
}

/// `Okx` WebSocket message envelope on the liquidation-orders channel.
///
/// See docs: <https://www.okx.com/docs-v5/en/#websocket-api-public-channel-liquidation-orders-channel>
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct OkxMessage {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub arg: Option<OkxArg>,
    #[serde(default)]
    pub data: Vec<OkxLiquidation>,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct OkxArg {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(rename = "instId", default)]
    pub inst_id: Option<String>,
}

/// `Okx` liquidation record.
///
/// The venue publishes an instrument level record with a `details` array. Flat records
/// carrying the detail fields directly are accepted too.
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct OkxLiquidation {
    #[serde(rename = "instId", default)]
    pub inst_id: Option<String>,
    #[serde(default)]
    pub details: Vec<OkxLiquidationDetail>,
    #[serde(flatten)]
    pub flat: OkxLiquidationDetail,
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct OkxLiquidationDetail {
    #[serde(rename = "bkPx", default, deserialize_with = "de_lenient_f64")]
    pub bankruptcy_price: Option<f64>,
    #[serde(rename = "px", default, deserialize_with = "de_lenient_f64")]
    pub price: Option<f64>,
    #[serde(rename = "sz", default, deserialize_with = "de_lenient_f64")]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub side: Option<String>,
    #[serde(rename = "ts", default, deserialize_with = "de_lenient_epoch_ms")]
    pub time: Option<DateTime<Utc>>,
}

impl OkxLiquidationDetail {
    fn to_event(&self, received_at: DateTime<Utc>, fallback: &OkxLiquidationDetail) -> LiquidationEvent {
        let price = self
            .bankruptcy_price
            .or(self.price)
            .or(fallback.bankruptcy_price)
            .or(fallback.price)
            .unwrap_or(0.0);
        let size = self.size.or(fallback.size).unwrap_or(0.0);
        let side = self
            .side
            .as_deref()
            .or(fallback.side.as_deref())
            .map(Side::from)
            .unwrap_or_default();

        LiquidationEvent::received_at(
            received_at,
            price,
            size,
            side,
            self.time.or(fallback.time),
        )
    }
}

impl OkxLiquidation {
    fn into_events(
        self,
        received_at: DateTime<Utc>,
    ) -> impl Iterator<Item = LiquidationEvent> {
        let flat = self.flat;
        let details = if self.details.is_empty() {
            vec![flat.clone()]
        } else {
            self.details
        };

        details
            .into_iter()
            .map(move |detail| detail.to_event(received_at, &flat))
    }
}

/// Parse one text frame received for `instrument`.
///
/// Frames that are not JSON, or not shaped like an `Okx` message, return a non-terminal
/// [`DataError::Deserialise`].
pub fn parse_frame(text: &str, instrument: &InstrumentId) -> Result<OkxFrame, DataError> {
    parse_frame_at(text, instrument, Utc::now())
}

/// Parse one text frame, stamping every event with `received_at`.
pub fn parse_frame_at(
    text: &str,
    instrument: &InstrumentId,
    received_at: DateTime<Utc>,
) -> Result<OkxFrame, DataError> {
    if text.trim() == PONG_OKX {
        return Ok(OkxFrame::Heartbeat);
    }

    let message = serde_json::from_str::<OkxMessage>(text)
        .map_err(|error| DataError::deserialise(error, text))?;

    if let Some(event) = message.event {
        return Ok(match event.as_str() {
            "subscribe" => OkxFrame::Subscribed,
            _ => OkxFrame::Event {
                event,
                code: message.code,
                msg: message.msg,
            },
        });
    }

    let other_channel = message
        .arg
        .as_ref()
        .and_then(|arg| arg.channel.as_deref())
        .is_some_and(|channel| channel != OkxChannel::LIQUIDATION_ORDERS.as_ref());
    if other_channel {
        return Ok(OkxFrame::Liquidations(Vec::new()));
    }

    let events = message
        .data
        .into_iter()
        .filter(|record| {
            record
                .inst_id
                .as_deref()
                .is_none_or(|inst_id| inst_id == instrument.as_str())
        })
        .flat_map(|record| record.into_events(received_at))
        .collect();

    Ok(OkxFrame::Liquidations(events))
}
