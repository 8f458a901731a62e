use crate::{
    aggregate::{FundingRate, IndexTicker, InstrumentMeta, MarkPrice},
    de::{de_lenient_f64, de_lenient_i64, de_lenient_string},
    error::DataError,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// `Okx` REST response envelope.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-rest-authentication-making-requests>
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct OkxResponse<T> {
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> OkxResponse<T> {
    /// Payload of a successful response, [`DataError::Upstream`] for any non "0" code.
    pub fn into_data(self) -> Result<Vec<T>, DataError> {
        match self.code.as_deref() {
            None | Some("0") => Ok(self.data),
            Some(code) => Err(DataError::Upstream {
                code: code.to_string(),
                msg: self.msg,
            }),
        }
    }
}

/// See docs: <https://www.okx.com/docs-v5/en/#public-data-rest-api-get-funding-rate>
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct OkxFundingRate {
    #[serde(rename = "fundingRate", default, deserialize_with = "de_lenient_f64")]
    pub funding_rate: Option<f64>,
    #[serde(rename = "nextFundingTime", default, deserialize_with = "de_lenient_i64")]
    pub next_funding_time: Option<i64>,
    #[serde(rename = "fundingTime", default, deserialize_with = "de_lenient_i64")]
    pub funding_time: Option<i64>,
}

impl OkxFundingRate {
    /// Normalise relative to `now`. An absent or unreadable rate reports `0.0`.
    pub fn normalise(&self, now: DateTime<Utc>) -> FundingRate {
        let now_ms = now.timestamp_millis();
        FundingRate {
            funding_rate: Some(self.funding_rate.unwrap_or(0.0)),
            funding_eta_min: self
                .next_funding_time
                .or(self.funding_time)
                .map(|funding_ms| (funding_ms - now_ms).div_euclid(60_000).max(0)),
        }
    }
}

/// See docs: <https://www.okx.com/docs-v5/en/#public-data-rest-api-get-mark-price>
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct OkxMarkPrice {
    #[serde(rename = "markPx", default, deserialize_with = "de_lenient_f64")]
    pub mark_px: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub ts: Option<String>,
}

impl From<OkxMarkPrice> for MarkPrice {
    fn from(value: OkxMarkPrice) -> Self {
        Self {
            mark_price: value.mark_px,
            ts: value.ts,
        }
    }
}

/// See docs: <https://www.okx.com/docs-v5/en/#public-data-rest-api-get-index-tickers>
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct OkxIndexTicker {
    #[serde(rename = "idxPx", default, deserialize_with = "de_lenient_f64")]
    pub idx_px: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub ts: Option<String>,
}

impl From<OkxIndexTicker> for IndexTicker {
    fn from(value: OkxIndexTicker) -> Self {
        Self {
            index_px: value.idx_px,
            ts: value.ts,
        }
    }
}

/// See docs: <https://www.okx.com/docs-v5/en/#public-data-rest-api-get-open-interest>
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
pub struct OkxOpenInterest {
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub oi: Option<f64>,
}

/// See docs: <https://www.okx.com/docs-v5/en/#public-data-rest-api-get-instruments>
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxInstrument {
    #[serde(default)]
    pub inst_id: String,
    #[serde(default)]
    pub inst_type: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub inst_family: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub settle_ccy: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub ct_val: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub ct_mult: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub ct_val_ccy: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub ct_type: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub tick_sz: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub lot_sz: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub min_sz: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_f64")]
    pub lever: Option<f64>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub list_time: Option<i64>,
    #[serde(default, deserialize_with = "de_lenient_i64")]
    pub exp_time: Option<i64>,
}

impl From<OkxInstrument> for InstrumentMeta {
    fn from(value: OkxInstrument) -> Self {
        Self {
            inst_id: value.inst_id,
            inst_type: value.inst_type,
            inst_family: value.inst_family,
            settle_ccy: value.settle_ccy,
            ct_val: value.ct_val,
            ct_mult: value.ct_mult,
            ct_val_ccy: value.ct_val_ccy,
            ct_type: value.ct_type,
            tick_sz: value.tick_sz,
            lot_sz: value.lot_sz,
            min_sz: value.min_sz,
            max_lever: value.lever,
            state: value.state,
            list_time: value.list_time,
            exp_time: value.exp_time,
        }
    }
}

/// Rubik statistics row, eg/ `["1700000000000", "25000.5", "1300000000"]`.
///
/// See docs: <https://www.okx.com/docs-v5/en/#trading-statistics-rest-api-get-contract-open-interest-and-volume>
pub type OkxStatRow = Vec<Value>;

/// Numeric column of a rubik statistics row.
pub fn stat_value(row: &[Value], column: usize) -> Option<f64> {
    let value = match row.get(column)? {
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    };
    value.filter(|value| value.is_finite())
}

/// Percent change between the last two rows of a rubik open-interest-volume series.
pub fn stat_change_pct(rows: &[OkxStatRow]) -> Option<f64> {
    let [.., previous, latest] = rows else {
        return None;
    };
    match (stat_value(previous, 1), stat_value(latest, 1)) {
        (Some(previous), Some(latest)) if previous != 0.0 => {
            Some((latest - previous) / previous * 100.0)
        }
        _ => None,
    }
}

/// `(current - previous) / previous * 100`, `None` unless both samples are present and
/// non-zero.
pub fn percent_change(previous: Option<f64>, current: Option<f64>) -> Option<f64> {
    match (previous, current) {
        (Some(previous), Some(current)) if previous != 0.0 && current != 0.0 => {
            Some((current - previous) / previous * 100.0)
        }
        _ => None,
    }
}

/// Perpetual premium over the index, `(mark - index) / index`.
pub fn premium(mark: Option<f64>, index: Option<f64>) -> Option<f64> {
    match (mark, index) {
        (Some(mark), Some(index)) if index != 0.0 => Some((mark - index) / index),
        _ => None,
    }
}
