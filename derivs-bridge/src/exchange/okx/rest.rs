use super::market::{
    OkxFundingRate, OkxIndexTicker, OkxInstrument, OkxMarkPrice, OkxOpenInterest, OkxResponse,
    OkxStatRow, percent_change, premium, stat_change_pct, stat_value,
};
use crate::{
    aggregate::{DerivsSource, FundingRate, IndexTicker, InstrumentMeta, MarkPrice},
    cache::{ExpiringCache, request_key},
    config::RestConfig,
    error::DataError,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const PATH_FUNDING_RATE: &str = "/api/v5/public/funding-rate";
const PATH_MARK_PRICE: &str = "/api/v5/public/mark-price";
const PATH_INDEX_TICKERS: &str = "/api/v5/market/index-tickers";
const PATH_OPEN_INTEREST: &str = "/api/v5/public/open-interest";
const PATH_INSTRUMENTS: &str = "/api/v5/public/instruments";
const PATH_RUBIK_OPEN_INTEREST_VOLUME: &str = "/api/v5/rubik/stat/contracts/open-interest-volume";
const PATH_RUBIK_LONG_SHORT_RATIO: &str = "/api/v5/rubik/stat/contracts/long-short-account-ratio";

const INST_TYPE_SWAP: &str = "SWAP";

/// `Okx` public REST client implementing [`DerivsSource`].
///
/// Successful response bodies are cached per request for [`RestConfig::cache_ttl`].
#[derive(Debug)]
pub struct OkxRestClient {
    http: reqwest::Client,
    base_url: String,
    use_rubik: bool,
    cache: ExpiringCache<Value>,
    /// Previous open interest snapshot per currency, for the snapshot based change.
    oi_samples: ExpiringCache<Option<f64>>,
}

impl OkxRestClient {
    pub fn new(config: &RestConfig) -> Result<Self, DataError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            use_rubik: config.use_rubik,
            cache: ExpiringCache::new(config.cache_ttl),
            oi_samples: ExpiringCache::new(config.cache_ttl),
        })
    }

    /// Override how long an open interest snapshot stays usable as the previous sample.
    pub fn with_oi_sample_ttl(mut self, ttl: Duration) -> Self {
        self.oi_samples = ExpiringCache::new(ttl);
        self
    }

    async fn get<T>(&self, path: &str, params: &[(&str, &str)]) -> Result<Vec<T>, DataError>
    where
        T: DeserializeOwned,
    {
        let key = request_key(path, params)?;

        let (body, cached) = match self.cache.get(&key) {
            Some(body) => {
                debug!(%key, "REST cache hit");
                (body, true)
            }
            None => (self.request(path, params).await?, false),
        };

        let data = OkxResponse::<T>::deserialize(&body)
            .map_err(|error| DataError::deserialise(error, &body.to_string()))?
            .into_data()?;

        if !cached {
            self.cache.insert(key, body);
        }

        Ok(data)
    }

    async fn get_first<T>(&self, path: &str, params: &[(&str, &str)]) -> Result<T, DataError>
    where
        T: DeserializeOwned + Default,
    {
        self.get::<T>(path, params)
            .await
            .map(|data| data.into_iter().next().unwrap_or_default())
    }

    async fn request(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, DataError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, ?params, "sending Okx REST request");

        self.http
            .get(url)
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
            .map_err(DataError::from)
    }
}

#[async_trait]
impl DerivsSource for OkxRestClient {
    async fn fetch_funding_rate(&self, inst_id: &str) -> Result<FundingRate, DataError> {
        self.get_first::<OkxFundingRate>(PATH_FUNDING_RATE, &[("instId", inst_id)])
            .await
            .map(|funding| funding.normalise(Utc::now()))
    }

    async fn fetch_mark_price(&self, inst_id: &str) -> Result<MarkPrice, DataError> {
        self.get_first::<OkxMarkPrice>(
            PATH_MARK_PRICE,
            &[("instType", INST_TYPE_SWAP), ("instId", inst_id)],
        )
        .await
        .map(MarkPrice::from)
    }

    async fn fetch_index_ticker(&self, index_id: &str) -> Result<IndexTicker, DataError> {
        self.get_first::<OkxIndexTicker>(PATH_INDEX_TICKERS, &[("instId", index_id)])
            .await
            .map(IndexTicker::from)
    }

    async fn fetch_basis(&self, inst_id: &str, index_id: &str) -> Result<Option<f64>, DataError> {
        let (mark, index) = tokio::try_join!(
            self.fetch_mark_price(inst_id),
            self.fetch_index_ticker(index_id)
        )?;

        Ok(premium(mark.mark_price, index.index_px))
    }

    async fn fetch_open_interest_change(
        &self,
        ccy: &str,
        period: &str,
    ) -> Result<Option<f64>, DataError> {
        if self.use_rubik {
            let rows = self
                .get::<OkxStatRow>(
                    PATH_RUBIK_OPEN_INTEREST_VOLUME,
                    &[("ccy", ccy), ("period", period)],
                )
                .await?;
            return Ok(stat_change_pct(&rows));
        }

        // Snapshot approximation, the previous sample is whatever was seen within its TTL
        let current = self
            .get_first::<OkxOpenInterest>(
                PATH_OPEN_INTEREST,
                &[("instType", INST_TYPE_SWAP), ("ccy", ccy)],
            )
            .await?
            .oi;

        let key = format!("oi:{ccy}");
        let previous = self.oi_samples.get(&key).flatten();
        self.oi_samples.insert(key, current);

        Ok(percent_change(previous, current))
    }

    async fn fetch_long_short_ratio(
        &self,
        ccy: &str,
        period: &str,
    ) -> Result<Option<f64>, DataError> {
        if !self.use_rubik {
            return Ok(None);
        }

        let rows = self
            .get::<OkxStatRow>(
                PATH_RUBIK_LONG_SHORT_RATIO,
                &[("ccy", ccy), ("period", period)],
            )
            .await?;

        Ok(rows.last().and_then(|row| stat_value(row, 1)))
    }

    async fn fetch_instrument_meta(
        &self,
        inst_id: &str,
        inst_type: &str,
    ) -> Result<Option<InstrumentMeta>, DataError> {
        self.get::<OkxInstrument>(
            PATH_INSTRUMENTS,
            &[("instType", inst_type), ("instId", inst_id)],
        )
        .await
        .map(|instruments| instruments.into_iter().next().map(InstrumentMeta::from))
    }
}
