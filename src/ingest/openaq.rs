//! OpenAQ v2 `measurements` client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::fetch::auth::ApiKey;
use crate::fetch::{BasicClient, HttpClient, fetch_json};
use crate::ingest::ObservationSource;
use crate::types::{Observation, Provenance};

pub const DEFAULT_BASE_URL: &str = "https://api.openaq.org/v2/measurements";
const PAGE_LIMIT: usize = 10_000;
const PAGE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct MeasurementsPage {
    #[serde(default)]
    meta: Meta,
    #[serde(default)]
    results: Vec<Measurement>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    /// A count, or a string such as `">10000"` for large result sets.
    #[serde(default)]
    found: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Measurement {
    value: Option<f64>,
    #[serde(default)]
    unit: String,
    date: MeasurementDate,
}

#[derive(Debug, Deserialize)]
struct MeasurementDate {
    utc: DateTime<Utc>,
}

impl Meta {
    fn found(&self) -> usize {
        match &self.found {
            serde_json::Value::Number(n) => n.as_u64().unwrap_or(0) as usize,
            serde_json::Value::String(s) => s.trim_start_matches('>').trim().parse().unwrap_or(0),
            _ => 0,
        }
    }
}

/// `max(1, ceil(found / limit))`.
fn page_count(found: usize, limit: usize) -> usize {
    found.div_ceil(limit.max(1)).max(1)
}

fn to_observations(city: &str, results: Vec<Measurement>) -> Vec<Observation> {
    results
        .into_iter()
        .map(|m| Observation {
            timestamp: m.date.utc,
            city: city.to_string(),
            value: m.value,
            unit: m.unit,
            source: Provenance::Raw,
        })
        .collect()
}

pub struct OpenAqSource {
    client: Box<dyn HttpClient>,
    base_url: reqwest::Url,
    limit: usize,
    page_delay: Duration,
}

impl OpenAqSource {
    pub fn new(client: Box<dyn HttpClient>, base_url: &str) -> Result<Self> {
        let base_url = base_url
            .parse()
            .with_context(|| format!("invalid OpenAQ base URL '{base_url}'"))?;
        Ok(Self {
            client,
            base_url,
            limit: PAGE_LIMIT,
            page_delay: PAGE_DELAY,
        })
    }

    /// Builds a client from `OPENAQ_BASE_URL` and, when set, `OPENAQ_API_KEY`.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("OPENAQ_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let basic = BasicClient::new()?;
        let client: Box<dyn HttpClient> = match std::env::var("OPENAQ_API_KEY") {
            Ok(key) if !key.is_empty() => Box::new(ApiKey::x_api_key(basic, &key)?),
            _ => Box::new(basic),
        };
        Self::new(client, &base_url)
    }

    fn page_url(
        &self,
        city: &str,
        parameter: &str,
        start: NaiveDate,
        end: NaiveDate,
        page: usize,
    ) -> reqwest::Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("city", city)
            .append_pair("parameter", parameter)
            .append_pair("date_from", &start.format("%Y-%m-%dT00:00:00Z").to_string())
            .append_pair("date_to", &end.format("%Y-%m-%dT23:59:59Z").to_string())
            .append_pair("limit", &self.limit.to_string())
            .append_pair("page", &page.to_string())
            .append_pair("sort", "asc")
            .append_pair("order_by", "date");
        url
    }
}

#[async_trait]
impl ObservationSource for OpenAqSource {
    #[tracing::instrument(skip(self))]
    async fn fetch_city(
        &self,
        city: &str,
        parameter: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Observation>> {
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            let url = self.page_url(city, parameter, start, end, page);
            let body: MeasurementsPage = fetch_json(self.client.as_ref(), url)
                .await
                .with_context(|| format!("OpenAQ page {page} for {city}"))?;
            if body.results.is_empty() {
                break;
            }
            let pages = page_count(body.meta.found(), self.limit);
            debug!(page, pages, results = body.results.len(), "fetched page");
            out.extend(to_observations(city, body.results));
            if page >= pages {
                break;
            }
            page += 1;
            tokio::time::sleep(self.page_delay).await;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 10_000), 1);
        assert_eq!(page_count(10_000, 10_000), 1);
        assert_eq!(page_count(10_001, 10_000), 2);
    }

    #[test]
    fn test_found_accepts_strings() {
        let meta: Meta = serde_json::from_str(r#"{"found": ">10000"}"#).unwrap();
        assert_eq!(meta.found(), 10_000);
        let meta: Meta = serde_json::from_str(r#"{"found": 42}"#).unwrap();
        assert_eq!(meta.found(), 42);
        assert_eq!(Meta::default().found(), 0);
    }

    #[test]
    fn test_page_decodes_to_observations() {
        let js = r#"{
            "meta": {"found": 2},
            "results": [
                {"location": "ITO", "parameter": "pm25", "value": 88.1, "unit": "µg/m³",
                 "date": {"utc": "2023-01-01T06:00:00Z", "local": "2023-01-01T11:30:00+05:30"}},
                {"location": "ITO", "parameter": "pm25", "value": null, "unit": "µg/m³",
                 "date": {"utc": "2023-01-01T07:00:00Z", "local": "2023-01-01T12:30:00+05:30"}}
            ]
        }"#;
        let page: MeasurementsPage = serde_json::from_str(js).unwrap();
        assert_eq!(page.meta.found(), 2);
        let obs = to_observations("Delhi", page.results);
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].city, "Delhi");
        assert_eq!(obs[0].value, Some(88.1));
        assert_eq!(obs[1].value, None);
        assert!(obs.iter().all(|o| o.source == Provenance::Raw));
    }

    #[test]
    fn test_page_url_query() {
        let source = OpenAqSource::new(Box::new(BasicClient::new().unwrap()), DEFAULT_BASE_URL)
            .unwrap();
        let url = source.page_url(
            "Delhi",
            "pm25",
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            3,
        );
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| pairs.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("city"), Some("Delhi"));
        assert_eq!(get("date_from"), Some("2023-01-01T00:00:00Z"));
        assert_eq!(get("date_to"), Some("2024-12-31T23:59:59Z"));
        assert_eq!(get("limit"), Some("10000"));
        assert_eq!(get("page"), Some("3"));
        assert_eq!(get("order_by"), Some("date"));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(OpenAqSource::new(Box::new(BasicClient::new().unwrap()), "not a url").is_err());
    }
}
