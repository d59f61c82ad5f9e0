mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Result, bail};
use serde::de::DeserializeOwned;

/// GETs `url` and decodes the JSON body. Non-2xx statuses are errors.
pub async fn fetch_json<C: HttpClient + ?Sized, T: DeserializeOwned>(
    client: &C,
    url: reqwest::Url,
) -> Result<T> {
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("request failed with status {status}: {body}");
    }
    Ok(resp.json().await?)
}
