// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use scraper::Html;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::models::CrawlerConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Fetch a URL and decode the JSON body. Non-2xx statuses are errors.
pub async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T> {
    log::debug!("GET {}", url);
    let value = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(value)
}

/// POST a JSON body and decode the JSON response.
pub async fn post_json<B, T>(client: &reqwest::Client, url: &str, body: &B) -> Result<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    log::debug!("POST {}", url);
    let value = client
        .post(url)
        .json(body)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(value)
}

/// Fetch a URL as text.
pub async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    log::debug!("GET {}", url);
    let text = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(text)
}

/// Fetch a page asynchronously and parse it as HTML.
///
/// `Html` is not `Send`; extract what you need before the next `.await`.
pub async fn fetch_page_async(client: &reqwest::Client, url: &str) -> Result<Html> {
    let text = get_text(client, url).await?;
    Ok(Html::parse_document(&text))
}
