pub mod auth;
mod client;

pub use client::{BasicClient, HttpClient};

use anyhow::{Result, ensure};

/// Fetches a URL and returns the raw response body.
///
/// `?Sized` so callers holding a `Box<dyn HttpClient>` (auth mode is a
/// runtime configuration choice) can pass it straight through.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    ensure!(status.is_success(), "{url} returned status {status}");
    Ok(resp.bytes().await?.to_vec())
}
