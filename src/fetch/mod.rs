//! HTTP retrieval of feed documents.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::FeedClient;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{Instrument, debug, error, warn};

/// Downloads the body at `url`. Non-success statuses are errors.
pub async fn fetch_bytes<C: FeedClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let resp = client.get(url).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Fetches every URL concurrently. Each URL maps to its body or the error
/// that prevented getting it.
pub async fn fetch_all<C: FeedClient + 'static>(
    client: Arc<C>,
    urls: &[String],
) -> HashMap<String, Result<Vec<u8>>> {
    let mut tasks = Vec::with_capacity(urls.len());

    for url in urls {
        let client = client.clone();
        let url = url.clone();
        let span = tracing::info_span!("fetch_feed", url = %url);

        let task = tokio::spawn(
            async move {
                let started = std::time::Instant::now();
                let result = fetch_bytes(client.as_ref(), &url).await;
                let elapsed = started.elapsed();
                if elapsed.as_secs() > 15 {
                    warn!(elapsed_secs = elapsed.as_secs(), "Feed fetch was slow");
                }
                match &result {
                    Ok(bytes) => debug!(bytes = bytes.len(), "Feed bytes received"),
                    Err(e) => error!(error = %e, "Feed HTTP fetch failed"),
                }
                (url, result)
            }
            .instrument(span),
        );
        tasks.push(task);
    }

    let mut fetched = HashMap::with_capacity(tasks.len());
    for (task, url) in tasks.into_iter().zip(urls) {
        match task.await {
            Ok((url, result)) => {
                fetched.insert(url, result);
            }
            Err(e) => {
                error!(url = %url, error = %e, "Fetch task panicked");
                fetched.insert(url.clone(), Err(anyhow::anyhow!("fetch task failed: {e}")));
            }
        }
    }
    fetched
}
