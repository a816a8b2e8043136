use std::time::Duration;

use super::client::FeedClient;
use async_trait::async_trait;
use reqwest::header::ACCEPT;

/// Plain reqwest client with the timeouts used for feed polling.
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl FeedClient for BasicClient {
    async fn get(&self, url: &str) -> reqwest::Result<reqwest::Response> {
        self.0
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
    }
}
