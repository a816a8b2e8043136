use async_trait::async_trait;
use reqwest::Response;

/// Issues the GET request for one feed document. Lets tests and wrappers
/// stand in for reqwest.
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn get(&self, url: &str) -> reqwest::Result<Response>;
}
