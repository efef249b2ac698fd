use async_trait::async_trait;
use reqwest::{Request, Response};

/// Seam between the fetch loop and the HTTP stack, so tests can script
/// responses without a network.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
