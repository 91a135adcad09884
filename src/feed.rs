use async_trait::async_trait;
use log::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::{check_status, SyncError};

/// iCalendar 文書の取得元
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<String, SyncError>;
}

/// HTTP で iCal フィードを取得するクライアント
pub struct HttpFeed {
    url: String,
    client: reqwest::Client,
}

impl HttpFeed {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn fetch(&self) -> Result<String, SyncError> {
        debug!("GET {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::transport(&self.url, e))?;

        let response = check_status(&self.url, response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::transport(&self.url, e))?;

        debug!("Received {} bytes of calendar data", body.len());
        Ok(body)
    }
}
