use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::config::SupabaseCredentials;
use crate::error::{check_status, SyncError};
use crate::event::UpcomingEvent;
use crate::sync::SinkOutcome;
use crate::utils::mask_token;

/// ウィジェットが読む「次の配信」行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStreamRecord {
    pub id: i64,
    pub title: String,
    pub start_time: String,
}

/// 配信テーブルへの操作
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StreamTable: Send + Sync {
    /// `start_time` が `cutoff` より前の行を削除
    async fn delete_started_before(&self, cutoff: &str) -> Result<(), SyncError>;

    /// 主キー重複時はマージして登録
    async fn upsert(&self, record: &NextStreamRecord) -> Result<(), SyncError>;
}

/// Supabase REST API クライアント
pub struct SupabaseClient {
    endpoint: url::Url,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl SupabaseClient {
    pub fn new(credentials: &SupabaseCredentials, table: &str) -> Result<Self, SyncError> {
        let raw = format!(
            "{}/rest/v1/{}",
            credentials.url.trim_end_matches('/'),
            table
        );
        let endpoint = url::Url::parse(&raw).map_err(|_| SyncError::Endpoint(raw.clone()))?;

        debug!(
            "Supabase endpoint {} (key {})",
            endpoint,
            mask_token(&credentials.service_role_key)
        );

        Ok(Self {
            endpoint,
            headers: auth_headers(&credentials.service_role_key)?,
            client: reqwest::Client::new(),
        })
    }
}

/// 認証用ヘッダーを作成
fn auth_headers(key: &str) -> Result<HeaderMap, SyncError> {
    let mut headers = HeaderMap::new();

    headers.insert(
        HeaderName::from_static("apikey"),
        HeaderValue::from_str(key).map_err(|_| SyncError::InvalidHeader("apikey"))?,
    );
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|_| SyncError::InvalidHeader("Authorization"))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}

#[async_trait]
impl StreamTable for SupabaseClient {
    async fn delete_started_before(&self, cutoff: &str) -> Result<(), SyncError> {
        let filter = format!("lt.{}", cutoff);

        let response = self
            .client
            .delete(self.endpoint.clone())
            .headers(self.headers.clone())
            .query(&[("start_time", filter.as_str())])
            .send()
            .await
            .map_err(|e| SyncError::transport(self.endpoint.as_str(), e))?;

        let status = response.status();
        check_status(self.endpoint.as_str(), response).await?;
        info!("Supabase delete status: {}", status.as_u16());

        Ok(())
    }

    async fn upsert(&self, record: &NextStreamRecord) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header("Prefer", "resolution=merge-duplicates")
            .json(record)
            .send()
            .await
            .map_err(|e| SyncError::transport(self.endpoint.as_str(), e))?;

        let status = response.status();
        check_status(self.endpoint.as_str(), response).await?;
        info!("Supabase update status: {}", status.as_u16());

        Ok(())
    }
}

/// 過去の配信を削除し、次の配信を登録する
///
/// 削除が失敗しても登録は試みる。どちらかが失敗した場合は最初のエラーを返す。
pub async fn sync_next_stream(
    table: &dyn StreamTable,
    record_id: i64,
    upcoming: &[UpcomingEvent],
    now_iso: &str,
) -> SinkOutcome {
    let mut written = 0;
    let mut first_error = None;

    if let Err(e) = table.delete_started_before(now_iso).await {
        warn!("Failed to delete past streams: {}", e);
        first_error = Some(e);
    }

    match upcoming.first() {
        Some(next) => {
            let record = NextStreamRecord {
                id: record_id,
                title: next.title.clone(),
                start_time: next.start_time.clone(),
            };
            match table.upsert(&record).await {
                Ok(()) => {
                    info!("Next stream set to '{}' at {}", record.title, record.start_time);
                    written += 1;
                }
                Err(e) => {
                    warn!("Failed to upsert next stream: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        None => info!("No upcoming streams, nothing to upsert"),
    }

    match first_error {
        Some(e) => SinkOutcome::Failed(e),
        None => SinkOutcome::Synced { written, failed: 0 },
    }
}
