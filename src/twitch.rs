use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::config::TwitchCredentials;
use crate::error::{check_status, SyncError};
use crate::event::UpcomingEvent;
use crate::sync::SinkOutcome;
use crate::utils::mask_token;

/// スケジュールセグメント作成リクエスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSegment {
    pub start_time: String,
    pub timezone: String,

    /// 長さ（分）。API の仕様で文字列
    pub duration: String,
    pub is_recurring: bool,
    pub title: String,
}

impl ScheduleSegment {
    pub fn from_upcoming(event: &UpcomingEvent, timezone: &str) -> Self {
        Self {
            start_time: event.start_time.clone(),
            timezone: timezone.to_string(),
            duration: event.duration_minutes.to_string(),
            is_recurring: false,
            title: event.title.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    data: Vec<TwitchUser>,
}

#[derive(Debug, Deserialize)]
struct TwitchUser {
    id: String,
}

/// Twitch のスケジュール操作
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScheduleApi: Send + Sync {
    /// ログイン名から配信者IDを取得
    async fn broadcaster_id(&self, login: &str) -> Result<String, SyncError>;

    /// セグメントを1件作成
    async fn create_segment(
        &self,
        broadcaster_id: &str,
        segment: &ScheduleSegment,
    ) -> Result<(), SyncError>;
}

/// Helix API クライアント
pub struct HelixClient {
    api_base: String,
    headers: HeaderMap,
    client: reqwest::Client,
}

impl HelixClient {
    pub fn new(credentials: &TwitchCredentials, api_base: &str) -> Result<Self, SyncError> {
        debug!(
            "Helix client for {} (client id {}, token {})",
            api_base,
            credentials.client_id,
            mask_token(&credentials.token)
        );

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            headers: auth_headers(credentials)?,
            client: reqwest::Client::new(),
        })
    }
}

/// 認証用ヘッダーを作成
fn auth_headers(credentials: &TwitchCredentials) -> Result<HeaderMap, SyncError> {
    let mut headers = HeaderMap::new();

    headers.insert(
        HeaderName::from_static("client-id"),
        HeaderValue::from_str(&credentials.client_id)
            .map_err(|_| SyncError::InvalidHeader("Client-Id"))?,
    );
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", credentials.token))
            .map_err(|_| SyncError::InvalidHeader("Authorization"))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}

#[async_trait]
impl ScheduleApi for HelixClient {
    async fn broadcaster_id(&self, login: &str) -> Result<String, SyncError> {
        let url = format!("{}/users?login={}", self.api_base, urlencoding::encode(login));

        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| SyncError::transport(&url, e))?;

        let response = check_status(&url, response).await?;

        let users: UsersResponse = response.json().await.map_err(|e| SyncError::Decode {
            endpoint: url.clone(),
            reason: e.to_string(),
        })?;

        users
            .data
            .into_iter()
            .next()
            .map(|user| user.id)
            .ok_or_else(|| SyncError::ChannelNotFound(login.to_string()))
    }

    async fn create_segment(
        &self,
        broadcaster_id: &str,
        segment: &ScheduleSegment,
    ) -> Result<(), SyncError> {
        let url = format!("{}/schedule/segment", self.api_base);

        let response = self
            .client
            .post(&url)
            .headers(self.headers.clone())
            .query(&[("broadcaster_id", broadcaster_id)])
            .json(segment)
            .send()
            .await
            .map_err(|e| SyncError::transport(&url, e))?;

        let status = response.status();
        check_status(&url, response).await?;
        info!("Twitch '{}': {}", segment.title, status.as_u16());

        Ok(())
    }
}

/// 直近の配信を Twitch のスケジュールに登録する
///
/// 配信者IDの取得に失敗した場合はセグメントを登録しない。
/// 各セグメントは独立して送信し、失敗しても残りは続行する。
pub async fn sync_schedule(
    api: &dyn ScheduleApi,
    channel: &str,
    timezone: &str,
    max_segments: usize,
    upcoming: &[UpcomingEvent],
) -> SinkOutcome {
    info!("Starting Twitch sync...");

    let broadcaster_id = match api.broadcaster_id(channel).await {
        Ok(id) => id,
        Err(e) => {
            warn!("Twitch sync error: {}", e);
            return SinkOutcome::Failed(e);
        }
    };
    debug!("Broadcaster id for '{}': {}", channel, broadcaster_id);

    let mut written = 0;
    let mut failed = 0;
    for event in upcoming.iter().take(max_segments) {
        let segment = ScheduleSegment::from_upcoming(event, timezone);
        match api.create_segment(&broadcaster_id, &segment).await {
            Ok(()) => written += 1,
            Err(e) => {
                warn!("Twitch '{}' failed ({}): {}", segment.title, e.category(), e);
                failed += 1;
            }
        }
    }

    SinkOutcome::Synced { written, failed }
}
