use thiserror::Error;

/// 同期処理で発生するエラー
///
/// フィード取得・各シンクへのリクエストの失敗を分類して呼び出し元に返す。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 接続失敗・タイムアウトなど
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// 2xx 以外のレスポンス
    #[error("{endpoint} responded with HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// iCalendar のパース失敗
    #[error("failed to parse calendar feed: {0}")]
    FeedParse(String),

    /// レスポンスボディの形式が想定外
    #[error("unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("channel '{0}' was not found")]
    ChannelNotFound(String),

    #[error("invalid endpoint URL '{0}'")]
    Endpoint(String),

    /// ヘッダーに使えない文字を含む認証情報
    #[error("invalid value for header {0}")]
    InvalidHeader(&'static str),
}

impl SyncError {
    /// ログ集計用の固定カテゴリ名
    pub fn category(&self) -> &'static str {
        match self {
            SyncError::Transport { .. } => "transport",
            SyncError::Status { .. } => "status",
            SyncError::FeedParse(_) => "feed_parse",
            SyncError::Decode { .. } => "decode",
            SyncError::ChannelNotFound(_) => "channel_not_found",
            SyncError::Endpoint(_) => "endpoint",
            SyncError::InvalidHeader(_) => "invalid_header",
        }
    }

    pub(crate) fn transport(endpoint: &str, source: reqwest::Error) -> Self {
        SyncError::Transport {
            endpoint: endpoint.to_string(),
            source,
        }
    }
}

/// レスポンスステータスをチェックし、失敗時はボディ込みのエラーに変換する
pub(crate) async fn check_status(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match response.text().await {
        Ok(text) => text,
        Err(_) => "Failed to read error response".to_string(),
    };

    Err(SyncError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}
