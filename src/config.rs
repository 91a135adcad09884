use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::utils::non_empty;

/// 配信スケジュールの iCal フィード
pub const DEFAULT_FEED_URL: &str = "https://export.kalender.digital/ics/0/4ccef74582e0eb8d7026/twitchhd1920x1080.ics?past_months=3&future_months=36";

/// 手動実行を示すワークフローイベント名
pub const MANUAL_EVENT_NAME: &str = "workflow_dispatch";

/// 実行種別を伝える環境変数
pub const EVENT_NAME_VAR: &str = "GITHUB_EVENT_NAME";

/// アプリケーション全体の設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// カレンダーフィードの設定
    pub feed: FeedConfig,

    /// 起動判定ウィンドウの設定
    pub trigger: TriggerConfig,

    /// Supabase（Webサイトのウィジェット用テーブル）の設定
    pub supabase: SupabaseConfig,

    /// Twitch スケジュールの設定
    pub twitch: TwitchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
}

/// 起動判定の設定
///
/// 配信開始から `window_start_minutes` 以上 `window_end_minutes` 以下の
/// 経過時間でのみ定期実行が処理を続ける。ウィンドウ幅は外部スケジューラの
/// 実行間隔 `poll_interval_minutes` を前提にしている。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// 想定する実行間隔（分）。デーモンモードではこの間隔で実行する
    pub poll_interval_minutes: u32,

    /// 開始からの経過時間の下限（分）
    pub window_start_minutes: u32,

    /// 開始からの経過時間の上限（分）
    pub window_end_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupabaseConfig {
    /// プロジェクトURL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// service_role キー
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_role_key: Option<String>,

    /// 次回配信を保持するテーブル
    pub table: String,

    /// シングルトン行のID
    pub record_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// ユーザーアクセストークン
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// チャンネル名（ログイン名）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// スケジュールセグメントに付けるタイムゾーン名
    pub timezone: String,

    /// 一度に登録するセグメントの最大数
    pub max_segments: usize,

    /// Helix API のベースURL
    pub api_base: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 30,
            window_start_minutes: 30,
            window_end_minutes: 65,
        }
    }
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_role_key: None,
            table: "streams".to_string(),
            record_id: 1,
        }
    }
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            token: None,
            channel: None,
            timezone: "Europe/Berlin".to_string(),
            max_segments: 5,
            api_base: "https://api.twitch.tv/helix".to_string(),
        }
    }
}

/// Supabase の接続情報（URL とキーが揃っている場合のみ）
#[derive(Debug, Clone)]
pub struct SupabaseCredentials {
    pub url: String,
    pub service_role_key: String,
}

/// Twitch の接続情報
#[derive(Debug, Clone)]
pub struct TwitchCredentials {
    pub client_id: String,
    pub token: String,
    pub channel: String,
}

impl SupabaseConfig {
    pub fn credentials(&self) -> Option<SupabaseCredentials> {
        let url = non_empty(self.url.clone())?;
        let service_role_key = non_empty(self.service_role_key.clone())?;
        Some(SupabaseCredentials {
            url,
            service_role_key,
        })
    }
}

impl TwitchConfig {
    /// 接続情報を組み立てる。足りない場合はスキップ理由を返す
    pub fn credentials(&self) -> Result<TwitchCredentials, &'static str> {
        let token = non_empty(self.token.clone()).ok_or("no TWITCH_TOKEN configured")?;
        let client_id =
            non_empty(self.client_id.clone()).ok_or("TWITCH_CLIENT_ID is missing")?;
        let channel = non_empty(self.channel.clone()).ok_or("TWITCH_CHANNEL is missing")?;
        Ok(TwitchCredentials {
            client_id,
            token,
            channel,
        })
    }
}

impl AppConfig {
    /// よく知られた環境変数で設定を上書きする
    ///
    /// 値の取得元を差し替えられるようにクロージャで受け取る。
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TWITCH_CLIENT_ID") {
            self.twitch.client_id = Some(v);
        }
        if let Some(v) = lookup("TWITCH_TOKEN") {
            self.twitch.token = Some(v);
        }
        if let Some(v) = lookup("TWITCH_CHANNEL") {
            self.twitch.channel = Some(v);
        }
        if let Some(v) = lookup("SUPABASE_URL") {
            self.supabase.url = Some(v);
        }
        if let Some(v) = lookup("SUPABASE_SERVICE_ROLE_KEY") {
            self.supabase.service_role_key = Some(v);
        }
    }

    /// 設定値の整合性をチェック
    pub fn validate(&self) -> Result<()> {
        let trigger = &self.trigger;
        if trigger.window_start_minutes > trigger.window_end_minutes {
            bail!(
                "trigger.window_start_minutes ({}) must not exceed trigger.window_end_minutes ({})",
                trigger.window_start_minutes,
                trigger.window_end_minutes
            );
        }
        if trigger.poll_interval_minutes == 0 {
            bail!("trigger.poll_interval_minutes must be greater than zero");
        }

        let width = trigger.window_end_minutes - trigger.window_start_minutes;
        if width < trigger.poll_interval_minutes {
            warn!(
                "Trigger window ({} min) is narrower than the poll interval ({} min); some stream starts may never trigger a sync",
                width, trigger.poll_interval_minutes
            );
        }

        if self.twitch.max_segments == 0 {
            warn!("twitch.max_segments is 0; no schedule segments will be created");
        }

        url::Url::parse(&self.feed.url).context("feed.url is not a valid URL")?;

        Ok(())
    }
}

/// 設定を読み込む
///
/// 優先順位: 設定ファイル < `STREAM_SYNC_*` 環境変数 < 既知の環境変数
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let env: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();

    load_config_with_env(path, &env)
}

/// 環境変数を明示的に渡して設定を読み込む
///
/// `STREAM_SYNC_*` の上書きと認証情報の変数はどちらも `env` からだけ読む。
pub fn load_config_with_env<P: AsRef<Path>>(
    path: P,
    env: &HashMap<String, String>,
) -> Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path.as_ref()).required(false))
        .add_source(
            config::Environment::with_prefix("STREAM_SYNC")
                .prefix_separator("_")
                .separator("__")
                .source(Some(env.clone())),
        )
        .build()
        .context("Failed to read configuration")?;

    let mut config: AppConfig = settings
        .try_deserialize()
        .context("Failed to parse configuration")?;

    config.apply_env_overrides(|name| env.get(name).cloned());
    config.validate()?;

    Ok(config)
}

/// サンプル設定ファイルを作成する
pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut config = AppConfig::default();
    config.supabase.url = Some("https://your-project.supabase.co".to_string());
    config.twitch.channel = Some("your_channel".to_string());

    let toml_str = toml::to_string_pretty(&config).context("Failed to serialize config")?;

    std::fs::write(path, toml_str).context("Failed to write sample config file")?;

    Ok(())
}

/// 手動実行か定期実行か
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// 起動判定をスキップする
    Manual,
    Scheduled,
}

impl Invocation {
    /// ワークフローのイベント名から実行種別を判定
    pub fn from_event_name(event_name: Option<&str>) -> Self {
        match event_name {
            Some(MANUAL_EVENT_NAME) => Invocation::Manual,
            _ => Invocation::Scheduled,
        }
    }

    pub fn from_env() -> Self {
        Self::from_event_name(std::env::var(EVENT_NAME_VAR).ok().as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_the_stream_setup() {
        let config = AppConfig::default();
        assert_eq!(config.feed.url, DEFAULT_FEED_URL);
        assert_eq!(config.trigger.window_start_minutes, 30);
        assert_eq!(config.trigger.window_end_minutes, 65);
        assert_eq!(config.supabase.table, "streams");
        assert_eq!(config.supabase.record_id, 1);
        assert_eq!(config.twitch.timezone, "Europe/Berlin");
        assert_eq!(config.twitch.max_segments, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_fill_credentials() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(lookup_from(&[
            ("TWITCH_CLIENT_ID", "client"),
            ("TWITCH_TOKEN", "token"),
            ("TWITCH_CHANNEL", "channel"),
            ("SUPABASE_URL", "https://db.example"),
            ("SUPABASE_SERVICE_ROLE_KEY", "key"),
        ]));

        let twitch = config.twitch.credentials().unwrap();
        assert_eq!(twitch.client_id, "client");
        assert_eq!(twitch.channel, "channel");

        let supabase = config.supabase.credentials().unwrap();
        assert_eq!(supabase.url, "https://db.example");
        assert_eq!(supabase.service_role_key, "key");
    }

    #[test]
    fn empty_credentials_count_as_missing() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(lookup_from(&[
            ("SUPABASE_URL", "https://db.example"),
            ("SUPABASE_SERVICE_ROLE_KEY", ""),
            ("TWITCH_TOKEN", " "),
        ]));

        assert!(config.supabase.credentials().is_none());
        assert_eq!(
            config.twitch.credentials().unwrap_err(),
            "no TWITCH_TOKEN configured"
        );
    }

    #[test]
    fn token_without_channel_reports_missing_value() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(lookup_from(&[
            ("TWITCH_TOKEN", "token"),
            ("TWITCH_CLIENT_ID", "client"),
        ]));

        assert_eq!(
            config.twitch.credentials().unwrap_err(),
            "TWITCH_CHANNEL is missing"
        );
    }

    #[test]
    fn inverted_window_is_rejected() {
        let mut config = AppConfig::default();
        config.trigger.window_start_minutes = 70;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_reads_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[trigger]\nwindow_start_minutes = 10\nwindow_end_minutes = 40\npoll_interval_minutes = 15\n\n[twitch]\ntimezone = \"UTC\"\nmax_segments = 3"
        )
        .unwrap();

        let config = load_config_with_env(file.path(), &HashMap::new()).unwrap();
        assert_eq!(config.trigger.window_start_minutes, 10);
        assert_eq!(config.trigger.window_end_minutes, 40);
        assert_eq!(config.trigger.poll_interval_minutes, 15);
        assert_eq!(config.twitch.timezone, "UTC");
        assert_eq!(config.twitch.max_segments, 3);
        // ファイルにない項目はデフォルト値
        assert_eq!(config.supabase.table, "streams");
    }

    #[test]
    fn sample_config_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        generate_sample_config(&path).unwrap();

        let config = load_config_with_env(&path, &HashMap::new()).unwrap();
        assert_eq!(config.trigger.poll_interval_minutes, 30);
        assert_eq!(config.twitch.max_segments, 5);
    }

    #[test]
    fn env_map_overrides_file_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[trigger]\npoll_interval_minutes = 15").unwrap();

        let env: HashMap<String, String> = [
            ("STREAM_SYNC_TRIGGER__POLL_INTERVAL_MINUTES", "20"),
            ("STREAM_SYNC_SUPABASE__TABLE", "next_stream"),
            ("TWITCH_TOKEN", "token"),
            ("TWITCH_CHANNEL", "channel"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = load_config_with_env(file.path(), &env).unwrap();
        assert_eq!(config.trigger.poll_interval_minutes, 20);
        assert_eq!(config.supabase.table, "next_stream");
        assert_eq!(config.twitch.token.as_deref(), Some("token"));
        assert_eq!(config.twitch.channel.as_deref(), Some("channel"));
        assert!(config.supabase.credentials().is_none());
    }

    #[test]
    fn invocation_from_event_name() {
        assert_eq!(
            Invocation::from_event_name(Some("workflow_dispatch")),
            Invocation::Manual
        );
        assert_eq!(
            Invocation::from_event_name(Some("schedule")),
            Invocation::Scheduled
        );
        assert_eq!(Invocation::from_event_name(None), Invocation::Scheduled);
    }
}
