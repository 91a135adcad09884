use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::config::{AppConfig, Invocation};
use crate::error::SyncError;
use crate::event::{self, UpcomingEvent};
use crate::feed::FeedSource;
use crate::supabase::{self, StreamTable};
use crate::trigger::{self, GateDecision, TriggerWindow};
use crate::twitch::{self, ScheduleApi};
use crate::utils::format_utc;

/// シンク1つ分の結果
#[derive(Debug)]
pub enum SinkOutcome {
    /// 書き込み件数と失敗件数
    Synced { written: usize, failed: usize },

    /// 設定不足などで実行しなかった
    Skipped(String),

    Failed(SyncError),
}

/// 1回の実行結果
#[derive(Debug)]
pub enum RunReport {
    /// フィードの取得・パースに失敗したため中断
    FeedFailed(SyncError),

    /// 定期実行で起動条件を満たさなかった
    NotTriggered,

    Completed {
        gate: GateDecision,
        upcoming: usize,
        database: SinkOutcome,
        schedule: SinkOutcome,
    },
}

/// 同期先。設定が揃っていないシンクは理由付きで `Err` にしておく
pub struct Sinks<'a> {
    pub table: Result<&'a dyn StreamTable, String>,
    pub schedule: Result<ScheduleTarget<'a>, String>,
}

/// Twitch の同期先チャンネル
pub struct ScheduleTarget<'a> {
    pub api: &'a dyn ScheduleApi,
    pub channel: &'a str,
}

/// フィードを取得して起動判定とイベント抽出を行った結果
pub struct Plan {
    pub gate: GateDecision,
    pub upcoming: Vec<UpcomingEvent>,
}

/// フィードを取得し、起動判定と次回以降の配信の抽出を行う
///
/// 起動条件を満たさない場合、`upcoming` は空のまま返す。
pub async fn plan(
    config: &AppConfig,
    invocation: Invocation,
    now: DateTime<Utc>,
    feed: &dyn FeedSource,
) -> Result<Plan, SyncError> {
    info!("Loading calendar feed...");
    let raw = feed.fetch().await?;
    let events = event::parse_calendar(&raw)?;

    let window = TriggerWindow::from(&config.trigger);
    let gate = trigger::evaluate(invocation, &events, now, window);
    if !gate.proceeds() {
        return Ok(Plan {
            gate,
            upcoming: Vec::new(),
        });
    }

    let upcoming = event::extract_upcoming(&events, now);
    info!("{} upcoming streams in feed", upcoming.len());

    Ok(Plan { gate, upcoming })
}

/// 1回分の同期処理
///
/// `now` は起動判定・抽出・削除条件のすべてで共通に使う。
pub async fn run_sync(
    config: &AppConfig,
    invocation: Invocation,
    now: DateTime<Utc>,
    feed: &dyn FeedSource,
    sinks: Sinks<'_>,
) -> RunReport {
    let Plan { gate, upcoming } = match plan(config, invocation, now, feed).await {
        Ok(plan) => plan,
        Err(e) => {
            error!("Failed to load calendar feed: {}", e);
            return RunReport::FeedFailed(e);
        }
    };

    if !gate.proceeds() {
        return RunReport::NotTriggered;
    }

    let now_iso = format_utc(&now);

    let database = match sinks.table {
        Ok(table) => {
            supabase::sync_next_stream(table, config.supabase.record_id, &upcoming, &now_iso).await
        }
        Err(reason) => SinkOutcome::Skipped(reason),
    };

    let schedule = match sinks.schedule {
        Ok(target) => {
            twitch::sync_schedule(
                target.api,
                target.channel,
                &config.twitch.timezone,
                config.twitch.max_segments,
                &upcoming,
            )
            .await
        }
        Err(reason) => SinkOutcome::Skipped(reason),
    };

    RunReport::Completed {
        gate,
        upcoming: upcoming.len(),
        database,
        schedule,
    }
}

impl SinkOutcome {
    fn log(&self, sink: &str) {
        match self {
            SinkOutcome::Synced { written, failed: 0 } => {
                info!("{}: synced ({} written)", sink, written)
            }
            SinkOutcome::Synced { written, failed } => {
                warn!("{}: {} written, {} failed", sink, written, failed)
            }
            SinkOutcome::Skipped(reason) => info!("{}: skipped ({})", sink, reason),
            SinkOutcome::Failed(e) => error!("{}: failed [{}] {}", sink, e.category(), e),
        }
    }
}

impl RunReport {
    /// 実行結果をログに出力
    pub fn log(&self) {
        match self {
            RunReport::FeedFailed(e) => {
                error!("Run aborted [{}]: {}", e.category(), e)
            }
            RunReport::NotTriggered => {
                info!("No stream started within the trigger window. Exiting.")
            }
            RunReport::Completed {
                gate,
                upcoming,
                database,
                schedule,
            } => {
                info!("Run completed ({:?}, {} upcoming streams)", gate, upcoming);
                database.log("Supabase");
                schedule.log("Twitch");
            }
        }
    }
}
