use chrono::{DateTime, Utc};
use log::info;

use crate::config::{Invocation, TriggerConfig};
use crate::event::CalendarEvent;

/// 配信開始からの経過時間ウィンドウ（分、両端を含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerWindow {
    pub start_minutes: u32,
    pub end_minutes: u32,
}

impl From<&TriggerConfig> for TriggerWindow {
    fn from(config: &TriggerConfig) -> Self {
        Self {
            start_minutes: config.window_start_minutes,
            end_minutes: config.window_end_minutes,
        }
    }
}

impl Default for TriggerWindow {
    fn default() -> Self {
        Self::from(&TriggerConfig::default())
    }
}

impl TriggerWindow {
    fn contains(&self, elapsed: chrono::Duration) -> bool {
        let elapsed_ms = elapsed.num_milliseconds();
        let lower = i64::from(self.start_minutes) * 60_000;
        let upper = i64::from(self.end_minutes) * 60_000;
        lower <= elapsed_ms && elapsed_ms <= upper
    }
}

/// 起動判定の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// 手動実行のため判定なし
    Bypassed,

    /// ウィンドウ内に開始した配信がある
    Matched { title: String, minutes_ago: i64 },

    NoMatch,
}

impl GateDecision {
    pub fn proceeds(&self) -> bool {
        !matches!(self, GateDecision::NoMatch)
    }
}

/// ウィンドウ内に開始したイベントを探す
///
/// 終日イベントは対象外。最初に見つかったイベントを返す。
pub fn find_recent_start<'a>(
    events: &'a [CalendarEvent],
    now: DateTime<Utc>,
    window: TriggerWindow,
) -> Option<(&'a CalendarEvent, i64)> {
    events.iter().find_map(|event| {
        let start = event.start.instant()?;
        let elapsed = now - start;
        window
            .contains(elapsed)
            .then(|| (event, elapsed.num_minutes()))
    })
}

/// 今回の実行で同期を行うかどうか判定する
pub fn evaluate(
    invocation: Invocation,
    events: &[CalendarEvent],
    now: DateTime<Utc>,
    window: TriggerWindow,
) -> GateDecision {
    if invocation == Invocation::Manual {
        info!("Manual run, skipping trigger window check");
        return GateDecision::Bypassed;
    }

    match find_recent_start(events, now, window) {
        Some((event, minutes_ago)) => {
            info!(
                "Matching stream found: '{}' (started {} min ago)",
                event.title, minutes_ago
            );
            GateDecision::Matched {
                title: event.title.clone(),
                minutes_ago,
            }
        }
        None => GateDecision::NoMatch,
    }
}
