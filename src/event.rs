use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::utils::{format_utc, truncate_chars};

/// タイトルの最大文字数
pub const MAX_TITLE_CHARS: usize = 140;

/// イベントの開始・終了時刻
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// 時刻付き（UTCに正規化済み）
    DateTime(DateTime<Utc>),

    /// 終日イベント（日付のみ）
    Date(NaiveDate),
}

impl EventTime {
    /// 時刻付きの場合のみ UTC の時刻を返す
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::DateTime(dt) => Some(*dt),
            EventTime::Date(_) => None,
        }
    }
}

/// カレンダーイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    /// タイトル（140文字まで）
    pub title: String,

    /// 開始時刻
    pub start: EventTime,

    /// 終了時刻
    pub end: Option<EventTime>,
}

impl CalendarEvent {
    pub fn new(title: &str, start: EventTime, end: Option<EventTime>) -> Self {
        Self {
            title: truncate_chars(title, MAX_TITLE_CHARS),
            start,
            end,
        }
    }
}

/// これから始まる配信
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingEvent {
    pub title: String,

    /// `%Y-%m-%dT%H:%M:%SZ` 形式の開始時刻
    pub start_time: String,

    /// 長さ（分）
    pub duration_minutes: i64,
}

/// iCalendar 文書をパースしてイベント一覧にする
pub fn parse_calendar(raw: &str) -> Result<Vec<CalendarEvent>, SyncError> {
    // エラーページなどが 200 で返ってきた場合
    let raw = raw.trim_start_matches('\u{feff}').trim_start();
    if !raw.starts_with("BEGIN:VCALENDAR") {
        return Err(SyncError::FeedParse(
            "document does not start with BEGIN:VCALENDAR".to_string(),
        ));
    }

    let calendar: Calendar = raw
        .parse()
        .map_err(|e| SyncError::FeedParse(format!("{}", e)))?;

    let mut events = Vec::new();
    for component in &calendar.components {
        let event = match component {
            CalendarComponent::Event(event) => event,
            _ => continue,
        };

        let title = event.get_summary().unwrap_or_default();
        let start = match event.get_start() {
            Some(start) => to_event_time(start),
            None => {
                debug!("Skipping event without DTSTART: '{}'", title);
                continue;
            }
        };
        let end = event.get_end().map(to_event_time);

        events.push(CalendarEvent::new(title, start, end));
    }

    debug!("Parsed {} events from calendar feed", events.len());
    Ok(events)
}

fn to_event_time(value: DatePerhapsTime) -> EventTime {
    match value {
        DatePerhapsTime::Date(date) => EventTime::Date(date),
        DatePerhapsTime::DateTime(dt) => EventTime::DateTime(to_utc(dt)),
    }
}

/// 時刻を UTC に変換する。タイムゾーンなしの時刻は UTC とみなす
fn to_utc(value: CalendarDateTime) -> DateTime<Utc> {
    match value {
        CalendarDateTime::Utc(dt) => dt,
        CalendarDateTime::Floating(naive) => Utc.from_utc_datetime(&naive),
        CalendarDateTime::WithTimezone { date_time, tzid } => zoned_to_utc(&date_time, &tzid),
    }
}

fn zoned_to_utc(date_time: &NaiveDateTime, tzid: &str) -> DateTime<Utc> {
    let tz: Tz = match tzid.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Unknown TZID '{}', treating {} as UTC", tzid, date_time);
            return Utc.from_utc_datetime(date_time);
        }
    };

    // 夏時間切り替えで曖昧な時刻は早い方を採用
    match tz.from_local_datetime(date_time).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => {
            warn!(
                "{} does not exist in {}, treating it as UTC",
                date_time, tzid
            );
            Utc.from_utc_datetime(date_time)
        }
    }
}

/// `now` より後に始まるイベントを開始時刻順に並べる
///
/// 終日イベントは含めない。
pub fn extract_upcoming(events: &[CalendarEvent], now: DateTime<Utc>) -> Vec<UpcomingEvent> {
    let mut upcoming: Vec<UpcomingEvent> = events
        .iter()
        .filter_map(|event| {
            let start = event.start.instant()?;
            if start <= now {
                return None;
            }

            Some(UpcomingEvent {
                title: event.title.clone(),
                start_time: format_utc(&start),
                duration_minutes: duration_minutes(event, start),
            })
        })
        .collect();

    upcoming.sort_by(|a, b| a.start_time.cmp(&b.start_time));
    upcoming
}

/// 長さを分単位で計算（0方向に切り捨て）
fn duration_minutes(event: &CalendarEvent, start: DateTime<Utc>) -> i64 {
    match event.end.and_then(|end| end.instant()) {
        Some(end) => (end - start).num_minutes(),
        None => {
            warn!(
                "Event '{}' has no timed end, using a duration of 0 minutes",
                event.title
            );
            0
        }
    }
}
