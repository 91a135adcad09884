use anyhow::{Context, Result};
use chrono::{self, Local, Utc};
use clap::Parser;
use log::{error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time;

use stream_schedule_sync::config::{self, AppConfig, Invocation};
use stream_schedule_sync::feed::HttpFeed;
use stream_schedule_sync::supabase::{StreamTable, SupabaseClient};
use stream_schedule_sync::sync::{self, ScheduleTarget, Sinks};
use stream_schedule_sync::twitch::{HelixClient, ScheduleApi};

/// Sync an iCalendar stream schedule into Supabase and Twitch
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// Path to config file (optional)
    #[clap(short, long, value_parser, default_value = "config.toml")]
    config: PathBuf,

    /// Skip the trigger window check (one-shot and preview only)
    #[clap(long, conflicts_with = "daemon")]
    manual: bool,

    /// Show the trigger decision and upcoming streams without writing anything
    #[clap(long)]
    preview: bool,

    /// Run the sync every poll interval
    #[clap(short, long)]
    daemon: bool,

    /// Write a sample config file and exit
    #[clap(long)]
    init_config: bool,
}

/// アプリケーションのロギングを初期化
fn init_logging() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let args = Args::parse();

    if args.init_config {
        config::generate_sample_config(&args.config)
            .context("Failed to generate sample config")?;
        info!("Wrote sample config to {:?}", args.config);
        return Ok(());
    }

    info!("Starting stream_schedule_sync v{}", env!("CARGO_PKG_VERSION"));

    // 同期処理の失敗は終了コードに反映しない
    let config = match config::load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            return Ok(());
        }
    };

    let invocation = if args.manual {
        Invocation::Manual
    } else {
        Invocation::from_env()
    };

    if args.preview {
        info!("Running in preview mode");
        preview(&config, invocation).await;
    } else if args.daemon {
        info!("Running in daemon mode");
        if invocation == Invocation::Manual {
            warn!(
                "{} is ignored in daemon mode; every tick checks the trigger window",
                config::EVENT_NAME_VAR
            );
        }
        run_daemon(&config).await;
    } else {
        info!("Running in one-shot mode ({:?})", invocation);
        run_once(&config, invocation).await;
    }

    Ok(())
}

/// 同期を一度だけ実行する
async fn run_once(config: &AppConfig, invocation: Invocation) {
    let feed = HttpFeed::new(&config.feed.url);

    let supabase = match config.supabase.credentials() {
        Some(credentials) => SupabaseClient::new(&credentials, &config.supabase.table)
            .map_err(|e| format!("invalid Supabase settings: {}", e)),
        None => Err("Supabase config missing (URL or KEY)".to_string()),
    };

    let twitch = config
        .twitch
        .credentials()
        .map_err(|reason| reason.to_string())
        .and_then(|credentials| {
            HelixClient::new(&credentials, &config.twitch.api_base)
                .map(|client| (client, credentials.channel))
                .map_err(|e| format!("invalid Twitch settings: {}", e))
        });

    let sinks = Sinks {
        table: supabase.as_ref().map(|c| c as &dyn StreamTable).map_err(|reason| reason.clone()),
        schedule: twitch
            .as_ref()
            .map(|(client, channel)| ScheduleTarget {
                api: client as &dyn ScheduleApi,
                channel: channel.as_str(),
            })
            .map_err(|reason| reason.clone()),
    };

    let now = Utc::now();
    let report = sync::run_sync(config, invocation, now, &feed, sinks).await;
    report.log();
}

/// フィードを取得して判定結果と今後の配信を表示する（書き込みなし）
async fn preview(config: &AppConfig, invocation: Invocation) {
    let feed = HttpFeed::new(&config.feed.url);
    let now = Utc::now();

    match sync::plan(config, invocation, now, &feed).await {
        Ok(plan) => {
            info!("Trigger decision: {:?}", plan.gate);
            if !plan.gate.proceeds() {
                info!("A scheduled run would exit here; use --manual to list upcoming streams");
                return;
            }
            for (i, event) in plan.upcoming.iter().enumerate() {
                let marker = if i < config.twitch.max_segments { "*" } else { " " };
                info!(
                    "{} {} {} ({} min)",
                    marker, event.start_time, event.title, event.duration_minutes
                );
            }
            match plan.upcoming.first() {
                Some(next) => info!("Next stream: '{}' at {}", next.title, next.start_time),
                None => warn!("No upcoming streams in feed"),
            }
        }
        Err(e) => error!("Failed to load calendar feed: {}", e),
    }
}

/// ポーリング間隔ごとに同期を実行する
///
/// 実行は逐次なので同時に2つの同期が走ることはない。
async fn run_daemon(config: &AppConfig) {
    let interval_minutes = u64::from(config.trigger.poll_interval_minutes);
    info!("Syncing every {} minutes", interval_minutes);

    let mut timer = time::interval(Duration::from_secs(interval_minutes * 60));
    timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        timer.tick().await;
        info!("Running scheduled sync at {}", chrono::Utc::now().format("%H:%M"));
        run_once(config, Invocation::Scheduled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_cannot_be_combined_with_daemon() {
        let err =
            Args::try_parse_from(["stream_schedule_sync", "--daemon", "--manual"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn manual_preview_is_accepted() {
        let args =
            Args::try_parse_from(["stream_schedule_sync", "--preview", "--manual"]).unwrap();
        assert!(args.manual);
        assert!(args.preview);
        assert!(!args.daemon);
        assert_eq!(args.config, PathBuf::from("config.toml"));
    }
}
