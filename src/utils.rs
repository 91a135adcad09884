use chrono::{DateTime, Utc};

/// シンク間で共通のタイムスタンプ形式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// UTC の ISO 8601 文字列を生成（秒未満は切り捨て）
///
/// 固定幅なので文字列の辞書順がそのまま時刻順になる。
pub fn format_utc(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// 文字列を文字数で切り詰める（UTF-8文字境界を保持）
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// ログ出力用にトークンをマスクする
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "[TOKEN_TOO_SHORT_TO_MASK]".to_string();
    }

    let visible_prefix: String = chars[..4].iter().collect();
    let visible_suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", visible_prefix, visible_suffix)
}

/// 空文字列を未設定として扱う
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
