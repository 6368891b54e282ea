//! File name helpers shared by the stages and sinks.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngExt;

const DEFAULT_FILENAME: &str = "output";
const RANDOM_SUFFIX_LEN: usize = 8;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Expand a file name template with FFmpeg-like time placeholders.
///
/// Supported placeholders:
/// - `%Y` - Year (YYYY)
/// - `%m` - Month (01-12)
/// - `%d` - Day (01-31)
/// - `%H` - Hour (00-23)
/// - `%M` - Minute (00-59)
/// - `%S` - Second (00-59)
/// - `%t` - Unix timestamp
/// - `%%` - Literal percent sign
///
/// Unknown placeholders are kept as is. The result is sanitized.
pub fn expand_name_template(template: &str) -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    sanitize_filename(&expand_at(template, now, timestamp))
}

fn expand_at(template: &str, now: time::OffsetDateTime, timestamp: u64) -> String {
    let mut result = String::with_capacity(template.len() * 2);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }
        let Some(&next_char) = chars.peek() else {
            // % at the end of string, treat as literal
            result.push('%');
            break;
        };
        match next_char {
            'Y' => result.push_str(&format!("{:04}", now.year())),
            'm' => result.push_str(&format!("{:02}", now.month() as u8)),
            'd' => result.push_str(&format!("{:02}", now.day())),
            'H' => result.push_str(&format!("{:02}", now.hour())),
            'M' => result.push_str(&format!("{:02}", now.minute())),
            'S' => result.push_str(&format!("{:02}", now.second())),
            't' => result.push_str(&timestamp.to_string()),
            '%' => result.push('%'),
            other => {
                result.push('%');
                result.push(other);
            }
        }
        chars.next();
    }

    result
}

/// Sanitize a string for use as a file name
pub fn sanitize_filename(input: &str) -> String {
    let invalid_chars = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    let result: String = input
        .chars()
        .map(|c| {
            if invalid_chars.contains(&c) || c < ' ' {
                '_'
            } else {
                c
            }
        })
        .collect();

    let result = result.trim_matches(|c| c == '.' || c == ' ');
    if result.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else if result.chars().count() > 200 {
        let mut truncated: String = result.chars().take(200).collect();
        truncated.push_str("...");
        truncated
    } else {
        result.to_string()
    }
}

/// `stem_<random>.ext`, used to sidestep name collisions.
pub fn randomized_name(file_name: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..RANDOM_SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect();
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{suffix}.{ext}"),
        _ => format!("{file_name}_{suffix}"),
    }
}
