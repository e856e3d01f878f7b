//! Chapter timestamp parsing and formatting
//!
//! Chapter timestamps travel as float seconds. Users edit them as text in
//! one of these shapes:
//! - `H:MM:SS` or `H:MM:SS.mmm`
//! - `M:SS` or `M:SS.mmm`
//! - plain seconds (`93.5`)

use crate::{Error, Result};

/// Format seconds as `H:MM:SS.mmm`.
///
/// # Examples
///
/// ```
/// use achew_common::time::format_timestamp;
///
/// assert_eq!(format_timestamp(0.0), "0:00:00.000");
/// assert_eq!(format_timestamp(3661.25), "1:01:01.250");
/// ```
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
}

/// Parse user-entered timestamp text into seconds.
///
/// Malformed text is a validation error; nothing is sent for it.
///
/// # Examples
///
/// ```
/// use achew_common::time::parse_timestamp;
///
/// assert_eq!(parse_timestamp("1:02:03.5").unwrap(), 3723.5);
/// assert_eq!(parse_timestamp("2:30").unwrap(), 150.0);
/// assert!(parse_timestamp("1:75").is_err());
/// ```
pub fn parse_timestamp(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(invalid(text));
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [s] => (0, 0, parse_seconds(s, false).ok_or_else(|| invalid(text))?),
        [m, s] => (
            0,
            parse_whole(m).ok_or_else(|| invalid(text))?,
            parse_seconds(s, true).ok_or_else(|| invalid(text))?,
        ),
        [h, m, s] => {
            let minutes = parse_whole(m).ok_or_else(|| invalid(text))?;
            if minutes >= 60 || m.len() != 2 {
                return Err(invalid(text));
            }
            (
                parse_whole(h).ok_or_else(|| invalid(text))?,
                minutes,
                parse_seconds(s, true).ok_or_else(|| invalid(text))?,
            )
        }
        _ => return Err(invalid(text)),
    };

    Ok((hours * 3600 + minutes * 60) as f64 + seconds)
}

fn parse_whole(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// `bounded` applies when seconds follow a minutes field
fn parse_seconds(s: &str, bounded: bool) -> Option<f64> {
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (s, None),
    };
    let whole_value = parse_whole(whole)?;
    if bounded && (whole.len() != 2 || whole_value >= 60) {
        return None;
    }
    let frac_value = match frac {
        Some(f) if !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()) => {
            format!("0.{}", f).parse::<f64>().ok()?
        }
        Some(_) => return None,
        None => 0.0,
    };
    Some(whole_value as f64 + frac_value)
}

fn invalid(text: &str) -> Error {
    Error::Validation(format!("Invalid timestamp: '{}'", text))
}
