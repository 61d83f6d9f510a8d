//! Seek-target parsing and clock-style time formatting
//!
//! Shared between the daemon (which applies seeks) and the control CLI
//! (which echoes positions back to the user).

use crate::{Error, Result};

/// A parsed seek request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekTarget {
    /// Absolute position in seconds from track start
    Absolute(f64),
    /// Offset in seconds from the current position (may be negative)
    Relative(f64),
}

impl SeekTarget {
    /// Resolve against a current position, clamping into `[0, duration]`.
    /// A `None` duration clamps only the lower bound.
    pub fn resolve(self, current_secs: f64, duration_secs: Option<f64>) -> f64 {
        let raw = match self {
            SeekTarget::Absolute(secs) => secs,
            SeekTarget::Relative(delta) => current_secs + delta,
        };
        let low = raw.max(0.0);
        match duration_secs {
            Some(d) => low.min(d),
            None => low,
        }
    }
}

/// Parse a seek argument.
///
/// Accepted forms:
/// - `+15` / `-15` — relative offset in seconds
/// - `90` / `90.5` — absolute seconds
/// - `1:30` — absolute M:SS
/// - `1:02:03` — absolute H:MM:SS
///
/// # Examples
///
/// ```
/// use quaver_common::time::{parse_seek_target, SeekTarget};
///
/// assert_eq!(parse_seek_target("+15").unwrap(), SeekTarget::Relative(15.0));
/// assert_eq!(parse_seek_target("-5").unwrap(), SeekTarget::Relative(-5.0));
/// assert_eq!(parse_seek_target("90").unwrap(), SeekTarget::Absolute(90.0));
/// assert_eq!(parse_seek_target("1:30").unwrap(), SeekTarget::Absolute(90.0));
/// assert_eq!(parse_seek_target("1:02:03").unwrap(), SeekTarget::Absolute(3723.0));
/// ```
pub fn parse_seek_target(input: &str) -> Result<SeekTarget> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidInput("empty seek target".to_string()));
    }

    if let Some(rest) = input.strip_prefix('+') {
        let secs = parse_seconds(rest)?;
        return Ok(SeekTarget::Relative(secs));
    }
    if let Some(rest) = input.strip_prefix('-') {
        let secs = parse_seconds(rest)?;
        return Ok(SeekTarget::Relative(-secs));
    }

    if input.contains(':') {
        return Ok(SeekTarget::Absolute(parse_clock(input)?));
    }

    Ok(SeekTarget::Absolute(parse_seconds(input)?))
}

fn parse_seconds(s: &str) -> Result<f64> {
    let secs: f64 = s
        .parse()
        .map_err(|_| Error::InvalidInput(format!("invalid seek target: {}", s)))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::InvalidInput(format!("invalid seek target: {}", s)));
    }
    Ok(secs)
}

/// Parse `M:SS` or `H:MM:SS` into seconds. Minute/second fields after the
/// first must be two digits and below 60.
fn parse_clock(s: &str) -> Result<f64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidInput(format!("invalid time: {}", s)));
    }

    let mut total: f64 = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let value: u32 = part
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid time: {}", s)))?;
        if i > 0 && value >= 60 {
            return Err(Error::InvalidInput(format!("invalid time: {}", s)));
        }
        total = total * 60.0 + value as f64;
    }
    Ok(total)
}

/// Format seconds as `M:SS` below one hour, `H:MM:SS` above.
///
/// # Examples
///
/// ```
/// use quaver_common::time::format_clock;
///
/// assert_eq!(format_clock(0.0), "0:00");
/// assert_eq!(format_clock(75.3), "1:15");
/// assert_eq!(format_clock(3723.0), "1:02:03");
/// ```
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
