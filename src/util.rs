// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use duration_string::DurationString;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Outputs the given duration in a minutes:seconds format.
pub fn duration_minutes_seconds(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    let secs = duration.as_secs() - minutes * 60;
    format!("{}:{:02}", minutes, secs)
}

/// Parses a duration argument. Accepts a bare number of seconds ("2.5") or a
/// duration string ("500ms", "1m30s").
pub fn parse_duration(value: &str) -> Result<Duration, Box<dyn Error>> {
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds < 0.0 {
            return Err(format!("duration must not be negative: {}", value).into());
        }
        return Ok(Duration::from_secs_f64(seconds));
    }

    Ok(DurationString::from_string(value.to_string())
        .map_err(|e| format!("unable to parse duration {}: {}", value, e))?
        .into())
}

/// Parses a four character code such as "lpcm" or "aac ". Hex escapes in the
/// form "\x00" are interpreted, and a three character code is padded with a
/// trailing space ("aac" is accepted for "aac ").
pub fn parse_four_cc(value: &str) -> Result<[u8; 4], Box<dyn Error>> {
    let mut code = [0u8; 4];
    let mut bytes = value.bytes();

    for (i, slot) in code.iter_mut().enumerate() {
        match bytes.next() {
            Some(b'\\') => {
                if bytes.next() != Some(b'x') {
                    return Err(format!("invalid escape in four character code: {}", value).into());
                }
                let hi = bytes.next().ok_or("truncated hex escape")?;
                let lo = bytes.next().ok_or("truncated hex escape")?;
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex)?;
                *slot = u8::from_str_radix(hex, 16)
                    .map_err(|e| format!("invalid hex escape in {}: {}", value, e))?;
            }
            Some(b) => *slot = b,
            None => {
                // Accept three character codes by padding with a space.
                if i == 3 {
                    *slot = b' ';
                } else {
                    return Err(format!("four character code too short: {}", value).into());
                }
            }
        }
    }

    if bytes.next().is_some() {
        return Err(format!("four character code too long: {}", value).into());
    }

    Ok(code)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{duration_minutes_seconds, parse_duration, parse_four_cc};

    #[test]
    fn test_duration_minutes_strings() {
        assert_eq!("0:00", duration_minutes_seconds(Duration::new(0, 0)));
        assert_eq!("0:05", duration_minutes_seconds(Duration::new(5, 0)));
        assert_eq!("0:55", duration_minutes_seconds(Duration::new(55, 0)));
        assert_eq!("1:00", duration_minutes_seconds(Duration::new(60, 0)));
        assert_eq!("2:05", duration_minutes_seconds(Duration::new(125, 0)));
        assert_eq!("60:06", duration_minutes_seconds(Duration::new(3606, 0)));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(Duration::from_secs(3), parse_duration("3").unwrap());
        assert_eq!(Duration::from_millis(2500), parse_duration("2.5").unwrap());
        assert_eq!(Duration::from_millis(500), parse_duration("500ms").unwrap());
        assert_eq!(Duration::from_secs(90), parse_duration("1m30s").unwrap());
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("bogus").is_err());
    }

    #[test]
    fn test_parse_four_cc() {
        assert_eq!(*b"lpcm", parse_four_cc("lpcm").unwrap());
        assert_eq!(*b"aac ", parse_four_cc("aac ").unwrap());
        assert_eq!(*b"aac ", parse_four_cc("aac").unwrap());
        assert_eq!(*b"\x00ac3", parse_four_cc("\\x00ac3").unwrap());
        assert!(parse_four_cc("toolong").is_err());
        assert!(parse_four_cc("ab").is_err());
        assert!(parse_four_cc("\\yaac").is_err());
    }
}
