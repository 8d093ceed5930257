//! Status code classification.
//!
//! Maps a response status to the level the response record is emitted at and
//! to the human label used in the `Response: <status> <label>` message.

use tracing::Level;

/// Severity for a response status.
///
/// A status of zero (or below) means no response was produced at all, which
/// is worth a warning on its own.
pub fn status_level(status: i32) -> Level {
    match status {
        i32::MIN..=0 => Level::WARN,
        1..=399 => Level::INFO,
        400..=499 => Level::WARN,
        _ => Level::ERROR,
    }
}

/// Human label for a response status.
pub fn status_label(status: i32) -> &'static str {
    match status {
        100..=299 => "OK",
        300..=399 => "Redirect",
        400..=499 => "Client Error",
        500.. => "Server Error",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_boundaries() {
        let cases = [
            (-1, Level::WARN),
            (0, Level::WARN),
            (1, Level::INFO),
            (99, Level::INFO),
            (100, Level::INFO),
            (299, Level::INFO),
            (300, Level::INFO),
            (399, Level::INFO),
            (400, Level::WARN),
            (499, Level::WARN),
            (500, Level::ERROR),
            (599, Level::ERROR),
        ];
        for (status, expected) in cases {
            assert_eq!(status_level(status), expected, "status {status}");
        }
    }

    #[test]
    fn test_label_boundaries() {
        let cases = [
            (0, "Unknown"),
            (1, "Unknown"),
            (99, "Unknown"),
            (100, "OK"),
            (299, "OK"),
            (300, "Redirect"),
            (399, "Redirect"),
            (400, "Client Error"),
            (499, "Client Error"),
            (500, "Server Error"),
            (999, "Server Error"),
        ];
        for (status, expected) in cases {
            assert_eq!(status_label(status), expected, "status {status}");
        }
    }
}
