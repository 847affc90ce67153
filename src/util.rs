//! Small time and path helpers shared across the daemon.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Hex-bucketed path fragment for a user id.
///
/// The id is rendered in lowercase hex with a `/` inserted after every
/// second character, so per-user directories fan out instead of piling
/// up in one parent: `0x1a2b` becomes `"1a/2b"`, `0x1a2` becomes
/// `"1a/2"`. There is never a trailing separator.
#[must_use]
pub fn user_path_part(user_id: i64) -> String {
    let hex = format!("{user_id:x}");
    let mut part = String::with_capacity(hex.len() + hex.len() / 2);
    for (i, c) in hex.chars().enumerate() {
        if i > 0 && i % 2 == 0 {
            part.push('/');
        }
        part.push(c);
    }
    part
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_path_part_single_digit() {
        assert_eq!(user_path_part(0x1), "1");
    }

    #[test]
    fn test_user_path_part_one_bucket() {
        assert_eq!(user_path_part(0xab), "ab");
    }

    #[test]
    fn test_user_path_part_odd_length() {
        assert_eq!(user_path_part(0x1a2), "1a/2");
    }

    #[test]
    fn test_user_path_part_even_length() {
        assert_eq!(user_path_part(0x1a2b), "1a/2b");
    }

    #[test]
    fn test_user_path_part_three_buckets() {
        assert_eq!(user_path_part(0x1a2b3c), "1a/2b/3c");
    }

    #[test]
    fn test_user_path_part_depends_only_on_id() {
        assert_eq!(user_path_part(0x2f), user_path_part(0x2f));
    }

    #[test]
    fn test_timestamp_ms_is_monotonic_enough() {
        let a = timestamp_ms();
        let b = timestamp_ms();
        assert!(b >= a);
    }
}
