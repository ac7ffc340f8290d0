//! Timestamp comparison guarding remote overwrites.

/// Outcome of comparing a local capture time against the remote's last update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictCheck<T> {
    pub has_conflict: bool,
    pub local_timestamp: T,
    pub server_timestamp: T,
}

/// A conflict exists only when the server copy is strictly newer than the
/// local one. Equal timestamps are not a conflict.
pub fn check_for_conflict<T: Ord + Copy>(local_updated_at: T, server_updated_at: T) -> ConflictCheck<T> {
    ConflictCheck {
        has_conflict: server_updated_at > local_updated_at,
        local_timestamp: local_updated_at,
        server_timestamp: server_updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn newer_server_is_a_conflict() {
        let check = check_for_conflict(1000, 2000);
        assert!(check.has_conflict);
        assert_eq!(check.local_timestamp, 1000);
        assert_eq!(check.server_timestamp, 2000);
    }

    #[test]
    fn newer_local_is_not_a_conflict() {
        assert!(!check_for_conflict(2000, 1000).has_conflict);
    }

    #[test]
    fn equal_timestamps_are_not_a_conflict() {
        assert!(!check_for_conflict(1500, 1500).has_conflict);
    }

    #[test]
    fn works_with_wall_clock_timestamps() {
        let local = Utc::now();
        let server = local + Duration::milliseconds(1);
        assert!(check_for_conflict(local, server).has_conflict);
        assert!(!check_for_conflict(server, local).has_conflict);
    }
}
