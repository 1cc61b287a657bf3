//! On-wire lock descriptor.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Description of a lock holder, as stored in the repository.
///
/// Field names are part of the wire format and must stay stable across
/// clients. Decoding tolerates unknown fields, so newer clients may extend
/// the record without breaking older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDescriptor {
    /// Creation (or last refresh) time, RFC3339.
    pub time: DateTime<Utc>,
    /// Writer lock when true; reader lock otherwise.
    #[serde(default)]
    pub exclusive: bool,
    /// Hostname of the creating machine; empty when it could not be
    /// determined.
    #[serde(default)]
    pub hostname: String,
    /// Login name of the creating user; empty when it could not be
    /// determined.
    #[serde(default)]
    pub username: String,
    /// Process id of the holder on its host.
    #[serde(default)]
    pub pid: u32,
    /// Numeric user id; omitted on the wire when unknown.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub uid: u32,
    /// Numeric group id; omitted on the wire when unknown.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub gid: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // signature dictated by serde
fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl LockDescriptor {
    /// Capture a descriptor for the current process.
    ///
    /// Hostname and username are best-effort and left empty when the
    /// environment does not provide them.
    #[must_use]
    pub(crate) fn capture(exclusive: bool) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        Self {
            time: Utc::now(),
            exclusive,
            hostname,
            username,
            pid: std::process::id(),
            uid: current_uid(),
            gid: current_gid(),
        }
    }

    /// Time elapsed since the descriptor was stamped.
    #[must_use]
    pub fn age(&self) -> Duration {
        Utc::now() - self.time
    }
}

impl fmt::Display for LockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PID {} on {} by {} (UID {}, GID {})\nlock was created at {} ({} ago)",
            self.pid,
            self.hostname,
            self.username,
            self.uid,
            self.gid,
            self.time.format("%Y-%m-%d %H:%M:%S"),
            format_age(self.age()),
        )
    }
}

/// Compact humanized age for diagnostics.
fn format_age(age: Duration) -> String {
    let secs = age.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid has no failure modes and touches no memory.
    unsafe { libc::getuid() }
}

#[cfg(unix)]
fn current_gid() -> u32 {
    // SAFETY: getgid has no failure modes and touches no memory.
    unsafe { libc::getgid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

#[cfg(not(unix))]
fn current_gid() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let descriptor = LockDescriptor {
            time: Utc::now(),
            exclusive: true,
            hostname: "host-a".to_string(),
            username: "alice".to_string(),
            pid: 1234,
            uid: 1000,
            gid: 1000,
        };
        let value: serde_json::Value =
            serde_json::to_value(&descriptor).expect("descriptor serializes");
        for field in ["time", "exclusive", "hostname", "username", "pid", "uid", "gid"] {
            assert!(value.get(field).is_some(), "missing wire field {field}");
        }
    }

    #[test]
    fn test_zero_uid_gid_are_omitted() {
        let descriptor = LockDescriptor {
            time: Utc::now(),
            exclusive: false,
            hostname: String::new(),
            username: String::new(),
            pid: 1,
            uid: 0,
            gid: 0,
        };
        let value: serde_json::Value =
            serde_json::to_value(&descriptor).expect("descriptor serializes");
        assert!(value.get("uid").is_none());
        assert!(value.get("gid").is_none());
    }

    #[test]
    fn test_unknown_fields_are_tolerated() {
        let json = r#"{
            "time": "2026-07-01T10:00:00Z",
            "exclusive": true,
            "hostname": "host-b",
            "username": "bob",
            "pid": 99,
            "flavour": "added by a newer client"
        }"#;
        let descriptor: LockDescriptor =
            serde_json::from_str(json).expect("unknown fields must not reject");
        assert!(descriptor.exclusive);
        assert_eq!(descriptor.pid, 99);
        assert_eq!(descriptor.uid, 0);
    }

    #[test]
    fn test_capture_records_current_process() {
        let descriptor = LockDescriptor::capture(false);
        assert_eq!(descriptor.pid, std::process::id());
        assert!(!descriptor.exclusive);
        assert!(descriptor.age().num_seconds() < 5);
    }

    #[test]
    fn test_display_names_holder() {
        let descriptor = LockDescriptor {
            time: Utc::now(),
            exclusive: false,
            hostname: "host-c".to_string(),
            username: "carol".to_string(),
            pid: 777,
            uid: 0,
            gid: 0,
        };
        let text = descriptor.to_string();
        assert!(text.contains("PID 777"));
        assert!(text.contains("host-c"));
        assert!(text.contains("carol"));
        assert!(text.contains("ago"));
    }

    #[test]
    fn test_format_age_units() {
        assert_eq!(format_age(Duration::seconds(30)), "30s");
        assert_eq!(format_age(Duration::seconds(120)), "2m");
        assert_eq!(format_age(Duration::seconds(7200)), "2h");
        assert_eq!(format_age(Duration::days(3)), "3d");
        assert_eq!(format_age(Duration::seconds(-5)), "0s");
    }
}
