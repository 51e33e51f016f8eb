use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum OsFamily {
    Windows,
    Linux,
    Mac,
    Unknown,
}

impl OsFamily {
    pub const ALL: [OsFamily; 4] = [OsFamily::Windows, OsFamily::Linux, OsFamily::Mac, OsFamily::Unknown];

    /// Map a platform identifier (as in `std::env::consts::OS`) to a family.
    pub fn from_platform(os: &str) -> Self {
        match os {
            "windows" => OsFamily::Windows,
            "linux" => OsFamily::Linux,
            "macos" => OsFamily::Mac,
            _ => OsFamily::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Windows => "WINDOWS",
            OsFamily::Linux => "LINUX",
            OsFamily::Mac => "MAC",
            OsFamily::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The family of the running host, resolved once per process.
pub fn current_os() -> OsFamily {
    static CURRENT: OnceLock<OsFamily> = OnceLock::new();
    *CURRENT.get_or_init(|| OsFamily::from_platform(std::env::consts::OS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_platforms() {
        assert_eq!(OsFamily::from_platform("windows"), OsFamily::Windows);
        assert_eq!(OsFamily::from_platform("linux"), OsFamily::Linux);
        assert_eq!(OsFamily::from_platform("macos"), OsFamily::Mac);
    }

    #[test]
    fn anything_else_is_unknown() {
        for os in ["freebsd", "openbsd", "android", "ios", "solaris", ""] {
            assert_eq!(OsFamily::from_platform(os), OsFamily::Unknown, "{}", os);
        }
    }

    #[test]
    fn current_os_is_stable() {
        assert_eq!(current_os(), current_os());
        assert_eq!(current_os(), OsFamily::from_platform(std::env::consts::OS));
    }
}
