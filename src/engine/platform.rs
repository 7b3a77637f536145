use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating system family the capture engine is published for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
}

impl Platform {
    /// Platform of the running host. Anything that is not Windows or macOS
    /// is served the Linux build.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    /// Release asset name of the engine for this platform
    pub fn engine_filename(&self) -> &'static str {
        match self {
            Platform::Windows => "kiro_voice_engine_win.exe",
            Platform::MacOS => "kiro_voice_engine_macos",
            Platform::Linux => "kiro_voice_engine_linux",
        }
    }

    /// Whether downloaded files carry a network-origin quarantine attribute
    pub fn enforces_quarantine(&self) -> bool {
        matches!(self, Platform::MacOS)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::MacOS => write!(f, "macos"),
            Platform::Linux => write!(f, "linux"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_filenames_are_distinct() {
        let names = [
            Platform::Windows.engine_filename(),
            Platform::MacOS.engine_filename(),
            Platform::Linux.engine_filename(),
        ];

        assert_eq!(names[0], "kiro_voice_engine_win.exe");
        assert_eq!(names[1], "kiro_voice_engine_macos");
        assert_eq!(names[2], "kiro_voice_engine_linux");
    }

    #[test]
    fn test_only_macos_enforces_quarantine() {
        assert!(Platform::MacOS.enforces_quarantine());
        assert!(!Platform::Linux.enforces_quarantine());
        assert!(!Platform::Windows.enforces_quarantine());
    }
}
