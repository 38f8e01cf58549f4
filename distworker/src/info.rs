//! Environment description sent with `workerready`.

use serde::{Deserialize, Serialize};

/// Worker version from Cargo.toml
pub const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What the controller learns about the worker's runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Human-readable runtime version.
    pub version: String,
    /// `[major, minor, patch]`.
    pub version_info: [u64; 3],
    /// Operating system family, e.g. `linux`.
    pub sysplatform: String,
    /// OS and architecture, e.g. `linux-x86_64`.
    pub platform: String,
    pub executable: String,
    pub cwd: String,
}

impl WorkerInfo {
    /// Describe the current process.
    pub fn current() -> Self {
        let executable = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Self {
            version: format!("distworker {WORKER_VERSION}"),
            version_info: parse_version(WORKER_VERSION),
            sysplatform: std::env::consts::OS.to_string(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            executable,
            cwd,
        }
    }
}

/// Leading numeric components of a semver string; missing parts are zero.
fn parse_version(version: &str) -> [u64; 3] {
    let mut parts = [0; 3];
    let core = version.split(['-', '+']).next().unwrap_or(version);
    for (slot, piece) in parts.iter_mut().zip(core.split('.')) {
        *slot = piece.parse().unwrap_or(0);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_describes_this_process() {
        let info = WorkerInfo::current();
        assert!(info.version.ends_with(WORKER_VERSION));
        assert_eq!(info.version_info, parse_version(WORKER_VERSION));
        assert_eq!(info.sysplatform, std::env::consts::OS);
        assert!(!info.cwd.is_empty());
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("0.4.0"), [0, 4, 0]);
        assert_eq!(parse_version("1.2.3-rc.1"), [1, 2, 3]);
        assert_eq!(parse_version("2.7"), [2, 7, 0]);
        assert_eq!(parse_version("x.y.z"), [0, 0, 0]);
    }

    #[test]
    fn info_serializes() {
        let info = WorkerInfo {
            version: "distworker 0.4.0".to_string(),
            version_info: [0, 4, 0],
            sysplatform: "linux".to_string(),
            platform: "linux-x86_64".to_string(),
            executable: "/usr/bin/distworker".to_string(),
            cwd: "/src".to_string(),
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "version": "distworker 0.4.0",
          "version_info": [
            0,
            4,
            0
          ],
          "sysplatform": "linux",
          "platform": "linux-x86_64",
          "executable": "/usr/bin/distworker",
          "cwd": "/src"
        }
        "#);
    }
}
