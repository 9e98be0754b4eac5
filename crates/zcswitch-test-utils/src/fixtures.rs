//! Host fixtures and temporary project directories.

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zcswitch_discover::{Service, ServiceAnnouncement, ZeroconfHost};

/// Build a host from string addresses and `(key, instance name, port)` triples.
///
/// # Example
///
/// ```rust
/// use zcswitch_test_utils::fixtures::host;
///
/// let nas = host("nas.local", &["10.0.0.2"], &[("_smb._tcp.local.", "NAS._smb._tcp.local.", 445)]);
/// assert_eq!(nas.services().len(), 1);
/// ```
pub fn host(id: &str, addresses: &[&str], services: &[(&str, &str, u16)]) -> ZeroconfHost {
    let ips: Vec<IpAddr> = addresses
        .iter()
        .map(|a| a.parse().expect("fixture address must be an IP"))
        .collect();

    services
        .iter()
        .fold(
            ZeroconfHost::builder(id).addresses(ips),
            |builder, (key, name, port)| builder.service(*key, Service::new(*name, *port)),
        )
        .build()
}

/// The two-address printer used throughout the domain-browse tests.
pub fn printer_host() -> ZeroconfHost {
    host(
        "printer.local",
        &["10.0.0.5", "10.0.0.6"],
        &[("printer._tcp.local.", "printer._tcp.local.", 631)],
    )
}

/// A NAS offering HTTP and SMB on one address.
pub fn nas_host() -> ZeroconfHost {
    host(
        "nas.local",
        &["10.0.0.2"],
        &[
            ("_http._tcp.local.", "NAS._http._tcp.local.", 80),
            ("_smb._tcp.local.", "NAS._smb._tcp.local.", 445),
        ],
    )
}

/// A media player with TXT properties.
pub fn speaker_host() -> ZeroconfHost {
    let properties = BTreeMap::from([
        ("model".to_string(), "S1".to_string()),
        ("version".to_string(), "2.1".to_string()),
    ]);
    ZeroconfHost::builder("speaker.local")
        .display_name("Kitchen")
        .address("10.0.0.9".parse().expect("valid IP"))
        .service(
            "_audioplayer-discovery._tcp.local.",
            Service::new("Kitchen._audioplayer-discovery._tcp.local.", 7000)
                .with_properties(properties),
        )
        .build()
}

/// An announcement of `host` for `service_type`.
pub fn announcement(service_type: &str, host: ZeroconfHost) -> ServiceAnnouncement {
    ServiceAnnouncement {
        service_type: service_type.to_string(),
        host,
    }
}

/// A temporary project directory with configurable files.
///
/// The directory is removed when the value is dropped.
///
/// # Example
///
/// ```rust
/// use zcswitch_test_utils::fixtures::TestProject;
///
/// let project = TestProject::new()
///     .with_file("zcswitch.jsonc", "{ // comment\n \"retries\": 3 }")
///     .build();
///
/// assert!(project.path().join("zcswitch.jsonc").exists());
/// ```
pub struct TestProject {
    temp_dir: TempDir,
    files: Vec<(PathBuf, String)>,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            files: Vec::new(),
        }
    }

    /// Add a file, relative to the project root.
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.files
            .push((path.as_ref().to_path_buf(), contents.into()));
        self
    }

    /// Write all files to disk.
    pub fn build(self) -> Self {
        for (path, contents) in &self.files {
            let full = self.temp_dir.path().join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).expect("Failed to create parent directory");
            }
            fs::write(&full, contents).expect("Failed to write file");
        }
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printer_host_shape() {
        let host = printer_host();
        assert_eq!(host.ip_addresses().len(), 2);
        assert_eq!(host.services().len(), 1);
    }

    #[test]
    fn test_project_writes_nested_files() {
        let project = TestProject::new()
            .with_file(".config/zcswitch/config.json", "{}")
            .build();
        assert!(project.path().join(".config/zcswitch/config.json").exists());
    }
}
