//! Unit-test fixtures that need the filesystem.

use std::fs;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use crate::transport::TransportConfig;

/// Temporary directory holding the three artifacts shipped to a droplet.
pub struct ArtifactDir {
    dir: TempDir,
}

impl ArtifactDir {
    /// Creates the directory and writes `docker-compose.yaml`, `.env`, and
    /// `install.bash` into it.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        for (name, contents) in [
            ("docker-compose.yaml", "services: {}\n"),
            (".env", "TS_AUTHKEY=tskey-test\n"),
            ("install.bash", "#!/usr/bin/env bash\nexit 0\n"),
        ] {
            fs::write(dir.path().join(name), contents).expect("artifact should be written");
        }
        Self { dir }
    }

    /// Absolute path of `name` inside the directory.
    pub fn path(&self, name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(self.dir.path().join(name).to_string_lossy().into_owned())
    }

    /// Transport configuration shipping this directory's artifacts.
    pub fn config(&self) -> TransportConfig {
        let artifacts = ["docker-compose.yaml", ".env", "install.bash"]
            .map(|name| self.path(name).into_string())
            .join(",");
        TransportConfig {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            tailscale_bin: String::from("tailscale"),
            ssh_user: String::from("root"),
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::from("/dev/null"),
            ssh_identity_file: None,
            artifacts,
            env_file: String::from(".env"),
            install_script: String::from("install.bash"),
        }
    }
}
