//! Unattended espanso install, Windows only.

use crate::cli::{run_program, CommandResult};
use crate::error::{CompanionError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const INSTALLER_URL: &str =
    "https://github.com/federico-terzi/espanso/releases/latest/download/espanso-setup.exe";

pub const INSTALLER_FILE_NAME: &str = "espanso-setup.exe";

/// Silent, no-reboot Inno Setup flags.
const INSTALLER_FLAGS: &[&str] = &["/VERYSILENT", "/SUPPRESSMSGBOXES", "/NORESTART"];

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

/// The install step of the handshake, split so the decision logic can be
/// tested without downloading anything.
pub trait Installer: Send + Sync {
    /// Whether unattended install works on this host.
    fn supported(&self) -> bool;

    /// Fetch the installer and return where it was saved.
    fn download(&self) -> Result<PathBuf>;

    /// Run a downloaded installer to completion.
    fn run(&self, installer: &Path) -> CommandResult;
}

/// Downloads the latest release installer into a temp directory.
pub struct WindowsInstaller {
    url: String,
    target_dir: PathBuf,
}

impl WindowsInstaller {
    pub fn new() -> Self {
        Self {
            url: INSTALLER_URL.to_string(),
            target_dir: std::env::temp_dir(),
        }
    }

    pub fn with_source(url: impl Into<String>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            target_dir: target_dir.into(),
        }
    }

    fn target(&self) -> PathBuf {
        self.target_dir.join(INSTALLER_FILE_NAME)
    }
}

impl Default for WindowsInstaller {
    fn default() -> Self {
        Self::new()
    }
}

impl Installer for WindowsInstaller {
    fn supported(&self) -> bool {
        cfg!(target_os = "windows")
    }

    fn download(&self) -> Result<PathBuf> {
        let target = self.target();
        info!("Downloading espanso installer from {}", self.url);

        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| CompanionError::InstallFailed(e.to_string()))?;

        let response = client
            .get(&self.url)
            .send()
            .map_err(|e| CompanionError::InstallFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CompanionError::InstallFailed(format!(
                "HTTP {}: {}",
                response.status(),
                self.url
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| CompanionError::InstallFailed(e.to_string()))?;

        std::fs::create_dir_all(&self.target_dir)?;
        let mut file = std::fs::File::create(&target)?;
        file.write_all(&bytes)?;
        file.flush()?;

        debug!("Installer saved to {} ({} bytes)", target.display(), bytes.len());
        Ok(target)
    }

    fn run(&self, installer: &Path) -> CommandResult {
        info!("Running espanso installer: {}", installer.display());
        run_program(
            &installer.to_string_lossy(),
            INSTALLER_FLAGS,
            INSTALL_TIMEOUT,
            None,
        )
    }
}
