use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;
use tracing::debug;

const ETC_MACHINE_ID: &str = "/etc/machine-id";
const DBUS_MACHINE_ID: &str = "/var/lib/dbus/machine-id";
const OS_RELEASE: &str = "/etc/os-release";
const KERNEL_OSRELEASE: &str = "/proc/sys/kernel/osrelease";

/// `22.04.4 LTS (Jammy Jellyfish)`, `14.04.5 LTS, Trusty Tahr`, `19.04 (Disco Dingo)`.
static OS_RELEASE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<release>\d+\.\d+)(?:\.\d+)*(?: LTS)?,? \(?(?P<series>[A-Za-z]+)")
        .expect("valid os-release VERSION pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub arch: String,
    pub kernel: String,
    pub series: String,
    pub distribution: String,
    pub release: String,
}

#[derive(Debug)]
pub enum PlatformError {
    Io { path: PathBuf, source: io::Error },
    MissingField(&'static str),
    InvalidVersion(String),
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "read {}: {source}", path.display()),
            Self::MissingField(field) => write!(f, "os-release is missing {field}"),
            Self::InvalidVersion(version) => {
                write!(f, "Could not parse /etc/os-release VERSION: {version}")
            }
        }
    }
}

impl std::error::Error for PlatformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::MissingField(_) | Self::InvalidVersion(_) => None,
        }
    }
}

/// Machine identity facts used in request bodies and series overrides.
pub trait PlatformInfo: Send + Sync {
    fn platform(&self) -> Result<Platform, PlatformError>;
    fn machine_id(&self) -> Result<String, PlatformError>;
}

#[derive(Debug, Clone)]
pub struct HostPlatform {
    root: PathBuf,
    data_dir: PathBuf,
}

impl HostPlatform {
    /// `root` redirects absolute system paths (tests use a temp dir);
    /// `data_dir` holds the generated machine id when the host has none.
    pub fn new(root: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.as_os_str().is_empty() {
            PathBuf::from("/")
        } else {
            root
        };
        Self {
            root,
            data_dir: data_dir.into(),
        }
    }

    fn map_abs(&self, abs: &str) -> PathBuf {
        let abs = Path::new(abs);
        let stripped = abs.strip_prefix("/").unwrap_or(abs);
        self.root.join(stripped)
    }

    fn read(&self, path: PathBuf) -> Result<String, PlatformError> {
        fs::read_to_string(&path).map_err(|source| PlatformError::Io { path, source })
    }
}

impl PlatformInfo for HostPlatform {
    fn platform(&self) -> Result<Platform, PlatformError> {
        let os_release = parse_os_release(&self.read(self.map_abs(OS_RELEASE))?);
        let kernel = self.read(self.map_abs(KERNEL_OSRELEASE))?.trim().to_string();

        let lookup = |key: &str| {
            os_release
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        let codename = ["VERSION_CODENAME", "UBUNTU_CODENAME"]
            .into_iter()
            .map(|key| lookup(key).to_lowercase())
            .find(|v| !v.is_empty());
        // Older releases only name the series inside VERSION.
        let series = match codename {
            Some(series) => series,
            None => series_from_version(&lookup("VERSION"))?,
        };

        Ok(Platform {
            arch: package_arch(std::env::consts::ARCH).to_string(),
            kernel,
            series,
            distribution: lookup("NAME"),
            release: lookup("VERSION_ID"),
        })
    }

    fn machine_id(&self) -> Result<String, PlatformError> {
        let data_machine_id = self.data_dir.join("machine-id");
        for path in [
            self.map_abs(ETC_MACHINE_ID),
            self.map_abs(DBUS_MACHINE_ID),
            data_machine_id.clone(),
        ] {
            if let Ok(content) = fs::read_to_string(&path)
                && !content.trim().is_empty()
            {
                return Ok(content.trim().to_string());
            }
        }

        let generated = uuid::Uuid::new_v4().to_string();
        debug!(path = %data_machine_id.display(), "generating fallback machine id");
        fs::create_dir_all(&self.data_dir).map_err(|source| PlatformError::Io {
            path: self.data_dir.clone(),
            source,
        })?;
        fs::write(&data_machine_id, generated.as_bytes()).map_err(|source| {
            PlatformError::Io {
                path: data_machine_id,
                source,
            }
        })?;
        Ok(generated)
    }
}

fn parse_os_release(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (k, v) = line.split_once('=')?;
            Some((k.to_string(), v.trim_matches('"').to_string()))
        })
        .collect()
}

fn series_from_version(version: &str) -> Result<String, PlatformError> {
    if version.is_empty() {
        return Err(PlatformError::MissingField("VERSION_CODENAME"));
    }
    OS_RELEASE_VERSION
        .captures(version)
        .map(|caps| caps["series"].to_lowercase())
        .ok_or_else(|| PlatformError::InvalidVersion(version.to_string()))
}

/// Maps the compiler arch name onto the distro package architecture name.
fn package_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "i386",
        "powerpc64" => "ppc64el",
        other => other,
    }
}
