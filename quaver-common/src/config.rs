//! Configuration loading and data directory resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default cache size budget: 2 GiB
pub const DEFAULT_CACHE_BUDGET_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Default volume on first run (0-100 user scale)
pub const DEFAULT_VOLUME: u8 = 80;

/// Bootstrap configuration read from the TOML config file.
///
/// Everything here has a compiled default so a missing or partial file is
/// never an error. Runtime state (volume, queue, position) is *not* stored
/// here; it lives in the session snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Data directory override (cache, snapshot, index database)
    pub data_dir: Option<PathBuf>,

    /// Control socket path override (default: <runtime_dir>/control.sock)
    pub socket_path: Option<PathBuf>,

    /// Cache size budget in bytes
    pub cache_budget_bytes: u64,

    /// Audio quality requested from the resolver: high | medium | low
    pub quality: crate::model::Quality,

    /// Playback engine binary (must speak the mpv JSON IPC protocol)
    pub engine_binary: String,

    /// Gapless transitions between consecutive tracks
    pub gapless: bool,

    /// Stream resolver binary
    pub resolver_binary: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            socket_path: None,
            cache_budget_bytes: DEFAULT_CACHE_BUDGET_BYTES,
            quality: crate::model::Quality::High,
            engine_binary: "mpv".to_string(),
            gapless: true,
            resolver_binary: "yt-dlp".to_string(),
        }
    }
}

impl BootstrapConfig {
    /// Load from the default platform config file, or fall back to defaults
    /// when no file exists. A file that exists but fails to parse is an
    /// error; silently ignoring it would mask typos.
    pub fn load() -> Result<Self> {
        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Locate the config file for the platform, if one exists.
///
/// Checks `~/.config/quaver/config.toml` (via `dirs::config_dir`), then
/// `/etc/quaver/config.toml` on Linux.
pub fn find_config_file() -> Option<PathBuf> {
    if let Some(path) = dirs::config_dir().map(|d| d.join("quaver").join("config.toml")) {
        if path.exists() {
            return Some(path);
        }
    }
    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc/quaver/config.toml");
        if system.exists() {
            return Some(system);
        }
    }
    None
}

/// Data directory resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable `QUAVER_DATA_DIR`
/// 3. TOML config file `data_dir` key
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&str>, config: &BootstrapConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("QUAVER_DATA_DIR") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(ref path) = config.data_dir {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_data_dir()
}

/// OS-dependent default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("quaver"))
        .unwrap_or_else(|| PathBuf::from("./quaver_data"))
}

/// Runtime directory for the control socket.
///
/// Prefers `$XDG_RUNTIME_DIR/quaver`; falls back to `<data_dir>/run` on
/// systems without a runtime dir. The caller is responsible for creating
/// it with owner-only permissions.
pub fn runtime_dir(data_dir: &std::path::Path) -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("quaver");
        }
    }
    data_dir.join("run")
}
