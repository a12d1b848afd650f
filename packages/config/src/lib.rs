#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Static configuration for the crowd monitor.
//!
//! Camera definitions are read once at process start from a TOML file of
//! `[[cameras]]` tables. There is no hot reload: the returned
//! [`CameraSource`] list is immutable for the lifetime of the process.
//! Runtime settings ([`MonitorSettings`]) come from environment variables
//! with built-in defaults.

pub mod settings;

pub use settings::MonitorSettings;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Locator prefixes treated as live network streams.
///
/// Anything else is a local media file.
pub const NETWORK_PREFIXES: &[&str] = &["rtsp://", "rtsps://", "rtmp://", "http://", "https://"];

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML or has the wrong shape.
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two cameras share the same identifier.
    #[error("Duplicate camera id: {id}")]
    DuplicateCamera {
        /// The repeated identifier.
        id: String,
    },

    /// A camera definition is missing a required value.
    #[error("Invalid camera definition: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// A camera entry exactly as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CameraDefinition {
    /// Unique camera identifier (e.g., `"CAM-1"`).
    pub id: String,
    /// District the camera observes.
    pub district_id: String,
    /// File path or network stream URL.
    pub source: String,
}

/// Top-level shape of the cameras file.
#[derive(Debug, Default, Deserialize)]
struct CamerasFile {
    #[serde(default)]
    cameras: Vec<CameraDefinition>,
}

/// A fully resolved camera, ready to be handed to a stream source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSource {
    /// Unique camera identifier.
    pub id: String,
    /// District the camera observes.
    pub district_id: String,
    /// Resolved locator: an absolute-or-sample-relative file path, or the
    /// stream URL unchanged.
    pub locator: String,
    /// `true` for finite media files (loop on end-of-media), `false` for
    /// live streams (reconnect on failure).
    pub is_file: bool,
}

impl CameraSource {
    /// Resolves a raw definition against the sample directory.
    #[must_use]
    pub fn resolve(definition: &CameraDefinition, samples_dir: &Path) -> Self {
        let is_file = !is_network_locator(&definition.source);

        let locator = if is_file {
            resolve_file_path(&definition.source, samples_dir)
                .to_string_lossy()
                .into_owned()
        } else {
            definition.source.clone()
        };

        Self {
            id: definition.id.clone(),
            district_id: definition.district_id.clone(),
            locator,
            is_file,
        }
    }
}

/// Returns `true` if the locator has a recognized network-stream prefix.
#[must_use]
pub fn is_network_locator(locator: &str) -> bool {
    let lower = locator.trim().to_ascii_lowercase();
    NETWORK_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Resolves a file locator: absolute paths are kept, relative paths are
/// joined onto `samples_dir`.
#[must_use]
pub fn resolve_file_path(source: &str, samples_dir: &Path) -> PathBuf {
    let path = Path::new(source);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        samples_dir.join(path)
    }
}

/// Parses a cameras TOML document and resolves every entry.
///
/// # Errors
///
/// Returns [`ConfigError`] if the document is malformed, a required field
/// is empty, or two cameras share an id.
pub fn parse_cameras_toml(
    toml_str: &str,
    samples_dir: &Path,
) -> Result<Vec<CameraSource>, ConfigError> {
    let file: CamerasFile = toml::de::from_str(toml_str)?;

    let mut seen = BTreeSet::new();
    let mut cameras = Vec::with_capacity(file.cameras.len());

    for definition in &file.cameras {
        validate(definition)?;
        if !seen.insert(definition.id.clone()) {
            return Err(ConfigError::DuplicateCamera {
                id: definition.id.clone(),
            });
        }
        cameras.push(CameraSource::resolve(definition, samples_dir));
    }

    Ok(cameras)
}

/// Loads camera definitions from `path`.
///
/// A missing file is not an error: the monitor starts with zero cameras.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
pub fn load_cameras(path: &Path, samples_dir: &Path) -> Result<Vec<CameraSource>, ConfigError> {
    if !path.exists() {
        log::warn!(
            "Config file not found at {}. Starting with no cameras.",
            path.display()
        );
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(path)?;
    let cameras = parse_cameras_toml(&contents, samples_dir)?;

    log::info!(
        "Loaded {} camera definition(s) from {}",
        cameras.len(),
        path.display()
    );

    Ok(cameras)
}

fn validate(definition: &CameraDefinition) -> Result<(), ConfigError> {
    let fields = [
        ("id", &definition.id),
        ("district_id", &definition.district_id),
        ("source", &definition.source),
    ];

    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: format!("camera {:?} has an empty `{name}`", definition.id),
            });
        }
    }

    Ok(())
}
