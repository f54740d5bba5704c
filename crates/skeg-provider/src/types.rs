//! Common types for container providers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container ID wrapper
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Image ID wrapper
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extra file shipped in a build context next to the Dockerfile
#[derive(Debug, Clone, Default)]
pub struct ContextFile {
    /// Path inside the build context
    pub name: String,
    pub contents: Vec<u8>,
    /// Unix permission bits
    pub mode: u32,
}

/// Build configuration for creating images from an in-memory recipe
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Image tag
    pub tag: String,
    /// Dockerfile contents
    pub dockerfile: String,
    /// Additional files placed in the build context
    pub files: Vec<ContextFile>,
    /// Labels to apply
    pub labels: HashMap<String, String>,
}

/// Configuration for creating a container
#[derive(Debug, Clone, Default)]
pub struct CreateContainerConfig {
    /// Container name
    pub name: String,
    /// Image to use
    pub image: String,
    /// Hostname
    pub hostname: Option<String>,
    /// Port mappings
    pub ports: Vec<PortConfig>,
    /// Volume binds in `source:target[:mode]` form
    pub binds: Vec<String>,
    /// Labels
    pub labels: HashMap<String, String>,
}

/// Port configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    /// Host port (None for auto-assign)
    pub host_port: Option<u16>,
    /// Container port
    pub container_port: u16,
    /// Protocol (tcp/udp)
    pub protocol: String,
    /// Host IP to bind to
    pub host_ip: Option<String>,
}

/// Basic container info for listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: ContainerId,
    /// Primary name, leading `/` removed
    pub name: String,
    pub image: String,
    /// Human readable status, e.g. "Up 2 hours" or "Exited (0) 3 days ago"
    pub status: String,
    pub ports: Vec<PortInfo>,
    pub labels: HashMap<String, String>,
}

/// Detailed container information
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<MountInfo>,
    pub ports: Vec<PortInfo>,
}

/// Mount information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_type: String,
    /// Volume name for named volumes
    pub name: Option<String>,
    pub source: String,
    pub destination: String,
    pub read_only: bool,
}

impl MountInfo {
    /// Render as a `source:destination[:ro]` bind string.
    /// Named volumes use the volume name as the source.
    pub fn to_bind(&self) -> String {
        let source = match (&self.name, self.mount_type.as_str()) {
            (Some(name), "volume") if !name.is_empty() => name.as_str(),
            _ => self.source.as_str(),
        };
        if self.read_only {
            format!("{}:{}:ro", source, self.destination)
        } else {
            format!("{}:{}", source, self.destination)
        }
    }
}

/// Port information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: String,
    pub host_ip: Option<String>,
}

/// Image info for listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: ImageId,
    pub repo_tags: Vec<String>,
    pub labels: HashMap<String, String>,
    pub created: i64,
}

/// Volume info for listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Split an image reference into repository and tag.
///
/// A digest suffix (`@sha256:...`) is discarded. A colon that belongs to a
/// registry host (`localhost:5000/app`) is not mistaken for a tag separator.
/// An untagged reference yields an empty tag.
pub fn parse_repository_tag(reference: &str) -> (String, String) {
    let reference = reference.split('@').next().unwrap_or_default();
    match reference.rfind(':') {
        Some(idx) if !reference[idx + 1..].contains('/') => (
            reference[..idx].to_string(),
            reference[idx + 1..].to_string(),
        ),
        _ => (reference.to_string(), String::new()),
    }
}
