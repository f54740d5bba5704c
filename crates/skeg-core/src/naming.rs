//! Names and labels shared with existing skeg deployments

/// Prefix for containers, volumes and generated images
pub const PREFIX: &str = "skeg";

/// Registry organisation hosting the catalog images
pub const REGISTRY_ORG: &str = "skegio";

/// Default directory name under `$HOME` holding environment directories
pub const ENVS_DIR: &str = "skegs";

/// File name of the shared private key inside the envs directory
pub const KEY_FILE: &str = "skeg_key";

/// Image build format version.
///
/// 0: user and timezone creation
/// 1: ssh key inclusion
/// 2: dedicated authorized keys directory
pub const IMAGE_FORMAT_VERSION: u32 = 2;

/// Image and container label keys
pub mod labels {
    pub const BASE: &str = "io.skeg.base";
    pub const BASE_IMAGE: &str = "io.skeg.base_image";
    pub const USER: &str = "io.skeg.user";
    pub const UID: &str = "io.skeg.uid";
    pub const GID: &str = "io.skeg.gid";
    pub const BUILD_TIME: &str = "io.skeg.build_time";
    pub const TIMEZONE: &str = "io.skeg.timezone";
    pub const VERSION: &str = "io.skeg.version";
    pub const HOME_VOLUME: &str = "io.skeg.home_volume";
}

/// `skeg_<user>_<env>`
pub fn container_name(user: &str, env: &str) -> String {
    format!("{}_{}_{}", PREFIX, user, env)
}

/// Container name used before containers were scoped per user
pub fn legacy_container_name(env: &str) -> String {
    format!("{}_{}", PREFIX, env)
}

/// `skeg-<user>-<timestamp>`
pub fn user_image_name(user: &str, timestamp: &str) -> String {
    format!("{}-{}-{}", PREFIX, user, timestamp)
}

/// Named volume holding an environment's home directory
pub fn home_volume_name(user: &str, env: &str) -> String {
    format!("{}_{}_{}", PREFIX, user, env)
}

/// `<org>/<base>:<tag>`
pub fn catalog_reference(org: &str, base: &str, tag: &str) -> String {
    format!("{}/{}:{}", org, base, tag)
}

/// `key=value` filter string for label queries
pub fn label_filter(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}
