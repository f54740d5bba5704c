//! SSH keypair handling and input validation for image builds
//!
//! One keypair is shared by every environment. Its public half is baked into
//! each user image, and the private half is handed to the ssh client on
//! connect. Container host keys change on every rebuild, so host key checking
//! is relaxed by the connection code instead.

use crate::{CoreError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Location of the shared keypair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKeyPair {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
}

impl SshKeyPair {
    /// Keypair at `key_path`, public half at the same path plus `.pub`
    pub fn with_key_path(key_path: PathBuf) -> Self {
        // Append .pub to the full path (don't replace extension)
        let mut public_path: OsString = key_path.clone().into();
        public_path.push(".pub");

        Self {
            private_path: key_path,
            public_path: PathBuf::from(public_path),
        }
    }

    /// Keypair named `file_name` inside `dir`
    pub fn in_dir(dir: &Path, file_name: &str) -> Self {
        Self::with_key_path(dir.join(file_name))
    }

    /// Generate the keypair with `ssh-keygen` unless both halves exist
    pub fn ensure_exists(&self) -> Result<()> {
        if self.private_path.exists() && self.public_path.exists() {
            tracing::debug!("SSH keys already exist at {:?}", self.private_path);
            return Ok(());
        }

        tracing::info!("Generating SSH keypair at {:?}", self.private_path);

        if let Some(parent) = self.private_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let key_path = self
            .private_path
            .to_str()
            .ok_or_else(|| CoreError::SshKeygenError("Key path contains invalid UTF-8".into()))?;

        let output = Command::new("ssh-keygen")
            .args(["-q", "-t", "ed25519", "-N", "", "-C", "skeg key", "-f", key_path])
            .output()
            .map_err(|e| CoreError::SshKeygenError(format!("Failed to run ssh-keygen: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::SshKeygenError(format!(
                "ssh-keygen failed: {}",
                stderr.trim()
            )));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&self.private_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(&self.private_path, perms)?;
        }

        Ok(())
    }

    /// Read the public key, refusing anything that doesn't look like one
    pub fn read_public_key(&self) -> Result<String> {
        let key = std::fs::read_to_string(&self.public_path)?;
        validate_ssh_public_key(&key)?;
        Ok(key.trim().to_string())
    }
}

/// Check that a string looks like an OpenSSH public key
pub fn validate_ssh_public_key(key: &str) -> Result<()> {
    let key = key.trim();

    let valid_prefixes = [
        "ssh-ed25519",
        "ssh-rsa",
        "ecdsa-sha2-nistp256",
        "ecdsa-sha2-nistp384",
        "ecdsa-sha2-nistp521",
        "sk-ssh-ed25519@openssh.com",
        "sk-ecdsa-sha2-nistp256@openssh.com",
    ];

    if !valid_prefixes.iter().any(|p| key.starts_with(p)) {
        return Err(CoreError::InvalidRecipe(
            "public key must start with a valid key type".into(),
        ));
    }

    let parts: Vec<&str> = key.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(CoreError::InvalidRecipe("public key is missing key data".into()));
    }

    if base64::Engine::decode(&base64::engine::general_purpose::STANDARD, parts[1]).is_err() {
        return Err(CoreError::InvalidRecipe(
            "public key data is not valid base64".into(),
        ));
    }

    Ok(())
}

/// Standard unix username: a lowercase letter or underscore, then lowercase
/// letters, digits, underscores or hyphens, at most 32 characters
pub fn validate_username(user: &str) -> Result<()> {
    let mut chars = user.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');

    if !valid_start
        || user.len() > 32
        || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(CoreError::InvalidName(format!(
            "'{}' is not a valid user name",
            user
        )));
    }

    Ok(())
}
