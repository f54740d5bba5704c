//! Local environment directory store
//!
//! Everything the engine needs from the local machine: environment
//! directories, the shared keypair, the user's identity, timezone detection,
//! ssh reachability probes and interactive process handoff.

use crate::keys::{validate_username, SshKeyPair};
use crate::naming::KEY_FILE;
use crate::Result;
use async_trait::async_trait;
use skeg_config::{ConfigError, GlobalConfig};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

/// Time allowed for one ssh banner probe
const SSH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// uid/gid used when the runtime runs on another machine
const REMOTE_ID: u32 = 1000;

#[cfg(windows)]
const USER_ENV: &str = "USERNAME";
#[cfg(not(windows))]
const USER_ENV: &str = "USER";

/// Local state behind environments
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Names of all environment directories
    fn list_environment_names(&self) -> Result<Vec<String>>;

    /// Create the environment directory with the public key authorized in it
    fn ensure_environment_dir(&self, name: &str, key: &SshKeyPair) -> Result<PathBuf>;

    /// Remove the environment directory; a missing directory is not an error
    fn remove_environment_dir(&self, name: &str) -> Result<()>;

    /// Generate the shared keypair on first use
    fn ensure_ssh_keypair(&self) -> Result<SshKeyPair>;

    /// Validated public half of the keypair
    fn read_public_key(&self, key: &SshKeyPair) -> Result<String>;

    fn username(&self) -> &str;

    fn uid(&self) -> u32;

    fn gid(&self) -> u32;

    fn detect_timezone(&self) -> Option<String>;

    /// One attempt at reading an ssh banner from `host:port`
    async fn check_ssh_port(&self, host: &str, port: u16) -> bool;

    /// Run a command attached to the current terminal, returning its exit code
    fn run_interactive(&self, command: &str, args: &[String]) -> Result<i32>;
}

/// Store backed by a directory on the local filesystem
pub struct HostEnvironmentStore {
    base_dir: PathBuf,
    user: String,
    uid: u32,
    gid: u32,
}

impl HostEnvironmentStore {
    /// Store rooted at the configured envs directory, identity from the process
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let user = std::env::var(USER_ENV)
            .ok()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::MissingEnv(USER_ENV.to_string()))?;
        let user = normalize_username(&user);

        let (uid, gid) = if std::env::var_os("DOCKER_MACHINE_NAME").is_some() {
            (REMOTE_ID, REMOTE_ID)
        } else {
            process_ids()
        };

        Self::with_identity(config.envs_dir()?, user, uid, gid)
    }

    /// Store with an explicit identity. `user` must be usable as an account
    /// name inside images.
    pub fn with_identity(base_dir: PathBuf, user: String, uid: u32, gid: u32) -> Result<Self> {
        validate_username(&user)?;
        create_private_dir(&base_dir)?;
        Ok(Self {
            base_dir,
            user,
            uid,
            gid,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait]
impl EnvironmentStore for HostEnvironmentStore {
    fn list_environment_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn ensure_environment_dir(&self, name: &str, key: &SshKeyPair) -> Result<PathBuf> {
        let env_path = self.base_dir.join(name);
        std::fs::create_dir_all(&env_path)?;

        let ssh_path = env_path.join(".ssh");
        create_private_dir(&ssh_path)?;

        let public_key = std::fs::read(&key.public_path)?;
        let authorized_keys = ssh_path.join("authorized_keys");
        std::fs::write(&authorized_keys, public_key)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&authorized_keys, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(env_path)
    }

    fn remove_environment_dir(&self, name: &str) -> Result<()> {
        match std::fs::remove_dir_all(self.base_dir.join(name)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn ensure_ssh_keypair(&self) -> Result<SshKeyPair> {
        let keys = SshKeyPair::in_dir(&self.base_dir, KEY_FILE);
        keys.ensure_exists()?;
        Ok(keys)
    }

    fn read_public_key(&self, key: &SshKeyPair) -> Result<String> {
        key.read_public_key()
    }

    fn username(&self) -> &str {
        &self.user
    }

    fn uid(&self) -> u32 {
        self.uid
    }

    fn gid(&self) -> u32 {
        self.gid
    }

    fn detect_timezone(&self) -> Option<String> {
        detect_timezone_from(
            std::env::var("TZ").ok().as_deref(),
            Path::new("/etc/timezone"),
            Path::new("/etc/localtime"),
        )
    }

    async fn check_ssh_port(&self, host: &str, port: u16) -> bool {
        let probe = async {
            let stream = TcpStream::connect((host, port)).await?;
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).await?;
            Ok::<_, std::io::Error>(line)
        };

        match tokio::time::timeout(SSH_PROBE_TIMEOUT, probe).await {
            Ok(Ok(line)) => {
                tracing::debug!("Banner from {}:{}: {}", host, port, line.trim_end());
                line.contains("SSH")
            }
            Ok(Err(e)) => {
                tracing::debug!("Error connecting to ssh port {}:{}: {}", host, port, e);
                false
            }
            Err(_) => {
                tracing::debug!("Timed out waiting for ssh banner on {}:{}", host, port);
                false
            }
        }
    }

    fn run_interactive(&self, command: &str, args: &[String]) -> Result<i32> {
        tracing::debug!("Running {} {}", command, args.join(" "));
        let status = Command::new(command)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        Ok(status.code().unwrap_or(1))
    }
}

/// Lowercase with spaces replaced, mostly for Windows account names
pub fn normalize_username(user: &str) -> String {
    user.replace(' ', "_").to_lowercase()
}

/// Timezone from `$TZ`, a Debian style `/etc/timezone` file, or the target of
/// the `/etc/localtime` symlink
pub fn detect_timezone_from(
    tz_env: Option<&str>,
    timezone_file: &Path,
    localtime: &Path,
) -> Option<String> {
    if let Some(tz) = tz_env.map(str::trim).filter(|tz| !tz.is_empty()) {
        return Some(tz.trim_start_matches(':').to_string());
    }

    if let Ok(contents) = std::fs::read_to_string(timezone_file) {
        let tz = contents.trim();
        if !tz.is_empty() {
            return Some(tz.to_string());
        }
    }

    let target = std::fs::canonicalize(localtime).ok()?;
    target
        .strip_prefix("/usr/share/zoneinfo/")
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|tz| !tz.is_empty())
}

fn create_private_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)?;
    }
    #[cfg(not(unix))]
    std::fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(unix)]
fn process_ids() -> (u32, u32) {
    (
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    )
}

#[cfg(not(unix))]
fn process_ids() -> (u32, u32) {
    (REMOTE_ID, REMOTE_ID)
}
