//! SSH connection to running environments

use crate::environment::Environment;
use crate::keys::SshKeyPair;
use crate::ports::Port;
use crate::store::EnvironmentStore;
use crate::{CoreError, Result};
use skeg_config::{ConfigError, Endpoint};
use std::time::Duration;

use super::EnvironmentManager;

/// Waits before each ssh readiness probe, in milliseconds
pub const SSH_BACKOFF_MS: [u64; 5] = [0, 200, 500, 1000, 2000];

pub fn default_ssh_backoff() -> Vec<Duration> {
    SSH_BACKOFF_MS.iter().map(|ms| Duration::from_millis(*ms)).collect()
}

const WILDCARD_ADDRS: [&str; 2] = ["0.0.0.0", "::"];

/// Probe `host:port` once per step of `schedule` until an ssh banner shows up
pub async fn wait_for_ssh(
    store: &dyn EnvironmentStore,
    host: &str,
    port: u16,
    schedule: &[Duration],
) -> Result<()> {
    for (attempt, delay) in schedule.iter().enumerate() {
        if !delay.is_zero() {
            tokio::time::sleep(*delay).await;
        }
        if store.check_ssh_port(host, port).await {
            tracing::debug!("SSH on {}:{} ready after {} attempts", host, port, attempt + 1);
            return Ok(());
        }
        tracing::debug!("SSH on {}:{} not ready (attempt {})", host, port, attempt + 1);
    }
    Err(CoreError::SshNotReady(format!("{}:{}", host, port)))
}

/// Host to reach a published port on.
///
/// A configured runtime endpoint wins since ports are published on that
/// machine; otherwise the bound address unless it is a wildcard.
pub fn resolve_ssh_host(endpoint: &Endpoint, binding: &Port) -> String {
    if endpoint.overridden {
        let address = if endpoint.address.contains("://") {
            endpoint.address.clone()
        } else {
            format!("tcp://{}", endpoint.address)
        };
        return match url::Url::parse(&address).ok().as_ref().and_then(|u| u.host_str()) {
            Some(host) if !host.is_empty() => host.trim_matches(|c| c == '[' || c == ']').to_string(),
            _ => "localhost".to_string(),
        };
    }

    let ip = binding.host_ip.as_str();
    if ip.is_empty() || WILDCARD_ADDRS.contains(&ip) {
        "localhost".to_string()
    } else {
        ip.to_string()
    }
}

/// Arguments for the ssh client
pub fn ssh_args(keys: &SshKeyPair, user: &str, host: &str, port: u16, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        keys.private_path.display().to_string(),
        "-p".to_string(),
        port.to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "UserKnownHostsFile=/dev/null".to_string(),
        "-o".to_string(),
        "LogLevel=ERROR".to_string(),
        format!("{}@{}", user, host),
    ];
    args.extend(extra.iter().cloned());
    args
}

/// Split the configured ssh client into program and leading arguments
pub fn split_ssh_command(command: &str) -> Result<(String, Vec<String>)> {
    let mut words = shell_words::split(command)
        .map_err(|e| ConfigError::Invalid(format!("ssh_command {:?}: {}", command, e)))?;
    if words.is_empty() {
        return Ok(("ssh".to_string(), Vec::new()));
    }
    let program = words.remove(0);
    Ok((program, words))
}

impl EnvironmentManager {
    /// Host and port of a running environment's ssh daemon
    fn ssh_target(&self, env: &Environment) -> Result<(String, u16)> {
        let container = env
            .container
            .as_ref()
            .ok_or_else(|| CoreError::NoContainer(env.name.clone()))?;
        let binding = container
            .ssh_port()
            .ok_or_else(|| CoreError::NoSshPort(env.name.clone()))?;
        Ok((resolve_ssh_host(&self.endpoint, binding), binding.host_port))
    }

    /// Start the environment if needed, wait for ssh, then hand the terminal
    /// to the ssh client. Returns the client's exit code.
    pub async fn connect(&self, name: &str, extra: &[String]) -> Result<i32> {
        let env = self.ensure_running(name).await?;
        let (host, port) = self.ssh_target(&env)?;

        tracing::info!("Waiting for ssh on {}:{}", host, port);
        wait_for_ssh(self.store.as_ref(), &host, port, &self.ssh_backoff).await?;

        let (program, mut args) = split_ssh_command(&self.config.defaults.ssh_command)?;
        let keys = self.store.ensure_ssh_keypair()?;
        args.extend(ssh_args(&keys, self.store.username(), &host, port, extra));
        tracing::debug!("Running {} {}", program, shell_words::join(&args));
        self.store.run_interactive(&program, &args)
    }

    /// OpenSSH `Host` stanza for a running environment
    pub async fn ssh_config(&self, name: &str) -> Result<String> {
        let env = self.environment(name).await?;
        if !env.is_running() && env.container.is_some() {
            return Err(CoreError::NoSshPort(format!("{} (not running)", name)));
        }
        let (host, port) = self.ssh_target(&env)?;
        let keys = self.store.ensure_ssh_keypair()?;

        Ok(format!(
            "Host {name}\n  \
             HostName {host}\n  \
             Port {port}\n  \
             User {user}\n  \
             IdentityFile {key}\n  \
             StrictHostKeyChecking no\n  \
             UserKnownHostsFile /dev/null\n  \
             LogLevel ERROR\n",
            name = name,
            host = host,
            port = port,
            user = self.store.username(),
            key = keys.private_path.display(),
        ))
    }
}
