//! Container runtime gateway for skeg
//!
//! This crate provides a narrow abstraction over the container runtime
//! (containers, images, volumes) so the environment engine can be exercised
//! against an in-memory double as well as a real Docker daemon.

mod docker;
mod error;
mod types;

pub use docker::DockerProvider;
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use skeg_config::TlsPaths;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Trait for container runtime providers
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// List all containers, running or not
    async fn list(&self) -> Result<Vec<ContainerInfo>>;

    /// Get detailed information about a container
    async fn inspect(&self, name: &str) -> Result<ContainerDetails>;

    /// List images, optionally restricted to those carrying all of the given
    /// `key=value` labels
    async fn list_images(&self, labels: &[String]) -> Result<Vec<ImageInfo>>;

    /// Pull an image from a registry.
    /// Progress lines are sent to `progress` when given, logged otherwise.
    async fn pull(
        &self,
        image: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<()>;

    /// Build an image from an in-memory recipe.
    /// Build output is streamed to `progress` when given, logged otherwise.
    async fn build(
        &self,
        config: &BuildConfig,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ImageId>;

    /// Create a container from an image
    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId>;

    /// Start a container
    async fn start(&self, name: &str) -> Result<()>;

    /// Stop a container, killing it after `timeout` seconds
    async fn stop(&self, name: &str, timeout: u32) -> Result<()>;

    /// Remove a container
    async fn remove(&self, name: &str) -> Result<()>;

    /// Commit a container's filesystem into a new image tagged `tag`,
    /// carrying `labels`
    async fn commit(
        &self,
        name: &str,
        tag: &str,
        labels: &HashMap<String, String>,
    ) -> Result<ImageId>;

    /// List volumes
    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>>;

    /// Create a named volume
    async fn create_volume(&self, name: &str, labels: &[(String, String)]) -> Result<()>;

    /// Remove a named volume
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Check if the runtime is reachable
    async fn ping(&self) -> Result<()>;

    /// Split an image reference into repository and tag
    fn parse_repository_tag(&self, reference: &str) -> (String, String) {
        parse_repository_tag(reference)
    }
}

/// Send a progress line to the channel, or log it if there is no channel
pub fn send_progress(progress: Option<&mpsc::UnboundedSender<String>>, msg: impl Into<String>) {
    let msg = msg.into();
    match progress {
        Some(tx) => {
            let _ = tx.send(msg);
        }
        None => tracing::debug!("{}", msg.trim_end()),
    }
}

/// Connect to the runtime at `endpoint`, over TLS when `tls` is given
pub async fn create_provider(
    endpoint: &str,
    tls: Option<&TlsPaths>,
) -> Result<Box<dyn ContainerProvider>> {
    match DockerProvider::new(endpoint, tls).await {
        Ok(provider) => Ok(Box::new(provider)),
        Err(e) => Err(ProviderError::ConnectionError(format_connection_error(
            endpoint, &e,
        ))),
    }
}

/// Format a helpful connection error message with actionable instructions
fn format_connection_error(endpoint: &str, underlying: &ProviderError) -> String {
    let mut msg = format!("Cannot connect to Docker at {}\n\n", endpoint);

    let socket_path = endpoint.strip_prefix("unix://").unwrap_or(endpoint);
    if socket_path.starts_with('/') && !std::path::Path::new(socket_path).exists() {
        msg.push_str(&format!(
            "The Docker API socket was not found at:\n  {}\n\n",
            socket_path
        ));
        msg.push_str("To start Docker, run:\n");
        msg.push_str("  sudo systemctl enable --now docker\n");
        msg.push_str("or point DOCKER_HOST at a reachable daemon.\n");
    } else {
        msg.push_str("The daemon is not responding.\n\n");
        msg.push_str(&format!("Underlying error: {}\n", underlying));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_missing_socket() {
        let msg = format_connection_error(
            "unix:///definitely/not/here.sock",
            &ProviderError::ConnectionError("boom".into()),
        );
        assert!(msg.contains("was not found"));
        assert!(msg.contains("/definitely/not/here.sock"));
    }

    #[test]
    fn test_connection_error_remote() {
        let msg = format_connection_error(
            "tcp://10.0.0.5:2375",
            &ProviderError::ConnectionError("refused".into()),
        );
        assert!(msg.contains("not responding"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_send_progress_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        send_progress(Some(&tx), "Step 1/4");
        assert_eq!(rx.try_recv().unwrap(), "Step 1/4");
        // without a channel nothing panics
        send_progress(None, "logged");
    }
}
