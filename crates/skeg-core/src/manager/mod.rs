//! Environment manager - coordinates all environment operations
//!
//! Every side effect on the runtime or the local store goes through here, one
//! awaited step at a time. Nothing is rolled back when a step fails.

mod connect;
mod lifecycle;

pub use connect::*;
pub use lifecycle::*;

use crate::environment::{reconcile, Environment};
use crate::images::{self, BaseImage, BuildOpts, ImageOpts, UserImage, CATALOG};
use crate::naming::{self, REGISTRY_ORG};
use crate::store::EnvironmentStore;
use crate::{CoreError, Result};
use skeg_config::{Endpoint, GlobalConfig};
use skeg_provider::ContainerProvider;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Main environment manager
pub struct EnvironmentManager {
    provider: Box<dyn ContainerProvider>,
    store: Box<dyn EnvironmentStore>,
    config: GlobalConfig,
    /// Runtime endpoint the provider is connected to
    endpoint: Endpoint,
    /// Waits between ssh readiness probes
    ssh_backoff: Vec<Duration>,
}

impl EnvironmentManager {
    pub fn new(
        provider: Box<dyn ContainerProvider>,
        store: Box<dyn EnvironmentStore>,
        config: GlobalConfig,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            provider,
            store,
            config,
            endpoint,
            ssh_backoff: default_ssh_backoff(),
        }
    }

    /// Create a manager for testing with injectable dependencies.
    /// SSH probes are not delayed.
    #[cfg(any(test, feature = "test-support"))]
    pub fn new_for_testing(
        provider: Box<dyn ContainerProvider>,
        store: Box<dyn EnvironmentStore>,
        config: GlobalConfig,
    ) -> Self {
        let endpoint = config.endpoint_from(None, None);
        Self {
            provider,
            store,
            config,
            endpoint,
            ssh_backoff: vec![Duration::ZERO; SSH_BACKOFF_MS.len()],
        }
    }

    /// Replace the runtime endpoint used for ssh host resolution
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn store(&self) -> &dyn EnvironmentStore {
        self.store.as_ref()
    }

    pub fn username(&self) -> &str {
        self.store.username()
    }

    /// Build options for the current user
    pub fn build_opts(&self, image: ImageOpts, timezone: &str, force_pull: bool) -> BuildOpts {
        BuildOpts {
            username: self.store.username().to_string(),
            uid: self.store.uid(),
            gid: self.store.gid(),
            image,
            force_pull,
            timezone: timezone.to_string(),
        }
    }

    /// All environments, keyed by name
    pub async fn environments(&self) -> Result<BTreeMap<String, Environment>> {
        let containers = self.provider.list().await?;
        let dirs = self.store.list_environment_names()?;
        Ok(reconcile(&containers, &dirs, self.store.username()))
    }

    /// A single environment
    pub async fn environment(&self, name: &str) -> Result<Environment> {
        self.environments()
            .await?
            .remove(name)
            .ok_or_else(|| CoreError::EnvironmentNotFound(name.to_string()))
    }

    /// Start the environment's container unless it is already running.
    /// An environment without a container is returned unchanged.
    pub async fn ensure_running(&self, name: &str) -> Result<Environment> {
        let env = self.environment(name).await?;
        match &env.container {
            Some(container) if !container.running => {
                tracing::info!("Starting {}", name);
                self.provider.start(&container.name).await?;
                self.environment(name).await
            }
            _ => Ok(env),
        }
    }

    /// Stop the environment's container if it is running
    pub async fn ensure_stopped(&self, name: &str) -> Result<Environment> {
        let env = self.environment(name).await?;
        match &env.container {
            Some(container) if container.running => {
                tracing::info!("Stopping {}", name);
                self.provider
                    .stop(&container.name, self.config.defaults.stop_timeout)
                    .await?;
                self.environment(name).await
            }
            _ => Ok(env),
        }
    }

    /// Remove the container, directory and home volume of an environment.
    ///
    /// Parts that are already gone are skipped, so destroying an unknown name
    /// succeeds.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        let user = self.store.username();
        let container_name = naming::container_name(user, name);

        let containers = self.provider.list().await?;
        if let Some(container) = containers.iter().find(|c| c.name == container_name) {
            if container.status.contains("Up") {
                tracing::info!("Stopping {}", container_name);
                tolerate_missing(
                    self.provider
                        .stop(&container_name, self.config.defaults.stop_timeout)
                        .await,
                    &container_name,
                )?;
            }
            tracing::info!("Removing container {}", container_name);
            tolerate_missing(self.provider.remove(&container_name).await, &container_name)?;
        } else {
            tracing::debug!("No container {} to remove", container_name);
        }

        tracing::info!("Removing environment directory for {}", name);
        self.store.remove_environment_dir(name)?;

        let volume = naming::home_volume_name(user, name);
        let volumes = self.provider.list_volumes().await?;
        if volumes.iter().any(|v| v.name == volume) {
            tracing::info!("Removing volume {}", volume);
            tolerate_missing(self.provider.remove_volume(&volume).await, &volume)?;
        }

        Ok(())
    }

    /// The base image catalog, annotated with what is pulled locally
    pub async fn base_images(&self) -> Result<Vec<BaseImage>> {
        let local = self.provider.list_images(&[]).await?;
        Ok(images::annotate_catalog(CATALOG, &local, REGISTRY_ORG))
    }

    /// Images previously built for the current user from `opts`
    pub async fn user_images(&self, opts: &ImageOpts) -> Result<Vec<UserImage>> {
        images::list_user_images(self.provider.as_ref(), opts, self.store.username()).await
    }

    /// Build a fresh user image without creating an environment
    pub async fn build_image(
        &self,
        opts: &BuildOpts,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<String> {
        images::build_user_image(self.provider.as_ref(), self.store.as_ref(), opts, progress).await
    }

    /// Save an environment's container as a user image, returning its name.
    /// Later environments created from the same base start from it.
    pub async fn freeze(&self, name: &str) -> Result<String> {
        let env = self.environment(name).await?;
        let container = env
            .container
            .ok_or_else(|| CoreError::NoContainer(name.to_string()))?;

        images::freeze_container(
            self.provider.as_ref(),
            &container.name,
            &container.labels,
            self.store.username(),
            self.store.uid(),
            self.store.gid(),
        )
        .await
    }
}

/// Treat a runtime "not found" as done, logging it
fn tolerate_missing(result: skeg_provider::Result<()>, what: &str) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            tracing::warn!("{} was already gone: {}", what, e);
            Ok(())
        }
        other => Ok(other?),
    }
}
