//! Docker provider implementation using bollard

use crate::{
    send_progress, BuildConfig, ContainerDetails, ContainerId, ContainerInfo, ContainerProvider,
    ContextFile, CreateContainerConfig, ImageId, ImageInfo, MountInfo, PortInfo, ProviderError,
    Result, VolumeInfo,
};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::{
    BuildImageOptions, CommitContainerOptions, CreateImageOptions, ListImagesOptions,
};
use bollard::service::{HostConfig, PortBinding};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures::StreamExt;
use skeg_config::TlsPaths;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Docker provider using bollard crate
pub struct DockerProvider {
    client: Docker,
}

impl DockerProvider {
    /// Connect to the Docker daemon at `endpoint` and verify it responds.
    /// With `tls`, the daemon must be a tcp endpoint and is verified against
    /// the given CA certificate.
    pub async fn new(endpoint: &str, tls: Option<&TlsPaths>) -> Result<Self> {
        let remote = endpoint.starts_with("tcp://")
            || endpoint.starts_with("http://")
            || endpoint.starts_with("https://");

        let client = match tls {
            Some(tls) if remote => {
                let address = endpoint.replacen("http://", "tcp://", 1);
                Docker::connect_with_ssl(
                    &address,
                    &tls.key,
                    &tls.cert,
                    &tls.ca_cert,
                    120,
                    bollard::API_DEFAULT_VERSION,
                )
                .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
            }
            Some(_) => {
                return Err(ProviderError::ConnectionError(format!(
                    "TLS needs a tcp:// host, got {}",
                    endpoint
                )))
            }
            None if remote => {
                let address = endpoint.replacen("tcp://", "http://", 1);
                Docker::connect_with_http(&address, 120, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
            }
            None => {
                // unix:// socket, npipe:// pipe, or a bare socket path
                let path = endpoint
                    .trim_start_matches("unix://")
                    .trim_start_matches("npipe://");
                Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| ProviderError::ConnectionError(e.to_string()))?
            }
        };

        // Test connection
        client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self { client })
    }
}

fn is_not_modified(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn list(&self) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: ContainerId::new(c.id.unwrap_or_default()),
                name: c
                    .names
                    .and_then(|n| n.first().cloned())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                status: c.status.unwrap_or_default(),
                ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| PortInfo {
                        container_port: p.private_port,
                        host_port: p.public_port,
                        protocol: p
                            .typ
                            .map(|t| t.to_string())
                            .filter(|t| !t.is_empty())
                            .unwrap_or_else(|| "tcp".to_string()),
                        host_ip: p.ip,
                    })
                    .collect(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerDetails> {
        let info = self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ProviderError::ContainerNotFound(name.to_string())
                } else {
                    e.into()
                }
            })?;

        let config = info.config.as_ref();

        let mounts = info
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| MountInfo {
                mount_type: m
                    .typ
                    .map(|t| format!("{:?}", t).to_lowercase())
                    .unwrap_or_else(|| "unknown".to_string()),
                name: m.name,
                source: m.source.unwrap_or_default(),
                destination: m.destination.unwrap_or_default(),
                read_only: m.rw.map(|rw| !rw).unwrap_or(false),
            })
            .collect();

        let mut ports = Vec::new();
        if let Some(network) = &info.network_settings {
            if let Some(port_map) = &network.ports {
                for (container_port, bindings) in port_map {
                    let mut parts = container_port.splitn(2, '/');
                    let port_num: u16 = parts
                        .next()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(0);
                    let protocol = parts.next().unwrap_or("tcp").to_string();

                    match bindings {
                        Some(bindings) if !bindings.is_empty() => {
                            for binding in bindings {
                                ports.push(PortInfo {
                                    container_port: port_num,
                                    host_port: binding
                                        .host_port
                                        .as_ref()
                                        .and_then(|p| p.parse().ok()),
                                    protocol: protocol.clone(),
                                    host_ip: binding.host_ip.clone(),
                                });
                            }
                        }
                        _ => ports.push(PortInfo {
                            container_port: port_num,
                            host_port: None,
                            protocol,
                            host_ip: None,
                        }),
                    }
                }
            }
        }
        ports.sort_by_key(|p| (p.container_port, p.protocol.clone()));

        Ok(ContainerDetails {
            id: ContainerId::new(info.id.unwrap_or_default()),
            name: info
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: config.and_then(|c| c.image.clone()).unwrap_or_default(),
            running: info
                .state
                .as_ref()
                .and_then(|s| s.running)
                .unwrap_or(false),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
            mounts,
            ports,
        })
    }

    async fn list_images(&self, labels: &[String]) -> Result<Vec<ImageInfo>> {
        let mut filters = HashMap::new();
        if !labels.is_empty() {
            filters.insert("label".to_string(), labels.to_vec());
        }
        let options = ListImagesOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };

        let images = self.client.list_images(Some(options)).await?;

        Ok(images
            .into_iter()
            .map(|i| ImageInfo {
                id: ImageId::new(i.id),
                repo_tags: i.repo_tags,
                labels: i.labels,
                created: i.created,
            })
            .collect())
    }

    async fn pull(
        &self,
        image: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<()> {
        let (repository, tag) = self.parse_repository_tag(image);
        let tag = if tag.is_empty() {
            "latest".to_string()
        } else {
            tag
        };

        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(ProviderError::PullError(error));
                    }
                    let line = match (info.id, info.status, info.progress) {
                        (Some(id), Some(status), Some(bar)) => format!("{}: {} {}", id, status, bar),
                        (Some(id), Some(status), None) => format!("{}: {}", id, status),
                        (None, Some(status), _) => status,
                        _ => continue,
                    };
                    send_progress(progress, line);
                }
                Err(e) => return Err(ProviderError::PullError(e.to_string())),
            }
        }

        Ok(())
    }

    async fn build(
        &self,
        config: &BuildConfig,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<ImageId> {
        let tar_data = create_build_context(&config.dockerfile, &config.files)?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: config.tag.clone(),
            labels: config.labels.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.client.build_image(options, None, Some(tar_data.into()));

        let mut image_id = None;
        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(ProviderError::BuildError(error));
                    }
                    if let Some(aux) = output.aux {
                        if let Some(id) = aux.id {
                            image_id = Some(id);
                        }
                    }
                    if let Some(stream) = output.stream {
                        send_progress(progress, stream);
                    }
                }
                Err(e) => return Err(ProviderError::BuildError(e.to_string())),
            }
        }

        // Older daemons do not report the image id; the tag identifies it just as well
        Ok(ImageId::new(image_id.unwrap_or_else(|| config.tag.clone())))
    }

    async fn create(&self, config: &CreateContainerConfig) -> Result<ContainerId> {
        let options = CreateContainerOptions {
            name: config.name.as_str(),
            platform: None,
        };

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        for port in &config.ports {
            let container_port = format!("{}/{}", port.container_port, port.protocol);
            exposed_ports.insert(container_port.clone(), HashMap::new());

            let binding = PortBinding {
                host_ip: port.host_ip.clone(),
                host_port: port.host_port.map(|p| p.to_string()),
            };
            port_bindings
                .entry(container_port)
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(binding);
        }

        let host_config = HostConfig {
            binds: if config.binds.is_empty() {
                None
            } else {
                Some(config.binds.clone())
            },
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            hostname: config.hostname.clone(),
            labels: if config.labels.is_empty() {
                None
            } else {
                Some(config.labels.clone())
            },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(options), container_config)
            .await?;

        for warning in &response.warnings {
            tracing::warn!("{}", warning);
        }

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, name: &str) -> Result<()> {
        match self
            .client
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => {
                tracing::debug!("Container '{}' was already running", name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Err(ProviderError::ContainerNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self, name: &str, timeout: u32) -> Result<()> {
        let options = StopContainerOptions { t: timeout as i64 };
        match self.client.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => {
                tracing::debug!("Container '{}' was already stopped", name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Err(ProviderError::ContainerNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: false,
            ..Default::default()
        };
        match self.client.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Err(ProviderError::ContainerNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(
        &self,
        name: &str,
        tag: &str,
        labels: &HashMap<String, String>,
    ) -> Result<ImageId> {
        let (repo, version) = crate::parse_repository_tag(tag);
        let options = CommitContainerOptions {
            container: name.to_string(),
            repo,
            tag: if version.is_empty() {
                "latest".to_string()
            } else {
                version
            },
            comment: format!("skeg freeze of {}", name),
            pause: true,
            ..Default::default()
        };
        let config = Config::<String> {
            labels: Some(labels.clone()),
            ..Default::default()
        };

        match self.client.commit_container(options, config).await {
            Ok(commit) => Ok(ImageId::new(
                commit.id.filter(|id| !id.is_empty()).unwrap_or_else(|| tag.to_string()),
            )),
            Err(e) if is_not_found(&e) => Err(ProviderError::ContainerNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>> {
        let response = self
            .client
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| VolumeInfo {
                name: v.name,
                labels: v.labels,
            })
            .collect())
    }

    async fn create_volume(&self, name: &str, labels: &[(String, String)]) -> Result<()> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            driver: "local".to_string(),
            driver_opts: HashMap::new(),
            labels: labels.iter().cloned().collect(),
        };
        self.client.create_volume(options).await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        match self
            .client
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Err(ProviderError::VolumeNotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        Ok(())
    }
}

/// Create an in-memory tar archive holding the Dockerfile and extra files
fn create_build_context(dockerfile: &str, files: &[ContextFile]) -> Result<Vec<u8>> {
    use std::io::Cursor;
    use tar::{Builder, Header};

    let mtime = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut tar_data = Vec::new();
    {
        let cursor = Cursor::new(&mut tar_data);
        let mut builder = Builder::new(cursor);

        let entries = std::iter::once(("Dockerfile", dockerfile.as_bytes(), 0o644))
            .chain(files.iter().map(|f| (f.name.as_str(), f.contents.as_slice(), f.mode)));

        for (name, contents, mode) in entries {
            let mut header = Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(mode);
            header.set_mtime(mtime);
            header.set_cksum();
            builder.append_data(&mut header, name, contents)?;
        }

        builder.finish()?;
    }

    Ok(tar_data)
}
