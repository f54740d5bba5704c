//! Create and rebuild for EnvironmentManager

use crate::environment::Environment;
use crate::images::{self, BuildOpts, ImageOpts, CATALOG};
use crate::naming::{self, labels};
use crate::ports::{parse_ports, Port};
use crate::{CoreError, Result};
use skeg_provider::{parse_repository_tag, send_progress, CreateContainerConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::EnvironmentManager;

/// Host ports above this were almost certainly assigned by the runtime
const EPHEMERAL_PORT_FLOOR: u16 = 30000;

/// Options for creating (or re-creating) an environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOpts {
    pub name: String,
    /// Local directory mounted into the home directory under its own name
    pub project_dir: Option<PathBuf>,
    /// User port specs, `-p` style
    pub ports: Vec<String>,
    /// User volume specs, `-v` style
    pub volumes: Vec<String>,
    /// Ports kept from a previous container
    pub carried_ports: Vec<Port>,
    /// Volumes kept from a previous container
    pub carried_volumes: Vec<String>,
    /// Build a new user image even if a current one exists
    pub force_build: bool,
    /// Keep the home directory in a named volume; None uses the configured default
    pub home_volume: Option<bool>,
    pub build: BuildOpts,
}

/// Home directory of `user` inside containers
pub fn home_dir(user: &str) -> String {
    format!("/home/{}", user)
}

/// Ports of a previous container worth keeping: the ssh binding is dropped and
/// runtime assigned host ports go back to auto-assign.
pub fn carry_over_ports(ports: &[Port]) -> Vec<Port> {
    let mut carried: Vec<Port> = Vec::new();
    for port in ports.iter().filter(|p| !p.is_ssh()) {
        let mut port = port.clone();
        if port.host_port > EPHEMERAL_PORT_FLOOR {
            port.host_port = 0;
        }
        if !carried.contains(&port) {
            carried.push(port);
        }
    }
    carried
}

/// User ports, then carried ports not overridden by them, then ssh
pub fn merge_ports(user: &[Port], carried: &[Port]) -> Vec<Port> {
    let mut merged: Vec<Port> = Vec::new();
    let overridden = |p: &Port| {
        user.iter()
            .any(|u| u.container_port == p.container_port && u.protocol == p.protocol)
    };

    for port in user.iter().chain(carried.iter().filter(|p| !overridden(p))) {
        if !port.is_ssh() && !merged.contains(port) {
            merged.push(port.clone());
        }
    }
    merged.push(Port::ssh());
    merged
}

/// Destination of a `src:dst[:mode]` volume spec
fn volume_destination(spec: &str) -> &str {
    let mut parts = spec.split(':');
    let first = parts.next().unwrap_or(spec);
    parts.next().unwrap_or(first)
}

/// Drop volume specs whose destination is already taken; first one wins
pub fn merge_volumes<I, S>(specs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut merged: Vec<String> = Vec::new();
    for spec in specs {
        let spec = spec.into();
        let dest = volume_destination(&spec).trim_end_matches('/').to_string();
        if merged
            .iter()
            .any(|m| volume_destination(m).trim_end_matches('/') == dest)
        {
            tracing::debug!("Skipping volume {}: {} is already mounted", spec, dest);
            continue;
        }
        merged.push(spec);
    }
    merged
}

/// Recover the image selector of a container from its labels
pub fn image_from_labels(container_labels: &HashMap<String, String>) -> Result<ImageOpts> {
    let base = container_labels
        .get(labels::BASE)
        .map(String::as_str)
        .unwrap_or_default();
    let base_image = container_labels
        .get(labels::BASE_IMAGE)
        .map(String::as_str)
        .unwrap_or_default();

    if !base.is_empty() && CATALOG.iter().any(|e| e.name == base) {
        let (_, version) = parse_repository_tag(base_image);
        return Ok(ImageOpts::catalog(base, version));
    }
    if !base_image.is_empty() {
        return Ok(ImageOpts::literal(base_image));
    }
    if !base.is_empty() {
        return Ok(ImageOpts::literal(base));
    }

    Err(CoreError::ImageNotFound(
        "container carries no base image labels, pass a type or image".into(),
    ))
}

fn validate_env_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidName("environment name cannot be empty".into()));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid || name.starts_with('.') || name.starts_with('-') {
        return Err(CoreError::InvalidName(format!(
            "'{}' may only contain letters, digits, '_', '.' and '-'",
            name
        )));
    }
    Ok(())
}

/// Checks of `opts` that need neither the runtime nor the filesystem.
/// Returns the parsed user ports and the resolved base image.
fn check_create_opts(opts: &CreateOpts) -> Result<(Vec<Port>, String)> {
    validate_env_name(&opts.name)?;
    let user_ports = parse_ports(&opts.ports)?;

    if opts.build.image.is_empty() {
        return Err(CoreError::ImageNotFound("no base type or image selected".into()));
    }
    let base_image = images::resolve_image(&opts.build.image)?;
    Ok((user_ports, base_image))
}

impl EnvironmentManager {
    /// Create an environment and start its container
    pub async fn create(
        &self,
        opts: CreateOpts,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<Environment> {
        let (user_ports, base_image) = check_create_opts(&opts)?;
        let name = opts.name.as_str();

        if let Some(existing) = self.environments().await?.get(name) {
            if existing.container.is_some() {
                return Err(CoreError::AlreadyExists(name.to_string()));
            }
        }

        let user = self.store.username().to_string();
        let home = home_dir(&user);

        let keys = self.store.ensure_ssh_keypair()?;
        let env_dir = self.store.ensure_environment_dir(name, &keys)?;

        let mut build = opts.build.clone();
        if build.timezone.is_empty() {
            build.timezone = self.store.detect_timezone().unwrap_or_default();
        }
        let image = images::select_or_build_image(
            self.provider.as_ref(),
            self.store.as_ref(),
            &build,
            opts.force_build,
            progress,
        )
        .await?;

        let ports = merge_ports(&user_ports, &opts.carried_ports);

        let home_volume = opts.home_volume.unwrap_or(self.config.defaults.home_volume);
        let home_bind = if home_volume {
            let volume = naming::home_volume_name(&user, name);
            let volumes = self.provider.list_volumes().await?;
            if !volumes.iter().any(|v| v.name == volume) {
                tracing::info!("Creating volume {}", volume);
                self.provider
                    .create_volume(&volume, &[(labels::USER.to_string(), user.clone())])
                    .await?;
            }
            format!("{}:{}", volume, home)
        } else {
            format!("{}:{}", env_dir.display(), home)
        };

        let mut volumes = vec![home_bind];
        if let Some(project) = &opts.project_dir {
            let base_name = project
                .file_name()
                .ok_or_else(|| {
                    CoreError::InvalidName(format!("{} has no directory name", project.display()))
                })?
                .to_string_lossy();
            volumes.push(format!("{}:{}/{}", project.display(), home, base_name));
        }
        volumes.extend(opts.volumes.iter().cloned());
        volumes.extend(opts.carried_volumes.iter().cloned());

        let container_name = naming::container_name(&user, name);
        let config = CreateContainerConfig {
            name: container_name.clone(),
            image,
            hostname: Some(name.to_string()),
            ports: ports.iter().map(Port::to_config).collect(),
            binds: merge_volumes(volumes),
            labels: HashMap::from([
                (labels::BASE.to_string(), build.image.base_label().to_string()),
                (labels::BASE_IMAGE.to_string(), base_image),
                (labels::USER.to_string(), user.clone()),
                (labels::TIMEZONE.to_string(), build.timezone.clone()),
                (labels::HOME_VOLUME.to_string(), home_volume.to_string()),
            ]),
        };

        tracing::info!("Creating container {} from {}", container_name, config.image);
        send_progress(progress, format!("Creating {}", container_name));
        self.provider.create(&config).await?;

        tracing::info!("Starting {}", container_name);
        self.provider.start(&container_name).await?;

        self.environment(name).await
    }

    /// Replace an environment's container, keeping its published ports,
    /// extra volumes, base image, timezone and home volume mode unless `opts`
    /// says otherwise
    pub async fn rebuild(
        &self,
        opts: CreateOpts,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<Environment> {
        let env = self.environment(&opts.name).await?;
        let container = env
            .container
            .ok_or_else(|| CoreError::NoContainer(opts.name.clone()))?;

        let details = self.provider.inspect(&container.name).await?;
        let home = home_dir(self.store.username());

        let old_ports: Vec<Port> = details.ports.iter().filter_map(Port::from_info).collect();
        let old_volumes: Vec<String> = details
            .mounts
            .iter()
            .filter(|m| m.destination.trim_end_matches('/') != home)
            .map(|m| m.to_bind())
            .collect();

        let mut merged = opts;
        merged.carried_ports.extend(carry_over_ports(&old_ports));
        merged.carried_volumes.extend(old_volumes);

        if merged.build.image.is_empty() {
            merged.build.image = image_from_labels(&details.labels)?;
        }
        if merged.build.timezone.is_empty() {
            if let Some(tz) = details.labels.get(labels::TIMEZONE) {
                merged.build.timezone = tz.clone();
            }
        }
        if merged.home_volume.is_none() {
            merged.home_volume = details
                .labels
                .get(labels::HOME_VOLUME)
                .map(|v| v == "true");
        }

        // bad input must not cost the old container
        check_create_opts(&merged)?;

        if details.running {
            tracing::info!("Stopping {}", container.name);
            self.provider
                .stop(&container.name, self.config.defaults.stop_timeout)
                .await?;
        }
        tracing::info!("Removing container {}", container.name);
        self.provider.remove(&container.name).await?;

        self.create(merged, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::IMAGE_FORMAT_VERSION;
    use crate::ports::Protocol;
    use crate::test_support::*;
    use skeg_config::GlobalConfig;
    use skeg_provider::{MountInfo, PortInfo};

    fn test_manager(mock: &MockProvider, store: &MockStore) -> EnvironmentManager {
        EnvironmentManager::new_for_testing(
            Box::new(mock.clone()),
            Box::new(store.clone()),
            GlobalConfig::default(),
        )
    }

    fn tcp(host_port: u16, container_port: u16) -> Port {
        Port {
            host_ip: String::new(),
            host_port,
            container_port,
            protocol: Protocol::Tcp,
        }
    }

    fn create_opts(name: &str) -> CreateOpts {
        CreateOpts {
            name: name.to_string(),
            project_dir: Some(PathBuf::from("/src/webapp")),
            ports: vec!["8080:80".to_string()],
            build: BuildOpts {
                username: "alice".to_string(),
                uid: 1000,
                gid: 1000,
                image: ImageOpts::catalog("go", ""),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn current_go_image(mock: &MockProvider) {
        mock.add_user_image(
            "skeg-alice-20160301000000",
            "alice",
            "skegio/go:1.6",
            &IMAGE_FORMAT_VERSION.to_string(),
        );
    }

    #[test]
    fn test_carry_over_ports() {
        let old = vec![
            tcp(32768, 22),
            tcp(3000, 3000),
            tcp(40050, 8080),
            Port {
                protocol: Protocol::Udp,
                ..tcp(30000, 53)
            },
        ];
        assert_eq!(
            carry_over_ports(&old),
            vec![
                tcp(3000, 3000),
                tcp(0, 8080),
                Port {
                    protocol: Protocol::Udp,
                    ..tcp(30000, 53)
                },
            ]
        );
    }

    #[test]
    fn test_merge_ports_user_overrides_carried() {
        let merged = merge_ports(&[tcp(9000, 80)], &[tcp(0, 80), tcp(0, 443)]);
        assert_eq!(merged, vec![tcp(9000, 80), tcp(0, 443), Port::ssh()]);

        // ssh is always present exactly once
        let merged = merge_ports(&[], &[tcp(32768, 22)]);
        assert_eq!(merged, vec![Port::ssh()]);
    }

    #[test]
    fn test_merge_volumes_first_destination_wins() {
        let merged = merge_volumes(vec![
            "/home/alice/skegs/foo:/home/alice",
            "/src/webapp:/home/alice/webapp",
            "/tmp/other:/home/alice/",
            "cache:/cache:ro",
            "/elsewhere:/cache",
            "/data",
        ]);
        assert_eq!(
            merged,
            vec![
                "/home/alice/skegs/foo:/home/alice",
                "/src/webapp:/home/alice/webapp",
                "cache:/cache:ro",
                "/data",
            ]
        );
    }

    #[test]
    fn test_image_from_labels() {
        let catalog_labels = HashMap::from([
            (labels::BASE.to_string(), "go".to_string()),
            (labels::BASE_IMAGE.to_string(), "skegio/go:1.5".to_string()),
        ]);
        assert_eq!(image_from_labels(&catalog_labels).unwrap(), ImageOpts::catalog("go", "1.5"));

        let literal = HashMap::from([
            (labels::BASE.to_string(), "ubuntu:16.04".to_string()),
            (labels::BASE_IMAGE.to_string(), "ubuntu:16.04".to_string()),
        ]);
        assert_eq!(image_from_labels(&literal).unwrap(), ImageOpts::literal("ubuntu:16.04"));

        assert!(matches!(
            image_from_labels(&HashMap::new()),
            Err(CoreError::ImageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_new_environment() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.set_timezone(Some("America/Chicago"));
        current_go_image(&mock);
        let manager = test_manager(&mock, &store);

        let env = manager.create(create_opts("web"), None).await.unwrap();

        assert_eq!(env.name, "web");
        assert_eq!(env.kind, "go");
        let container = env.container.unwrap();
        assert_eq!(container.name, "skeg_alice_web");
        assert!(container.running);
        assert!(container.ssh_port().is_some());
        assert_eq!(store.dirs(), vec!["web"]);

        let config = mock.last_create().unwrap();
        // the current user image was reused
        assert_eq!(config.image, "skeg-alice-20160301000000");
        assert!(mock.last_build().is_none());
        assert_eq!(config.hostname.as_deref(), Some("web"));
        assert_eq!(
            config.binds,
            vec![
                "/home/alice/skegs/web:/home/alice".to_string(),
                "/src/webapp:/home/alice/webapp".to_string(),
            ]
        );
        assert_eq!(config.ports.len(), 2);
        assert_eq!(config.ports[0].host_port, Some(8080));
        assert_eq!(config.ports[1].container_port, 22);
        assert_eq!(config.ports[1].host_port, Some(0));
        assert_eq!(config.labels[labels::BASE], "go");
        assert_eq!(config.labels[labels::BASE_IMAGE], "skegio/go:1.6");
        assert_eq!(config.labels[labels::TIMEZONE], "America/Chicago");
        assert_eq!(config.labels[labels::HOME_VOLUME], "false");
    }

    #[tokio::test]
    async fn test_create_builds_when_no_image() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        let manager = test_manager(&mock, &store);

        manager.create(create_opts("web"), None).await.unwrap();
        let build = mock.last_build().unwrap();
        assert_eq!(mock.last_create().unwrap().image, build.tag);
    }

    #[tokio::test]
    async fn test_create_with_home_volume() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        current_go_image(&mock);
        let manager = test_manager(&mock, &store);

        let opts = CreateOpts {
            home_volume: Some(true),
            ..create_opts("web")
        };
        manager.create(opts, None).await.unwrap();

        assert!(mock.was_called(&MockCall::CreateVolume { name: "skeg_alice_web".into() }));
        let config = mock.last_create().unwrap();
        assert_eq!(config.binds[0], "skeg_alice_web:/home/alice");
        assert_eq!(config.labels[labels::HOME_VOLUME], "true");
    }

    #[tokio::test]
    async fn test_create_rejects_existing_container() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.add_dir("web");
        mock.add_container(mock_container("skeg_alice_web", "img", false));
        let manager = test_manager(&mock, &store);

        assert!(matches!(
            manager.create(create_opts("web"), None).await,
            Err(CoreError::AlreadyExists(_))
        ));
        assert!(!mock.get_calls().iter().any(|c| matches!(c, MockCall::Create { .. })));
    }

    #[tokio::test]
    async fn test_create_validates_before_side_effects() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        let manager = test_manager(&mock, &store);

        let reserved = CreateOpts {
            ports: vec!["22".to_string()],
            ..create_opts("web")
        };
        assert!(matches!(
            manager.create(reserved, None).await,
            Err(CoreError::ReservedPort(_))
        ));

        assert!(matches!(
            manager.create(create_opts(""), None).await,
            Err(CoreError::InvalidName(_))
        ));
        assert!(matches!(
            manager.create(create_opts("../etc"), None).await,
            Err(CoreError::InvalidName(_))
        ));

        let no_image = CreateOpts {
            build: BuildOpts {
                image: ImageOpts::default(),
                ..create_opts("web").build
            },
            ..create_opts("web")
        };
        assert!(matches!(
            manager.create(no_image, None).await,
            Err(CoreError::ImageNotFound(_))
        ));

        assert!(store.dirs().is_empty());
        assert!(mock.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_failure_leaves_built_image() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        mock.fail(MockOp::Create, "no space left on device");
        let manager = test_manager(&mock, &store);

        assert!(manager.create(create_opts("web"), None).await.is_err());
        let build = mock.last_build().unwrap();
        let images = manager.user_images(&ImageOpts::catalog("go", "")).await.unwrap();
        assert_eq!(images[0].name, build.tag);
    }

    #[tokio::test]
    async fn test_rebuild_carries_ports_and_volumes() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.add_dir("web");
        current_go_image(&mock);

        let mut old = mock_container("skeg_alice_web", "skeg-alice-20160101000000", false);
        old.labels = HashMap::from([
            (labels::BASE.to_string(), "go".to_string()),
            (labels::BASE_IMAGE.to_string(), "skegio/go:1.6".to_string()),
            (labels::TIMEZONE.to_string(), "Asia/Tokyo".to_string()),
            (labels::HOME_VOLUME.to_string(), "false".to_string()),
        ]);
        for (container_port, host_port) in [(22, 32768), (3000, 32999), (8080, 40050)] {
            old.ports.push(PortInfo {
                container_port,
                host_port: Some(host_port),
                protocol: "tcp".to_string(),
                host_ip: Some("0.0.0.0".to_string()),
            });
        }
        mock.add_container(old);
        mock.add_mount(
            "skeg_alice_web",
            MountInfo {
                mount_type: "bind".to_string(),
                name: None,
                source: "/home/alice/skegs/web".to_string(),
                destination: "/home/alice".to_string(),
                read_only: false,
            },
        );
        mock.add_mount(
            "skeg_alice_web",
            MountInfo {
                mount_type: "volume".to_string(),
                name: Some("gocache".to_string()),
                source: "/var/lib/docker/volumes/gocache/_data".to_string(),
                destination: "/cache".to_string(),
                read_only: false,
            },
        );
        let manager = test_manager(&mock, &store);

        let opts = CreateOpts {
            name: "web".to_string(),
            build: manager.build_opts(ImageOpts::default(), "", false),
            ..Default::default()
        };
        let env = manager.rebuild(opts, None).await.unwrap();
        assert!(env.is_running());

        // the stopped container is removed without a stop call
        assert!(!mock.was_called(&MockCall::Stop { name: "skeg_alice_web".into() }));
        assert!(mock.was_called(&MockCall::Remove { name: "skeg_alice_web".into() }));

        let config = mock.last_create().unwrap();
        let ports: Vec<(u16, Option<u16>)> = config
            .ports
            .iter()
            .map(|p| (p.container_port, p.host_port))
            .collect();
        // both host ports are above 30000, so both go back to auto-assign
        assert_eq!(ports, vec![(3000, Some(0)), (8080, Some(0)), (22, Some(0))]);
        assert_eq!(
            config.binds,
            vec!["/home/alice/skegs/web:/home/alice".to_string(), "gocache:/cache".to_string()]
        );
        assert_eq!(config.labels[labels::BASE], "go");
        assert_eq!(config.labels[labels::TIMEZONE], "Asia/Tokyo");
    }

    #[tokio::test]
    async fn test_rebuild_running_container_stops_first() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.add_dir("web");
        current_go_image(&mock);
        let mut old = mock_container("skeg_alice_web", "img", true);
        old.labels.insert(labels::BASE.to_string(), "go".to_string());
        mock.add_container(old);
        let manager = test_manager(&mock, &store);

        let opts = CreateOpts {
            name: "web".to_string(),
            build: manager.build_opts(ImageOpts::default(), "", false),
            ..Default::default()
        };
        manager.rebuild(opts, None).await.unwrap();

        let calls = mock.get_calls();
        let stop = calls
            .iter()
            .position(|c| *c == MockCall::Stop { name: "skeg_alice_web".into() })
            .unwrap();
        let remove = calls
            .iter()
            .position(|c| *c == MockCall::Remove { name: "skeg_alice_web".into() })
            .unwrap();
        assert!(stop < remove);
    }

    #[tokio::test]
    async fn test_rebuild_without_container() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.add_dir("web");
        let manager = test_manager(&mock, &store);

        assert!(matches!(
            manager.rebuild(create_opts("web"), None).await,
            Err(CoreError::NoContainer(_))
        ));
    }

    #[tokio::test]
    async fn test_rebuild_with_unlabelled_container_needs_selector() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.add_dir("web");
        mock.add_container(mock_container("skeg_alice_web", "img", false));
        let manager = test_manager(&mock, &store);

        let opts = CreateOpts {
            name: "web".to_string(),
            build: manager.build_opts(ImageOpts::default(), "", false),
            ..Default::default()
        };
        assert!(matches!(
            manager.rebuild(opts, None).await,
            Err(CoreError::ImageNotFound(_))
        ));
        // nothing was removed
        assert!(mock.container("skeg_alice_web").is_some());
    }

    fn labelled_go_container(mock: &MockProvider, running: bool) {
        let mut old = mock_container("skeg_alice_web", "skeg-alice-20160101000000", running);
        old.labels = HashMap::from([
            (labels::BASE.to_string(), "go".to_string()),
            (labels::BASE_IMAGE.to_string(), "skegio/go:1.6".to_string()),
        ]);
        mock.add_container(old);
    }

    #[tokio::test]
    async fn test_rebuild_rejects_reserved_port_before_removing() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.add_dir("web");
        labelled_go_container(&mock, true);
        let manager = test_manager(&mock, &store);

        let opts = CreateOpts {
            name: "web".to_string(),
            ports: vec!["22".to_string()],
            build: manager.build_opts(ImageOpts::default(), "", false),
            ..Default::default()
        };
        assert!(matches!(
            manager.rebuild(opts, None).await,
            Err(CoreError::ReservedPort(_))
        ));

        let container = mock.container("skeg_alice_web").unwrap();
        assert!(container.status.starts_with("Up"));
        assert!(!mock.was_called(&MockCall::Stop { name: "skeg_alice_web".into() }));
        assert!(!mock.was_called(&MockCall::Remove { name: "skeg_alice_web".into() }));
    }

    #[tokio::test]
    async fn test_rebuild_rejects_unknown_type_before_removing() {
        let mock = MockProvider::new();
        let store = MockStore::new("alice");
        store.add_dir("web");
        labelled_go_container(&mock, false);
        let manager = test_manager(&mock, &store);

        let opts = CreateOpts {
            name: "web".to_string(),
            build: manager.build_opts(ImageOpts::catalog("cobol", ""), "", false),
            ..Default::default()
        };
        assert!(matches!(
            manager.rebuild(opts, None).await,
            Err(CoreError::ImageNotFound(_))
        ));
        assert!(mock.container("skeg_alice_web").is_some());
    }
}
