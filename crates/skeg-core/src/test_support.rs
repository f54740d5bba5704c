//! Test support utilities for skeg-core
//!
//! Provides in-memory doubles for the container runtime and the local
//! environment store so the engine can be exercised without Docker, a home
//! directory or a network.

use crate::keys::SshKeyPair;
use crate::naming::labels;
use crate::store::EnvironmentStore;
use crate::CoreError;
use async_trait::async_trait;
use skeg_provider::*;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    List,
    Inspect { name: String },
    ListImages { labels: Vec<String> },
    Pull { image: String },
    Build { tag: String },
    Create { name: String, image: String },
    Start { name: String },
    Stop { name: String },
    Remove { name: String },
    Commit { name: String, tag: String },
    ListVolumes,
    CreateVolume { name: String },
    RemoveVolume { name: String },
    Ping,
}

/// Operations whose failure can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    List,
    Pull,
    Build,
    Create,
    Start,
    Stop,
    Remove,
    Commit,
    RemoveVolume,
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    containers: Vec<ContainerInfo>,
    mounts: HashMap<String, Vec<MountInfo>>,
    images: Vec<ImageInfo>,
    volumes: Vec<VolumeInfo>,
    builds: Vec<BuildConfig>,
    creates: Vec<CreateContainerConfig>,
    failures: HashMap<MockOp, String>,
}

/// Stateful in-memory container runtime.
///
/// Clones share state, so a test can keep a handle after boxing one into a
/// manager.
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn record(&self, call: MockCall) {
        self.with_state(|s| s.calls.push(call));
    }

    fn check(&self, op: MockOp) -> skeg_provider::Result<()> {
        match self.with_state(|s| s.failures.get(&op).cloned()) {
            Some(msg) => Err(match op {
                MockOp::Pull => ProviderError::PullError(msg),
                MockOp::Build => ProviderError::BuildError(msg),
                _ => ProviderError::RuntimeError(msg),
            }),
            None => Ok(()),
        }
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.with_state(|s| s.calls.clone())
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.with_state(|s| s.calls.contains(call))
    }

    /// Number of recorded calls matching `pred`
    pub fn count_calls(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| pred(c)).count())
    }

    pub fn clear_calls(&self) {
        self.with_state(|s| s.calls.clear());
    }

    /// Make every later call of `op` fail with `msg`
    pub fn fail(&self, op: MockOp, msg: &str) {
        self.with_state(|s| s.failures.insert(op, msg.to_string()));
    }

    pub fn fail_pull(&self, msg: &str) {
        self.fail(MockOp::Pull, msg);
    }

    pub fn add_container(&self, container: ContainerInfo) {
        self.with_state(|s| s.containers.push(container));
    }

    pub fn add_mount(&self, container: &str, mount: MountInfo) {
        self.with_state(|s| s.mounts.entry(container.to_string()).or_default().push(mount));
    }

    pub fn add_image(&self, image: ImageInfo) {
        self.with_state(|s| s.images.push(image));
    }

    /// Add an image built by skeg for `user` from `base_image`
    pub fn add_user_image(&self, name: &str, user: &str, base_image: &str, version: &str) {
        self.add_image(ImageInfo {
            id: ImageId::new(format!("sha256:{}", name)),
            repo_tags: vec![format!("{}:latest", name)],
            labels: HashMap::from([
                (labels::USER.to_string(), user.to_string()),
                (labels::BASE_IMAGE.to_string(), base_image.to_string()),
                (labels::VERSION.to_string(), version.to_string()),
            ]),
            created: 0,
        });
    }

    pub fn add_volume(&self, name: &str) {
        self.with_state(|s| {
            s.volumes.push(VolumeInfo {
                name: name.to_string(),
                labels: HashMap::new(),
            })
        });
    }

    pub fn containers(&self) -> Vec<ContainerInfo> {
        self.with_state(|s| s.containers.clone())
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.with_state(|s| s.containers.iter().find(|c| c.name == name).cloned())
    }

    pub fn volumes(&self) -> Vec<String> {
        self.with_state(|s| s.volumes.iter().map(|v| v.name.clone()).collect())
    }

    pub fn last_build(&self) -> Option<BuildConfig> {
        self.with_state(|s| s.builds.last().cloned())
    }

    pub fn last_create(&self) -> Option<CreateContainerConfig> {
        self.with_state(|s| s.creates.last().cloned())
    }
}

/// Create a ContainerInfo with no ports or labels
pub fn mock_container(name: &str, image: &str, running: bool) -> ContainerInfo {
    ContainerInfo {
        id: ContainerId::new(format!("id_{}", name)),
        name: name.to_string(),
        image: image.to_string(),
        status: if running {
            "Up 2 hours".to_string()
        } else {
            "Exited (0) 3 days ago".to_string()
        },
        ports: Vec::new(),
        labels: HashMap::new(),
    }
}

fn labels_match(labels: &HashMap<String, String>, filters: &[String]) -> bool {
    filters.iter().all(|f| match f.split_once('=') {
        Some((k, v)) => labels.get(k).map(|l| l == v).unwrap_or(false),
        None => labels.contains_key(f.as_str()),
    })
}

#[async_trait]
impl ContainerProvider for MockProvider {
    async fn list(&self) -> skeg_provider::Result<Vec<ContainerInfo>> {
        self.record(MockCall::List);
        self.check(MockOp::List)?;
        Ok(self.containers())
    }

    async fn inspect(&self, name: &str) -> skeg_provider::Result<ContainerDetails> {
        self.record(MockCall::Inspect { name: name.into() });
        let info = self
            .container(name)
            .ok_or_else(|| ProviderError::ContainerNotFound(name.into()))?;
        let mounts = self.with_state(|s| s.mounts.get(name).cloned().unwrap_or_default());
        Ok(ContainerDetails {
            id: info.id,
            name: info.name,
            image: info.image,
            running: info.status.contains("Up"),
            labels: info.labels,
            mounts,
            ports: info.ports,
        })
    }

    async fn list_images(&self, filters: &[String]) -> skeg_provider::Result<Vec<ImageInfo>> {
        self.record(MockCall::ListImages {
            labels: filters.to_vec(),
        });
        Ok(self.with_state(|s| {
            s.images
                .iter()
                .filter(|i| labels_match(&i.labels, filters))
                .cloned()
                .collect()
        }))
    }

    async fn pull(
        &self,
        image: &str,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> skeg_provider::Result<()> {
        self.record(MockCall::Pull {
            image: image.into(),
        });
        self.check(MockOp::Pull)?;
        send_progress(progress, format!("{}: Pull complete", image));
        self.add_image(ImageInfo {
            id: ImageId::new(format!("sha256:{}", image)),
            repo_tags: vec![image.to_string()],
            labels: HashMap::new(),
            created: 0,
        });
        Ok(())
    }

    async fn build(
        &self,
        config: &BuildConfig,
        progress: Option<&mpsc::UnboundedSender<String>>,
    ) -> skeg_provider::Result<ImageId> {
        self.record(MockCall::Build {
            tag: config.tag.clone(),
        });
        self.check(MockOp::Build)?;
        send_progress(progress, "Step 1/1 : mock\n");
        let id = ImageId::new(format!("sha256:{}", config.tag));
        self.with_state(|s| {
            s.builds.push(config.clone());
            s.images.push(ImageInfo {
                id: id.clone(),
                repo_tags: vec![format!("{}:latest", config.tag)],
                labels: config.labels.clone(),
                created: 0,
            });
        });
        Ok(id)
    }

    async fn create(&self, config: &CreateContainerConfig) -> skeg_provider::Result<ContainerId> {
        self.record(MockCall::Create {
            name: config.name.clone(),
            image: config.image.clone(),
        });
        self.check(MockOp::Create)?;
        if self.container(&config.name).is_some() {
            return Err(ProviderError::RuntimeError(format!(
                "Conflict. The container name \"/{}\" is already in use",
                config.name
            )));
        }

        // fake allocations for auto-assigned ports
        let mut next_port = 32768;
        let ports = config
            .ports
            .iter()
            .map(|p| PortInfo {
                container_port: p.container_port,
                host_port: match p.host_port {
                    Some(0) | None => {
                        next_port += 1;
                        Some(next_port)
                    }
                    other => other,
                },
                protocol: p.protocol.clone(),
                host_ip: Some(p.host_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string())),
            })
            .collect();

        let id = ContainerId::new(format!("id_{}", config.name));
        let info = ContainerInfo {
            id: id.clone(),
            name: config.name.clone(),
            image: config.image.clone(),
            status: "Created".to_string(),
            ports,
            labels: config.labels.clone(),
        };
        self.with_state(|s| {
            s.creates.push(config.clone());
            s.containers.push(info);
        });
        Ok(id)
    }

    async fn start(&self, name: &str) -> skeg_provider::Result<()> {
        self.record(MockCall::Start { name: name.into() });
        self.check(MockOp::Start)?;
        self.with_state(|s| match s.containers.iter_mut().find(|c| c.name == name) {
            Some(c) => {
                c.status = "Up Less than a second".to_string();
                Ok(())
            }
            None => Err(ProviderError::ContainerNotFound(name.into())),
        })
    }

    async fn stop(&self, name: &str, _timeout: u32) -> skeg_provider::Result<()> {
        self.record(MockCall::Stop { name: name.into() });
        self.check(MockOp::Stop)?;
        self.with_state(|s| match s.containers.iter_mut().find(|c| c.name == name) {
            Some(c) => {
                c.status = "Exited (0) Less than a second ago".to_string();
                Ok(())
            }
            None => Err(ProviderError::ContainerNotFound(name.into())),
        })
    }

    async fn remove(&self, name: &str) -> skeg_provider::Result<()> {
        self.record(MockCall::Remove { name: name.into() });
        self.check(MockOp::Remove)?;
        self.with_state(|s| {
            let before = s.containers.len();
            s.containers.retain(|c| c.name != name);
            if s.containers.len() == before {
                Err(ProviderError::ContainerNotFound(name.into()))
            } else {
                s.mounts.remove(name);
                Ok(())
            }
        })
    }

    async fn commit(
        &self,
        name: &str,
        tag: &str,
        labels: &HashMap<String, String>,
    ) -> skeg_provider::Result<ImageId> {
        self.record(MockCall::Commit {
            name: name.into(),
            tag: tag.into(),
        });
        self.check(MockOp::Commit)?;
        if self.container(name).is_none() {
            return Err(ProviderError::ContainerNotFound(name.into()));
        }
        let id = ImageId::new(format!("sha256:{}", tag));
        self.add_image(ImageInfo {
            id: id.clone(),
            repo_tags: vec![format!("{}:latest", tag)],
            labels: labels.clone(),
            created: 0,
        });
        Ok(id)
    }

    async fn list_volumes(&self) -> skeg_provider::Result<Vec<VolumeInfo>> {
        self.record(MockCall::ListVolumes);
        Ok(self.with_state(|s| s.volumes.clone()))
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &[(String, String)],
    ) -> skeg_provider::Result<()> {
        self.record(MockCall::CreateVolume { name: name.into() });
        self.with_state(|s| {
            s.volumes.push(VolumeInfo {
                name: name.to_string(),
                labels: labels.iter().cloned().collect(),
            })
        });
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> skeg_provider::Result<()> {
        self.record(MockCall::RemoveVolume { name: name.into() });
        self.check(MockOp::RemoveVolume)?;
        self.with_state(|s| {
            let before = s.volumes.len();
            s.volumes.retain(|v| v.name != name);
            if s.volumes.len() == before {
                Err(ProviderError::VolumeNotFound(name.into()))
            } else {
                Ok(())
            }
        })
    }

    async fn ping(&self) -> skeg_provider::Result<()> {
        self.record(MockCall::Ping);
        Ok(())
    }
}

/// Public key handed out by [`MockStore`]
pub const MOCK_PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGZpeGVkIGtleSBmb3IgdGVzdHM= skeg key";

#[derive(Default)]
struct StoreState {
    dirs: Vec<String>,
    timezone: Option<String>,
    ssh_results: VecDeque<bool>,
    ssh_checks: Vec<(String, u16)>,
    interactive: Vec<(String, Vec<String>)>,
    exit_code: i32,
    list_error: Option<String>,
}

/// In-memory environment store.
///
/// SSH probes succeed unless results are scripted with
/// [`MockStore::script_ssh`]; once the script runs out, probes fail.
#[derive(Clone)]
pub struct MockStore {
    user: String,
    base_dir: PathBuf,
    state: Arc<Mutex<StoreState>>,
    scripted: Arc<Mutex<bool>>,
}

impl MockStore {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            base_dir: PathBuf::from(format!("/home/{}/skegs", user)),
            state: Arc::new(Mutex::new(StoreState::default())),
            scripted: Arc::new(Mutex::new(false)),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn add_dir(&self, name: &str) {
        self.with_state(|s| s.dirs.push(name.to_string()));
    }

    pub fn dirs(&self) -> Vec<String> {
        self.with_state(|s| s.dirs.clone())
    }

    pub fn set_timezone(&self, tz: Option<&str>) {
        self.with_state(|s| s.timezone = tz.map(str::to_string));
    }

    /// Results of successive ssh probes
    pub fn script_ssh(&self, results: &[bool]) {
        *self.scripted.lock().unwrap() = true;
        self.with_state(|s| s.ssh_results = results.iter().copied().collect());
    }

    pub fn ssh_checks(&self) -> Vec<(String, u16)> {
        self.with_state(|s| s.ssh_checks.clone())
    }

    pub fn interactive_calls(&self) -> Vec<(String, Vec<String>)> {
        self.with_state(|s| s.interactive.clone())
    }

    pub fn set_exit_code(&self, code: i32) {
        self.with_state(|s| s.exit_code = code);
    }

    pub fn fail_list(&self, msg: &str) {
        self.with_state(|s| s.list_error = Some(msg.to_string()));
    }

    pub fn keys(&self) -> SshKeyPair {
        SshKeyPair::in_dir(&self.base_dir, crate::naming::KEY_FILE)
    }
}

#[async_trait]
impl EnvironmentStore for MockStore {
    fn list_environment_names(&self) -> crate::Result<Vec<String>> {
        self.with_state(|s| match &s.list_error {
            Some(msg) => Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                msg.clone(),
            ))),
            None => {
                let mut dirs = s.dirs.clone();
                dirs.sort();
                Ok(dirs)
            }
        })
    }

    fn ensure_environment_dir(&self, name: &str, _key: &SshKeyPair) -> crate::Result<PathBuf> {
        self.with_state(|s| {
            if !s.dirs.iter().any(|d| d == name) {
                s.dirs.push(name.to_string());
            }
        });
        Ok(self.base_dir.join(name))
    }

    fn remove_environment_dir(&self, name: &str) -> crate::Result<()> {
        self.with_state(|s| s.dirs.retain(|d| d != name));
        Ok(())
    }

    fn ensure_ssh_keypair(&self) -> crate::Result<SshKeyPair> {
        Ok(self.keys())
    }

    fn read_public_key(&self, _key: &SshKeyPair) -> crate::Result<String> {
        Ok(MOCK_PUBLIC_KEY.to_string())
    }

    fn username(&self) -> &str {
        &self.user
    }

    fn uid(&self) -> u32 {
        1000
    }

    fn gid(&self) -> u32 {
        1000
    }

    fn detect_timezone(&self) -> Option<String> {
        self.with_state(|s| s.timezone.clone())
    }

    async fn check_ssh_port(&self, host: &str, port: u16) -> bool {
        let scripted = *self.scripted.lock().unwrap();
        self.with_state(|s| {
            s.ssh_checks.push((host.to_string(), port));
            if scripted {
                s.ssh_results.pop_front().unwrap_or(false)
            } else {
                true
            }
        })
    }

    fn run_interactive(&self, command: &str, args: &[String]) -> crate::Result<i32> {
        self.with_state(|s| {
            s.interactive.push((command.to_string(), args.to_vec()));
            Ok(s.exit_code)
        })
    }
}
