//! CLI command implementations

mod lifecycle;
mod manage;

use anyhow::Result;
use clap::Args;
use skeg_core::{CreateOpts, EnvironmentManager, ImageOpts};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use lifecycle::*;
pub use manage::*;

/// Base image selection flags
#[derive(Args, Debug, Clone, Default)]
pub struct ImageArgs {
    /// Type of environment (see `skeg images`)
    #[arg(short = 't', long = "type")]
    pub kind: Option<String>,
    /// Version of the type, defaults to the preferred one
    #[arg(long = "type-version", requires = "kind")]
    pub version: Option<String>,
    /// Arbitrary base image instead of a type
    #[arg(short = 'i', long)]
    pub image: Option<String>,
}

impl ImageArgs {
    pub fn to_image_opts(&self) -> ImageOpts {
        match (&self.kind, &self.image) {
            (Some(kind), _) => ImageOpts::catalog(kind.clone(), self.version.clone().unwrap_or_default()),
            (None, Some(image)) => ImageOpts::literal(image.clone()),
            (None, None) => ImageOpts::default(),
        }
    }
}

/// Flags shared by image builds
#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    #[command(flatten)]
    pub image: ImageArgs,
    /// Timezone inside the image, detected from the host by default
    #[arg(long = "tz")]
    pub timezone: Option<String>,
    /// Pull the base image even if it is present
    #[arg(long)]
    pub force_pull: bool,
}

/// Flags shared by create, run and rebuild
#[derive(Args, Debug, Clone, Default)]
pub struct CreateArgs {
    /// Name of the environment
    pub name: String,
    #[command(flatten)]
    pub build: BuildArgs,
    /// Directory to mount inside (defaults to the current directory)
    #[arg(short = 'd', long)]
    pub directory: Option<PathBuf>,
    /// Ports to expose (similar to docker -p)
    #[arg(short = 'p', long = "port")]
    pub ports: Vec<String>,
    /// Volumes to mount (similar to docker -v)
    #[arg(long = "volume")]
    pub volumes: Vec<String>,
    /// Build a new user image even if a current one exists
    #[arg(long)]
    pub force_build: bool,
    /// Keep the home directory in a named volume instead of the local directory
    #[arg(long)]
    pub home_volume: bool,
}

impl CreateArgs {
    /// Creation options for `manager`'s user, mounting `project_dir` when set
    pub fn to_create_opts(&self, manager: &EnvironmentManager, project_dir: Option<&Path>) -> CreateOpts {
        CreateOpts {
            name: self.name.clone(),
            project_dir: project_dir.map(Path::to_path_buf),
            ports: self.ports.clone(),
            volumes: self.volumes.clone(),
            carried_ports: Vec::new(),
            carried_volumes: Vec::new(),
            // a forced pull is pointless without a fresh build on top of it
            force_build: self.force_build || self.build.force_pull,
            home_volume: self.home_volume.then_some(true),
            build: manager.build_opts(
                self.build.image.to_image_opts(),
                self.build.timezone.as_deref().unwrap_or_default(),
                self.build.force_pull,
            ),
        }
    }

    /// The project directory to mount: the flag, else the working directory
    pub fn project_dir(&self) -> Result<PathBuf> {
        let cwd = std::env::current_dir()?;
        Ok(match &self.directory {
            Some(dir) => cwd.join(dir),
            None => cwd,
        })
    }
}

/// Print progress messages from pulls and builds until every sender is gone
pub fn spawn_progress_printer() -> (mpsc::UnboundedSender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let msg = msg.trim_end();
            if !msg.is_empty() {
                println!("{}", msg);
            }
        }
    });
    (tx, printer)
}
