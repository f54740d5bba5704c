//! Management commands: list, inspect, images, build, freeze, ssh-config, config

use anyhow::{Context, Result};
use skeg_config::GlobalConfig;
use skeg_core::{BaseImage, BuildOpts, Environment, EnvironmentManager, ImageOpts, UserImage};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Environment table for `list`
pub fn format_environments(envs: &BTreeMap<String, Environment>) -> String {
    if envs.is_empty() {
        return "No environments found.\n\nUse 'skeg create' to make one.\n".to_string();
    }

    // Column widths
    const NAME_WIDTH: usize = 20;
    const TYPE_WIDTH: usize = 14;
    const STATE_WIDTH: usize = 14;

    let mut out = format!(
        "{:<NAME_WIDTH$} {:<TYPE_WIDTH$} {:<STATE_WIDTH$} SSH\n",
        "NAME", "TYPE", "STATE"
    );
    for env in envs.values() {
        let ssh = env
            .container
            .as_ref()
            .and_then(|c| c.ssh_port())
            .map(|p| p.host_port.to_string())
            .unwrap_or_else(|| "-".to_string());
        let kind = if env.kind.is_empty() { "-" } else { env.kind.as_str() };
        out.push_str(&format!(
            "{:<NAME_WIDTH$} {:<TYPE_WIDTH$} {:<STATE_WIDTH$} {}\n",
            env.name,
            kind,
            env.state(),
            ssh
        ));
    }
    out
}

/// Catalog listing for `images`
pub fn format_base_images(images: &[BaseImage]) -> String {
    let mut out = String::new();
    for image in images {
        out.push_str(&format!("{}: {}\n  Tags:\n", image.name, image.description));
        for tag in &image.tags {
            out.push_str(&format!(
                "    {}{}{}\n",
                tag.name,
                if tag.pulled { " (pulled)" } else { "" },
                if tag.preferred { " (preferred)" } else { "" },
            ));
        }
    }
    out
}

/// User image listing for `images --user`
pub fn format_user_images(images: &[UserImage]) -> String {
    if images.is_empty() {
        return "No user images found.\n".to_string();
    }

    let mut out = format!("{:<32} {:>4} {:>8}\n", "IMAGE", "ENVS", "VERSION");
    for image in images {
        out.push_str(&format!(
            "{:<32} {:>4} {:>8}\n",
            image.name, image.env_count, image.version
        ));
    }
    out
}

/// List environments
pub async fn list(manager: &EnvironmentManager) -> Result<()> {
    let envs = manager.environments().await?;
    print!("{}", format_environments(&envs));
    Ok(())
}

/// Print one environment as JSON
pub async fn inspect(manager: &EnvironmentManager, name: &str) -> Result<()> {
    let env = manager.environment(name).await?;
    println!("{}", serde_json::to_string_pretty(&env)?);
    Ok(())
}

/// List base images, or the user's built images with `user`
pub async fn images(manager: &EnvironmentManager, user: bool, selector: &ImageOpts) -> Result<()> {
    if user {
        let images = manager.user_images(selector).await?;
        print!("{}", format_user_images(&images));
    } else {
        let images = manager.base_images().await?;
        print!("{}", format_base_images(&images));
    }
    Ok(())
}

/// Build a user image without creating an environment
pub async fn build(
    manager: &EnvironmentManager,
    opts: &BuildOpts,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<()> {
    let name = manager.build_image(opts, progress).await?;
    println!("Built image {}", name);
    Ok(())
}

/// Save an environment's container as a user image
pub async fn freeze(manager: &EnvironmentManager, name: &str) -> Result<()> {
    let image = manager.freeze(name).await?;
    println!("Froze '{}' into image {}", name, image);
    Ok(())
}

/// Print an OpenSSH config stanza for an environment
pub async fn ssh_config(manager: &EnvironmentManager, name: &str) -> Result<()> {
    print!("{}", manager.ssh_config(name).await?);
    Ok(())
}

/// Show or edit global configuration
pub async fn config(edit: bool) -> Result<()> {
    let config_path = GlobalConfig::config_path()?;

    if edit {
        let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

        if !config_path.exists() {
            GlobalConfig::default().save()?;
            println!("Created default config at {:?}", config_path);
        }

        std::process::Command::new(&editor)
            .arg(&config_path)
            .status()
            .context(format!("Failed to open editor: {}", editor))?;
    } else if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("# Config file: {:?}\n", config_path);
        println!("{}", content);
    } else {
        println!("# Config file: {:?} (not created yet)\n", config_path);
        println!("# Default configuration:");
        println!("{}", toml::to_string_pretty(&GlobalConfig::default())?);
        println!("\n# Run 'skeg config --edit' to create and edit the config file.");
    }

    Ok(())
}
