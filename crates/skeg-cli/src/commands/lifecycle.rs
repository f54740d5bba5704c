//! Lifecycle commands: create, run, rebuild, start, stop, destroy, connect

use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm};
use skeg_core::{CreateOpts, EnvironmentManager};
use tokio::sync::mpsc;

/// Create an environment
pub async fn create(
    manager: &EnvironmentManager,
    opts: CreateOpts,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<()> {
    let name = opts.name.clone();
    let env = manager.create(opts, progress).await?;
    let container = env.container.as_ref().map(|c| c.name.as_str()).unwrap_or_default();
    println!("Created environment '{}' ({})", name, container);
    Ok(())
}

/// Create an environment and connect to it, destroying it afterwards when
/// `remove` is set. Returns the ssh exit code.
pub async fn run(
    manager: &EnvironmentManager,
    opts: CreateOpts,
    extra: &[String],
    remove: bool,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<i32> {
    let name = opts.name.clone();
    manager.create(opts, progress).await?;

    let code = match manager.connect(&name, extra).await {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!("error when running shell: {}", e);
            0
        }
    };

    if remove {
        manager.destroy(&name).await?;
        println!("Destroyed environment '{}'", name);
    }
    Ok(code)
}

/// Re-create an environment's container
pub async fn rebuild(
    manager: &EnvironmentManager,
    opts: CreateOpts,
    progress: Option<&mpsc::UnboundedSender<String>>,
) -> Result<()> {
    let name = opts.name.clone();
    manager.rebuild(opts, progress).await?;
    println!("Rebuilt environment '{}'", name);
    Ok(())
}

/// Start an environment
pub async fn start(manager: &EnvironmentManager, name: &str) -> Result<()> {
    let before = manager.environment(name).await?;
    if before.is_running() {
        println!("'{}' is already running", name);
        return Ok(());
    }
    if before.container.is_none() {
        anyhow::bail!("Environment '{}' has no container, run 'skeg rebuild' or 'skeg create'", name);
    }

    manager.ensure_running(name).await?;
    println!("Started '{}'", name);
    Ok(())
}

/// Stop an environment
pub async fn stop(manager: &EnvironmentManager, name: &str) -> Result<()> {
    let before = manager.environment(name).await?;
    if !before.is_running() {
        println!("'{}' is not running", name);
        return Ok(());
    }

    manager.ensure_stopped(name).await?;
    println!("Stopped '{}'", name);
    Ok(())
}

/// Destroy an environment, asking first on a terminal unless `yes`
pub async fn destroy(manager: &EnvironmentManager, name: &str, yes: bool) -> Result<()> {
    if !yes && std::io::IsTerminal::is_terminal(&std::io::stdin()) {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "Destroy environment '{}'? Its container and directory are removed",
                name
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled");
            return Ok(());
        }
    }

    manager.destroy(name).await?;
    println!("Destroyed environment '{}'", name);
    Ok(())
}

/// Connect to an environment over ssh, returning the client's exit code
pub async fn connect(manager: &EnvironmentManager, name: &str, extra: &[String]) -> Result<i32> {
    Ok(manager.connect(name, extra).await?)
}
