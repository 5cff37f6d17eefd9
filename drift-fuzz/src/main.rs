use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use drift_fuzz::config::CONFIG_EXIT_CODE;
use drift_fuzz::display::{ChannelLogger, StatusDisplay};
use drift_fuzz::{Ansible, Cli, DockerRuntime, Execution, Orchestrator, Pyinfra, Settings, WrapperHistory};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match Settings::resolve(Cli::parse()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(CONFIG_EXIT_CODE);
        }
    };

    let logs = if settings.plain {
        simple_logger::SimpleLogger::new().with_level(settings.log_level).init()?;
        None
    } else {
        Some(ChannelLogger::install(settings.log_level)?)
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, finishing the current step");
            on_signal.cancel();
        }
    });

    let execution = match &settings.replay {
        Some(path) => {
            let history = WrapperHistory::load(path).context("failed to load replay file")?;
            log::info!("Replaying {} wrappers on {}", history.len(), history.base_image);
            Execution::from_replay(history)
        }
        None => {
            let mode = settings.mode.ok_or_else(|| anyhow!("no test mode configured"))?;
            Execution::new(
                mode,
                settings.base_image,
                settings.rounds,
                settings.wrappers_per_round,
                settings.continue_on_error,
            )
        }
    };

    let ssh_key = std::fs::canonicalize(&settings.ssh_key)
        .with_context(|| format!("ssh key {} not found", settings.ssh_key.display()))?;
    std::fs::set_permissions(&ssh_key, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to restrict permissions of {}", ssh_key.display()))?;
    let agent_binary = std::fs::canonicalize(&settings.agent_path)
        .with_context(|| format!("agent binary {} not found", settings.agent_path.display()))?;

    let runtime = DockerRuntime::connect(settings.images_dir.clone(), &ssh_key, agent_binary)
        .await
        .context("no usable container runtime")?;
    log::info!("Connected to Docker");

    let mut orchestrator = Orchestrator::new(&settings, execution, Arc::new(runtime), cancel)
        .with_executor(Arc::new(
            Ansible::new(ssh_key.clone()).with_program(settings.ansible_program.clone()),
        ))
        .with_executor(Arc::new(Pyinfra::new(ssh_key).with_program(settings.pyinfra_program.clone())));

    let display_stop = CancellationToken::new();
    let display = logs.map(|logs| {
        let display = StatusDisplay::new(orchestrator.subscribe(), logs);
        tokio::spawn(display.run(display_stop.clone()))
    });

    let summary = orchestrator.run().await;

    display_stop.cancel();
    if let Some(handle) = display {
        let _ = handle.await;
    }

    println!(
        "Finished {} round(s) with {} error(s){}",
        summary.rounds,
        summary.errors,
        if summary.cancelled { " (interrupted)" } else { "" }
    );
    for incident in &summary.incidents {
        println!("  replay with --replay {}", incident.history.display());
    }
    Ok(())
}
