//! Supervisor (C5): validates configuration, spawns the server process and
//! every configured worker as a child OS process, and enforces fail-stop -
//! any unexpected child exit tears down the rest.

use crate::errors::SupervisorError;
use crate::helpers::load_config::Config;
use crate::supervisor::validate;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;
use tracing::instrument;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

struct Supervised {
    role: String,
    child: Child,
}

/// Runs the supervisor to completion: spawns the server and worker children,
/// then blocks until one of them exits or the process receives SIGINT/SIGTERM.
#[instrument(name = "supervisor::run", target = "supervisor::supervisor", skip_all)]
pub fn run(config_path: PathBuf) -> Result<(), SupervisorError> {
    let config = Config::load(&config_path)?;
    validate::validate_addresses(&config)?;
    tracing::info!(
        configuration_file_path = %config_path.display(),
        topics = config.embedder_model_configs.len(),
        "Supervisor validated configuration"
    );

    let exe = std::env::current_exe().map_err(|e| SupervisorError::Spawn {
        role: "self".to_string(),
        source: e,
    })?;

    let shutdown = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let _ = signal_hook::flag::register(sig, std::sync::Arc::clone(&shutdown));
    }

    let mut children = Vec::new();

    let server_child = Command::new(&exe)
        .arg("serve")
        .arg("--config")
        .arg(&config_path)
        .spawn()
        .map_err(|e| SupervisorError::Spawn {
            role: "server".to_string(),
            source: e,
        })?;
    tracing::info!(pid = server_child.id(), "Spawned server process");
    children.push(Supervised {
        role: "server".to_string(),
        child: server_child,
    });

    for topic in &config.embedder_model_configs {
        for instance in 0..topic.nb_instances {
            let worker_child = Command::new(&exe)
                .arg("work")
                .arg("--config")
                .arg(&config_path)
                .arg("--topic")
                .arg(&topic.target_topic)
                .spawn()
                .map_err(|e| SupervisorError::Spawn {
                    role: format!("worker[{}/{}]", topic.target_topic, instance),
                    source: e,
                })?;
            tracing::info!(
                pid = worker_child.id(),
                topic = %topic.target_topic,
                instance,
                "Spawned worker process"
            );
            children.push(Supervised {
                role: format!("worker[{}/{}]", topic.target_topic, instance),
                child: worker_child,
            });
        }
    }

    loop {
        if shutdown.load(std::sync::atomic::Ordering::Relaxed) {
            tracing::info!("Supervisor received shutdown signal, terminating children");
            break;
        }

        for supervised in &mut children {
            if let Some(status) = supervised.child.try_wait().unwrap_or(None) {
                tracing::error!(
                    role = %supervised.role,
                    pid = supervised.child.id(),
                    status = %status,
                    "Child process exited unexpectedly, entering fail-stop shutdown"
                );
                shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    terminate_all(&mut children);
    Ok(())
}

fn terminate_all(children: &mut [Supervised]) {
    for supervised in children.iter_mut() {
        tracing::debug!(role = %supervised.role, pid = supervised.child.id(), "Sending SIGTERM");
        send_sigterm(supervised.child.id());
    }

    let deadline = std::time::Instant::now() + KILL_GRACE_PERIOD;
    for supervised in children.iter_mut() {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match wait_with_timeout(&mut supervised.child, remaining) {
            Some(status) => {
                tracing::debug!(role = %supervised.role, status = %status, "Child process exited");
            }
            None => {
                tracing::warn!(role = %supervised.role, "Child process did not exit within grace period, killing");
                let _ = supervised.child.kill();
                let _ = supervised.child.wait();
            }
        }
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        if std::time::Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Sends SIGTERM to `pid` by shelling out to the `kill` utility, avoiding
/// unsafe FFI for a single syscall (the workspace denies `unsafe_code`).
/// `Child::kill` only offers SIGKILL, which would skip the grace period.
fn send_sigterm(pid: u32) {
    let _ = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .status();
}
