//! `launch`: start a tool and track its session until the process exits.
//!
//! The launched process is watched by the same [`ProcessMonitor`] loop a
//! long-running host would use. On interrupt the session is flushed with
//! `stop_all_tracking` before returning, so no runtime is lost.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use toolshed_core::{ClosedSession, ProcessHandle, ProcessProbe, SystemClock, ToolName};
use toolshed_engine::{spawn_monitor_task, spawn_tracker, ProcessMonitor, SysinfoProbe, TrackerEvent};

use crate::format::format_runtime;
use crate::shed::Shed;

/// How long a wrapper gets to start the real process before we look for it.
const ATTACH_DELAY: Duration = Duration::from_secs(2);

/// How recently the real process must have started to be picked.
const ATTACH_WINDOW: Duration = Duration::from_secs(30);

pub struct LaunchOptions {
    pub tool: ToolName,
    /// Program and arguments
    pub command: Vec<String>,
    /// Track the newest process whose name contains this, instead of the
    /// launched one (for wrapper scripts)
    pub attach: Option<String>,
}

pub async fn launch(shed: &Shed, options: LaunchOptions, cancel: CancellationToken) -> Result<()> {
    let record = shed.tool(&options.tool)?;
    let (program, args) = options
        .command
        .split_first()
        .context("No command given to launch")?;

    let mut command = Command::new(program);
    command.args(args);
    if record.install_path.is_dir() {
        command.current_dir(&record.install_path);
    }
    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to start {program}"))?;

    let probe = Arc::new(SysinfoProbe::new());
    let handle = resolve_handle(Arc::clone(&probe), child.id(), options.attach).await;

    let tracker = spawn_tracker(shed.registry.clone(), Arc::new(SystemClock));
    let mut events = tracker.subscribe();
    let started = tracker
        .start_tracking(options.tool.clone(), handle)
        .await
        .context("Session tracker stopped unexpectedly")?;

    info!(
        tool = %options.tool,
        session_id = %started.session_id,
        pid = ?handle.map(|h| h.pid),
        "Tracking started"
    );
    if handle.is_none() {
        warn!(
            tool = %options.tool,
            "No process handle, exit detection relies on process names"
        );
    }
    println!("Tracking {} ({program})", options.tool);

    let monitor = ProcessMonitor::new(probe, tracker.clone())
        .with_names(shed.config.process_name_table())
        .with_interval(shed.config.poll_interval);
    let monitor_task = spawn_monitor_task(monitor, cancel.clone());

    let mut child_running = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Interrupted, flushing open sessions");
                break;
            }

            status = child.wait(), if child_running => {
                child_running = false;
                match status {
                    Ok(status) => debug!(%status, "launched process exited"),
                    Err(e) => warn!(error = %e, "could not wait for launched process"),
                }
            }

            event = events.recv() => match event {
                Ok(TrackerEvent::SessionClosed { session })
                    if session.session_id == started.session_id =>
                {
                    report(&session);
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed tracker events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    cancel.cancel();
    if let Err(e) = monitor_task.await {
        warn!(error = %e, "monitor task failed");
    }

    let flushed = tracker
        .stop_all_tracking()
        .await
        .context("Session tracker stopped before flushing")?;
    for session in &flushed {
        report(session);
    }
    Ok(())
}

async fn resolve_handle(
    probe: Arc<SysinfoProbe>,
    pid: Option<u32>,
    attach: Option<String>,
) -> Option<ProcessHandle> {
    match attach {
        Some(name) => {
            tokio::time::sleep(ATTACH_DELAY).await;
            let lookup = name.clone();
            let found = tokio::task::spawn_blocking(move || {
                probe.find_recent_handle(&lookup, ATTACH_WINDOW)
            })
            .await
            .ok()
            .flatten();
            if found.is_none() {
                warn!(name = %name, "no recently started process matches");
            }
            found
        }
        None => {
            let pid = pid?;
            tokio::task::spawn_blocking(move || probe.resolve(pid))
                .await
                .ok()
        }
    }
}

fn report(session: &ClosedSession) {
    match session.total_runtime {
        Some(total) => println!(
            "{} ran for {} ({}), {} in total",
            session.tool,
            format_runtime(session.duration_secs),
            session.reason,
            format_runtime(total)
        ),
        None => eprintln!(
            "{} ran for {} but the runtime could not be saved",
            session.tool,
            format_runtime(session.duration_secs)
        ),
    }
}
