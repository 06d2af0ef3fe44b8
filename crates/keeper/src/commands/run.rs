use std::time::Duration;

use futures_util::future::join_all;
use keeper_core::{InstanceRuntime, InstanceStore, RunSlot};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use super::Context;
use crate::error::AppError;

const REPORT_GRACE: Duration = Duration::from_secs(2);

/// Start one instance, or every auto-start instance, and stay attached until
/// they all exit. Ctrl-C stops whatever is still running.
pub async fn start(ctx: &mut Context, query: Option<&str>) -> Result<(), AppError> {
    let engine = ctx.engine()?;

    let records = match query {
        Some(query) => vec![ctx.find(query)?],
        None => {
            let selected: Vec<_> = ctx
                .store
                .instances()
                .iter()
                .filter(|record| record.auto_start)
                .cloned()
                .collect();
            if selected.is_empty() {
                return Err(AppError::message(
                    "no auto-start instances; name one or add one with --auto-start",
                ));
            }
            selected
        }
    };

    let mut exits = engine.subscribe_exits();
    let mut runtimes = Vec::with_capacity(records.len());
    for record in records {
        let mut runtime = InstanceRuntime::new(record);
        engine.refresh_local_version(&mut runtime).await;
        match engine.start(&runtime) {
            Ok(()) => {
                println!(
                    "Started {} (pid {})",
                    runtime.record.name,
                    runtime
                        .slot()
                        .pid()
                        .map_or_else(|| "?".to_string(), |pid| pid.to_string())
                );
                runtimes.push(runtime);
            }
            // A single named instance fails loudly; a batch keeps going.
            Err(error) if query.is_some() => return Err(error.into()),
            Err(error) => {
                warn!("Could not start {}: {error}", runtime.record.name);
                println!("Skipped {}: {error}", runtime.record.name);
            }
        }
    }

    if runtimes.is_empty() {
        return Err(AppError::message("nothing was started"));
    }

    let mut names: Vec<_> = runtimes
        .iter()
        .map(|runtime| (runtime.record.id, runtime.record.name.clone()))
        .collect();
    let reporter = tokio::spawn(async move {
        while !names.is_empty() {
            let exit = match exits.recv().await {
                Ok(exit) => exit,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            let Some(index) = names.iter().position(|(id, _)| *id == exit.instance_id) else {
                continue;
            };
            let (_, name) = names.swap_remove(index);
            match (exit.requested, exit.exit_code) {
                (true, _) => println!("{name} stopped"),
                (false, Some(code)) => println!("{name} exited with code {code}"),
                (false, None) => println!("{name} exited"),
            }
        }
    });

    let slots: Vec<_> = runtimes.iter().map(|runtime| runtime.slot().clone()).collect();
    tokio::select! {
        _ = join_all(slots.iter().map(RunSlot::wait)) => {
            info!("All started instances have exited");
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(error) = signal {
                warn!("Failed to listen for Ctrl-C: {error}");
            }
            println!("Stopping...");
            for runtime in &mut runtimes {
                if runtime.is_running()
                    && let Err(error) = engine.stop(runtime).await
                {
                    warn!("Failed to stop {}: {error}", runtime.record.name);
                }
            }
        }
    }

    if tokio::time::timeout(REPORT_GRACE, reporter).await.is_err() {
        warn!("Some instances did not report their exit");
    }

    for runtime in &mut runtimes {
        engine.refresh_local_version(runtime).await;
        ctx.persist(&runtime.record)?;
    }
    Ok(())
}
