use keeper_core::{DepState, DependencyTracker, InstanceStore, RuntimeDependency, migrate_all};
use log::warn;

use super::Context;
use crate::error::AppError;
use crate::progress::ProgressRenderer;

pub fn migrate(ctx: &Context, query: Option<&str>) -> Result<(), AppError> {
    let roots = match query {
        Some(query) => vec![ctx.find(query)?.path],
        None => ctx
            .store
            .instances()
            .iter()
            .map(|record| record.path.clone())
            .collect(),
    };

    let outcomes = migrate_all(&roots);
    if outcomes.is_empty() {
        println!("Nothing to migrate.");
        return Ok(());
    }

    let mut failed = 0;
    for outcome in outcomes {
        match outcome.result {
            Ok(report) => {
                println!("Migrated {}", outcome.root.display());
                if let Some(backup) = report.creds_backup {
                    println!("  existing credentials kept at {}", backup.display());
                }
                if report.shortcuts_removed > 0 {
                    println!("  removed {} old shortcut(s)", report.shortcuts_removed);
                }
            }
            Err(error) => {
                failed += 1;
                println!("Failed {}: {error}", outcome.root.display());
            }
        }
    }

    if failed > 0 {
        return Err(AppError::message(format!(
            "{failed} instance(s) could not be migrated"
        )));
    }
    Ok(())
}

/// Report ffmpeg and yt-dlp, optionally installing the missing ones into
/// keeper's tools folder. Managed programs find them there on `PATH`.
pub async fn deps(ctx: &Context, install: bool) -> Result<(), AppError> {
    let tools_dir = ctx.paths.tools_dir();
    let trackers = [
        DependencyTracker::new(RuntimeDependency::ffmpeg().with_tools_dir(&tools_dir)),
        DependencyTracker::new(RuntimeDependency::yt_dlp().with_tools_dir(&tools_dir)),
    ];

    let mut missing = Vec::new();
    for tracker in &trackers {
        let state = tracker.refresh().await;
        println!("{:<10} {state}", tracker.dependency().name);
        if state == DepState::NotInstalled {
            missing.push(tracker);
        }
    }

    if !install || missing.is_empty() {
        return Ok(());
    }

    let client = super::http_client(&ctx.settings);
    let mut failed = 0;
    for tracker in missing {
        let name = tracker.dependency().name.clone();
        if tracker.dependency().source.is_none() {
            println!("{name}: install it with your system package manager");
            continue;
        }

        let (progress, renderer) = ProgressRenderer::spawn(name.clone());
        let result = tracker.install(&client, &progress).await;
        drop(progress);
        renderer.finish().await;

        match result {
            Ok(state) => println!("{name:<10} {state}"),
            Err(error) => {
                warn!("Installing {name} failed: {error}");
                println!("{name}: {error}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(AppError::message(format!(
            "{failed} dependency install(s) failed"
        )));
    }
    Ok(())
}
