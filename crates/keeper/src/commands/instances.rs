use std::path::{Path, PathBuf};

use keeper_core::swap::backup_path;
use keeper_core::{
    InstanceLock, InstanceRecord, InstanceRuntime, InstanceStore, migrate_layout, needs_migration,
};
use log::{info, warn};

use super::Context;
use crate::error::AppError;

pub fn list(ctx: &Context) {
    let instances = ctx.store.instances();
    if instances.is_empty() {
        println!(
            "No instances in {}. Add one with `keeper add <name>`.",
            ctx.store.path().display()
        );
        return;
    }

    for record in instances {
        let id = record.id.to_string();
        println!(
            "{:<20} {:<10} {:<8} {}{}",
            record.name,
            record.version.as_deref().unwrap_or("-"),
            &id[..8],
            record.path.display(),
            if record.auto_start { "  (auto-start)" } else { "" }
        );
    }
}

pub async fn add(
    ctx: &mut Context,
    name: String,
    path: Option<PathBuf>,
    auto_start: bool,
    icon: Option<String>,
) -> Result<(), AppError> {
    if ctx
        .store
        .instances()
        .iter()
        .any(|record| record.name.eq_ignore_ascii_case(&name))
    {
        return Err(AppError::DuplicateName(name));
    }

    let path = path.unwrap_or_else(|| ctx.settings.instances_dir(&ctx.paths).join(&name));
    let mut record = InstanceRecord::new(name, path);
    record.auto_start = auto_start;
    record.icon = icon;

    if needs_migration(&record.path) {
        let report = migrate_layout(&record.path)?;
        info!("Migrated legacy layout of {}: {report:?}", record.path.display());
        println!("Converted the old folder layout in {}", record.path.display());
    }

    match ctx.engine() {
        Ok(engine) => {
            let mut runtime = InstanceRuntime::new(record);
            engine.refresh_local_version(&mut runtime).await;
            record = runtime.record;
        }
        Err(error) => warn!("Skipping version check: {error}"),
    }

    println!(
        "Added {} ({}) at {}{}",
        record.name,
        record.id,
        record.path.display(),
        record
            .version
            .as_deref()
            .map(|version| format!(", found version {version}"))
            .unwrap_or_default()
    );
    ctx.store.add_instance(record)?;
    ctx.store.save()?;
    Ok(())
}

/// Take the instance's lock for the rest of the command, refusing when
/// another keeper process is running or installing it.
fn claim(locks_dir: &Path, record: &InstanceRecord) -> Result<InstanceLock, AppError> {
    InstanceLock::try_acquire(locks_dir, record.id)?
        .ok_or_else(|| AppError::InUse(record.name.clone()))
}

pub fn remove(ctx: &mut Context, query: &str, delete_files: bool) -> Result<(), AppError> {
    let record = ctx.find(query)?;
    let locks_dir = ctx.paths.locks_dir();
    let lock = claim(&locks_dir, &record)?;
    ctx.store.remove_instance(record.id)?;
    ctx.store.save()?;

    if delete_files {
        let backup = backup_path(&record.path);
        for dir in std::iter::once(record.path.clone()).chain(backup) {
            if dir.exists() {
                std::fs::remove_dir_all(&dir)
                    .map_err(|error| AppError::io("failed to delete instance files", error))?;
                info!("Deleted {}", dir.display());
            }
        }
    }

    drop(lock);
    let _ = std::fs::remove_file(InstanceLock::lock_path(&locks_dir, record.id));
    println!("Removed {}", record.name);
    Ok(())
}

/// Move an instance's folder and remember the new location.
pub async fn relocate(ctx: &mut Context, query: &str, path: PathBuf) -> Result<(), AppError> {
    let engine = ctx.engine()?;
    let mut runtime = ctx.runtime(query)?;
    let from = runtime.record.path.clone();

    let moved = engine.relocate(&mut runtime, &path).await?;
    ctx.persist(&runtime.record)?;
    println!(
        "Moved {} from {} to {}",
        runtime.record.name,
        from.display(),
        moved.display()
    );
    Ok(())
}

pub fn open(ctx: &Context, query: &str) -> Result<(), AppError> {
    let record = ctx.find(query)?;
    if !record.path.exists() {
        return Err(AppError::message(format!(
            "{} does not exist yet; download the instance first",
            record.path.display()
        )));
    }
    open::that(&record.path).map_err(|error| AppError::io("failed to open folder", error))
}
