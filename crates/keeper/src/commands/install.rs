use keeper_core::{Engine, InstanceRuntime, InstanceState, InstanceStore};
use log::warn;

use super::Context;
use crate::error::AppError;
use crate::progress::ProgressRenderer;

pub async fn check(ctx: &mut Context) -> Result<(), AppError> {
    let engine = ctx.engine()?;
    let release = engine.refresh_latest().await?;

    println!(
        "Latest release: {} ({}){}",
        release.name.as_deref().unwrap_or(&release.tag_name),
        release.tag_name,
        release
            .published_at
            .map(|published| format!(", published {}", published.format("%Y-%m-%d")))
            .unwrap_or_default()
    );
    if let Some(url) = &release.html_url {
        println!("  {url}");
    }

    let ids: Vec<_> = ctx.store.instances().iter().map(|record| record.id).collect();
    for id in ids {
        let runtime = refresh_and_persist(ctx, &engine, &id.to_string()).await?;
        print_state(&engine, &runtime);
    }
    Ok(())
}

pub async fn status(ctx: &mut Context, query: Option<&str>) -> Result<(), AppError> {
    let engine = ctx.engine()?;
    if let Err(error) = engine.refresh_latest().await {
        warn!("Could not reach the release feed: {error}");
        println!("Latest release unknown: {error}");
    }

    let queries: Vec<String> = match query {
        Some(query) => vec![ctx.find(query)?.id.to_string()],
        None => ctx
            .store
            .instances()
            .iter()
            .map(|record| record.id.to_string())
            .collect(),
    };

    for query in queries {
        let runtime = refresh_and_persist(ctx, &engine, &query).await?;
        print_state(&engine, &runtime);
        let commands: Vec<String> = engine
            .state(&runtime)
            .allowed_commands()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("    commands: {}", commands.join(", "));
    }
    Ok(())
}

pub async fn download(ctx: &mut Context, query: &str) -> Result<(), AppError> {
    run_install(ctx, query, false).await
}

pub async fn update(ctx: &mut Context, query: &str) -> Result<(), AppError> {
    run_install(ctx, query, true).await
}

async fn run_install(ctx: &mut Context, query: &str, update: bool) -> Result<(), AppError> {
    let engine = ctx.engine()?;
    let mut runtime = refresh_and_persist(ctx, &engine, query).await?;

    let (progress, renderer) = ProgressRenderer::spawn(runtime.record.name.clone());
    let result = if update {
        engine.update(&mut runtime, &progress).await
    } else {
        engine.download(&mut runtime, &progress).await
    };
    drop(progress);
    renderer.finish().await;

    ctx.persist(&runtime.record)?;
    let version = result?;
    println!(
        "{} installed {}",
        runtime.record.name,
        version.as_deref().unwrap_or("(version unknown)")
    );
    print_state(&engine, &runtime);
    Ok(())
}

pub async fn rollback(ctx: &mut Context, query: &str) -> Result<(), AppError> {
    let engine = ctx.engine()?;
    let mut runtime = refresh_and_persist(ctx, &engine, query).await?;

    let result = engine.rollback(&mut runtime).await;
    ctx.persist(&runtime.record)?;
    let version = result?;
    println!(
        "{} rolled back to {}",
        runtime.record.name,
        version.as_deref().unwrap_or("(version unknown)")
    );
    Ok(())
}

/// Refresh the recorded version from the executable on disk.
async fn refresh_and_persist(
    ctx: &mut Context,
    engine: &Engine,
    query: &str,
) -> Result<InstanceRuntime, AppError> {
    let mut runtime = ctx.runtime(query)?;
    let before = runtime.record.version.clone();
    engine.refresh_local_version(&mut runtime).await;
    if runtime.record.version != before {
        ctx.persist(&runtime.record)?;
    }
    Ok(runtime)
}

fn print_state(engine: &Engine, runtime: &InstanceRuntime) {
    let state = engine.state(runtime);
    let latest = engine.releases().latest_version();
    let detail = match state {
        InstanceState::Updatable => format!(
            " ({} -> {})",
            runtime.record.version.as_deref().unwrap_or("?"),
            latest.as_deref().unwrap_or("?")
        ),
        InstanceState::Runnable | InstanceState::Running => format!(
            " ({})",
            runtime.record.version.as_deref().unwrap_or("?")
        ),
        InstanceState::Downloadable => String::new(),
    };
    println!("  {:<20} {state}{detail}", runtime.record.name);
}
