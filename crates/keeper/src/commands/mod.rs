//! Command handlers. Each loads what it needs from [`Context`] and writes
//! changed records back through the store.

mod install;
mod instances;
mod maintenance;
mod run;

use std::time::Duration;

use keeper_core::{
    Engine, EngineConfig, FeedConfig, InstanceRecord, InstanceRuntime, InstanceStore,
};
use keeper_platform::{AppPaths, Platform};

use crate::cli::Commands;
use crate::error::AppError;
use crate::settings::AppSettings;
use crate::store::JsonInstanceStore;

pub struct Context {
    pub paths: AppPaths,
    pub settings: AppSettings,
    pub store: JsonInstanceStore,
}

impl Context {
    pub fn new(paths: AppPaths, settings: AppSettings) -> Result<Self, AppError> {
        let store = JsonInstanceStore::open(paths.instances_file())?;
        Ok(Self {
            paths,
            settings,
            store,
        })
    }

    pub fn engine(&self) -> Result<Engine, AppError> {
        let platform = Platform::current().ok_or(AppError::UnsupportedPlatform)?;
        let engine = Engine::new(
            http_client(&self.settings),
            EngineConfig {
                feed: FeedConfig {
                    url: self.settings.feed_url.clone(),
                    product: self.settings.product.clone(),
                },
                platform,
                executable_name: self.settings.executable_name.clone(),
                scratch_root: self.paths.scratch_dir(),
                locks_dir: self.paths.locks_dir(),
                tools_dir: Some(self.paths.tools_dir()),
            },
        );
        let _ = engine.sweep_scratch();
        Ok(engine)
    }

    pub fn find(&self, query: &str) -> Result<InstanceRecord, AppError> {
        self.store
            .find(query)
            .cloned()
            .ok_or_else(|| AppError::UnknownInstance(query.to_string()))
    }

    pub fn runtime(&self, query: &str) -> Result<InstanceRuntime, AppError> {
        self.find(query).map(InstanceRuntime::new)
    }

    /// Write a changed record back and save the store.
    pub fn persist(&mut self, record: &InstanceRecord) -> Result<(), AppError> {
        self.store.update_instance(record)?;
        self.store.save()?;
        Ok(())
    }
}

fn http_client(settings: &AppSettings) -> reqwest::Client {
    let timeout = Duration::from_secs(settings.http_timeout_secs);
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .user_agent(format!("keeper/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

pub async fn execute(command: Commands, ctx: &mut Context) -> Result<(), AppError> {
    match command {
        Commands::List => {
            instances::list(ctx);
            Ok(())
        }
        Commands::Add {
            name,
            path,
            auto_start,
            icon,
        } => instances::add(ctx, name, path, auto_start, icon).await,
        Commands::Remove {
            instance,
            delete_files,
        } => instances::remove(ctx, &instance, delete_files),
        Commands::Move { instance, path } => instances::relocate(ctx, &instance, path).await,
        Commands::Open { instance } => instances::open(ctx, &instance),
        Commands::Check => install::check(ctx).await,
        Commands::Status { instance } => install::status(ctx, instance.as_deref()).await,
        Commands::Download { instance } => install::download(ctx, &instance).await,
        Commands::Update { instance } => install::update(ctx, &instance).await,
        Commands::Rollback { instance } => install::rollback(ctx, &instance).await,
        Commands::Start { instance } => run::start(ctx, instance.as_deref()).await,
        Commands::Migrate { instance } => maintenance::migrate(ctx, instance.as_deref()),
        Commands::Deps { install } => maintenance::deps(ctx, install).await,
    }
}
