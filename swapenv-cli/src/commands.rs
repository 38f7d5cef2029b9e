//! Subcommand handlers: prompts, file discovery and printing around the core.

use crate::prompt;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use swapenv_core::config::Settings;
use swapenv_core::dotenv::{self, WORKING_ENV_FILE};
use swapenv_core::project::{self, ProjectContext, SwitchOptions};
use swapenv_core::sync::{
    self, CredentialStore, Credentials, HttpDeviceClient, LoginOutcome, SessionEvent, WsChannel,
    RECEIVE_PATH, SHARE_PATH,
};
use swapenv_core::{Environment, Registry, StoreConfig, SwapenvError};
use tracing::warn;

pub struct App {
    settings: Settings,
    store_config: StoreConfig,
    registry: Registry,
    cwd: PathBuf,
}

impl App {
    pub fn new(settings: Settings, cwd: PathBuf) -> Self {
        let store_config = settings.store_config();
        let registry = Registry::new(&store_config);
        Self {
            settings,
            store_config,
            registry,
            cwd,
        }
    }

    fn project(&self) -> Result<ProjectContext> {
        Ok(ProjectContext::require(&self.registry, &self.cwd)?)
    }

    fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(&self.store_config)
    }

    pub fn load(&self, env: &str) -> Result<()> {
        let files = dotenv::find_env_files(&self.cwd, env)
            .with_context(|| format!("Failed to scan {:?}", self.cwd))?;
        if files.is_empty() {
            bail!("No {} files found in {:?}", dotenv::env_file_name(env), self.cwd);
        }

        let mut environments = Vec::with_capacity(files.len());
        for (name, path) in &files {
            let values =
                dotenv::read_file(path).with_context(|| format!("Failed to read {:?}", path))?;
            environments.push(Environment::new(name.clone(), values));
        }

        let ctx = ProjectContext::resolve(&self.registry, &self.cwd)?;
        let outcome = project::load_environments(
            &self.registry,
            &ctx,
            environments,
            self.store_config.max_versions,
        )?;

        for (_, path) in &files {
            std::fs::remove_file(path).with_context(|| format!("Failed to remove {:?}", path))?;
        }

        println!(
            "Loaded {} into '{}' v{}",
            outcome.environments.join(", "),
            ctx.project_name,
            outcome.version
        );
        Ok(())
    }

    pub fn switch(&self, env: &str, replace: bool, skip_common: bool) -> Result<()> {
        let ctx = self.project()?;
        let working_file = self.cwd.join(WORKING_ENV_FILE);
        let working = dotenv::read_file(&working_file)
            .with_context(|| format!("Failed to read {:?}", working_file))?;

        let values = project::switch_environment(
            &self.registry,
            &ctx,
            env,
            &working,
            SwitchOptions {
                replace,
                skip_common,
            },
        )?;
        dotenv::write_file(&working_file, &values)
            .with_context(|| format!("Failed to write {:?}", working_file))?;

        println!("Swapped environment to: {}", env);
        Ok(())
    }

    pub fn spit(&self, env: &str) -> Result<()> {
        let ctx = self.project()?;
        for (name, path) in project::spit(&self.registry, &ctx, env, &self.cwd)? {
            println!("spit {} to {}", name, path.display());
        }
        Ok(())
    }

    pub fn list_environments(&self) -> Result<()> {
        let ctx = self.project()?;
        if !ctx.has_snapshot() {
            println!("'{}' has no environments loaded yet", ctx.project_name);
            return Ok(());
        }
        for name in project::environment_names(&self.registry, &ctx)? {
            let marker = if name == ctx.entry.current_env { "*" } else { " " };
            println!("{} {}", marker, name);
        }
        Ok(())
    }

    pub fn map(&self, project_name: &str) -> Result<()> {
        match self.registry.bind_path(project_name, &self.cwd, false) {
            Ok(()) => {}
            Err(SwapenvError::Conflict(reason)) => {
                if !prompt::confirm(&format!("{}. Overwrite?", reason))? {
                    println!("Aborted.");
                    return Ok(());
                }
                self.registry.bind_path(project_name, &self.cwd, true)?;
            }
            Err(e) => return Err(e.into()),
        }

        println!("Mapped '{}' -> {}", project_name, self.cwd.display());
        Ok(())
    }

    pub fn version(&self, token: Option<&str>) -> Result<()> {
        let ctx = self.project()?;
        match token {
            None => println!("{}", project::show_version(&ctx)),
            Some(token) => {
                let version = project::set_version(&self.registry, &ctx, token)?;
                println!("Now at v{}", version);
            }
        }
        Ok(())
    }

    pub fn list_versions(&self) -> Result<()> {
        let ctx = self.project()?;
        for listing in project::list_versions(&self.registry, &ctx)? {
            println!("{}", listing);
        }
        Ok(())
    }

    pub fn rename_version(&self, token: &str, label: &str) -> Result<()> {
        let ctx = self.project()?;
        let version = project::rename_version(&self.registry, &ctx, token, label)?;
        println!("v{} is now '{}'", version, label);
        Ok(())
    }

    pub fn rollback(&self, steps: usize) -> Result<()> {
        let ctx = self.project()?;
        let version = project::rollback(&self.registry, &ctx, steps)?;
        println!("Rolled back to v{}", version);
        Ok(())
    }

    pub fn info(&self, json: bool, env_only: bool) -> Result<()> {
        let info = project::info(&self.registry, &self.cwd);
        if json {
            println!("{}", serde_json::to_string(&info)?);
        } else if let Some(line) = info.plain(env_only) {
            println!("{}", line);
        }
        Ok(())
    }

    pub async fn login(&self) -> Result<()> {
        let store = self.credential_store();
        match self.device_login(&store).await? {
            LoginOutcome::AlreadyLoggedIn => println!("already logged in"),
            LoginOutcome::LoggedIn(_) => println!("logged in successfully"),
        }
        Ok(())
    }

    async fn device_login(&self, store: &CredentialStore) -> Result<LoginOutcome> {
        let client = HttpDeviceClient::new(&self.settings.server_url)
            .map_err(SwapenvError::from)?;
        let outcome = sync::login(&client, store, |code| {
            println!("\nOpen {} in your browser", code.verification_uri);
            println!("Enter code: {}\n", code.user_code);
        })
        .await
        .context("Login failed")?;
        Ok(outcome)
    }

    /// Stored credentials, running the login flow first when there are none.
    async fn credentials(&self) -> Result<Credentials> {
        let store = self.credential_store();
        if let Ok(credentials) = sync::require_credentials(&store) {
            return Ok(credentials);
        }

        println!("Not logged in. Starting login flow...");
        self.device_login(&store).await?;
        Ok(sync::require_credentials(&store)?)
    }

    pub fn logout(&self) -> Result<()> {
        if sync::logout(&self.credential_store())? {
            println!("logged out");
        } else {
            println!("not logged in");
        }
        Ok(())
    }

    pub async fn share(
        &self,
        project_name: Option<&str>,
        env: Option<&str>,
        version: Option<&str>,
    ) -> Result<()> {
        let project_name = match project_name {
            Some(name) => name.to_string(),
            None => self.project()?.project_name,
        };
        let selection =
            sync::collect_share(&self.registry, &project_name, env, version.unwrap_or(""))?;
        let env_names: Vec<&str> = selection
            .payload
            .environments
            .keys()
            .map(String::as_str)
            .collect();

        let credentials = self.credentials().await?;
        let mut channel =
            WsChannel::connect(&self.settings.server_url, SHARE_PATH, &credentials.token).await?;

        let mut announced = false;
        sync::share(&mut channel, &selection.payload, |event| match event {
            SessionEvent::Waiting { code } => {
                println!("Session code: {}", code);
                if !announced {
                    println!(
                        "Sharing: {} (v{}) - envs: {}",
                        project_name,
                        selection.version,
                        env_names.join(", ")
                    );
                    announced = true;
                }
                println!("Waiting for receiver...");
            }
            SessionEvent::PeerJoined => println!("Receiver connected, encrypting..."),
            SessionEvent::Sent => println!("Environment shared successfully!"),
            _ => {}
        })
        .await?;

        if let Err(e) = channel.close().await {
            warn!("{}", e);
        }
        Ok(())
    }

    pub async fn receive(&self) -> Result<()> {
        let credentials = self.credentials().await?;
        let mut channel =
            WsChannel::connect(&self.settings.server_url, RECEIVE_PATH, &credentials.token).await?;

        let payload = sync::receive(&mut channel, prompt::choose_stream, |event| match event {
            SessionEvent::Connected { code } => {
                println!("Connected to stream: {}", code);
                println!("Waiting for encrypted data...");
            }
            SessionEvent::PayloadReceived => println!("Decrypting..."),
            _ => {}
        })
        .await?;

        if let Err(e) = channel.close().await {
            warn!("{}", e);
        }

        let received =
            sync::store_received(&self.registry, payload, self.store_config.max_versions)?;
        println!(
            "Environment saved to '{}' v{}",
            received.project_name, received.version
        );
        if received.created {
            println!(
                "Run `swapenv map {}` in the project directory to use it",
                received.project_name
            );
        }
        Ok(())
    }
}
