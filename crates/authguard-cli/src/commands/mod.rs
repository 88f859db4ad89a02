//! CLI command handlers.

pub mod config;
pub mod get;
pub mod login;
pub mod logout;
pub mod probe;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use authguard::store::{create_memory_token_store, create_token_store};
use authguard::{GuardedClient, Notifier, SessionJar, Severity};
use authguard_config::GuardConfig;
use console::style;
use url::Url;

use crate::session_cookie;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration after layering.
    pub config: GuardConfig,
    /// Config files that contributed to `config`.
    pub sources: Vec<PathBuf>,
    /// Server URL to connect to.
    pub server_url: String,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Build a guarded client with persisted tokens and session cookie.
    pub fn client(&self) -> Result<GuardedClient> {
        let jar = Arc::new(SessionJar::new());
        if let Some(path) = session_cookie::session_file() {
            let url = Url::parse(&self.server_url)?;
            let restored = session_cookie::restore(&jar, &url, &path)?;
            tracing::debug!(restored, path = %path.display(), "Restored session cookies");
        }

        let store = authguard_config::token_file_path(&self.config)
            .map(|path| create_token_store(&path))
            .unwrap_or_else(create_memory_token_store);

        let client = GuardedClient::builder()
            .config(self.config.clone())
            .base_url(&self.server_url)
            .cookie_jar(jar)
            .token_store(store)
            .notifier(Arc::new(ConsoleNotifier))
            .build()?;
        Ok(client)
    }

    /// Write the client's session cookie back to disk for the next invocation.
    pub fn save_session(&self, client: &GuardedClient) -> Result<()> {
        if let Some(path) = session_cookie::session_file() {
            session_cookie::persist(client.cookie_jar(), client.base_url(), &path)?;
        }
        Ok(())
    }

    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Configuration plus where it came from.
#[derive(Debug)]
pub struct LoadedSettings {
    pub config: GuardConfig,
    pub sources: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl LoadedSettings {
    /// Discover and merge the user and project config layers.
    pub fn discover() -> Result<Self> {
        let loaded = authguard_config::load_config(None)?;
        Ok(Self {
            sources: loaded
                .loaded_from()
                .into_iter()
                .map(Path::to_path_buf)
                .collect(),
            config: loaded.config,
            warnings: loaded.warnings,
        })
    }

    /// Load a single explicit config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self {
            config: authguard_config::load_config_file(path)?,
            sources: vec![path.to_path_buf()],
            warnings: Vec::new(),
        })
    }
}

/// Prints guard notifications to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        let label = match severity {
            Severity::Info => style("info:").cyan(),
            Severity::Warning => style("warning:").yellow(),
            Severity::Error => style("error:").red(),
        };
        eprintln!("{} {}", label.bold(), message);
    }
}
