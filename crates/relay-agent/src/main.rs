//! # relay-agent
//!
//! Interview signaling relay binary. Loads settings, opens the session store,
//! and serves the relay until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::logging::{init_json_subscriber, init_subscriber};
use relay_server::{
    RelayServer, ServerConfig, SessionValidator, SqliteSessionValidator, StaticSessionValidator,
};
use relay_settings::RelaySettings;
use tracing::{info, warn};

/// Interview signaling relay.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "WebRTC signaling relay for interview sessions")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` interview database used to validate sessions.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file (default `~/.interview-relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `relay_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Allow this session id without a database. Repeatable.
    #[arg(long = "session", value_name = "ID")]
    sessions: Vec<String>,
}

impl Cli {
    /// Settings from `--settings` (or the default path), then the flags on top.
    fn load_settings(&self) -> Result<RelaySettings> {
        let mut settings = match &self.settings {
            Some(path) => relay_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings: {}", path.display()))?,
            None => relay_settings::load_settings().with_context(|| {
                format!(
                    "Failed to load settings: {}",
                    relay_settings::settings_path().display()
                )
            })?,
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.database.path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

/// Pick the session store: the database when configured, else the allow-list.
fn build_validator(settings: &RelaySettings, sessions: &[String]) -> Result<Arc<dyn SessionValidator>> {
    if let Some(path) = &settings.database.path {
        let validator = SqliteSessionValidator::open(path)
            .with_context(|| format!("Failed to open session store: {}", path.display()))?;
        if !sessions.is_empty() {
            warn!("--session ignored because a session database is configured");
        }
        return Ok(Arc::new(validator));
    }
    if sessions.is_empty() {
        warn!("no session database or --session given; all signaling connections will be refused");
    } else {
        info!(count = sessions.len(), "using static session allow-list");
    }
    Ok(Arc::new(StaticSessionValidator::new(sessions.iter().cloned())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Load settings early (needed for log level before logging init)
    let settings = args.load_settings()?;

    if settings.logging.json {
        init_json_subscriber(&settings.logging.level);
    } else {
        init_subscriber(&settings.logging.level);
    }

    let metrics = match relay_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let validator = build_validator(&settings, &args.sessions)?;
    let mut server = RelayServer::new(ServerConfig::from(&settings.server), validator);
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!("Signaling relay listening on http://{addr}");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    server.shutdown_gracefully(vec![handle]).await;
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::SessionId;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "relay-agent",
            "--port",
            "9100",
            "--session",
            "1",
            "--session",
            "2",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(9100));
        assert_eq!(cli.sessions, vec!["1", "2"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.host.is_none());
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::try_parse_from([
            "relay-agent",
            "--host",
            "127.0.0.1",
            "--db-path",
            "/srv/interviews.db",
        ])
        .unwrap();
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.database.path, Some(PathBuf::from("/srv/interviews.db")));
    }

    #[test]
    fn flags_layer_over_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"host":"10.0.0.5","maxMessageSize":2048},"logging":{"level":"warn"}}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "relay-agent",
            "--settings",
            path.to_str().unwrap(),
            "--host",
            "127.0.0.1",
        ])
        .unwrap();
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.max_message_size, 2048);
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn invalid_settings_file_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let cli = Cli::try_parse_from(["relay-agent", "--settings", path.to_str().unwrap()]).unwrap();
        let err = cli.load_settings().unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }

    #[tokio::test]
    async fn allow_list_without_database() {
        let validator = build_validator(&RelaySettings::default(), &["7".to_string()]).unwrap();
        assert!(validator.session_exists(&SessionId::from("7")).await.unwrap());
        assert!(!validator.session_exists(&SessionId::from("8")).await.unwrap());
    }

    #[test]
    fn missing_database_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = RelaySettings::default();
        settings.database.path = Some(dir.path().join("absent.db"));
        let err = build_validator(&settings, &[]).err().unwrap();
        assert!(err.to_string().contains("Failed to open session store"));
    }

    #[tokio::test]
    async fn server_graceful_shutdown() {
        let validator = build_validator(&RelaySettings::default(), &[]).unwrap();
        let server = RelayServer::new(ServerConfig::default(), validator);
        let (_, handle) = server.listen().await.unwrap();

        server.shutdown_gracefully(Vec::new()).await;
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("shutdown timed out")
            .expect("join error");
    }
}
