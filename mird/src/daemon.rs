use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{error, info, warn};
use tokio::task::JoinHandle;

use mir_core::Name;
use mir_fw::Forwarder;

use crate::config::Config;
use crate::stats::StatsReporter;

pub struct Daemon {
    config: Config,
    forwarder: Option<Arc<Forwarder>>,
    reporter: Option<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            forwarder: None,
            reporter: None,
        }
    }

    pub fn forwarder(&self) -> Option<&Arc<Forwarder>> {
        self.forwarder.as_ref()
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        info!("Starting MIR daemon services");

        mir_core::init();
        mir_fw::init();

        let forwarder = Forwarder::new(self.config.forwarder.clone())
            .context("failed to create forwarder")?;

        for choice in &self.config.strategy {
            forwarder
                .strategy_table()
                .set(&Name::from_str(&choice.prefix), &choice.name)
                .with_context(|| format!("failed to set strategy for {}", choice.prefix))?;
        }

        if let Some(pid_file) = &self.config.daemon.pid_file {
            if let Err(e) = fs::write(pid_file, std::process::id().to_string()) {
                warn!("Failed to write pid file {}: {}", pid_file, e);
            }
        }

        if self.config.daemon.stats_interval_secs > 0 {
            let interval = Duration::from_secs(self.config.daemon.stats_interval_secs);
            self.reporter = Some(spawn_stats_reporter(Arc::clone(&forwarder), interval));
        }

        self.forwarder = Some(forwarder);
        info!("All services started successfully");
        Ok(())
    }

    pub async fn stop(&mut self) {
        info!("Stopping MIR daemon services");

        if let Some(reporter) = self.reporter.take() {
            reporter.abort();
        }

        if let Some(forwarder) = self.forwarder.take() {
            for face in forwarder.faces().ids() {
                forwarder.remove_face(face);
            }
            match serde_json::to_string(&forwarder.stats()) {
                Ok(stats) => info!("Final statistics: {}", stats),
                Err(e) => error!("Failed to render final statistics: {}", e),
            }
        }

        if let Some(pid_file) = &self.config.daemon.pid_file {
            if let Err(e) = fs::remove_file(pid_file) {
                warn!("Failed to remove pid file {}: {}", pid_file, e);
            }
        }

        info!("All services stopped");
    }
}

fn spawn_stats_reporter(forwarder: Arc<Forwarder>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reporter = StatsReporter::new(forwarder);
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match reporter.report() {
                Ok(report) => info!("Statistics: {}", report),
                Err(e) => error!("Failed to render statistics: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use mir_fw::attach_queue_face;
    use tempfile::TempDir;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.daemon.pid_file = None;
        config.daemon.stats_interval_secs = 0;
        config
    }

    #[tokio::test]
    async fn test_start_installs_strategies() {
        let mut config = test_config();
        config.strategy.push(StrategyConfig {
            prefix: "/group".to_string(),
            name: "multicast".to_string(),
        });
        let mut daemon = Daemon::new(config);
        daemon.start().await.unwrap();

        let forwarder = daemon.forwarder().unwrap();
        let effective = forwarder
            .strategy_table()
            .find_effective(&Name::from_str("/group/chat"));
        assert_eq!(effective.name(), "multicast");
        assert_eq!(forwarder.strategy_table().len(), 2);

        daemon.stop().await;
        assert!(daemon.forwarder().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_strategy() {
        let mut config = test_config();
        config.strategy.push(StrategyConfig {
            prefix: "/x".to_string(),
            name: "random".to_string(),
        });
        let mut daemon = Daemon::new(config);

        assert!(daemon.start().await.is_err());
        assert!(daemon.forwarder().is_none());
    }

    #[tokio::test]
    async fn test_pid_file_lifecycle() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("mird.pid");
        let mut config = test_config();
        config.daemon.pid_file = Some(pid_path.to_string_lossy().into_owned());

        let mut daemon = Daemon::new(config);
        daemon.start().await.unwrap();
        let written = fs::read_to_string(&pid_path).unwrap();
        assert_eq!(written, std::process::id().to_string());

        daemon.stop().await;
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn test_stop_detaches_faces() {
        let mut daemon = Daemon::new(test_config());
        daemon.start().await.unwrap();
        let forwarder = Arc::clone(daemon.forwarder().unwrap());
        let face = attach_queue_face(&forwarder, "app");
        forwarder
            .fib()
            .add_or_update(&Name::from_str("/app"), face.id, 1);

        daemon.stop().await;
        assert!(forwarder.faces().is_empty());
        assert!(forwarder.fib().is_empty());
    }
}
