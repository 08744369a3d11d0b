//! Binary runner utilities
//!
//! Provides a standardized way to run binaries with proper
//! logging, periodic stats, and graceful shutdown.

use std::time::Duration;
use tracing::info;

/// Configuration for running a binary application
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Name of the binary (for logging)
    pub name: String,
    /// Interval between stats lines
    pub stats_interval: Duration,
}

impl RunConfig {
    /// Create a new run configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stats_interval: Duration::from_secs(60),
        }
    }

    /// Set stats interval
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }
}

/// Trait for binary applications
#[allow(async_fn_in_trait)]
pub trait BinaryRunner {
    /// Run the application main loop
    async fn run(&mut self) -> anyhow::Result<()>;

    /// Get the run configuration
    fn config(&self) -> &RunConfig;

    /// Summary printed on shutdown
    fn stats(&self) -> Option<String> {
        None
    }

    /// Print startup banner
    fn print_banner(&self) {
        let config = self.config();
        info!("");
        info!("========================================");
        info!("Starting {}", config.name);
        info!("Press Ctrl+C to stop");
        info!("========================================");
        info!("");
    }

    /// Print shutdown banner
    fn print_shutdown(&self, stats: Option<&str>) {
        let config = self.config();
        info!("");
        info!("========================================");
        info!("{} stopped gracefully", config.name);
        if let Some(stats) = stats {
            info!("{}", stats);
        }
        info!("========================================");
    }

    /// Execute the binary with proper initialization and cleanup
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.print_banner();
        let result = self.run().await;
        let stats = self.stats();
        self.print_shutdown(stats.as_deref());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        config: RunConfig,
        runs: usize,
    }

    impl BinaryRunner for Counter {
        async fn run(&mut self) -> anyhow::Result<()> {
            self.runs += 1;
            Ok(())
        }

        fn config(&self) -> &RunConfig {
            &self.config
        }

        fn stats(&self) -> Option<String> {
            Some(format!("runs: {}", self.runs))
        }
    }

    #[test]
    fn test_run_config_builder() {
        let config = RunConfig::new("test-binary").with_stats_interval(Duration::from_secs(5));

        assert_eq!(config.name, "test-binary");
        assert_eq!(config.stats_interval, Duration::from_secs(5));
        assert_eq!(RunConfig::new("default").stats_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_execute_runs_once() {
        let mut app = Counter {
            config: RunConfig::new("counter"),
            runs: 0,
        };
        app.execute().await.unwrap();
        assert_eq!(app.runs, 1);
        assert_eq!(app.stats().as_deref(), Some("runs: 1"));
    }
}
