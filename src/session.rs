//! Application session
//!
//! Owns the one connection manager an invocation works with. Interactive
//! probing and scenario runs both go through it, so they see the same
//! connection, event log and statistics.

use std::sync::Arc;
use std::time::Duration;

use crate::common::config::Config;
use crate::connection::{ConnectionManager, ConnectionSettings, ConnectionStats, EventLog};
use crate::testing::TestRunner;
use crate::transport::{Connector, WebSocketConnector};

pub struct AppSession {
    config: Config,
    connection: Arc<ConnectionManager>,
}

impl AppSession {
    /// Session connecting over real WebSockets
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Session using a custom transport
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        let settings = ConnectionSettings::from(&config);
        let connection = Arc::new(ConnectionManager::new(settings, connector));
        Self { config, connection }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn log(&self) -> &EventLog {
        self.connection.log()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.connection.stats()
    }

    /// A runner driving this session's connection
    pub fn runner(&self) -> TestRunner {
        TestRunner::new(self.connection.clone()).with_poll_interval(Duration::from_millis(
            self.config.runner.assertion_poll_interval_ms,
        ))
    }

    /// Close the connection if one is open
    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, ConnectionStatus};
    use crate::testing::parse_scenario;
    use crate::transport::memory::MemoryConnector;

    #[tokio::test(start_paused = true)]
    async fn test_runner_shares_the_session_connection() {
        let connector = Arc::new(MemoryConnector::new());
        let session = AppSession::with_connector(Config::default(), connector.clone());

        let scenario = parse_scenario(
            r#"{"name":"shared","actions":[{"type":"connect","url":"ws://local/echo"}]}"#,
        )
        .unwrap();
        let result = session.runner().run(&scenario).await.unwrap();
        assert!(result.is_passed());

        assert_eq!(session.connection().status(), ConnectionStatus::Connected);
        assert_eq!(
            session.connection().config().map(|c| c.url),
            Some("ws://local/echo".to_string())
        );
        assert!(session.stats().connected_at.is_some());

        session.shutdown().await;
        assert_eq!(session.connection().status(), ConnectionStatus::Disconnected);
        assert!(session.log().snapshot().iter().any(|e| e.message == "Disconnected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_follow_config() {
        let mut config = Config::default();
        config.connection.max_reconnect_attempts = 7;
        config.log.max_entries = 5;
        let session = AppSession::with_connector(config, Arc::new(MemoryConnector::new()));

        assert_eq!(session.connection().settings().max_reconnect_attempts, 7);
        for i in 0..10 {
            session.log().info(format!("entry {}", i));
        }
        assert_eq!(session.log().len(), 5);

        let err = session
            .connection()
            .connect(ConnectionConfig::raw("http://nope"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ws"));
    }
}
