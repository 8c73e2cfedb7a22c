//! Scenario runner
//!
//! Runs actions one after another against a connection, recording one
//! result per action. A failed action halts the run when `stopOnError` is
//! set unless the action opts out with `continueOnError`; whatever did not
//! run is recorded as skipped. `stop()` is checked between actions and lets
//! the action in progress, retries and polling included, finish.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::common::config::RunnerConfig;
use crate::common::{Error, Result};
use crate::connection::{
    ConnectionConfig, ConnectionManager, ConnectionStatus, EventLog, LogKind, SubscribedTopic,
};

use super::assertions::{self, AssertionInput, AssertionOutcome};
use super::report::{
    ActionStatus, RunnerLogLine, ScenarioStatus, TestActionResult, TestScenarioResult,
};
use super::scenario::{ActionKind, AssertionType, LogLevel, TestAction, TestScenario};
use super::variables::substitute_action;

/// What the runner needs from a connection
#[async_trait]
pub trait ConnectionActions: Send + Sync {
    async fn connect(&self, config: ConnectionConfig) -> Result<()>;
    async fn disconnect(&self);
    async fn subscribe(&self, destination: &str) -> Result<SubscribedTopic>;
    async fn unsubscribe(&self, id: Uuid) -> Option<SubscribedTopic>;
    async fn send(
        &self,
        payload: &str,
        destination: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Result<()>;
    fn status(&self) -> ConnectionStatus;
    fn subscriptions(&self) -> Vec<SubscribedTopic>;
    /// Where received messages are recorded
    fn log(&self) -> &EventLog;
}

#[async_trait]
impl ConnectionActions for ConnectionManager {
    async fn connect(&self, config: ConnectionConfig) -> Result<()> {
        ConnectionManager::connect(self, config).await
    }

    async fn disconnect(&self) {
        ConnectionManager::disconnect(self).await
    }

    async fn subscribe(&self, destination: &str) -> Result<SubscribedTopic> {
        ConnectionManager::subscribe(self, destination)
    }

    async fn unsubscribe(&self, id: Uuid) -> Option<SubscribedTopic> {
        ConnectionManager::unsubscribe(self, id)
    }

    async fn send(
        &self,
        payload: &str,
        destination: Option<&str>,
        headers: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.send_message(payload, destination, headers)
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionManager::status(self)
    }

    fn subscriptions(&self) -> Vec<SubscribedTopic> {
        ConnectionManager::subscriptions(self)
    }

    fn log(&self) -> &EventLog {
        ConnectionManager::log(self)
    }
}

/// Requests a running scenario to stop after the current action
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

type ActionObserver = Box<dyn Fn(&TestActionResult) + Send + Sync>;

pub struct TestRunner {
    connection: Arc<dyn ConnectionActions>,
    poll_interval: Duration,
    running: AtomicBool,
    stop: StopHandle,
    observer: Option<ActionObserver>,
}

/// Clears the running flag however `run` exits
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-run state
struct TestExecutionContext {
    variables: BTreeMap<String, String>,
    /// Messages logged after this entry id count as received during the run
    log_cursor: u64,
    /// Destination to the id of its most recent subscription
    subscriptions: BTreeMap<String, Uuid>,
    connect_timeout: Option<Duration>,
    log_level: LogLevel,
    logs: Vec<RunnerLogLine>,
}

impl TestExecutionContext {
    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        if level >= self.log_level {
            self.logs.push(RunnerLogLine {
                timestamp: Utc::now(),
                level,
                message,
            });
        }
    }
}

struct Outcome {
    passed: bool,
    message: String,
    data: Option<Value>,
}

impl Outcome {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            data: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            data: None,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<AssertionOutcome> for Outcome {
    fn from(outcome: AssertionOutcome) -> Self {
        Self {
            passed: outcome.passed,
            message: outcome.message,
            data: outcome.data,
        }
    }
}

impl TestRunner {
    pub fn new(connection: Arc<dyn ConnectionActions>) -> Self {
        Self {
            connection,
            poll_interval: Duration::from_millis(RunnerConfig::default().assertion_poll_interval_ms),
            running: AtomicBool::new(false),
            stop: StopHandle::default(),
            observer: None,
        }
    }

    /// How often an assertion with a timeout is re-checked
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Called with each action result as soon as it is known
    pub fn on_action(mut self, observer: impl Fn(&TestActionResult) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop the current run after the action in progress
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run a scenario to completion, failure or stop.
    ///
    /// Fails only if another run is already in progress; action failures
    /// are reported in the result.
    pub async fn run(&self, scenario: &TestScenario) -> Result<TestScenarioResult> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::RunnerBusy);
        }
        let _running = RunningGuard(&self.running);
        self.stop.reset();

        let started_at = Utc::now();
        let started = Instant::now();
        let total = scenario.actions.len();
        let mut ctx = TestExecutionContext {
            variables: scenario.variables.clone(),
            log_cursor: self.connection.log().last_id(),
            subscriptions: BTreeMap::new(),
            connect_timeout: scenario.config.timeout.map(Duration::from_millis),
            log_level: scenario.config.log_level,
            logs: Vec::new(),
        };
        ctx.log(
            LogLevel::Info,
            format!("Starting scenario '{}' ({} actions)", scenario.name, total),
        );

        let mut results = Vec::with_capacity(total);
        let mut halted_at: Option<usize> = None;
        let mut stopped = false;

        for (i, action) in scenario.actions.iter().enumerate() {
            let index = i + 1;
            let action = substitute_action(action, &ctx.variables);

            if !stopped && self.stop.is_stopped() {
                stopped = true;
                ctx.log(
                    LogLevel::Warn,
                    format!("Stop requested; skipping {} remaining action(s)", total - i),
                );
            }

            let result = if stopped {
                skipped(index, action, "Run stopped".to_string())
            } else if let Some(failed) = halted_at {
                skipped(index, action, format!("Skipped after action {} failed", failed))
            } else {
                let result = self
                    .run_action(index, action, &mut ctx, scenario.config.retry_on_error)
                    .await;
                if result.status == ActionStatus::Failed
                    && scenario.config.stop_on_error
                    && !result.action.continue_on_error
                {
                    halted_at = Some(index);
                    ctx.log(
                        LogLevel::Error,
                        format!("Action {} failed; stopping scenario", index),
                    );
                }
                result
            };

            if let Some(observer) = &self.observer {
                observer(&result);
            }
            results.push(result);
        }

        let status = if stopped {
            ScenarioStatus::Skipped
        } else if results.iter().any(|r| r.status == ActionStatus::Failed) {
            ScenarioStatus::Failed
        } else {
            ScenarioStatus::Passed
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        ctx.log(
            LogLevel::Info,
            format!("Scenario '{}' finished: {}", scenario.name, status),
        );

        Ok(TestScenarioResult::new(
            scenario.clone(),
            status,
            results,
            started_at,
            duration_ms,
            ctx.logs,
        ))
    }

    async fn run_action(
        &self,
        index: usize,
        action: TestAction,
        ctx: &mut TestExecutionContext,
        retries: u32,
    ) -> TestActionResult {
        let timestamp = Utc::now();
        let started = Instant::now();
        // Waiting and logging cannot fail in a way a retry would fix
        let retryable = !matches!(action.kind, ActionKind::Wait { .. } | ActionKind::Log { .. });

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            ctx.log(
                LogLevel::Debug,
                format!("Action {}: {} (attempt {})", index, action.kind.name(), attempts),
            );
            let outcome = self.execute(&action, ctx).await;
            if outcome.passed || !retryable || attempts > retries {
                break outcome;
            }
            ctx.log(
                LogLevel::Warn,
                format!(
                    "Action {} failed: {}; retrying ({}/{})",
                    index, outcome.message, attempts, retries
                ),
            );
        };

        let status = if outcome.passed {
            ActionStatus::Passed
        } else {
            ctx.log(
                LogLevel::Error,
                format!("Action {} ({}) failed: {}", index, action.kind.name(), outcome.message),
            );
            ActionStatus::Failed
        };

        TestActionResult {
            index,
            action,
            status,
            message: outcome.message,
            timestamp,
            duration_ms: started.elapsed().as_millis() as u64,
            data: outcome.data,
            attempts,
        }
    }

    async fn execute(&self, action: &TestAction, ctx: &mut TestExecutionContext) -> Outcome {
        match &action.kind {
            ActionKind::Connect {
                url,
                connection_type,
                token,
                headers,
            } => {
                let mut config =
                    ConnectionConfig::new(url.clone(), *connection_type).with_headers(headers.clone());
                if let Some(token) = token {
                    config = config.with_token(token.clone());
                }
                if let Some(timeout) = ctx.connect_timeout {
                    config = config.with_connect_timeout(timeout);
                }
                // Connecting replaces any previous connection and its subscriptions
                ctx.subscriptions.clear();
                match self.connection.connect(config).await {
                    Ok(()) => Outcome::pass(format!("Connected to {} ({})", url, connection_type)),
                    Err(e) => Outcome::fail(e.to_string()),
                }
            }
            ActionKind::Disconnect => {
                self.connection.disconnect().await;
                ctx.subscriptions.clear();
                Outcome::pass("Disconnected")
            }
            ActionKind::Subscribe { destination } => {
                match self.connection.subscribe(destination).await {
                    Ok(topic) => {
                        ctx.subscriptions.insert(destination.clone(), topic.id);
                        Outcome::pass(format!("Subscribed to {}", destination))
                            .with_data(json!({ "id": topic.id }))
                    }
                    Err(e) => Outcome::fail(e.to_string()),
                }
            }
            ActionKind::Unsubscribe { destination } => {
                let id = ctx.subscriptions.remove(destination).or_else(|| {
                    self.connection
                        .subscriptions()
                        .into_iter()
                        .find(|s| &s.destination == destination)
                        .map(|s| s.id)
                });
                let removed = match id {
                    Some(id) => self.connection.unsubscribe(id).await,
                    None => None,
                };
                match removed {
                    Some(_) => Outcome::pass(format!("Unsubscribed from {}", destination)),
                    None => Outcome::fail(format!("Not subscribed to {}", destination)),
                }
            }
            ActionKind::Send {
                message,
                destination,
                headers,
            } => {
                match self
                    .connection
                    .send(message, destination.as_deref(), headers)
                    .await
                {
                    Ok(()) => match destination {
                        Some(destination) => Outcome::pass(format!("Message sent to {}", destination)),
                        None => Outcome::pass("Message sent"),
                    },
                    Err(e) => Outcome::fail(e.to_string()),
                }
            }
            ActionKind::Wait { duration } => {
                sleep(Duration::from_millis(*duration)).await;
                Outcome::pass(format!("Waited {}ms", duration))
            }
            ActionKind::Assert {
                assertion,
                expected,
                timeout,
            } => self.assert(assertion, expected.as_ref(), *timeout, ctx).await,
            ActionKind::Log { message } => {
                ctx.log(LogLevel::Info, message.clone());
                Outcome::pass(message.clone())
            }
        }
    }

    /// Evaluate once, or keep polling until it passes or `timeout` runs out
    async fn assert(
        &self,
        assertion: &AssertionType,
        expected: Option<&Value>,
        timeout: Option<u64>,
        ctx: &TestExecutionContext,
    ) -> Outcome {
        let deadline = timeout.map(|ms| Instant::now() + Duration::from_millis(ms));
        loop {
            let outcome = self.evaluate_now(assertion, expected, ctx);
            let now = Instant::now();
            match deadline {
                Some(deadline) if !outcome.passed && now < deadline => {
                    sleep(self.poll_interval.min(deadline - now)).await;
                }
                _ => return outcome.into(),
            }
        }
    }

    fn evaluate_now(
        &self,
        assertion: &AssertionType,
        expected: Option<&Value>,
        ctx: &TestExecutionContext,
    ) -> AssertionOutcome {
        let messages: Vec<String> = self
            .connection
            .log()
            .entries_since(ctx.log_cursor)
            .into_iter()
            .filter(|e| e.kind == LogKind::Message)
            .map(|e| e.payload_text().to_string())
            .collect();
        let subscriptions = self.connection.subscriptions();
        assertions::evaluate(
            assertion,
            expected,
            &AssertionInput {
                status: self.connection.status(),
                messages: &messages,
                subscriptions: &subscriptions,
            },
        )
    }
}

fn skipped(index: usize, action: TestAction, message: String) -> TestActionResult {
    TestActionResult {
        index,
        action,
        status: ActionStatus::Skipped,
        message,
        timestamp: Utc::now(),
        duration_ms: 0,
        data: None,
        attempts: 0,
    }
}
