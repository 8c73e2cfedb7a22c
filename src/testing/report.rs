//! Scenario results and their console rendering

use std::fmt;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use super::scenario::{LogLevel, TestAction, TestScenario};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    /// Stopped on request before finishing
    Skipped,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "STOPPED"),
        }
    }
}

/// Outcome of one action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestActionResult {
    /// 1-based position in the scenario
    pub index: usize,
    pub action: TestAction,
    pub status: ActionStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// How many times the action ran, retries included
    pub attempts: u32,
}

/// A line of runner commentary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunnerLogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Outcome of a whole scenario run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestScenarioResult {
    pub scenario: TestScenario,
    pub status: ScenarioStatus,
    pub results: Vec<TestActionResult>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub logs: Vec<RunnerLogLine>,
    pub summary: String,
}

impl TestScenarioResult {
    /// Build the aggregate from per-action results
    pub fn new(
        scenario: TestScenario,
        status: ScenarioStatus,
        results: Vec<TestActionResult>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        logs: Vec<RunnerLogLine>,
    ) -> Self {
        let count = |wanted: ActionStatus| results.iter().filter(|r| r.status == wanted).count();
        let passed = count(ActionStatus::Passed);
        let failed = count(ActionStatus::Failed);
        let skipped = count(ActionStatus::Skipped);
        let total = results.len();
        let summary = format!(
            "Scenario: {}\nStatus: {}\nActions: {} total, {} passed, {} failed, {} skipped\nDuration: {}ms",
            scenario.name, status, total, passed, failed, skipped, duration_ms
        );

        Self {
            scenario,
            status,
            results,
            passed,
            failed,
            skipped,
            total,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            logs,
            summary,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// One console line for an action result
pub fn print_action(result: &TestActionResult, verbose: bool) {
    let label = match &result.action.description {
        Some(description) => description.clone(),
        None => result.action.kind.name().to_string(),
    };
    let retries = if result.attempts > 1 {
        format!(" (after {} attempts)", result.attempts)
    } else {
        String::new()
    };

    match result.status {
        ActionStatus::Passed => println!(
            "  {} Action {}: {} {}{}",
            "✓".green(),
            result.index,
            label,
            result.message.dimmed(),
            retries.dimmed()
        ),
        ActionStatus::Failed => println!(
            "  {} Action {}: {} {}{}",
            "✗".red(),
            result.index,
            label,
            result.message.red(),
            retries
        ),
        ActionStatus::Skipped => println!(
            "  {} Action {}: {} {}",
            "-".yellow(),
            result.index,
            label.dimmed(),
            result.message.dimmed()
        ),
    }

    if verbose || result.status == ActionStatus::Failed {
        if let Some(data) = &result.data {
            let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
            for line in rendered.lines() {
                println!("      {}", line.dimmed());
            }
        }
    }
}

/// Scenario banner printed before the first action
pub fn print_header(scenario: &TestScenario) {
    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(description) = &scenario.description {
        println!("  {}", description.dimmed());
    }
    println!("\n{}", "Actions:".cyan());
}

/// Closing summary
pub fn print_summary(result: &TestScenarioResult, verbose: bool) {
    if verbose && !result.logs.is_empty() {
        println!("\n{}", "Runner log:".cyan());
        for line in &result.logs {
            println!(
                "  {} [{}] {}",
                line.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
                line.level,
                line.message
            );
        }
    }

    let counts = format!(
        "{} passed, {} failed, {} skipped of {} ({}ms)",
        result.passed, result.failed, result.skipped, result.total, result.duration_ms
    );
    match result.status {
        ScenarioStatus::Passed => println!(
            "\n{} {}  {}\n",
            "✓".green().bold(),
            "Scenario Passed".green().bold(),
            counts
        ),
        ScenarioStatus::Failed => println!(
            "\n{} {}  {}\n",
            "✗".red().bold(),
            "Scenario Failed".red().bold(),
            counts
        ),
        ScenarioStatus::Skipped => println!(
            "\n{} {}  {}\n",
            "-".yellow().bold(),
            "Scenario Stopped".yellow().bold(),
            counts
        ),
    }
}
