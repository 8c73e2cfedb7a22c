//! Scenario automation
//!
//! Scenarios are JSON or YAML documents listing connection actions and
//! assertions. They are validated up front, have `${VAR}` references
//! resolved per action, and run in order against a connection, producing
//! a result per action and an aggregate for the run.

pub mod assertions;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod variables;

pub use report::{ActionStatus, ScenarioStatus, TestActionResult, TestScenarioResult};
pub use runner::{ConnectionActions, StopHandle, TestRunner};
pub use scenario::{
    load_scenario, parse_scenario, ActionKind, AssertionType, LogLevel, ScenarioConfig,
    TestAction, TestScenario,
};
