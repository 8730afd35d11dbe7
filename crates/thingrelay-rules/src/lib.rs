//! Rule evaluation and alarms for ThingRelay.
//!
//! - [`evaluator`] decides whether a payload triggers a rule
//! - [`dispatch`] publishes triggered records to action subjects
//! - [`service`] manages stored rules and their thing assignments
//! - [`consumer`] evaluates rules on every inbound message
//! - [`alarms`] stores what `alarm` actions raise

pub mod alarms;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod repository;
pub mod service;
pub mod validation;

pub use alarms::{Alarm, AlarmConsumer, AlarmRepository, AlarmService};
pub use consumer::RulesConsumer;
pub use dispatch::{action_route, dispatch_actions, spawn_dispatch, ActionRoute, DispatchSnapshot, DispatchStats};
pub use error::RuleError;
pub use evaluator::{evaluate, Evaluation};
pub use repository::{RuleAssignment, RuleRepository};
pub use service::{RulesBackup, RulesService};
pub use validation::validate_rule;
