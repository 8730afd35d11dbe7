//! Creation-time checks for rules.

use thingrelay_core::rule::{ACTION_TYPE_ALARM, ACTION_TYPE_SMPP, ACTION_TYPE_SMTP, ACTION_TYPE_WEBHOOK};
use thingrelay_core::{Action, Comparator, Rule};

use crate::error::{Result, RuleError};

pub fn validate_rule(rule: &Rule) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(RuleError::EmptyName);
    }
    if rule.conditions.is_empty() {
        return Err(RuleError::NoConditions);
    }
    for (i, condition) in rule.conditions.iter().enumerate() {
        if condition.field.is_empty() {
            return Err(RuleError::EmptyField(i));
        }
        if Comparator::parse(&condition.comparator).is_none() {
            return Err(RuleError::Comparator(condition.comparator.clone()));
        }
    }
    if rule.conditions.len() > 1 && rule.operator.is_none() {
        return Err(RuleError::MissingOperator);
    }
    rule.actions.iter().try_for_each(validate_action)
}

pub fn validate_action(action: &Action) -> Result<()> {
    match action.action_type.as_str() {
        ACTION_TYPE_ALARM | ACTION_TYPE_WEBHOOK => Ok(()),
        ACTION_TYPE_SMTP | ACTION_TYPE_SMPP if action.id.is_empty() => {
            Err(RuleError::ActionId(action.action_type.clone()))
        }
        ACTION_TYPE_SMTP | ACTION_TYPE_SMPP => Ok(()),
        other => Err(RuleError::ActionType(other.to_string())),
    }
}
