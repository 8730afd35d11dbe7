//! Rule, condition and action records carried on the message envelope.
//!
//! Comparators and action types are stored as the raw strings the management
//! API received. Evaluation treats an unknown comparator as "never met" and an
//! unknown action type as [`crate::Error::InvalidActionType`].

use serde::{Deserialize, Serialize};

/// Action type that publishes to the alarm subject.
pub const ACTION_TYPE_ALARM: &str = "alarm";
/// Action type that notifies an SMTP notifier.
pub const ACTION_TYPE_SMTP: &str = "smtp";
/// Action type that notifies an SMPP notifier.
pub const ACTION_TYPE_SMPP: &str = "smpp";
/// Action type that forwards to the thing's webhooks.
pub const ACTION_TYPE_WEBHOOK: &str = "webhook";

/// Numeric comparison applied between a payload value and a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    GreaterEqual,
    LessEqual,
    Greater,
    Less,
}

impl Comparator {
    /// Parse one of `==`, `>=`, `<=`, `>`, `<`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "==" => Some(Self::Equal),
            ">=" => Some(Self::GreaterEqual),
            "<=" => Some(Self::LessEqual),
            ">" => Some(Self::Greater),
            "<" => Some(Self::Less),
            _ => None,
        }
    }

    /// Evaluate the comparison.
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Equal => value == threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
            Self::Greater => value > threshold,
            Self::Less => value < threshold,
        }
    }

    /// Get comparator as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "==",
            Self::GreaterEqual => ">=",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::Less => "<",
        }
    }
}

/// How multiple conditions of one rule combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Single field/comparator/threshold check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Key name (or dot path) looked up in the payload.
    pub field: String,
    /// One of `==`, `>=`, `<=`, `>`, `<`.
    pub comparator: String,
    pub threshold: f64,
}

impl Condition {
    pub fn new(field: impl Into<String>, comparator: impl Into<String>, threshold: f64) -> Self {
        Self {
            field: field.into(),
            comparator: comparator.into(),
            threshold,
        }
    }
}

/// Side effect run when a rule triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    /// Target notifier id; required for smtp and smpp.
    #[serde(default)]
    pub id: String,
}

impl Action {
    pub fn new(action_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            id: id.into(),
        }
    }

    pub fn alarm() -> Self {
        Self::new(ACTION_TYPE_ALARM, "")
    }
}

/// Stored rule: conditions combined by an operator, plus actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub conditions: Vec<Condition>,
    /// Required when there is more than one condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Rule {
    /// Single-condition rule with no actions.
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: Condition) -> Self {
        Self {
            id: id.into(),
            group_id: String::new(),
            name: name.into(),
            description: String::new(),
            conditions: vec![condition],
            operator: None,
            actions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparator_parse() {
        for op in ["==", ">=", "<=", ">", "<"] {
            assert_eq!(Comparator::parse(op).map(|c| c.as_str()), Some(op));
        }
        assert!(Comparator::parse("!=").is_none());
        assert!(Comparator::parse("=>").is_none());
    }

    #[test]
    fn test_comparator_evaluate() {
        assert!(Comparator::Greater.evaluate(35.0, 30.0));
        assert!(!Comparator::Greater.evaluate(30.0, 30.0));
        assert!(Comparator::GreaterEqual.evaluate(30.0, 30.0));
        assert!(Comparator::Less.evaluate(1.0, 2.0));
        assert!(Comparator::Equal.evaluate(2.5, 2.5));
    }

    #[test]
    fn test_rule_serde() {
        let rule = Rule::new("r1", "hot", Condition::new("temperature", ">", 30.0))
            .with_condition(Condition::new("humidity", "<", 20.0))
            .with_operator(Operator::Or)
            .with_action(Action::new(ACTION_TYPE_SMTP, "n1"));

        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["operator"], "OR");
        assert_eq!(json["actions"][0]["type"], "smtp");

        let back: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }
}
