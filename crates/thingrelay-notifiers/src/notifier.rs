//! Notifier contract and the in-memory notifier.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{NotifierError, Result};
use crate::model::Notification;

/// Delivers notifications to a list of contacts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs, e.g. `smtp`.
    fn kind(&self) -> &str;

    /// Reject contacts this notifier cannot address.
    fn validate_contacts(&self, contacts: &[String]) -> Result<()>;

    async fn notify(&self, contacts: &[String], notification: &Notification) -> Result<()>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Phone numbers: digits with an optional leading `+`.
pub fn validate_phone_numbers(contacts: &[String]) -> Result<()> {
    for contact in contacts {
        let digits = contact.strip_prefix('+').unwrap_or(contact);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(NotifierError::InvalidContact(contact.clone()));
        }
    }
    Ok(())
}

/// Records what it was asked to send.
#[derive(Debug, Clone)]
pub struct MemoryNotifier {
    kind: String,
    sent: Arc<Mutex<Vec<(Vec<String>, Notification)>>>,
}

impl MemoryNotifier {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn sent(&self) -> Vec<(Vec<String>, Notification)> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.sent.lock().await.len()
    }

    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn validate_contacts(&self, contacts: &[String]) -> Result<()> {
        if contacts.iter().any(|c| c.trim().is_empty()) {
            return Err(NotifierError::InvalidContact("empty contact".to_string()));
        }
        Ok(())
    }

    async fn notify(&self, contacts: &[String], notification: &Notification) -> Result<()> {
        self.sent
            .lock()
            .await
            .push((contacts.to_vec(), notification.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_numbers() {
        assert!(validate_phone_numbers(&["+381641234567".into(), "0641234567".into()]).is_ok());
        assert!(validate_phone_numbers(&["+".into()]).is_err());
        assert!(validate_phone_numbers(&["064-123".into()]).is_err());
    }

    #[tokio::test]
    async fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new("memory");
        notifier
            .notify(&["a".into()], &Notification::new("s", "c"))
            .await
            .unwrap();
        assert_eq!(notifier.count().await, 1);
        assert_eq!(notifier.sent().await[0].1.subject, "s");
        notifier.clear().await;
        assert_eq!(notifier.count().await, 0);
    }
}
