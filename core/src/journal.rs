//! Result log: every reconciliation step of one invocation, for audit
//!
//! The journal is written once the run completes and again as soon as a step
//! fails, so a partially applied run still leaves a trace of what was done.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// One recorded step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub args: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meta {
    pub program: String,
    pub version: String,
    pub run_args: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    pub has_error: bool,
    pub meta: Meta,
    pub actions: Vec<Action>,
}

impl Journal {
    pub fn new(run_args: Vec<String>) -> Self {
        Self {
            has_error: false,
            meta: Meta {
                program: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                run_args,
                started_at: Utc::now(),
            },
            actions: Vec::new(),
        }
    }

    /// Append the outcome of a step; a failed step marks the whole run as failed
    pub fn record<T: Debug>(&mut self, name: &str, args: impl Into<String>, outcome: &Result<T>) {
        let (result, error) = match outcome {
            Ok(value) => (Some(format!("{:?}", value)), None),
            Err(e) => {
                self.has_error = true;
                (None, Some(e.to_string()))
            }
        };
        self.actions.push(Action {
            name: name.to_string(),
            args: args.into(),
            result,
            error,
        });
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_record_success_and_failure() {
        let mut journal = Journal::new(vec!["veepeenet".to_string(), "xray".to_string()]);

        journal.record("allocate", "2..=254", &Ok::<u32, Error>(2));
        assert!(!journal.has_error);

        let failed: Result<()> = Err(Error::exhausted("2..=254"));
        journal.record("allocate", "2..=254", &failed);

        assert!(journal.has_error);
        assert_eq!(journal.actions.len(), 2);
        assert_eq!(journal.actions[0].result.as_deref(), Some("2"));
        assert!(journal.actions[0].error.is_none());
        assert!(journal.actions[1].result.is_none());
        assert!(journal.actions[1]
            .error
            .as_deref()
            .unwrap()
            .contains("2..=254"));
    }

    #[test]
    fn test_json_layout() {
        let mut journal = Journal::new(vec!["veepeenet".to_string()]);
        journal.record("restart_service", "xray", &Ok::<(), Error>(()));

        let value: serde_json::Value = serde_json::from_str(&journal.to_json().unwrap()).unwrap();
        assert_eq!(value["has_error"], false);
        assert_eq!(value["meta"]["run_args"][0], "veepeenet");
        assert_eq!(value["actions"][0]["name"], "restart_service");
        assert_eq!(value["actions"][0]["result"], "()");
        assert!(value["actions"][0].get("error").is_none());
    }
}
