use super::error::{CoreError, Result};
use super::serialization::deserialize_value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a logged invocation.
///
/// `Complete` is terminal: once a row reaches it, the stored return value
/// is immutable and every later dispatch replays it without executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationStatus {
    Pending,
    WaitingForSignal,
    Complete,
}

impl InvocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationStatus::Pending => "Pending",
            InvocationStatus::WaitingForSignal => "WaitingForSignal",
            InvocationStatus::Complete => "Complete",
        }
    }
}

impl FromStr for InvocationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(InvocationStatus::Pending),
            "WaitingForSignal" => Ok(InvocationStatus::WaitingForSignal),
            "Complete" => Ok(InvocationStatus::Complete),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// Why the user entered the dispatcher for this invocation.
///
/// The mode is ambient per logical task and follows the async call chain
/// into every dispatch site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Normal forward execution.
    Run,
    /// Re-entry after an external signal; the dispatcher anchors on the
    /// latest logged row and substitutes the signalled payload.
    Resume,
    /// In-process wait on the rendezvous slot (set internally by
    /// `await_external_signal`).
    Await,
}

/// One row of the execution log: a single intercepted method call within
/// a flow, keyed by `(flow id, step)`.
///
/// Step `0` is the flow entry; steps `1..N` are the step calls in the
/// order they were first intercepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    id: Uuid,
    step: i32,
    timestamp: DateTime<Utc>,
    class_name: String,
    method_name: String,
    status: InvocationStatus,
    attempts: i32,
    parameters: String,
    return_value: Option<String>,
    delay: Option<i64>,
}

impl Invocation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        step: i32,
        timestamp: DateTime<Utc>,
        class_name: String,
        method_name: String,
        status: InvocationStatus,
        attempts: i32,
        parameters: String,
        return_value: Option<String>,
        delay: Option<i64>,
    ) -> Self {
        Self {
            id,
            step,
            timestamp,
            class_name,
            method_name,
            status,
            attempts,
            parameters,
            return_value,
            delay,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    /// Wall-clock instant of the first start attempt. Retries never move it.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    pub fn status(&self) -> InvocationStatus {
        self.status
    }

    pub fn attempts(&self) -> i32 {
        self.attempts
    }

    pub fn parameters(&self) -> &str {
        &self.parameters
    }

    pub fn return_value(&self) -> Option<&str> {
        self.return_value.as_deref()
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay.map(|ms| Duration::from_millis(ms.max(0) as u64))
    }

    pub fn is_flow(&self) -> bool {
        self.step == 0
    }

    pub fn deserialize_parameters<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        deserialize_value(&self.parameters)
    }

    pub fn deserialize_return_value<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>> {
        match &self.return_value {
            Some(text) => deserialize_value(text).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_status_conversion() {
        assert_eq!(InvocationStatus::Pending.as_str(), "Pending");
        assert_eq!(
            InvocationStatus::WaitingForSignal.as_str(),
            "WaitingForSignal"
        );
        assert_eq!(InvocationStatus::Complete.as_str(), "Complete");

        assert_eq!(
            InvocationStatus::from_str("Pending").unwrap(),
            InvocationStatus::Pending
        );
        assert_eq!(
            InvocationStatus::from_str("WaitingForSignal").unwrap(),
            InvocationStatus::WaitingForSignal
        );
        assert_eq!(
            InvocationStatus::from_str("Complete").unwrap(),
            InvocationStatus::Complete
        );
        assert!(InvocationStatus::from_str("Running").is_err());
    }

    #[test]
    fn test_invocation_is_flow() {
        let entry = Invocation::new(
            Uuid::new_v4(),
            0,
            Utc::now(),
            "SignupFlow".to_string(),
            "run()".to_string(),
            InvocationStatus::Pending,
            1,
            "[]".to_string(),
            None,
            None,
        );
        assert!(entry.is_flow());

        let step = Invocation::new(
            Uuid::new_v4(),
            1,
            Utc::now(),
            "SignupFlow".to_string(),
            "create_user(String)".to_string(),
            InvocationStatus::Pending,
            1,
            r#"["alice"]"#.to_string(),
            None,
            None,
        );
        assert!(!step.is_flow());
    }

    #[test]
    fn test_delay_accessor() {
        let inv = Invocation::new(
            Uuid::new_v4(),
            2,
            Utc::now(),
            "SignupFlow".to_string(),
            "send_welcome_email(i64,String)".to_string(),
            InvocationStatus::Pending,
            1,
            "[]".to_string(),
            None,
            Some(10_000),
        );
        assert_eq!(inv.delay(), Some(Duration::from_secs(10)));
    }
}
