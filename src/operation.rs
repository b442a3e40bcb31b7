//! Long-running server-side operations (uploads being processed, detections,
//! trainings, ...) and the loop that waits for them.

use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::backoff;

/// Used when neither the caller nor the server picked a poll interval.
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Status of an operation as last observed by the client.
///
/// `Other` keeps statuses this client does not know verbatim; they are
/// treated as still in progress.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum OperationStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Succeeded | OperationStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Running => "running",
            OperationStatus::Succeeded => "success",
            OperationStatus::Failed => "failed",
            OperationStatus::Other(s) => s,
        }
    }
}

impl From<String> for OperationStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "success" | "succeeded" | "successful" => OperationStatus::Succeeded,
            "failed" | "failure" => OperationStatus::Failed,
            "queued" | "pending" | "accepted" => OperationStatus::Queued,
            "running" | "processing" => OperationStatus::Running,
            _ => OperationStatus::Other(s),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by every triggering endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    #[serde(alias = "id")]
    pub operation_id: String,
    /// Server-suggested delay between polls, in seconds.
    #[serde(default)]
    pub poll_interval: Option<f64>,
}

impl Operation {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            poll_interval: None,
        }
    }

    pub(crate) fn suggested_interval(&self) -> Option<Duration> {
        self.poll_interval
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Payload of `operations/<id>/`.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationStatusResponse {
    pub status: OperationStatus,
    #[serde(default)]
    pub errors: Option<Value>,
    #[serde(default)]
    pub results: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl OperationStatusResponse {
    /// Human readable failure reason taken from `errors`.
    pub fn failure_reason(&self) -> String {
        match &self.errors {
            None | Some(Value::Null) => "no reason given".to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) if items.len() == 1 && items[0].is_string() => {
                items[0].as_str().unwrap_or_default().to_string()
            }
            Some(Value::Object(map)) => match map.get("detail").or_else(|| map.get("message")) {
                Some(Value::String(s)) => s.clone(),
                _ => Value::Object(map.clone()).to_string(),
            },
            Some(other) => other.to_string(),
        }
    }
}

/// How long and how often the client polls an operation.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Fixed interval between polls; `None` follows the server's suggestion.
    pub interval: Option<Duration>,
    /// Growth factor applied to the interval after each poll (`1.0` keeps it fixed).
    pub backoff: f64,
    pub max_interval: Duration,
    /// Total wall-clock time spent on one operation, poll requests included.
    pub timeout: Option<Duration>,
    pub max_polls: Option<usize>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: None,
            backoff: 1.0,
            max_interval: Duration::from_secs(120),
            timeout: None,
            max_polls: None,
        }
    }
}

/// Polls until the operation reaches a terminal status.
///
/// `poll` fetches the current status, `sleep` blocks between polls and
/// `elapsed` reports the time spent since the wait started. The first poll
/// happens after a tenth of the interval since operations are often quick.
/// The timeout is checked against `elapsed` before each sleep, so no poll is
/// issued once the next delay would overrun the budget.
pub(crate) fn wait_until_complete<P, S, E>(
    operation: &Operation,
    policy: &PollPolicy,
    mut poll: P,
    mut sleep: S,
    mut elapsed: E,
) -> Result<OperationStatusResponse>
where
    P: FnMut() -> Result<OperationStatusResponse>,
    S: FnMut(Duration),
    E: FnMut() -> Duration,
{
    let id = operation.operation_id.as_str();
    let mut interval = policy
        .interval
        .or_else(|| operation.suggested_interval())
        .unwrap_or(DEFAULT_POLL_INTERVAL)
        .min(policy.max_interval);
    let mut polls = 0usize;
    let mut last_status = OperationStatus::Queued;
    let mut delay = interval / 10;

    loop {
        if let Some(budget) = policy.timeout {
            let spent = elapsed();
            if spent + delay > budget {
                return Err(timeout(id, last_status, spent));
            }
        }
        if policy.max_polls.is_some_and(|max| polls >= max) {
            return Err(timeout(id, last_status, elapsed()));
        }

        sleep(delay);

        info!("Polling operation id {}", id);
        let resp = poll()?;
        polls += 1;

        if resp.status != last_status {
            info!("Operation {} status={}", id, resp.status);
        }
        last_status = resp.status.clone();

        match &resp.status {
            OperationStatus::Succeeded => return Ok(resp),
            OperationStatus::Failed => {
                return Err(Error::OperationFailed {
                    operation_id: id.to_string(),
                    reason: resp.failure_reason(),
                });
            }
            OperationStatus::Other(s) => {
                warn!("Operation {} has unknown status [{}], still waiting", id, s);
            }
            OperationStatus::Queued | OperationStatus::Running => {}
        }

        if polls > 1 {
            interval = backoff(interval, policy.backoff, policy.max_interval);
        }
        delay = interval;
    }
}

fn timeout(id: &str, last_status: OperationStatus, waited: Duration) -> Error {
    warn!(
        "Giving up on operation {} after {:?}, last status={}",
        id, waited, last_status
    );
    Error::Timeout {
        operation_id: id.to_string(),
        last_status,
        waited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use std::collections::VecDeque;

    fn status(s: &str) -> OperationStatusResponse {
        serde_json::from_value(json!({ "status": s })).unwrap()
    }

    fn run(
        policy: &PollPolicy,
        replies: Vec<OperationStatusResponse>,
    ) -> (Result<OperationStatusResponse>, usize, Vec<Duration>) {
        run_slow(policy, replies, Duration::ZERO)
    }

    /// Runs the loop on a fake clock where every poll takes `poll_cost`.
    fn run_slow(
        policy: &PollPolicy,
        replies: Vec<OperationStatusResponse>,
        poll_cost: Duration,
    ) -> (Result<OperationStatusResponse>, usize, Vec<Duration>) {
        let mut replies: VecDeque<_> = replies.into();
        let mut polls = 0;
        let mut sleeps = Vec::new();
        let now = Cell::new(Duration::ZERO);
        let op = Operation {
            operation_id: "op-1".into(),
            poll_interval: Some(1.0),
        };
        let res = wait_until_complete(
            &op,
            policy,
            || {
                polls += 1;
                now.set(now.get() + poll_cost);
                Ok(replies.pop_front().expect("polled past the end of the script"))
            },
            |d| {
                sleeps.push(d);
                now.set(now.get() + d);
            },
            || now.get(),
        );
        (res, polls, sleeps)
    }

    #[test]
    fn status_vocabulary() {
        assert_eq!(OperationStatus::from("success".to_string()), OperationStatus::Succeeded);
        assert_eq!(OperationStatus::from("processing".to_string()), OperationStatus::Running);
        assert_eq!(
            OperationStatus::from("paused".to_string()),
            OperationStatus::Other("paused".into())
        );
        assert!(!OperationStatus::Other("paused".into()).is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
    }

    #[test]
    fn stops_polling_at_success() {
        let (res, polls, sleeps) = run(
            &PollPolicy::default(),
            vec![status("queued"), status("running"), status("running"), status("success")],
        );
        assert_eq!(res.unwrap().status, OperationStatus::Succeeded);
        assert_eq!(polls, 4);
        assert_eq!(sleeps[0], Duration::from_millis(100));
        assert!(sleeps[1..].iter().all(|d| *d == Duration::from_secs(1)));
    }

    #[test]
    fn failure_carries_server_reason() {
        let failed: OperationStatusResponse =
            serde_json::from_value(json!({"status": "failed", "errors": "insufficient credits"}))
                .unwrap();
        let (res, polls, _) = run(&PollPolicy::default(), vec![status("running"), failed]);
        match res {
            Err(Error::OperationFailed {
                operation_id,
                reason,
            }) => {
                assert_eq!(operation_id, "op-1");
                assert_eq!(reason, "insufficient credits");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(polls, 2);
    }

    #[test]
    fn timeout_budget_bounds_polls() {
        let policy = PollPolicy {
            interval: Some(Duration::from_secs(1)),
            timeout: Some(Duration::from_secs(3)),
            ..PollPolicy::default()
        };
        let script = vec![status("running"); 5];
        let (res, polls, sleeps) = run(&policy, script);
        match res {
            Err(Error::Timeout {
                last_status,
                waited,
                ..
            }) => {
                assert_eq!(last_status, OperationStatus::Running);
                assert!(waited <= Duration::from_secs(3));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(polls <= 4);
        assert_eq!(polls, sleeps.len());
    }

    #[test]
    fn slow_polls_count_against_the_budget() {
        let policy = PollPolicy {
            interval: Some(Duration::from_millis(1)),
            timeout: Some(Duration::from_millis(50)),
            ..PollPolicy::default()
        };
        let (res, polls, _) = run_slow(&policy, vec![status("running"); 10], Duration::from_millis(20));
        match res {
            Err(Error::Timeout { waited, .. }) => {
                assert!(waited > Duration::from_millis(50));
                assert!(waited < Duration::from_millis(71));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(polls, 3);
    }

    #[test]
    fn zero_interval_still_times_out() {
        let policy = PollPolicy {
            interval: Some(Duration::ZERO),
            timeout: Some(Duration::from_millis(50)),
            ..PollPolicy::default()
        };
        let (res, polls, sleeps) =
            run_slow(&policy, vec![status("queued"); 10], Duration::from_millis(20));
        assert!(matches!(res, Err(Error::Timeout { .. })));
        assert_eq!(polls, 3);
        assert!(sleeps.iter().all(|d| d.is_zero()));
    }

    #[test]
    fn default_policy_polls_at_a_fixed_interval() {
        let policy = PollPolicy::default();
        assert_eq!(policy.backoff, 1.0);
        assert_eq!(policy.max_interval, Duration::from_secs(120));
        assert!(policy.timeout.is_none() && policy.max_polls.is_none());

        let mut script = vec![status("running"); 5];
        script.push(status("success"));
        let (_, _, sleeps) = run(&policy, script);
        assert_eq!(sleeps[0], Duration::from_millis(100));
        assert_eq!(sleeps[1..], [Duration::from_secs(1); 5]);
    }

    #[test]
    fn max_polls_bounds_polls() {
        let policy = PollPolicy {
            max_polls: Some(2),
            ..PollPolicy::default()
        };
        let (res, polls, _) = run(&policy, vec![status("queued"); 3]);
        assert!(matches!(res, Err(Error::Timeout { .. })));
        assert_eq!(polls, 2);
    }

    #[test]
    fn interval_backs_off_up_to_cap() {
        let policy = PollPolicy {
            interval: Some(Duration::from_secs(2)),
            backoff: 2.0,
            max_interval: Duration::from_secs(5),
            ..PollPolicy::default()
        };
        let mut script = vec![status("running"); 4];
        script.push(status("success"));
        let (_, _, sleeps) = run(&policy, script);
        assert_eq!(
            sleeps,
            vec![
                Duration::from_millis(200),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn failure_reason_shapes() {
        let r = |errors: Value| OperationStatusResponse {
            status: OperationStatus::Failed,
            errors: Some(errors),
            results: None,
            metadata: None,
        };
        assert_eq!(r(json!(["boom"])).failure_reason(), "boom");
        assert_eq!(r(json!({"detail": "bad raster"})).failure_reason(), "bad raster");
        assert_eq!(r(json!({"code": 3})).failure_reason(), r#"{"code":3}"#);
    }
}
