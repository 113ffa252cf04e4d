//! Submitting measurements, polling for their results and decoding pings.

use std::thread;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PollPolicy;
use crate::error::{HuntError, Result};
use crate::platform::{JobId, MeasurementPlatform, MeasurementRequest, PollStatus};

/// Results gathered for one job.
#[derive(Debug)]
pub struct Collected {
    pub job: JobId,
    pub results: Vec<Value>,
    pub scheduled: usize,
    /// Set when polling stopped before every scheduled result arrived.
    pub timeout: Option<HuntError>,
}

impl Collected {
    pub fn is_complete(&self) -> bool {
        self.timeout.is_none()
    }
}

/// Submits `request`, retrying up to `retries` more times.
pub fn submit_with_retry(
    platform: &dyn MeasurementPlatform,
    request: &MeasurementRequest,
    retries: u32,
) -> Result<JobId> {
    let mut attempt = 0;
    loop {
        match platform.submit(request) {
            Ok(job) => {
                info!(job, kind = %request.kind, target = %request.target, "measurement submitted");
                return Ok(job);
            }
            Err(err) if attempt < retries => {
                attempt += 1;
                warn!(attempt, retries, "submission failed, retrying: {err}");
            }
            Err(err) => {
                return Err(match err {
                    HuntError::MeasurementSubmissionFailed(_) => err,
                    other => HuntError::submission(other.to_string()),
                })
            }
        }
    }
}

/// Polls `job` until every scheduled vantage point answered or the attempt
/// cap is reached; in the latter case the partial results are returned.
pub fn collect_results(
    platform: &dyn MeasurementPlatform,
    job: JobId,
    policy: &PollPolicy,
) -> Collected {
    let mut results = Vec::new();
    let mut scheduled = 0;
    for attempt in 0..policy.max_attempts {
        let wait = policy.delay_before(attempt);
        if !wait.is_zero() {
            debug!(job, attempt, ?wait, "waiting for results");
            thread::sleep(wait);
        }
        match platform.poll(job) {
            Ok(PollStatus::NotScheduled) => {
                debug!(job, attempt, "measurement not scheduled yet");
            }
            Ok(PollStatus::Progress {
                scheduled: s,
                results: r,
            }) => {
                debug!(job, attempt, scheduled = s, received = r.len(), "poll");
                scheduled = s;
                results = r;
                if scheduled > 0 && results.len() >= scheduled {
                    info!(job, received = results.len(), "results retrieved");
                    return Collected {
                        job,
                        results,
                        scheduled,
                        timeout: None,
                    };
                }
            }
            Err(err) => warn!(job, attempt, "poll failed: {err}"),
        }
    }
    let timeout = HuntError::MeasurementTimeout {
        job,
        attempts: policy.max_attempts,
        received: results.len(),
        scheduled,
    };
    warn!("{timeout}");
    Collected {
        job,
        results,
        scheduled,
        timeout: Some(timeout),
    }
}

/// One vantage point's ping outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingSample {
    pub probe_id: u64,
    pub min_rtt_ms: Option<f64>,
    pub avg_rtt_ms: Option<f64>,
    pub sent: u32,
    pub received: u32,
}

#[derive(Debug, Deserialize)]
struct RawPing {
    prb_id: u64,
    min: Option<f64>,
    avg: Option<f64>,
    #[serde(default)]
    sent: u32,
    #[serde(default)]
    rcvd: u32,
    #[serde(default)]
    result: Vec<Value>,
}

/// Decodes platform ping results. Malformed samples are logged and skipped,
/// and reported back alongside the decoded ones.
pub fn decode_pings(results: &[Value]) -> (Vec<PingSample>, Vec<HuntError>) {
    let mut samples = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for raw in results {
        match serde_json::from_value::<RawPing>(raw.clone()) {
            Ok(p) => samples.push(ping_sample(p)),
            Err(err) => {
                let err = HuntError::malformed(format!("ping result: {err}"));
                warn!("{err}");
                skipped.push(err);
            }
        }
    }
    (samples, skipped)
}

fn ping_sample(raw: RawPing) -> PingSample {
    let rtts: Vec<f64> = raw
        .result
        .iter()
        .filter_map(|r| r.get("rtt").and_then(Value::as_f64))
        .filter(|v| v.is_finite() && *v >= 0.0)
        .collect();
    let summary = summarize(&rtts);
    let usable = |v: Option<f64>| v.filter(|x| x.is_finite() && *x > 0.0);
    PingSample {
        probe_id: raw.prb_id,
        min_rtt_ms: usable(raw.min).or(summary.min),
        avg_rtt_ms: usable(raw.avg).or(summary.mean),
        sent: raw.sent,
        received: if raw.rcvd > 0 { raw.rcvd } else { rtts.len() as u32 },
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RttSummary {
    pub min: Option<f64>,
    pub mean: Option<f64>,
}

pub fn summarize(samples: &[f64]) -> RttSummary {
    if samples.is_empty() {
        return RttSummary::default();
    }
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    RttSummary {
        min: Some(min),
        mean: Some(samples.iter().sum::<f64>() / samples.len() as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MeasurementKind;
    use approx::assert_abs_diff_eq;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    const TEST_ATTEMPTS: u32 = 4;

    fn no_wait(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            first_delay: Duration::ZERO,
            delay: Duration::ZERO,
            max_attempts,
        }
    }

    fn request() -> MeasurementRequest {
        MeasurementRequest {
            target: "192.5.5.241".parse().unwrap(),
            kind: MeasurementKind::Ping,
            vantage_point_ids: vec![1, 2],
            packets: 3,
        }
    }

    /// Scripted platform: fails `failures` submissions, then answers polls
    /// from `polls` in order, repeating the last one.
    struct Scripted {
        failures: Cell<u32>,
        submits: Cell<u32>,
        polls: RefCell<Vec<PollStatus>>,
        poll_count: Cell<u32>,
    }

    impl Scripted {
        fn new(failures: u32, polls: Vec<PollStatus>) -> Self {
            Self {
                failures: Cell::new(failures),
                submits: Cell::new(0),
                polls: RefCell::new(polls),
                poll_count: Cell::new(0),
            }
        }
    }

    impl MeasurementPlatform for Scripted {
        fn submit(&self, _request: &MeasurementRequest) -> Result<JobId> {
            self.submits.set(self.submits.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(HuntError::submission("platform busy"));
            }
            Ok(42)
        }

        fn poll(&self, _job: JobId) -> Result<PollStatus> {
            self.poll_count.set(self.poll_count.get() + 1);
            let mut polls = self.polls.borrow_mut();
            if polls.len() > 1 {
                Ok(polls.remove(0))
            } else {
                Ok(polls[0].clone())
            }
        }
    }

    #[test]
    fn submission_retries_then_succeeds() {
        let p = Scripted::new(2, vec![PollStatus::NotScheduled]);
        assert_eq!(submit_with_retry(&p, &request(), 3).unwrap(), 42);
        assert_eq!(p.submits.get(), 3);
    }

    #[test]
    fn submission_gives_up_after_retries() {
        let p = Scripted::new(5, vec![PollStatus::NotScheduled]);
        let err = submit_with_retry(&p, &request(), 2).unwrap_err();
        assert!(matches!(err, HuntError::MeasurementSubmissionFailed(_)));
        assert_eq!(p.submits.get(), 3);
    }

    #[test]
    fn polling_stops_when_all_scheduled_answered() {
        let p = Scripted::new(
            0,
            vec![
                PollStatus::NotScheduled,
                PollStatus::Progress {
                    scheduled: 2,
                    results: vec![json!({"prb_id": 1})],
                },
                PollStatus::Progress {
                    scheduled: 2,
                    results: vec![json!({"prb_id": 1}), json!({"prb_id": 2})],
                },
            ],
        );
        let got = collect_results(&p, 42, &no_wait(TEST_ATTEMPTS));
        assert!(got.is_complete());
        assert_eq!(got.results.len(), 2);
        assert_eq!(p.poll_count.get(), 3);
    }

    #[test]
    fn polling_is_capped_and_keeps_partial_results() {
        let p = Scripted::new(
            0,
            vec![PollStatus::Progress {
                scheduled: 7,
                results: vec![json!({"prb_id": 1})],
            }],
        );
        let got = collect_results(&p, 42, &no_wait(TEST_ATTEMPTS));
        assert_eq!(p.poll_count.get(), TEST_ATTEMPTS);
        assert_eq!(got.results.len(), 1);
        assert!(matches!(
            got.timeout,
            Some(HuntError::MeasurementTimeout {
                received: 1,
                scheduled: 7,
                ..
            })
        ));
    }

    #[test]
    fn never_scheduled_times_out_empty() {
        let p = Scripted::new(0, vec![PollStatus::NotScheduled]);
        let got = collect_results(&p, 42, &no_wait(2));
        assert!(got.results.is_empty());
        assert!(!got.is_complete());
    }

    #[test]
    fn decodes_ping_samples() {
        let results = vec![
            json!({"prb_id": 11, "min": 4.2, "avg": 4.8, "sent": 3, "rcvd": 3,
                   "result": [{"rtt": 4.2}, {"rtt": 4.9}, {"rtt": 5.3}]}),
            json!({"prb_id": 12, "min": -1, "avg": -1, "sent": 3, "rcvd": 0,
                   "result": [{"x": "*"}, {"x": "*"}, {"x": "*"}]}),
            json!({"prb_id": 13, "result": [{"rtt": 9.5}, {"x": "*"}, {"rtt": 8.0}]}),
            json!({"min": 3.0}),
        ];
        let (samples, skipped) = decode_pings(&results);
        assert_eq!(samples.len(), 3);
        assert_eq!(skipped.len(), 1);
        assert_eq!(samples[0].min_rtt_ms, Some(4.2));
        assert_eq!(samples[1].min_rtt_ms, None);
        assert_eq!(samples[1].received, 0);
        assert_eq!(samples[2].min_rtt_ms, Some(8.0));
        assert_eq!(samples[2].received, 2);
    }

    #[test]
    fn missing_average_is_the_mean_of_replies() {
        let results = vec![
            json!({"prb_id": 21, "result": [{"rtt": 2.0}, {"rtt": 10.0}, {"rtt": 3.0}]}),
            json!({"prb_id": 22, "min": 1.5, "avg": 2.5, "result": [{"rtt": 1.5}, {"rtt": 9.0}]}),
            json!({"prb_id": 23, "result": [{"x": "*"}]}),
        ];
        let (samples, _) = decode_pings(&results);
        assert_eq!(samples[0].min_rtt_ms, Some(2.0));
        assert_abs_diff_eq!(samples[0].avg_rtt_ms.unwrap(), 5.0, epsilon = 1e-12);
        assert_eq!(samples[1].avg_rtt_ms, Some(2.5));
        assert_eq!(samples[2].avg_rtt_ms, None);
    }

    #[test]
    fn summarize_takes_min_and_mean() {
        let s = summarize(&[5.0, 1.0, 3.0]);
        assert_eq!(s.min, Some(1.0));
        assert_eq!(s.mean, Some(3.0));
        assert_eq!(summarize(&[]), RttSummary::default());
    }
}
