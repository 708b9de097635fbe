//! Two-stage debounced verdicts from heartbeat freshness and OS liveness

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::probe::{DetectionError, Presence};
use crate::types::{Heartbeat, Trigger};

/// Health verdict for one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Suspect,
    Failed,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Healthy => write!(f, "HEALTHY"),
            Verdict::Suspect => write!(f, "SUSPECT"),
            Verdict::Failed => write!(f, "FAILED"),
        }
    }
}

/// Raw inputs gathered for one poll
#[derive(Debug)]
pub struct Observation {
    /// Latest heartbeat (`None`: never emitted)
    pub heartbeat: Result<Option<Heartbeat>, DetectionError>,
    /// OS lookup for the known pid (`None`: no pid known yet)
    pub presence: Result<Option<Presence>, DetectionError>,
}

/// Outcome of evaluating one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Set when the verdict is FAILED
    pub trigger: Option<Trigger>,
    /// The process announced an intentional stop
    pub graceful_shutdown: bool,
    /// `emitted_at` of the heartbeat seen this poll
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub detail: String,
}

/// Per-process debounce state.
///
/// One stale poll only raises SUSPECT; FAILED needs `confirmation_polls`
/// consecutive stale polls. Once FAILED has been confirmed it holds while
/// the heartbeat stays stale, and any fresh heartbeat resets everything.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    staleness_threshold: Duration,
    confirmation_polls: u32,
    consecutive_stale: u32,
    failed_latched: bool,
    observing_since: DateTime<Utc>,
}

impl HealthMonitor {
    pub fn new(staleness_threshold: Duration, confirmation_polls: u32, observing_since: DateTime<Utc>) -> Self {
        Self {
            staleness_threshold,
            confirmation_polls: confirmation_polls.max(1),
            consecutive_stale: 0,
            failed_latched: false,
            observing_since,
        }
    }

    pub fn consecutive_stale(&self) -> u32 {
        self.consecutive_stale
    }

    /// Forget debounce history, e.g. after a human acknowledged an escalation
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.consecutive_stale = 0;
        self.failed_latched = false;
        self.observing_since = now;
    }

    pub fn evaluate(&mut self, now: DateTime<Utc>, observation: Observation) -> Evaluation {
        let heartbeat = match observation.heartbeat {
            Ok(hb) => hb,
            Err(e) => return self.undetermined(format!("heartbeat unreadable: {e}"), None),
        };
        let heartbeat_at = heartbeat.as_ref().map(|hb| hb.emitted_at);

        if let Some(hb) = heartbeat.as_ref().filter(|hb| hb.is_graceful_shutdown()) {
            self.consecutive_stale = 0;
            self.failed_latched = false;
            return Evaluation {
                verdict: Verdict::Healthy,
                trigger: None,
                graceful_shutdown: true,
                heartbeat_at,
                detail: format!("graceful shutdown announced at {}", hb.emitted_at.to_rfc3339()),
            };
        }

        match observation.presence {
            Ok(Some(Presence::Missing)) => {
                return self.fail(Trigger::ProcessExit, heartbeat_at, "process not found in process table".into());
            }
            Ok(Some(Presence::Reused)) => {
                return self.fail(Trigger::ProcessExit, heartbeat_at, "pid reused by another program".into());
            }
            Err(e) => return self.undetermined(format!("process lookup failed: {e}"), heartbeat_at),
            Ok(Some(Presence::Running) | None) => {}
        }

        let anchor = heartbeat_at.unwrap_or(self.observing_since);
        let age = (now - anchor).to_std().unwrap_or(Duration::ZERO);

        if age <= self.staleness_threshold {
            self.consecutive_stale = 0;
            self.failed_latched = false;
            return Evaluation {
                verdict: Verdict::Healthy,
                trigger: None,
                graceful_shutdown: false,
                heartbeat_at,
                detail: format!("heartbeat age {}s", age.as_secs()),
            };
        }

        self.consecutive_stale = self.consecutive_stale.saturating_add(1);
        let detail = match heartbeat_at {
            Some(_) => format!(
                "heartbeat age {}s exceeds {}s (stale poll {})",
                age.as_secs(),
                self.staleness_threshold.as_secs(),
                self.consecutive_stale
            ),
            None => format!(
                "no heartbeat for {}s since observation began (stale poll {})",
                age.as_secs(),
                self.consecutive_stale
            ),
        };

        if self.failed_latched || self.consecutive_stale >= self.confirmation_polls {
            self.fail(Trigger::StaleHeartbeat, heartbeat_at, detail)
        } else {
            Evaluation {
                verdict: Verdict::Suspect,
                trigger: None,
                graceful_shutdown: false,
                heartbeat_at,
                detail,
            }
        }
    }

    fn fail(&mut self, trigger: Trigger, heartbeat_at: Option<DateTime<Utc>>, detail: String) -> Evaluation {
        self.failed_latched = true;
        Evaluation {
            verdict: Verdict::Failed,
            trigger: Some(trigger),
            graceful_shutdown: false,
            heartbeat_at,
            detail,
        }
    }

    /// Detection errors never advance the debounce counter
    fn undetermined(&self, detail: String, heartbeat_at: Option<DateTime<Utc>>) -> Evaluation {
        Evaluation {
            verdict: Verdict::Suspect,
            trigger: None,
            graceful_shutdown: false,
            heartbeat_at,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeartbeatState;
    use std::io;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn hb_at(at: DateTime<Utc>, state: HeartbeatState) -> Heartbeat {
        Heartbeat { process_id: "launcher".into(), emitted_at: at, sequence: 1, pid: Some(100), state }
    }

    fn obs(hb: Option<Heartbeat>, presence: Option<Presence>) -> Observation {
        Observation { heartbeat: Ok(hb), presence: Ok(presence) }
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(Duration::from_secs(90), 2, t0())
    }

    #[test]
    fn test_fresh_heartbeat_healthy() {
        let mut m = monitor();
        let hb = hb_at(t0(), HeartbeatState::Running);
        let e = m.evaluate(t0() + secs(30), obs(Some(hb), Some(Presence::Running)));
        assert_eq!(e.verdict, Verdict::Healthy);
        assert_eq!(e.heartbeat_at, Some(t0()));
    }

    #[test]
    fn test_two_stale_polls_confirm_failure() {
        let mut m = monitor();
        let hb = hb_at(t0(), HeartbeatState::Running);
        let first = m.evaluate(t0() + secs(100), obs(Some(hb.clone()), Some(Presence::Running)));
        assert_eq!(first.verdict, Verdict::Suspect);
        let second = m.evaluate(t0() + secs(110), obs(Some(hb), Some(Presence::Running)));
        assert_eq!(second.verdict, Verdict::Failed);
        assert_eq!(second.trigger, Some(Trigger::StaleHeartbeat));
    }

    #[test]
    fn test_fresh_poll_clears_debounce() {
        let mut m = monitor();
        let old = hb_at(t0(), HeartbeatState::Running);
        assert_eq!(m.evaluate(t0() + secs(100), obs(Some(old.clone()), None)).verdict, Verdict::Suspect);

        let new = hb_at(t0() + secs(105), HeartbeatState::Running);
        assert_eq!(m.evaluate(t0() + secs(110), obs(Some(new.clone()), None)).verdict, Verdict::Healthy);
        assert_eq!(m.consecutive_stale(), 0);

        // The next stale poll starts the count from scratch
        assert_eq!(m.evaluate(t0() + secs(200), obs(Some(new), None)).verdict, Verdict::Suspect);
    }

    #[test]
    fn test_missing_process_fails_immediately() {
        let mut m = monitor();
        let hb = hb_at(t0(), HeartbeatState::Running);
        let e = m.evaluate(t0() + secs(5), obs(Some(hb), Some(Presence::Missing)));
        assert_eq!(e.verdict, Verdict::Failed);
        assert_eq!(e.trigger, Some(Trigger::ProcessExit));
    }

    #[test]
    fn test_reused_pid_fails_immediately() {
        let mut m = monitor();
        let e = m.evaluate(t0() + secs(5), obs(None, Some(Presence::Reused)));
        assert_eq!(e.verdict, Verdict::Failed);
        assert_eq!(e.trigger, Some(Trigger::ProcessExit));
    }

    #[test]
    fn test_detection_error_is_suspect_and_does_not_advance() {
        let mut m = monitor();
        let hb = hb_at(t0(), HeartbeatState::Running);
        assert_eq!(m.evaluate(t0() + secs(100), obs(Some(hb.clone()), None)).verdict, Verdict::Suspect);

        for offset in [110, 120, 130] {
            let e = m.evaluate(
                t0() + secs(offset),
                Observation {
                    heartbeat: Ok(Some(hb.clone())),
                    presence: Err(DetectionError::ProcessTable {
                        pid: 100,
                        source: io::Error::from(io::ErrorKind::PermissionDenied),
                    }),
                },
            );
            assert_eq!(e.verdict, Verdict::Suspect);
        }
        assert_eq!(m.consecutive_stale(), 1);
    }

    #[test]
    fn test_graceful_marker_is_not_failure() {
        let mut m = monitor();
        let hb = hb_at(t0(), HeartbeatState::GracefulShutdown);
        let e = m.evaluate(t0() + secs(600), obs(Some(hb), Some(Presence::Missing)));
        assert_eq!(e.verdict, Verdict::Healthy);
        assert!(e.graceful_shutdown);
    }

    #[test]
    fn test_confirmed_failure_latches_while_stale() {
        let mut m = monitor();
        let hb = hb_at(t0(), HeartbeatState::Running);
        m.evaluate(t0() + secs(100), obs(Some(hb.clone()), None));
        assert_eq!(m.evaluate(t0() + secs(110), obs(Some(hb.clone()), None)).verdict, Verdict::Failed);
        assert_eq!(m.evaluate(t0() + secs(120), obs(Some(hb), None)).verdict, Verdict::Failed);
    }

    #[test]
    fn test_never_emitted_measured_from_observation_start() {
        let mut m = monitor();
        assert_eq!(m.evaluate(t0() + secs(60), obs(None, None)).verdict, Verdict::Healthy);
        assert_eq!(m.evaluate(t0() + secs(100), obs(None, None)).verdict, Verdict::Suspect);
        assert_eq!(m.evaluate(t0() + secs(110), obs(None, None)).verdict, Verdict::Failed);
    }
}
