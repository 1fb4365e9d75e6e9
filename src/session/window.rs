//! Session window calculator
//!
//! The day is cut into six half-open arcs, in cyclic order starting at the
//! US pre-queue opening:
//!
//! ```text
//! [us_pre, us_start) [us_start, us_end) [us_end, eu_pre)
//! [eu_pre, eu_start) [eu_start, eu_end) [eu_end, us_pre)
//! ```
//!
//! A schedule is only accepted when these arcs add up to exactly one day,
//! so every instant falls in exactly one of them.

use crate::config::SessionSettings;
use crate::error::QueueError;
use crate::utils::format_hm;
use anyhow::Result;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SECONDS_PER_DAY: u32 = 86_400;

/// A named daily session window, UTC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub label: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Region {
    pub fn new(label: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            label: label.into(),
            start,
            end,
        }
    }
}

/// Where in the daily cycle the clock currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    UsPreQueue,
    UsActive,
    EuPreQueue,
    EuActive,
    /// Between the end of the US session and the EU pre-queue
    ClosedBeforeEu,
    /// Between the end of the EU session and the US pre-queue
    ClosedBeforeUs,
    /// Unclassified instant; unreachable for a validated schedule
    Closed,
}

impl SessionPhase {
    /// Whether queue tracking runs during this phase
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionPhase::UsPreQueue
                | SessionPhase::UsActive
                | SessionPhase::EuPreQueue
                | SessionPhase::EuActive
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::UsPreQueue => "us_pre_queue",
            SessionPhase::UsActive => "us_active",
            SessionPhase::EuPreQueue => "eu_pre_queue",
            SessionPhase::EuActive => "eu_active",
            SessionPhase::ClosedBeforeEu => "closed_before_eu",
            SessionPhase::ClosedBeforeUs => "closed_before_us",
            SessionPhase::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Result of evaluating the schedule at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub active: bool,
    /// Time until the next phase boundary
    pub until_next: Option<Duration>,
    /// Human readable status line shown above the queue
    pub preamble: String,
}

/// Wraparound-aware half-open time-of-day membership.
///
/// When `earliest > latest` the window crosses midnight. An empty window
/// (`earliest == latest`) contains nothing.
pub fn time_between(now: u32, earliest: u32, latest: u32) -> bool {
    if earliest <= latest {
        earliest <= now && now < latest
    } else {
        now >= earliest || now < latest
    }
}

/// Forward distance on the 24h clock, adding a day when `to` has passed
fn arc(from: u32, to: u32) -> u32 {
    (to + SECONDS_PER_DAY - from) % SECONDS_PER_DAY
}

fn seconds_of_day(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight()
}

fn parse_time_of_day(field: &str, raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|_| {
            QueueError::ConfigurationError {
                message: format!("{} must be a UTC time of day (HH:MM), got '{}'", field, raw),
            }
            .into()
        })
}

/// Validated daily schedule of both regional sessions
#[derive(Debug, Clone)]
pub struct SessionSchedule {
    us: Region,
    eu: Region,
    pre_queue: u32,
}

impl SessionSchedule {
    /// Build a schedule, rejecting boundaries that do not partition the day
    pub fn new(us: Region, eu: Region, pre_queue: Duration) -> Result<Self> {
        let pre_queue_secs = pre_queue.as_secs();
        if pre_queue_secs >= u64::from(SECONDS_PER_DAY) {
            return Err(QueueError::ConfigurationError {
                message: format!("Pre-queue window of {}s is longer than a day", pre_queue_secs),
            }
            .into());
        }

        for region in [&us, &eu] {
            if region.start == region.end {
                return Err(QueueError::ConfigurationError {
                    message: format!("{} session starts and ends at the same time", region.label),
                }
                .into());
            }
        }

        let schedule = Self {
            us,
            eu,
            pre_queue: pre_queue_secs as u32,
        };

        let covered: u32 = schedule
            .windows()
            .iter()
            .map(|(_, start, end)| arc(*start, *end))
            .sum();
        if covered != SECONDS_PER_DAY {
            return Err(QueueError::ConfigurationError {
                message: format!(
                    "Session windows overlap: {} and {} (with a {}m pre-queue) do not fit in one day",
                    schedule.us.label,
                    schedule.eu.label,
                    schedule.pre_queue / 60
                ),
            }
            .into());
        }

        Ok(schedule)
    }

    /// Parse `HH:MM` boundaries from configuration
    pub fn from_settings(settings: &SessionSettings) -> Result<Self> {
        let us = Region::new(
            settings.us.label.clone(),
            parse_time_of_day("sessions.us.start", &settings.us.start)?,
            parse_time_of_day("sessions.us.end", &settings.us.end)?,
        );
        let eu = Region::new(
            settings.eu.label.clone(),
            parse_time_of_day("sessions.eu.start", &settings.eu.start)?,
            parse_time_of_day("sessions.eu.end", &settings.eu.end)?,
        );
        Self::new(
            us,
            eu,
            Duration::from_secs(u64::from(settings.pre_queue_minutes) * 60),
        )
    }

    pub fn us(&self) -> &Region {
        &self.us
    }

    pub fn eu(&self) -> &Region {
        &self.eu
    }

    pub fn pre_queue(&self) -> Duration {
        Duration::from_secs(u64::from(self.pre_queue))
    }

    fn pre_queue_start(&self, region: &Region) -> u32 {
        arc(self.pre_queue, seconds_of_day(region.start))
    }

    /// The six arcs in priority order, as `(phase, start, end)` seconds of day
    pub fn windows(&self) -> [(SessionPhase, u32, u32); 6] {
        let us_pre = self.pre_queue_start(&self.us);
        let us_start = seconds_of_day(self.us.start);
        let us_end = seconds_of_day(self.us.end);
        let eu_pre = self.pre_queue_start(&self.eu);
        let eu_start = seconds_of_day(self.eu.start);
        let eu_end = seconds_of_day(self.eu.end);

        [
            (SessionPhase::UsPreQueue, us_pre, us_start),
            (SessionPhase::UsActive, us_start, us_end),
            (SessionPhase::EuPreQueue, eu_pre, eu_start),
            (SessionPhase::EuActive, eu_start, eu_end),
            (SessionPhase::ClosedBeforeEu, us_end, eu_pre),
            (SessionPhase::ClosedBeforeUs, eu_end, us_pre),
        ]
    }

    /// Classify a second of the day, first matching window wins
    pub fn phase_at(&self, second_of_day: u32) -> (SessionPhase, Option<u32>) {
        let second_of_day = second_of_day % SECONDS_PER_DAY;
        self.windows()
            .iter()
            .find(|(_, start, end)| time_between(second_of_day, *start, *end))
            .map(|(phase, _, end)| (*phase, Some(arc(second_of_day, *end))))
            .unwrap_or((SessionPhase::Closed, None))
    }

    /// Decide whether tracking is active at `now` and describe it
    pub fn evaluate(&self, now: DateTime<Utc>) -> SessionStatus {
        let (phase, remaining) = self.phase_at(now.time().num_seconds_from_midnight());
        let until_next = remaining.map(|secs| Duration::from_secs(u64::from(secs)));
        let countdown = until_next.map(format_hm).unwrap_or_default();

        let preamble = match phase {
            SessionPhase::UsPreQueue => format!(
                "Pre-queue is open for {}. Session starts in {}",
                self.us.label, countdown
            ),
            SessionPhase::UsActive => format!(
                "{} is active now. Session ends in {}",
                self.us.label, countdown
            ),
            SessionPhase::EuPreQueue => format!(
                "Pre-queue is open for {}. Session starts in {}",
                self.eu.label, countdown
            ),
            SessionPhase::EuActive => format!(
                "{} is active now. Session ends in {}",
                self.eu.label, countdown
            ),
            SessionPhase::ClosedBeforeEu => format!(
                "Queue is currently closed. {} pre-queue opens in {}",
                self.eu.label, countdown
            ),
            SessionPhase::ClosedBeforeUs => format!(
                "Queue is currently closed. {} pre-queue opens in {}",
                self.us.label, countdown
            ),
            SessionPhase::Closed => "Queue is currently closed.".to_string(),
        };

        SessionStatus {
            phase,
            active: phase.is_active(),
            until_next,
            preamble,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn default_schedule() -> SessionSchedule {
        SessionSchedule::from_settings(&SessionSettings::default()).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_time_between_plain_and_wrapping() {
        assert!(time_between(10, 5, 20));
        assert!(!time_between(20, 5, 20));
        assert!(time_between(5, 5, 20));
        // Crossing midnight
        assert!(time_between(86_000, 85_000, 100));
        assert!(time_between(50, 85_000, 100));
        assert!(!time_between(100, 85_000, 100));
        assert!(!time_between(500, 85_000, 100));
        // Empty window
        assert!(!time_between(7, 7, 7));
    }

    #[test]
    fn test_us_pre_queue_opens_thirty_minutes_early() {
        let schedule = default_schedule();

        let status = schedule.evaluate(at(0, 31, 0));
        assert_eq!(status.phase, SessionPhase::UsPreQueue);
        assert!(status.active);
        assert_eq!(status.until_next, Some(Duration::from_secs(29 * 60)));
        assert!(status.preamble.starts_with("Pre-queue is open for USTZ SRE"));

        let status = schedule.evaluate(at(0, 29, 0));
        assert_eq!(status.phase, SessionPhase::ClosedBeforeUs);
        assert!(!status.active);
        assert_eq!(status.until_next, Some(Duration::from_secs(60)));
        assert_eq!(
            status.preamble,
            "Queue is currently closed. USTZ SRE pre-queue opens in 0h 1m"
        );
    }

    #[test]
    fn test_boundaries_belong_to_the_following_phase() {
        let schedule = default_schedule();
        assert_eq!(schedule.evaluate(at(0, 30, 0)).phase, SessionPhase::UsPreQueue);
        assert_eq!(schedule.evaluate(at(1, 0, 0)).phase, SessionPhase::UsActive);
        assert_eq!(schedule.evaluate(at(7, 0, 0)).phase, SessionPhase::ClosedBeforeEu);
        assert_eq!(schedule.evaluate(at(13, 30, 0)).phase, SessionPhase::EuPreQueue);
        assert_eq!(schedule.evaluate(at(14, 0, 0)).phase, SessionPhase::EuActive);
        assert_eq!(schedule.evaluate(at(22, 0, 0)).phase, SessionPhase::ClosedBeforeUs);
    }

    #[test]
    fn test_countdown_wraps_past_midnight() {
        let schedule = default_schedule();
        let status = schedule.evaluate(at(23, 0, 0));
        assert_eq!(status.phase, SessionPhase::ClosedBeforeUs);
        assert_eq!(status.until_next, Some(Duration::from_secs(90 * 60)));
        assert!(status.preamble.ends_with("opens in 1h 30m"));
    }

    #[test]
    fn test_session_crossing_midnight() {
        let schedule = SessionSchedule::new(
            Region::new("US", hm(22, 0), hm(4, 0)),
            Region::new("EU", hm(12, 0), hm(18, 0)),
            Duration::from_secs(30 * 60),
        )
        .unwrap();

        assert_eq!(schedule.evaluate(at(23, 59, 59)).phase, SessionPhase::UsActive);
        assert_eq!(schedule.evaluate(at(0, 0, 0)).phase, SessionPhase::UsActive);
        assert_eq!(schedule.evaluate(at(21, 45, 0)).phase, SessionPhase::UsPreQueue);
        let active = schedule.evaluate(at(23, 0, 0));
        assert_eq!(active.until_next, Some(Duration::from_secs(5 * 3600)));
    }

    #[test]
    fn test_rejects_overlapping_sessions() {
        let result = SessionSchedule::new(
            Region::new("US", hm(1, 0), hm(10, 0)),
            Region::new("EU", hm(9, 0), hm(20, 0)),
            Duration::from_secs(30 * 60),
        );
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_rejects_pre_queue_overlapping_previous_session() {
        // EU pre-queue would open at 06:30, inside the US session
        let result = SessionSchedule::new(
            Region::new("US", hm(1, 0), hm(7, 0)),
            Region::new("EU", hm(7, 0), hm(20, 0)),
            Duration::from_secs(30 * 60),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_back_to_back_sessions_are_allowed() {
        // Empty closed gap between US end and EU pre-queue
        let schedule = SessionSchedule::new(
            Region::new("US", hm(1, 0), hm(7, 0)),
            Region::new("EU", hm(7, 30), hm(20, 0)),
            Duration::from_secs(30 * 60),
        )
        .unwrap();
        assert_eq!(schedule.evaluate(at(7, 0, 0)).phase, SessionPhase::EuPreQueue);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let mut settings = SessionSettings::default();
        settings.eu.end = "late evening".to_string();
        assert!(SessionSchedule::from_settings(&settings).is_err());
    }

    fn valid_schedule() -> impl Strategy<Value = SessionSchedule> {
        (
            0u32..SECONDS_PER_DAY,
            0u32..=7_200,
            1u32..=20_000,
            0u32..=20_000,
            1u32..=20_000,
        )
            .prop_map(|(us_start, pre, us_len, gap, eu_len)| {
                let secs = |s: u32| {
                    NaiveTime::from_num_seconds_from_midnight_opt(s % SECONDS_PER_DAY, 0).unwrap()
                };
                let us_end = us_start + us_len;
                let eu_start = us_end + gap + pre;
                let eu_end = eu_start + eu_len;
                SessionSchedule::new(
                    Region::new("US", secs(us_start), secs(us_end)),
                    Region::new("EU", secs(eu_start), secs(eu_end)),
                    Duration::from_secs(u64::from(pre)),
                )
                .unwrap()
            })
    }

    proptest! {
        #[test]
        fn prop_windows_partition_the_day(
            schedule in valid_schedule(),
            second in 0u32..SECONDS_PER_DAY,
        ) {
            let containing: Vec<SessionPhase> = schedule
                .windows()
                .iter()
                .filter(|(_, start, end)| time_between(second, *start, *end))
                .map(|(phase, _, _)| *phase)
                .collect();
            prop_assert_eq!(containing.len(), 1);

            let (phase, remaining) = schedule.phase_at(second);
            prop_assert_eq!(phase, containing[0]);
            prop_assert!(remaining.unwrap() > 0);
        }
    }
}
