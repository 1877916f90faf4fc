//! Error-rate governor: throttles how often a given class of recoverable
//! error gets reported, so a bursty-but-legitimate line error can't flood
//! the log, while a sustained fault still gets surfaced.
//!
//! Integer-only exponential averaging (no floats), per the design note:
//! `avg` tracks the inter-arrival interval in milliseconds with an
//! exponentially-weighted moving average (alpha = 1/8, the same shift
//! used by the classic TCP RTT estimator).

use std::time::Duration;

/// The recoverable error classes the frame state machine reports through
/// the governor. These are exactly the cases spec.md calls out as
/// "record ..." in the frame SM's transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A received data-xfer package failed structural/CRC/fill validation.
    BadDataReceived,
    /// A received package id equaled the last accepted id.
    DuplicatedReceived,
    /// Packet parsing or RX-store apply failed, triggering a rollback.
    ParsingFailed,
    /// The underlying transport signaled a failure.
    TransportFault,
}

impl ErrorKind {
    fn message(self) -> &'static str {
        match self {
            Self::BadDataReceived => "received package failed validation",
            Self::DuplicatedReceived => "received duplicate package id",
            Self::ParsingFailed => "packet parse/apply failed, rolled back",
            Self::TransportFault => "underlying transport signaled failure",
        }
    }
}

/// How urgently a [`Report`] should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Rate is below threshold: log as a warning.
    Warning,
    /// Rate has reached or exceeded threshold: log as an error.
    Error,
}

/// One throttled report emitted by [`ErrorGovernor::record_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    /// Which error kind this report is about.
    pub kind: ErrorKind,
    /// Total events of this kind ever seen.
    pub total_count: u64,
    /// Events of this kind seen since the previous report.
    pub since_last_report: u64,
    /// Estimated events per second, derived from the averaged interval.
    pub rate_per_sec: u64,
    /// Whether the measured rate crossed this kind's escalation threshold.
    pub severity: Severity,
}

/// Minimum time between two reports of the same kind, regardless of rate.
pub const MIN_REPORT_INTERVAL_MS: u64 = 1000;

/// EWMA shift (alpha = 1 / 2^SHIFT).
const AVG_SHIFT: u32 = 3;

/// Floor on the averaged interval so a double-counted same-millisecond
/// burst can't divide-by-zero the rate computation.
const MIN_AVG_INTERVAL_MS: u64 = 1;

struct KindState {
    total_count: u64,
    unreported_count: u64,
    last_report_ms: Option<u64>,
    last_event_ms: Option<u64>,
    exp_avg_interval_ms: u64,
    threshold_per_sec: u32,
}

impl KindState {
    fn new(threshold_per_sec: u32) -> Self {
        Self {
            total_count: 0,
            unreported_count: 0,
            last_report_ms: None,
            last_event_ms: None,
            exp_avg_interval_ms: u64::MAX / 2, // "infinitely slow" until we see a second event
            threshold_per_sec,
        }
    }

    fn rate_per_sec(&self) -> u64 {
        1000 / self.exp_avg_interval_ms.max(MIN_AVG_INTERVAL_MS)
    }
}

/// Per-error-kind rate estimator and report throttle.
pub struct ErrorGovernor {
    bad_data: KindState,
    duplicated: KindState,
    parsing_failed: KindState,
    transport_fault: KindState,
}

impl ErrorGovernor {
    /// Build a governor with the given per-kind thresholds (events/sec at
    /// which severity escalates from warning to error).
    pub fn new(
        bad_data_threshold: u32,
        duplicated_threshold: u32,
        parsing_failed_threshold: u32,
        transport_fault_threshold: u32,
    ) -> Self {
        Self {
            bad_data: KindState::new(bad_data_threshold),
            duplicated: KindState::new(duplicated_threshold),
            parsing_failed: KindState::new(parsing_failed_threshold),
            transport_fault: KindState::new(transport_fault_threshold),
        }
    }

    fn state_mut(&mut self, kind: ErrorKind) -> &mut KindState {
        match kind {
            ErrorKind::BadDataReceived => &mut self.bad_data,
            ErrorKind::DuplicatedReceived => &mut self.duplicated,
            ErrorKind::ParsingFailed => &mut self.parsing_failed,
            ErrorKind::TransportFault => &mut self.transport_fault,
        }
    }

    /// Record one event of `kind` at `now_ms` (caller-supplied clock, so
    /// the governor stays a pure function of its inputs and is trivially
    /// testable). Returns `Some(report)` when the throttle decides this
    /// event should actually be logged.
    pub fn record_event(&mut self, kind: ErrorKind, now_ms: u64) -> Option<Report> {
        let threshold = self.state_mut(kind).threshold_per_sec;
        let state = self.state_mut(kind);

        state.total_count += 1;
        state.unreported_count += 1;

        let was_over_threshold = state.rate_per_sec() >= threshold as u64;

        if let Some(last) = state.last_event_ms {
            let interval = now_ms.saturating_sub(last).max(MIN_AVG_INTERVAL_MS);
            // EWMA: avg += (interval - avg) / 2^SHIFT
            let avg = state.exp_avg_interval_ms;
            let delta = interval as i64 - avg as i64;
            state.exp_avg_interval_ms = (avg as i64 + (delta >> AVG_SHIFT)).max(MIN_AVG_INTERVAL_MS as i64) as u64;
        } else {
            // First event of this kind: seed the average with a generous
            // interval so a single event never looks like a sustained flood.
            state.exp_avg_interval_ms = 1000;
        }
        state.last_event_ms = Some(now_ms);

        let now_over_threshold = state.rate_per_sec() >= threshold as u64;
        let crossed_upward = !was_over_threshold && now_over_threshold;

        let due = match state.last_report_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= MIN_REPORT_INTERVAL_MS,
        };

        if due || crossed_upward {
            let report = Report {
                kind,
                total_count: state.total_count,
                since_last_report: state.unreported_count,
                rate_per_sec: state.rate_per_sec(),
                severity: if now_over_threshold { Severity::Error } else { Severity::Warning },
            };
            state.unreported_count = 0;
            state.last_report_ms = Some(now_ms);
            Some(report)
        } else {
            None
        }
    }
}

impl Default for ErrorGovernor {
    fn default() -> Self {
        // Defaults chosen so routine, light error traffic doesn't escalate;
        // callers with tighter reliability requirements can lower these via `new`.
        Self::new(50, 50, 20, 10)
    }
}

/// Log a [`Report`] at the right level, with the error kind's fixed message.
pub fn log_report(report: &Report) {
    let message = report.kind.message();
    match report.severity {
        Severity::Error => log::error!(
            "{message}: {}/s over last {:?} ({} total)",
            report.rate_per_sec,
            Duration::from_millis(MIN_REPORT_INTERVAL_MS),
            report.total_count
        ),
        Severity::Warning => log::warn!(
            "{message}: {}/s over last {:?} ({} total)",
            report.rate_per_sec,
            Duration::from_millis(MIN_REPORT_INTERVAL_MS),
            report.total_count
        ),
    }
}
