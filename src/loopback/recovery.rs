//! RTT estimation and congestion window for simulated paths.
//!
//! RTT follows RFC 9002 section 5 in nanoseconds. The window grows in slow
//! start and halves on loss (NewReno).

use std::time::Duration;

use crate::core::constants::session_stats;
use crate::stats::SharedBuffer;

/// Recovery constants.
pub mod constants {
    /// Datagram size used for window arithmetic.
    pub const MAX_DATAGRAM_SIZE: u64 = 1200;

    /// Initial congestion window (RFC 9002 section 7.2).
    pub const INITIAL_WINDOW: u64 = 14720;

    /// Window floor.
    pub const MINIMUM_WINDOW: u64 = 2 * MAX_DATAGRAM_SIZE;

    /// Weight of a new sample in the smoothed RTT (1/8).
    pub const SRTT_SHIFT: u32 = 3;

    /// Weight of a new deviation in the RTT variance (1/4).
    pub const RTTVAR_SHIFT: u32 = 2;
}

/// RTT estimator.
#[derive(Debug, Clone, Default)]
pub struct RttEstimator {
    latest: u64,
    min: u64,
    smoothed: u64,
    rttvar: u64,
    initialized: bool,
}

impl RttEstimator {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a sample.
    ///
    /// - First sample: SRTT = sample, RTTVAR = sample / 2
    /// - Later: RTTVAR = 3/4 RTTVAR + 1/4 |SRTT - sample|,
    ///   SRTT = 7/8 SRTT + 1/8 sample
    pub fn update(&mut self, sample: Duration) {
        let sample = u64::try_from(sample.as_nanos()).unwrap_or(u64::MAX);
        self.latest = sample;

        if !self.initialized {
            self.min = sample;
            self.smoothed = sample;
            self.rttvar = sample / 2;
            self.initialized = true;
            return;
        }

        self.min = self.min.min(sample);
        let deviation = self.smoothed.abs_diff(sample);
        self.rttvar = self.rttvar - (self.rttvar >> constants::RTTVAR_SHIFT)
            + (deviation >> constants::RTTVAR_SHIFT);
        self.smoothed = self.smoothed - (self.smoothed >> constants::SRTT_SHIFT)
            + (sample >> constants::SRTT_SHIFT);
    }

    /// Latest sample (ns).
    pub fn latest(&self) -> u64 {
        self.latest
    }

    /// Minimum sample (ns).
    pub fn min(&self) -> u64 {
        self.min
    }

    /// Smoothed RTT (ns).
    pub fn smoothed(&self) -> u64 {
        self.smoothed
    }

    /// RTT variance (ns).
    pub fn rttvar(&self) -> u64 {
        self.rttvar
    }

    /// Whether at least one sample was seen.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Per-session recovery state.
#[derive(Debug, Clone)]
pub(crate) struct Recovery {
    rtt: RttEstimator,
    cwnd: u64,
    ssthresh: u64,
    max_in_flight: u64,
}

impl Recovery {
    pub(crate) fn new() -> Self {
        Self {
            rtt: RttEstimator::new(),
            cwnd: constants::INITIAL_WINDOW,
            ssthresh: u64::MAX,
            max_in_flight: 0,
        }
    }

    /// `bytes` were sent and acknowledged after `rtt`.
    pub(crate) fn on_ack(&mut self, bytes: u64, rtt: Duration) {
        self.max_in_flight = self.max_in_flight.max(bytes);
        self.rtt.update(rtt);
        if self.cwnd < self.ssthresh {
            self.cwnd = self.cwnd.saturating_add(bytes);
        } else {
            self.cwnd = self
                .cwnd
                .saturating_add(constants::MAX_DATAGRAM_SIZE * bytes / self.cwnd.max(1));
        }
    }

    /// A packet was declared lost.
    pub(crate) fn on_loss(&mut self) {
        self.ssthresh = (self.cwnd / 2).max(constants::MINIMUM_WINDOW);
        self.cwnd = self.ssthresh;
    }

    /// Publish into a session stats buffer.
    pub(crate) fn write_to(&self, stats: &SharedBuffer) {
        stats.set(session_stats::LATEST_RTT, self.rtt.latest());
        stats.set(session_stats::MIN_RTT, self.rtt.min());
        stats.set(session_stats::SMOOTHED_RTT, self.rtt.smoothed());
        stats.set(session_stats::RTTVAR, self.rtt.rttvar());
        stats.set(session_stats::CWND, self.cwnd);
        stats.set(session_stats::SSTHRESH, self.ssthresh);
        stats.set(session_stats::BYTES_IN_FLIGHT, 0);
        stats.max(session_stats::MAX_BYTES_IN_FLIGHT, self.max_in_flight);
    }
}
