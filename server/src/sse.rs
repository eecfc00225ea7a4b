//! Server-sent-event channel throttling, grounded on `handle_io_.c++`'s
//! `should_reset`/per-channel interval write-side logic.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Events,
    Cpu,
    Memory,
    Redirect,
}

impl Channel {
    pub fn interval(self) -> Duration {
        match self {
            Channel::Events => Duration::from_secs(2),
            Channel::Cpu => Duration::from_secs(5),
            Channel::Memory => Duration::from_secs(60),
            Channel::Redirect => Duration::from_secs(1),
        }
    }
}

/// Per-stream bookkeeping for one subscribed SSE channel on one
/// connection: when the window started and how many messages it has
/// sent since.
#[derive(Debug, Clone, Copy)]
pub struct ChannelState {
    pub start: Instant,
    pub count: u64,
}

impl ChannelState {
    pub fn new() -> Self {
        Self { start: Instant::now(), count: 0 }
    }

    pub fn tick(&mut self) {
        self.count += 1;
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.count = 0;
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}

/// `Both`: reset the stream (send a fresh event / renegotiate) once
/// either the message count or the age limit is hit, whichever comes
/// first. Chosen per the original's open `SSEResetPolicy::Mode` question.
#[derive(Debug, Clone, Copy)]
pub struct SseResetPolicy {
    pub max_age: Duration,
    pub max_messages: u64,
}

impl SseResetPolicy {
    pub const DEFAULT: Self = Self { max_age: Duration::from_secs(3600), max_messages: 1800 };

    pub fn should_reset(&self, state: &ChannelState, now: Instant) -> bool {
        let age_exceeded = now.saturating_duration_since(state.start) >= self.max_age;
        let count_exceeded = state.count >= self.max_messages;
        age_exceeded || count_exceeded
    }
}

impl Default for SseResetPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Returns `true` when `interval` has elapsed since `state.start` and the
/// channel should emit its next sample now.
pub fn due(state: &ChannelState, channel: Channel, now: Instant) -> bool {
    now.saturating_duration_since(state.start) >= channel.interval()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_intervals_match_original_throttle() {
        assert_eq!(Channel::Events.interval(), Duration::from_secs(2));
        assert_eq!(Channel::Cpu.interval(), Duration::from_secs(5));
        assert_eq!(Channel::Memory.interval(), Duration::from_secs(60));
        assert_eq!(Channel::Redirect.interval(), Duration::from_secs(1));
    }

    #[test]
    fn reset_policy_both_trips_on_either_condition() {
        let policy = SseResetPolicy { max_age: Duration::from_secs(10), max_messages: 3 };
        let mut state = ChannelState::new();
        state.count = 3;
        assert!(policy.should_reset(&state, Instant::now()));

        let mut state2 = ChannelState::new();
        state2.start = Instant::now() - Duration::from_secs(11);
        assert!(policy.should_reset(&state2, Instant::now()));

        let fresh = ChannelState::new();
        assert!(!policy.should_reset(&fresh, Instant::now()));
    }
}
