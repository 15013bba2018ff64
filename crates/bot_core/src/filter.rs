use chrono::{DateTime, Utc};
use shared::protocol::InboundEvent;

/// Process start time. Events older than this are replays of history the
/// homeserver sends on (re)connect and must stay inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StartEpoch(DateTime<Utc>);

impl StartEpoch {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn at(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn is_stale(&self, event: &InboundEvent) -> bool {
        is_stale(event, *self)
    }
}

pub fn is_stale(event: &InboundEvent, start: StartEpoch) -> bool {
    event.timestamp < start.0
}

#[cfg(test)]
#[path = "tests/filter_tests.rs"]
mod tests;
