use std::{mem, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{notifications::MatchNotification, phase::PhaseRecord};

/// Continuation delivered later, by an independent task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// A timed phase reached its deadline.
    PhaseExpired {
        /// Phase that expired.
        phase: String,
        /// Epoch of the phase run the timer belongs to.
        epoch: u64,
    },
    /// The pause between two rounds is over.
    StartRound {
        /// Round expected to start.
        round: u32,
        /// Lifecycle version right after the round ended. Any later
        /// transition makes the signal stale.
        version: usize,
    },
}

/// A signal addressed to one match, to deliver after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredSignal {
    /// Target match.
    pub match_id: Uuid,
    /// Wait before delivery.
    pub delay: Duration,
    /// Payload.
    pub signal: Signal,
}

/// Side effects queued by one engine call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Effects {
    /// Outbound notifications, in emission order.
    pub notifications: Vec<MatchNotification>,
    /// Deferred continuations as `(delay, signal)`.
    pub deferred: Vec<(Duration, Signal)>,
}

impl Effects {
    pub(crate) fn notify(&mut self, notification: MatchNotification) {
        self.notifications.push(notification);
    }

    pub(crate) fn defer(&mut self, delay: Duration, signal: Signal) {
        self.deferred.push((delay, signal));
    }

    pub(crate) fn phase_started(&mut self, record: &PhaseRecord) {
        self.notify(MatchNotification::PhaseStarted {
            phase: record.name.clone(),
            duration: record.duration,
            deadline: record.deadline,
        });
        if let Some(duration) = record.duration {
            self.defer(
                duration,
                Signal::PhaseExpired {
                    phase: record.name.clone(),
                    epoch: record.epoch,
                },
            );
        }
    }

    pub(crate) fn take(&mut self) -> Effects {
        mem::take(self)
    }

    /// Whether nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.deferred.is_empty()
    }
}
