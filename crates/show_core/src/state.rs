//! Desired (`goal`) and last known (`observed`) brightness per channel.

use std::sync::{Mutex, MutexGuard, PoisonError};

use shared::{
    domain::{Brightness, Channel, ChannelUpdate},
    error::{ShowError, ShowResult},
};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedChange {
    Unchanged,
    /// `observed` moved, `goal` was left alone (guard mode).
    Observed,
    /// Both `observed` and `goal` took the read values.
    Adopted,
}

#[derive(Default)]
struct StateInner {
    channels: Vec<Channel>,
    goal: Vec<Brightness>,
    observed: Vec<Brightness>,
}

/// Shared between the reconciler loops and running programs.
///
/// The lock is synchronous and never held across an await point.
#[derive(Default)]
pub struct StateStore {
    inner: Mutex<StateInner>,
    goal_changed: Notify,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.lock().channels.clone()
    }

    pub fn goal(&self, id: usize) -> ShowResult<Brightness> {
        self.lock()
            .goal
            .get(id)
            .copied()
            .ok_or(ShowError::UnknownChannel(id))
    }

    pub fn goals(&self) -> Vec<Brightness> {
        self.lock().goal.clone()
    }

    pub fn observed(&self) -> Vec<Brightness> {
        self.lock().observed.clone()
    }

    /// Returns whether the value changed. Only a change wakes the writer.
    pub fn set_goal(&self, id: usize, value: Brightness) -> ShowResult<bool> {
        let changed = {
            let mut inner = self.lock();
            let slot = inner
                .goal
                .get_mut(id)
                .ok_or(ShowError::UnknownChannel(id))?;
            let changed = *slot != value;
            *slot = value;
            changed
        };
        if changed {
            self.goal_changed.notify_one();
        }
        Ok(changed)
    }

    /// Replaces every goal at once, e.g. from a selection of channels.
    pub fn set_goals(&self, values: &[Brightness]) -> ShowResult<bool> {
        let changed = {
            let mut inner = self.lock();
            if values.len() != inner.goal.len() {
                return Err(ShowError::LengthMismatch {
                    expected: inner.goal.len(),
                    actual: values.len(),
                });
            }
            let changed = inner.goal != values;
            inner.goal.copy_from_slice(values);
            changed
        };
        if changed {
            self.goal_changed.notify_one();
        }
        Ok(changed)
    }

    /// Resolves once a goal changed since the last call consumed the signal.
    pub async fn goal_changed(&self) {
        self.goal_changed.notified().await;
    }

    pub(crate) fn reset(&self, channels: Vec<Channel>, observed: Vec<Brightness>) {
        let mut inner = self.lock();
        inner.goal = observed.clone();
        inner.observed = observed;
        inner.channels = channels;
    }

    pub(crate) fn clear(&self) {
        *self.lock() = StateInner::default();
    }

    /// Computes the minimal update set and marks it as observed before it is
    /// sent. A failed send is corrected by the next read.
    pub(crate) fn take_pending_writes(&self) -> Vec<ChannelUpdate> {
        let mut inner = self.lock();
        let StateInner {
            channels,
            goal,
            observed,
        } = &mut *inner;
        goal.iter()
            .zip(observed.iter_mut())
            .zip(channels.iter())
            .filter(|((goal, observed), _)| **goal != **observed)
            .map(|((goal, observed), channel)| {
                *observed = *goal;
                ChannelUpdate {
                    channel: channel.clone(),
                    brightness: *goal,
                }
            })
            .collect()
    }

    pub(crate) fn apply_observed(
        &self,
        values: Vec<Brightness>,
        guard: bool,
    ) -> ShowResult<ObservedChange> {
        let goal_moved = {
            let mut inner = self.lock();
            if values.len() != inner.channels.len() {
                return Err(ShowError::LengthMismatch {
                    expected: inner.channels.len(),
                    actual: values.len(),
                });
            }
            if inner.observed == values {
                return Ok(ObservedChange::Unchanged);
            }
            if guard {
                inner.observed = values;
                return Ok(ObservedChange::Observed);
            }
            let goal_moved = inner.goal != values;
            inner.goal = values.clone();
            inner.observed = values;
            goal_moved
        };
        if goal_moved {
            self.goal_changed.notify_one();
        }
        Ok(ObservedChange::Adopted)
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
