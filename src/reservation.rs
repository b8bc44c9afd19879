//! Mutual exclusion over shared track resources.
//!
//! Every [`Reservation`] (sector) and [`CrossingReservation`] guards its
//! ownership with its own mutex, so a claim is a single critical section:
//! two trains can never both succeed in claiming the same resource.
//!
//! Releases wake any task parked in [`Reservation::claim`] or
//! [`CrossingReservation::book`]. Waiters also re-check on a fixed poll
//! interval, so a missed wakeup costs at most one interval.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::train::TrainId;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Occupancy of one sector.
#[derive(Debug, Default)]
pub struct Reservation {
    occupier: Mutex<Option<TrainId>>,
    released: Notify,
}

impl Reservation {
    /// A free reservation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim for `train`. Succeeds if free or already held by `train`.
    pub fn try_claim(&self, train: TrainId) -> bool {
        let mut occupier = lock(&self.occupier);
        match *occupier {
            None => {
                *occupier = Some(train);
                true
            }
            Some(holder) => holder == train,
        }
    }

    /// Release if held by `train`; otherwise a no-op. Returns whether
    /// anything was released.
    pub fn release(&self, train: TrainId) -> bool {
        let released = {
            let mut occupier = lock(&self.occupier);
            if *occupier == Some(train) {
                *occupier = None;
                true
            } else {
                false
            }
        };
        if released {
            self.released.notify_waiters();
        }
        released
    }

    /// Current occupier.
    pub fn occupier(&self) -> Option<TrainId> {
        *lock(&self.occupier)
    }

    /// True if free or held by `train`.
    pub fn is_available_to(&self, train: TrainId) -> bool {
        (*lock(&self.occupier)).map_or(true, |holder| holder == train)
    }

    /// Forget the occupier regardless of who holds it.
    pub fn clear(&self) {
        *lock(&self.occupier) = None;
        self.released.notify_waiters();
    }

    /// Wait until the claim for `train` succeeds.
    pub async fn claim(&self, train: TrainId, poll: Duration) {
        loop {
            let released = self.released.notified();
            if self.try_claim(train) {
                return;
            }
            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

/// Result of a crossing detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrossingOutcome {
    /// The crossing was free and is now booked by the caller.
    Booked,
    /// The caller held the booking and has now freed it.
    Released,
    /// The caller must wait.
    Blocked {
        /// Train holding the booking, or `None` when the crossing is free
        /// but reserved for the train that last had to wait.
        holder: Option<TrainId>,
    },
}

#[derive(Debug, Default)]
struct CrossingState {
    booked_by: Option<TrainId>,
    last_stopped: Option<TrainId>,
}

impl CrossingState {
    fn try_book(&mut self, train: TrainId) -> Result<(), Option<TrainId>> {
        match (self.booked_by, self.last_stopped) {
            (Some(holder), _) if holder == train => Ok(()),
            (Some(holder), _) => {
                self.last_stopped.get_or_insert(train);
                Err(Some(holder))
            }
            (None, Some(waiting)) if waiting != train => Err(None),
            (None, _) => {
                self.booked_by = Some(train);
                if self.last_stopped == Some(train) {
                    self.last_stopped = None;
                }
                Ok(())
            }
        }
    }
}

/// Booking of one level crossing, with a one-step anti-starvation memory.
///
/// `last_stopped` remembers the train that most recently had to wait. While
/// it is set, a free crossing is held for that train: any other train is
/// refused until the waiting train books (which clears the record). This
/// keeps a train that just yielded from being blocked again by the same
/// opponent on its very next attempt.
#[derive(Debug, Default)]
pub struct CrossingReservation {
    state: Mutex<CrossingState>,
    released: Notify,
}

impl CrossingReservation {
    /// A free crossing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a crossing tile detection by `train`.
    ///
    /// The first detection books the crossing; the booking train's next
    /// detection (its exit tile) frees it.
    pub fn toggle(&self, train: TrainId) -> CrossingOutcome {
        let outcome = {
            let mut state = lock(&self.state);
            if state.booked_by == Some(train) {
                state.booked_by = None;
                CrossingOutcome::Released
            } else {
                match state.try_book(train) {
                    Ok(()) => CrossingOutcome::Booked,
                    Err(holder) => CrossingOutcome::Blocked { holder },
                }
            }
        };
        if outcome == CrossingOutcome::Released {
            self.released.notify_waiters();
        }
        outcome
    }

    /// Book for `train` without toggling. Succeeds if already booked by it.
    pub fn try_book(&self, train: TrainId) -> bool {
        lock(&self.state).try_book(train).is_ok()
    }

    /// Free the booking if `train` holds it.
    pub fn release(&self, train: TrainId) -> bool {
        let released = {
            let mut state = lock(&self.state);
            if state.booked_by == Some(train) {
                state.booked_by = None;
                true
            } else {
                false
            }
        };
        if released {
            self.released.notify_waiters();
        }
        released
    }

    /// Drop the anti-starvation record if it names `train`.
    pub fn withdraw(&self, train: TrainId) {
        let mut state = lock(&self.state);
        if state.last_stopped == Some(train) {
            state.last_stopped = None;
            drop(state);
            self.released.notify_waiters();
        }
    }

    /// Train holding the booking.
    pub fn booked_by(&self) -> Option<TrainId> {
        lock(&self.state).booked_by
    }

    /// Train that most recently had to wait.
    pub fn last_stopped(&self) -> Option<TrainId> {
        lock(&self.state).last_stopped
    }

    /// Forget the booking and the anti-starvation record.
    pub fn clear(&self) {
        *lock(&self.state) = CrossingState::default();
        self.released.notify_waiters();
    }

    /// Wait until `train` holds the booking.
    pub async fn book(&self, train: TrainId, poll: Duration) {
        loop {
            let released = self.released.notified();
            if self.try_book(train) {
                return;
            }
            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}
