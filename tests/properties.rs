//! Property-based tests for reservations, ramps and the sensor filter.

use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;

use trainz_autopilot::reservation::{CrossingOutcome, CrossingReservation, Reservation};
use trainz_autopilot::{power_sequence, Color, RampError, SensorEventFilter, TrainId};

fn train() -> impl Strategy<Value = TrainId> {
    (1u8..=3).prop_map(TrainId::new)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // ========================================================================
    // Reservations
    // ========================================================================

    #[test]
    fn concurrent_claims_never_overlap(threads in 2usize..=4, rounds in 50usize..300) {
        let sector = Reservation::new();
        let inside = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for t in 0..threads {
                let (sector, inside, peak) = (&sector, &inside, &peak);
                s.spawn(move || {
                    let id = TrainId::new(t as u8 + 1);
                    for _ in 0..rounds {
                        if sector.try_claim(id) {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            std::thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            assert!(sector.release(id));
                        }
                    }
                });
            }
        });

        prop_assert_eq!(peak.load(Ordering::SeqCst), 1);
        prop_assert_eq!(sector.occupier(), None);
    }

    #[test]
    fn sector_claims_follow_holder(ops in prop::collection::vec((train(), any::<bool>()), 1..60)) {
        let sector = Reservation::new();
        let mut holder: Option<TrainId> = None;

        for (t, claim) in ops {
            if claim {
                let ok = sector.try_claim(t);
                prop_assert_eq!(ok, holder.is_none() || holder == Some(t));
                if ok {
                    holder = Some(t);
                }
            } else {
                let released = sector.release(t);
                prop_assert_eq!(released, holder == Some(t));
                if released {
                    holder = None;
                }
            }
            prop_assert_eq!(sector.occupier(), holder);
        }
    }

    #[test]
    fn crossing_favours_the_train_that_waited(toggles in prop::collection::vec(train(), 1..80)) {
        let crossing = CrossingReservation::new();

        for t in toggles {
            let (booked, stopped) = (crossing.booked_by(), crossing.last_stopped());
            match crossing.toggle(t) {
                CrossingOutcome::Booked => {
                    prop_assert_eq!(booked, None);
                    prop_assert!(stopped.is_none() || stopped == Some(t));
                    prop_assert_eq!(crossing.booked_by(), Some(t));
                    prop_assert_ne!(crossing.last_stopped(), Some(t));
                }
                CrossingOutcome::Released => {
                    prop_assert_eq!(booked, Some(t));
                    prop_assert_eq!(crossing.booked_by(), None);
                    prop_assert_eq!(crossing.last_stopped(), stopped);
                }
                CrossingOutcome::Blocked { holder } => {
                    prop_assert_ne!(booked, Some(t));
                    prop_assert_eq!(holder, booked);
                    prop_assert!(crossing.last_stopped().is_some());
                    prop_assert_eq!(crossing.booked_by(), booked);
                }
            }
        }
    }

    // ========================================================================
    // Ramps
    // ========================================================================

    #[test]
    fn ramp_steps_are_monotone_and_sign_consistent(current in -10i8..=10, target in -10i8..=10) {
        match power_sequence(current, target) {
            Err(RampError::SignConflict { .. }) => {
                prop_assert!(current != 0 && target != 0);
                prop_assert_ne!(current.signum(), target.signum());
            }
            Err(e) => prop_assert!(false, "unexpected error: {e}"),
            Ok(steps) => {
                prop_assert_eq!(steps.first().copied(), Some(current));
                prop_assert_eq!(steps.last().copied(), Some(target));
                prop_assert_eq!(steps.len(), usize::from(current.abs_diff(target)) + 1);
                for pair in steps.windows(2) {
                    prop_assert_eq!(pair[0].abs_diff(pair[1]), 1);
                }
                let sign = if current != 0 { current.signum() } else { target.signum() };
                prop_assert!(steps.iter().all(|&s| s == 0 || s.signum() == sign));
            }
        }
    }

    #[test]
    fn out_of_range_targets_are_rejected(current in -10i8..=10, target in 11i8..=i8::MAX) {
        prop_assert!(matches!(power_sequence(current, target), Err(RampError::OutOfRange(_))));
        prop_assert!(matches!(power_sequence(current, -target), Err(RampError::OutOfRange(_))));
    }

    // ========================================================================
    // Sensor filter
    // ========================================================================

    #[test]
    fn forwarded_detections_are_spaced_by_the_window(
        debounce in 0u64..1500,
        gaps in prop::collection::vec(0u64..2000, 1..40),
    ) {
        let mut filter = SensorEventFilter::new(debounce);
        let id = TrainId::new(1);
        let mut now = 0;
        let mut last: Option<u64> = None;

        for gap in gaps {
            now += gap;
            let forwarded = filter.filter(id, Color::Blue, now).is_some();
            match last {
                Some(t) if now - t <= debounce => prop_assert!(!forwarded),
                _ => {
                    prop_assert!(forwarded);
                    last = Some(now);
                }
            }
        }
    }
}
