//! Operating-hour accounting.

use tracing::{info, warn};

use crate::{error::BridgeError, ports::CounterStore, types::status_is_burning};

const HOURS_EPSILON: f32 = 0.01;
const MS_PER_HOUR: f32 = 3_600_000.0;

/// Values that moved enough to be worth publishing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuntimeUpdate {
    pub total_hours: Option<f32>,
    pub session_hours: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct RuntimeCounters {
    save_interval_ms: u64,
    status_stale_ms: u64,
    total_hours: f32,
    session_hours: f32,
    published_total: Option<f32>,
    published_session: Option<f32>,
    dirty: bool,
    last_advance_ms: Option<u64>,
    last_save_ms: Option<u64>,
    /// End of the window the last burning report vouches for.
    burning_until_ms: Option<u64>,
}

impl RuntimeCounters {
    pub fn new(save_interval_ms: u64, status_stale_ms: u64) -> Self {
        Self {
            save_interval_ms,
            status_stale_ms,
            total_hours: 0.0,
            session_hours: 0.0,
            published_total: None,
            published_session: None,
            dirty: false,
            last_advance_ms: None,
            last_save_ms: None,
            burning_until_ms: None,
        }
    }

    pub fn total_hours(&self) -> f32 {
        self.total_hours
    }

    pub fn session_hours(&self) -> f32 {
        self.session_hours
    }

    /// Restore the persisted total. An unavailable store leaves the counter
    /// at zero for this session.
    pub fn load(&mut self, store: &mut impl CounterStore) -> Result<(), BridgeError> {
        match store.load() {
            Ok(Some(hours)) if hours.is_finite() && hours >= 0.0 => {
                info!("Restored runtime counter: {:.2} h", hours);
                self.total_hours = hours;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(err) => {
                warn!("{}; runtime counter starts at zero", err);
                self.total_hours = 0.0;
                Err(err)
            }
        }
    }

    /// Record a heater status report. Time up to `now_ms` is credited under
    /// the previous report; a burning report covers at most the stale window
    /// that follows it.
    pub fn note_status(&mut self, now_ms: u64, status_code: u16) {
        self.advance(now_ms);
        self.burning_until_ms = status_is_burning(status_code)
            .then(|| now_ms.saturating_add(self.status_stale_ms));
    }

    /// Accumulate elapsed time covered by a fresh burning report.
    pub fn advance(&mut self, now_ms: u64) {
        if let (Some(last), Some(until)) = (self.last_advance_ms, self.burning_until_ms) {
            let end = now_ms.min(until);
            if end > last {
                let hours = (end - last) as f32 / MS_PER_HOUR;
                self.total_hours += hours;
                self.session_hours += hours;
                self.dirty = true;
            }
        }
        self.last_advance_ms = Some(now_ms);
    }

    /// Values to publish: those that changed beyond the epsilon, or both when
    /// `force` is set.
    pub fn pending_publish(&mut self, force: bool) -> RuntimeUpdate {
        RuntimeUpdate {
            total_hours: take_changed(&mut self.published_total, self.total_hours, force),
            session_hours: take_changed(&mut self.published_session, self.session_hours, force),
        }
    }

    /// Persist at the save cadence while there is unsaved progress. A failed
    /// save is retried on the next interval.
    pub fn maybe_save(
        &mut self,
        now_ms: u64,
        store: &mut impl CounterStore,
    ) -> Result<(), BridgeError> {
        if !self.dirty {
            return Ok(());
        }
        let last = *self.last_save_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(last) < self.save_interval_ms {
            return Ok(());
        }
        self.last_save_ms = Some(now_ms);
        store.save(self.total_hours)?;
        self.dirty = false;
        Ok(())
    }
}

fn take_changed(published: &mut Option<f32>, value: f32, force: bool) -> Option<f32> {
    let changed = match *published {
        Some(last) => (last - value).abs() >= HOURS_EPSILON,
        None => true,
    };
    if force || changed {
        *published = Some(value);
        Some(value)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::fake::SharedStore;

    const HOUR_MS: u64 = 3_600_000;
    const NEVER_STALE: u64 = u64::MAX;

    #[test]
    fn counts_only_while_burning() {
        let mut counters = RuntimeCounters::new(60_000, NEVER_STALE);
        counters.note_status(0, 0x0001);
        counters.note_status(HOUR_MS, 0x0300);
        counters.advance(HOUR_MS + HOUR_MS / 2);
        counters.note_status(2 * HOUR_MS, 0x0001);
        counters.advance(3 * HOUR_MS);

        assert!((counters.total_hours() - 1.0).abs() < 1e-4);
        assert!((counters.session_hours() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn burning_report_after_gap_credits_nothing_before_it() {
        let mut counters = RuntimeCounters::new(60_000, NEVER_STALE);
        counters.advance(0);
        counters.note_status(3 * HOUR_MS, 0x0201);
        counters.advance(3 * HOUR_MS);
        assert_eq!(counters.total_hours(), 0.0);

        counters.advance(3 * HOUR_MS + HOUR_MS / 2);
        assert!((counters.total_hours() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn stale_burning_report_stops_counting() {
        let mut counters = RuntimeCounters::new(60_000, 10_000);
        counters.note_status(0, 0x0300);
        counters.advance(5_000);
        counters.advance(HOUR_MS);

        let expected = 10_000.0 / MS_PER_HOUR;
        assert!((counters.total_hours() - expected).abs() < 1e-6);

        // A fresh report resumes counting from its own arrival.
        counters.note_status(2 * HOUR_MS, 0x0300);
        counters.advance(2 * HOUR_MS + 4_000);
        let expected = 14_000.0 / MS_PER_HOUR;
        assert!((counters.total_hours() - expected).abs() < 1e-6);
    }

    #[test]
    fn resumes_from_store() {
        let mut store = SharedStore::default();
        *store.hours.borrow_mut() = Some(12.5);
        let mut counters = RuntimeCounters::new(60_000, NEVER_STALE);
        counters.load(&mut store).unwrap();

        counters.note_status(0, 0x0300);
        counters.advance(HOUR_MS);
        assert!((counters.total_hours() - 13.5).abs() < 1e-3);
        assert!((counters.session_hours() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn unavailable_store_starts_at_zero() {
        let mut store = SharedStore {
            unavailable: true,
            ..SharedStore::default()
        };
        let mut counters = RuntimeCounters::new(60_000, NEVER_STALE);
        assert!(matches!(
            counters.load(&mut store),
            Err(BridgeError::StorageUnavailable(_))
        ));
        assert_eq!(counters.total_hours(), 0.0);
    }

    #[test]
    fn saves_at_bounded_cadence() {
        let mut store = SharedStore::default();
        let mut counters = RuntimeCounters::new(60_000, NEVER_STALE);
        counters.note_status(0, 0x0300);

        for now in (10..=120_000).step_by(10) {
            counters.advance(now);
            counters.maybe_save(now, &mut store).unwrap();
        }
        // First dirty tick at 10 ms arms the timer; saves at 60010 and 120010
        // would follow, the second is just outside the loop.
        assert_eq!(*store.saves.borrow(), 1);
        assert!(store.hours.borrow().is_some());
    }

    #[test]
    fn nothing_saved_when_clean() {
        let mut store = SharedStore::default();
        let mut counters = RuntimeCounters::new(0, NEVER_STALE);
        counters.maybe_save(1_000, &mut store).unwrap();
        assert_eq!(*store.saves.borrow(), 0);
    }

    #[test]
    fn publishes_on_epsilon_change() {
        let mut counters = RuntimeCounters::new(60_000, NEVER_STALE);
        let first = counters.pending_publish(false);
        assert_eq!(first.total_hours, Some(0.0));
        assert_eq!(counters.pending_publish(false), RuntimeUpdate::default());

        counters.note_status(0, 0x0300);
        counters.advance(HOUR_MS / 1000);
        assert_eq!(counters.pending_publish(false), RuntimeUpdate::default());

        counters.advance(HOUR_MS / 50);
        assert!(counters.pending_publish(false).total_hours.is_some());
        assert!(counters.pending_publish(true).session_hours.is_some());
    }
}
