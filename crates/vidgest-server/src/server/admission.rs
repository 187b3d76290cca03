//! Admission control for incoming upload calls.
//!
//! [`IngestAdmission`] gates persistence behind a bounded in-flight counter.
//! The decision is made once per call, before any chunk is read, and is
//! independent of file size.
//!
//! The check-and-increment is a single compare-and-swap, so concurrent calls
//! can never push `in_flight` past `max_in_flight`. An accepted call holds an
//! [`AdmissionPermit`]; the permit gives its slot back exactly once, whether
//! released explicitly on completion or dropped on an error or cancellation
//! path.

use portable_atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounded in-flight counter shared by all concurrent upload calls.
#[derive(Debug)]
pub struct IngestAdmission {
    in_flight: AtomicUsize,
    max_in_flight: usize,
    total_rejected: AtomicU64,
}

impl IngestAdmission {
    pub const fn new(max_in_flight: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight,
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Admits a call if a slot is free.
    ///
    /// Returns `None` (and bumps `total_rejected`) when `in_flight` has
    /// reached `max_in_flight`.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        let max = self.max_in_flight;
        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok();

        if admitted {
            Some(AdmissionPermit {
                admission: Arc::clone(self),
                released: AtomicBool::new(false),
            })
        } else {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub const fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }

    fn release_slot(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "admission slot released twice");
    }
}

/// Proof that a call was admitted. Holds one in-flight slot until released.
#[derive(Debug)]
#[must_use = "dropping the permit releases the admission slot immediately"]
pub struct AdmissionPermit {
    admission: Arc<IngestAdmission>,
    released: AtomicBool,
}

impl AdmissionPermit {
    /// Returns the slot to the pool.
    ///
    /// Safe to call from several completion paths; only the first call
    /// decrements `in_flight`.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.admission.release_slot();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release();
    }
}
