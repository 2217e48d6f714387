//! Admission gate: a counting semaphore with in-flight instrumentation.
//!
//! One gate is built per wave. It caps how many agent calls are in flight
//! and records the highest concurrency it ever admitted, which the
//! orchestrator reports in [`crate::extract::RunStats`].

use crate::error::InvoiceError;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Semaphore,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionGate {
    /// A gate admitting at most `capacity` holders at once (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn admit(&self) -> Result<GatePermit<'_>, InvoiceError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| InvoiceError::Internal(format!("admission gate closed: {e}")))?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(GatePermit {
            gate: self,
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Holders admitted right now.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous holders seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Proof of admission. Decrements the in-flight count before the
/// semaphore slot is returned, so `in_flight() <= capacity()` always holds.
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a AdmissionGate,
    _permit: SemaphorePermit<'a>,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
