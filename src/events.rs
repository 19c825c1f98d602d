//! In-process mutation notifications.

use crate::geometry::Cell;
use crate::marker::{Marker, OwnerId};
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationEvent {
    Created(Marker),
    Updated(Marker),
    Deleted(Marker),
    BulkDeleted { owner: OwnerId, markers: Vec<Marker> },
}

impl MutationEvent {
    /// Cells whose occupancy may have changed.
    pub fn cells(&self) -> Vec<Cell> {
        match self {
            MutationEvent::Created(marker)
            | MutationEvent::Updated(marker)
            | MutationEvent::Deleted(marker) => vec![marker.cell()],
            MutationEvent::BulkDeleted { markers, .. } => {
                markers.iter().map(Marker::cell).collect()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MutationEvent::Created(_) => "created",
            MutationEvent::Updated(_) => "updated",
            MutationEvent::Deleted(_) => "deleted",
            MutationEvent::BulkDeleted { .. } => "bulk_deleted",
        }
    }
}

/// Receives every published event. Implementations must not publish from `notify`.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    fn notify(&self, event: &MutationEvent) -> Result<()>;
}

/// Delivers events to every subscriber, synchronously and in publish order.
#[derive(Default)]
pub struct MutationEventBus {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
    delivery: Mutex<()>,
    generation: AtomicU64,
}

impl MutationEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of events published so far; changes whenever the marker set may have.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Publishes `event`, returning how many subscribers accepted it.
    ///
    /// A subscriber that errors or panics is logged and skipped.
    pub fn publish(&self, event: &MutationEvent) -> usize {
        let subscribers = self.subscribers.read().clone();
        let _order = self.delivery.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| subscriber.notify(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        subscriber = subscriber.name(),
                        event = event.kind(),
                        error = %e,
                        "Subscriber failed"
                    );
                }
                Err(_) => {
                    error!(
                        subscriber = subscriber.name(),
                        event = event.kind(),
                        "Subscriber panicked"
                    );
                }
            }
        }
        delivered
    }
}
