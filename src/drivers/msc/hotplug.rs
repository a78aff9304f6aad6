//! Card-detect debouncing
//!
//! A detect interrupt only arms the slot's one-shot timer. Every interrupt
//! bumps the slot's generation so a timer armed earlier is ignored when it
//! fires; the line is sampled once it has been stable for the whole debounce
//! interval and exactly one event is queued for the storage worker.

use super::platform::{CardChange, Platform, SLOT_COUNT, Slot};
use super::worker::StorageEvent;
use super::SdDriver;
use core::sync::atomic::{AtomicU32, Ordering};
use heapless::Deque;
use spin::Mutex;

/// Events the worker has not consumed yet
pub const EVENT_QUEUE_LEN: usize = 8;

/// Debounce bookkeeping plus the worker's event queue
pub struct HotplugMonitor {
    generation: [AtomicU32; SLOT_COUNT],
    events: Mutex<Deque<StorageEvent, EVENT_QUEUE_LEN>>,
}

impl HotplugMonitor {
    pub const fn new() -> Self {
        Self {
            generation: [const { AtomicU32::new(0) }; SLOT_COUNT],
            events: Mutex::new(Deque::new()),
        }
    }

    /// Start a new debounce generation and return its token
    fn bump(&self, slot: Slot) -> u32 {
        self.generation[slot.index()]
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    fn is_current(&self, slot: Slot, token: u32) -> bool {
        self.generation[slot.index()].load(Ordering::Acquire) == token
    }

    fn post(&self, event: StorageEvent) {
        if self.events.lock().push_back(event).is_err() {
            log::warn!("MSC: event queue full, dropping {:?}", event);
        }
    }

    fn take(&self) -> Option<StorageEvent> {
        self.events.lock().pop_front()
    }
}

impl Default for HotplugMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> SdDriver<P> {
    /// Card-detect interrupt handler
    ///
    /// Safe to call from interrupt context: it only re-arms the debounce
    /// timer, superseding any timer still pending for the slot.
    pub fn on_detect_interrupt(&self, slot: Slot) {
        let token = self.hotplug.bump(slot);
        self.platform.arm_debounce(slot, self.config.debounce_ticks, token);
    }

    /// Debounce timer callback
    pub fn on_debounce_expired(&self, slot: Slot, token: u32) {
        if !self.hotplug.is_current(slot, token) {
            log::trace!("MSC: stale debounce {} on slot {}", token, slot.index());
            return;
        }

        let present = self.platform.card_detect(slot);
        let (event, next) = if present {
            (StorageEvent::Inserted(slot), CardChange::Removal)
        } else {
            (StorageEvent::Removed(slot), CardChange::Insertion)
        };
        log::debug!("MSC: {:?}", event);

        self.hotplug.post(event);
        self.platform.arm_card_detect(slot, next);
    }

    /// Next debounced card change, if any
    pub fn next_event(&self) -> Option<StorageEvent> {
        self.hotplug.take()
    }
}
