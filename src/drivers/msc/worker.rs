//! Storage worker
//!
//! Runs on the storage thread: applies card changes to the mount layer and
//! tells the rest of the system when storage has gone quiet.

use super::platform::{Platform, Slot};
use super::SdDriver;
use crate::time::{Tick, tick_before};
use core::sync::atomic::Ordering;

/// A debounced card change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEvent {
    Inserted(Slot),
    Removed(Slot),
}

impl StorageEvent {
    pub fn slot(self) -> Slot {
        match self {
            StorageEvent::Inserted(slot) | StorageEvent::Removed(slot) => slot,
        }
    }
}

/// Filesystem and system services above the driver
///
/// Volumes are named by storage drive number, see [`SdDriver::drive`].
pub trait MountHost {
    /// Release the drive's volumes, even if files are still open
    fn unmount(&mut self, drive: usize);

    /// Mount the drive's volumes, returning how many succeeded
    fn mount(&mut self, drive: usize) -> usize;

    /// Tell the system the set of mounted filesystems changed
    fn filesystem_changed(&mut self);

    /// Storage has been idle long enough to flush and spin things down
    fn storage_idle(&mut self);

    /// Confirm that storage is ready to be handed to the USB host
    fn usb_acknowledge(&mut self);

    /// Block until the USB cable is pulled
    fn wait_for_usb_disconnect(&mut self);
}

impl<P: Platform> SdDriver<P> {
    /// Apply one card change
    pub fn handle_event<H: MountHost + ?Sized>(&self, event: StorageEvent, host: &mut H) {
        let slot = event.slot();
        let drive = self.drive(slot);
        host.unmount(drive);

        {
            let mut state = self.slots[slot.index()].lock();
            state.card.initialized = false;
            if let StorageEvent::Inserted(_) = event {
                if let Err(e) = self.reinit_locked(slot, &mut state) {
                    log::warn!("MSC: slot {} not usable after insertion: {:?}", slot.index(), e);
                }
            }
        }

        let mut changed = matches!(event, StorageEvent::Removed(_));
        if self.present(slot) {
            changed |= host.mount(drive) > 0;
        }
        if changed {
            host.filesystem_changed();
        }
    }

    /// Periodic housekeeping
    ///
    /// Fires the idle notification once per quiet period. Before the first
    /// transfer the "never" stamp reads as tick -1, so storage stays quiet
    /// for the first idle period after boot.
    pub fn on_tick<H: MountHost + ?Sized>(&self, now: Tick, host: &mut H) {
        let last = self.last_activity.load(Ordering::Acquire);
        let busy = tick_before(now, last.wrapping_add(self.config.idle_ticks));

        if busy {
            self.idle_notified.store(false, Ordering::Release);
        } else if !self.idle_notified.swap(true, Ordering::AcqRel) {
            log::debug!("MSC: storage idle");
            host.storage_idle();
        }
    }

    /// The USB host takes over storage
    ///
    /// The worker acknowledges and then stays out of the way until the cable
    /// is pulled. Card changes posted meanwhile wait in the queue.
    pub fn on_usb_connected<H: MountHost + ?Sized>(&self, host: &mut H) {
        log::info!("MSC: storage handed to USB");
        host.usb_acknowledge();
        host.wait_for_usb_disconnect();
        log::info!("MSC: storage back from USB");
    }

    /// One pass of the worker loop: drain pending card changes, then
    /// housekeeping
    pub fn service<H: MountHost + ?Sized>(&self, now: Tick, host: &mut H) {
        #[cfg(feature = "hotswap")]
        while let Some(event) = self.next_event() {
            self.handle_event(event, host);
        }
        self.on_tick(now, host);
    }
}
