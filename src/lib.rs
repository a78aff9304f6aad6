//! pmpfw - storage and bus drivers for a portable media player firmware
//!
//! The centrepiece is the SD card driver in [`drivers::msc`]: command and
//! response handling, card identification, DMA sector transfers and
//! card-detect hot-plugging for the player's two card sockets. Everything
//! board specific is reached through traits, so the drivers build and are
//! tested on the host against a simulated board.

#![cfg_attr(not(test), no_std)]

pub mod drivers;
pub mod logger;
pub mod time;

/// Global panic handler
#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    loop {
        core::hint::spin_loop();
    }
}
