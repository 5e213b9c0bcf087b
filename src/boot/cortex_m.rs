use crate::{boot::Boot, log};

/// Jump straight to the vector table of the image, leaving all core state as is.
pub struct SimpleCortexM;

impl Boot for SimpleCortexM {
    unsafe fn boot(addr: *const u32) -> ! {
        unsafe { cortex_m::asm::bootload(addr) }
    }
}

/// Disable and clear all interrupts the bootloader may have enabled, then jump to the image.
pub struct CleanCortexM;

impl Boot for CleanCortexM {
    unsafe fn boot(addr: *const u32) -> ! {
        log::debug!("Clearing interrupts before jumping to {}", addr as u32);

        unsafe {
            cortex_m::interrupt::disable();

            let nvic = &*cortex_m::peripheral::NVIC::PTR;
            for clear_enable in &nvic.icer {
                clear_enable.write(u32::MAX);
            }
            for clear_pending in &nvic.icpr {
                clear_pending.write(u32::MAX);
            }

            cortex_m::interrupt::enable();

            cortex_m::asm::dsb();
            cortex_m::asm::isb();

            cortex_m::asm::bootload(addr)
        }
    }
}
