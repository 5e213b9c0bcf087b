//! Handing over control from the bootloader to the image in the primary slot.

#[cfg(feature = "cortex_m")]
pub mod cortex_m;

/// Jump into an image once the swap has put it in place.
///
/// Implementations may reset peripheral state the bootloader touched before jumping.
pub trait Boot {
    /// Start executing the image at `addr`, the first word of the primary slot.
    ///
    /// # Safety
    /// The primary slot must hold an image for this platform. Control never returns.
    unsafe fn boot(addr: *const u32) -> !;
}
