//! Arbitration of the SPI bus shared by the display and the flash chip.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use portable_atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BusMode {
    Idle = 0,
    Lcd = 1,
    Flash = 2,
}

pub struct SpiBus(AtomicU8);

impl SpiBus {
    pub const fn new() -> Self {
        Self(AtomicU8::new(BusMode::Idle as u8))
    }

    pub fn mode(&self) -> BusMode {
        BusMode::try_from(self.0.load(Ordering::Acquire)).unwrap_or(BusMode::Idle)
    }

    pub fn is_idle(&self) -> bool {
        self.mode() == BusMode::Idle
    }

    /// Claim the bus for `mode` if nobody holds it.
    ///
    /// The bus is switched back to idle when the guard is dropped. A task must
    /// not hold on to any assumption about the bus after releasing it.
    pub fn try_acquire(&self, mode: BusMode) -> Option<BusGuard<'_>> {
        if mode == BusMode::Idle {
            return None;
        }

        self.0
            .compare_exchange(
                BusMode::Idle as u8,
                mode as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| BusGuard { bus: self, mode })
    }
}

impl Default for SpiBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the bus is held in a given mode.
#[must_use]
pub struct BusGuard<'a> {
    bus: &'a SpiBus,
    mode: BusMode,
}

impl BusGuard<'_> {
    pub fn mode(&self) -> BusMode {
        self.mode
    }
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        self.bus.0.store(BusMode::Idle as u8, Ordering::Release);
    }
}

impl core::fmt::Debug for BusGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("BusGuard({:?})", self.mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_owner() {
        let bus = SpiBus::new();

        let guard = bus.try_acquire(BusMode::Flash).unwrap();
        assert_eq!(bus.mode(), BusMode::Flash);
        assert!(bus.try_acquire(BusMode::Lcd).is_none());
        assert!(bus.try_acquire(BusMode::Flash).is_none());

        drop(guard);
        assert!(bus.is_idle());

        let guard = bus.try_acquire(BusMode::Lcd).unwrap();
        assert_eq!(guard.mode(), BusMode::Lcd);
    }

    #[test]
    fn released_on_early_return() {
        fn fails(bus: &SpiBus) -> Result<(), ()> {
            let _guard = bus.try_acquire(BusMode::Flash).ok_or(())?;
            Err(())
        }

        let bus = SpiBus::new();
        assert!(fails(&bus).is_err());
        assert!(bus.is_idle());
    }

    #[test]
    fn idle_is_not_a_claim() {
        let bus = SpiBus::new();
        assert!(bus.try_acquire(BusMode::Idle).is_none());
    }
}
