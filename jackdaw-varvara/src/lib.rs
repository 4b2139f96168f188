//! Peripheral devices for the jackdaw Uxn machine
//!
//! [`Varvara`] bundles the individual peripherals behind a single
//! [`Device`], routing each port access on the top nibble of its address.
#![warn(missing_docs)]
use log::warn;

mod console;
mod datetime;
mod system;

pub use console::Console;

use uxn::{Device, Ports, Uxn};

/// The full set of peripherals
pub struct Varvara {
    system: system::System,
    console: console::Console,
    datetime: datetime::Datetime,

    /// Flags indicating if we've already warned about an unclaimed device
    already_warned: [bool; 16],
}

impl Default for Varvara {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Varvara {
    fn deo(&mut self, vm: &mut Uxn, target: u8) {
        match target & 0xF0 {
            system::SystemPorts::BASE => self.system.deo(vm, target),
            console::ConsolePorts::BASE => self.console.deo(vm, target),
            datetime::DatetimePorts::BASE => self.datetime.deo(vm, target),
            t => self.warn_missing(t),
        }
    }
    fn dei(&mut self, vm: &mut Uxn, target: u8) {
        match target & 0xF0 {
            system::SystemPorts::BASE => self.system.dei(vm, target),
            console::ConsolePorts::BASE => self.console.dei(vm, target),
            datetime::DatetimePorts::BASE => self.datetime.dei(vm, target),
            t => self.warn_missing(t),
        }
    }
}

impl Varvara {
    /// Builds the peripheral set, with the console on the process streams
    pub fn new() -> Self {
        Self::with_console(Console::new())
    }

    /// Builds the peripheral set around the given console
    pub fn with_console(console: Console) -> Self {
        Self {
            system: system::System::default(),
            console,
            datetime: datetime::Datetime,
            already_warned: [false; 16],
        }
    }

    /// Unclaimed device slots behave as plain 16-byte port storage: reads
    /// return whatever was last stored and writes have no side effect.  The
    /// first touch of each slot is logged.
    fn warn_missing(&mut self, t: u8) {
        if !self.already_warned[usize::from(t >> 4)] {
            warn!("no device at {t:#04x}; treating its ports as storage");
            self.already_warned[usize::from(t >> 4)] = true;
        }
    }
}
