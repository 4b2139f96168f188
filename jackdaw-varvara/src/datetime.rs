use chrono::{Datelike, Local, Timelike};
use uxn::{Ports, Uxn};
use zerocopy::{AsBytes, BigEndian, FromBytes, FromZeroes, U16};

/// The Datetime device, reporting local wall-clock time
pub struct Datetime;

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct DatetimePorts {
    year: U16<BigEndian>,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    dotw: u8,
    doty: U16<BigEndian>,
    isdst: u8,
    _pad: [u8; 5],
}

impl Ports for DatetimePorts {
    const BASE: u8 = 0xc0;
}

impl Datetime {
    /// Refreshes every field on any read; the CPU then picks out the bytes
    /// it asked for.  Month and day-of-year are zero-based, day-of-week
    /// counts from Sunday.
    pub fn dei(&mut self, vm: &mut Uxn, _target: u8) {
        let now = Local::now();
        let p = vm.dev_mut::<DatetimePorts>();
        p.year.set(now.year() as u16);
        p.month = now.month0() as u8;
        p.day = now.day() as u8;
        p.hour = now.hour() as u8;
        p.minute = now.minute() as u8;
        p.second = now.second() as u8;
        p.dotw = now.weekday().num_days_from_sunday() as u8;
        p.doty.set(now.ordinal0() as u16);
        p.isdst = 0;
    }

    pub fn deo(&mut self, _vm: &mut Uxn, _target: u8) {
        // The clock is read-only
    }
}
