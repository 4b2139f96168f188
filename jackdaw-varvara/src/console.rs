use std::io::Write;
use std::mem::offset_of;
use uxn::{Ports, Uxn};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// The Console device, mapping its two write ports onto a pair of streams
///
/// Bytes are flushed as they arrive, so output interleaves correctly with
/// anything else the host prints.
pub struct Console {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
}

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct ConsolePorts {
    _pad: [u8; 8],
    write: u8,
    error: u8,
    _rest: [u8; 6],
}

impl Ports for ConsolePorts {
    const BASE: u8 = 0x10;
}

impl ConsolePorts {
    const WRITE: u8 = Self::BASE | offset_of!(Self, write) as u8;
    const ERROR: u8 = Self::BASE | offset_of!(Self, error) as u8;
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Builds a console bound to the process's standard streams
    pub fn new() -> Self {
        Self::with_writers(std::io::stdout(), std::io::stderr())
    }

    /// Builds a console writing to the given streams instead
    pub fn with_writers<O, E>(out: O, err: E) -> Self
    where
        O: Write + Send + 'static,
        E: Write + Send + 'static,
    {
        Self {
            out: Box::new(out),
            err: Box::new(err),
        }
    }

    /// Emits the freshly written byte if the port is one of the two streams
    pub fn deo(&mut self, vm: &mut Uxn, target: u8) {
        let v = vm.dev::<ConsolePorts>();
        match target {
            ConsolePorts::WRITE => {
                let c = v.write;
                self.out.write_all(&[c]).unwrap();
                self.out.flush().unwrap();
            }
            ConsolePorts::ERROR => {
                let c = v.error;
                self.err.write_all(&[c]).unwrap();
                self.err.flush().unwrap();
            }
            _ => (),
        }
    }

    /// Reads return whatever the ports hold; nothing to refresh
    pub fn dei(&mut self, _vm: &mut Uxn, _target: u8) {}
}
