use std::mem::offset_of;
use uxn::{Ports, Uxn};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// The System device: stack-pointer access, debug inspection, and halting
#[derive(Default)]
pub struct System;

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C)]
pub struct SystemPorts {
    _unused: [u8; 2],
    wst: u8,
    rst: u8,
    _storage: [u8; 10],
    debug: u8,
    state: u8,
}

impl Ports for SystemPorts {
    const BASE: u8 = 0x00;
}

impl SystemPorts {
    const WST: u8 = offset_of!(Self, wst) as u8;
    const RST: u8 = offset_of!(Self, rst) as u8;
    const DEBUG: u8 = offset_of!(Self, debug) as u8;
    const STATE: u8 = offset_of!(Self, state) as u8;
}

impl System {
    pub fn deo(&mut self, vm: &mut Uxn, target: u8) {
        let v = vm.dev::<SystemPorts>();
        match target {
            // The raw byte becomes the new stack pointer, as-is
            SystemPorts::WST => {
                let wst = v.wst;
                vm.stack_mut().set_len(wst);
            }
            SystemPorts::RST => {
                let rst = v.rst;
                vm.ret_mut().set_len(rst);
            }
            SystemPorts::DEBUG => {
                for (name, st) in [("WST", vm.stack()), ("RST", vm.ret())] {
                    eprintln!("{name} {:02x?}", st.bytes());
                }
            }
            SystemPorts::STATE => vm.halt(),
            _ => (),
        }
    }

    pub fn dei(&mut self, vm: &mut Uxn, target: u8) {
        match target {
            SystemPorts::WST => {
                let wst = vm.stack().len();
                vm.dev_mut::<SystemPorts>().wst = wst;
            }
            SystemPorts::RST => {
                let rst = vm.ret().len();
                vm.dev_mut::<SystemPorts>().rst = rst;
            }
            _ => (),
        }
    }
}
