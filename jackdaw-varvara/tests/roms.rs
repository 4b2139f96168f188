//! End-to-end tests running hand-assembled ROMs through the peripherals
use std::sync::{Arc, Mutex};

use jackdaw_varvara::{Console, Varvara};
use uxn::{Uxn, UxnRam};

/// Shared byte sink standing in for stdout/stderr
#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Sink {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.lock().unwrap())
    }
}

/// `LIT 01 ; LIT 0f ; DEO`, the System halt sequence
const HALT: [u8; 5] = [0x80, 0x01, 0x80, 0x0f, 0x17];

fn rom_with_halt(body: &[u8]) -> Vec<u8> {
    let mut rom = body.to_vec();
    rom.extend_from_slice(&HALT);
    rom
}

#[test]
fn console_write_reaches_stdout() {
    let mut body = vec![];
    for c in b"hi\n" {
        body.extend_from_slice(&[0x80, *c, 0x80, 0x18, 0x17]);
    }
    let rom = rom_with_halt(&body);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let (out, err) = (Sink::default(), Sink::default());
    let mut dev =
        Varvara::with_console(Console::with_writers(out.clone(), err.clone()));
    vm.run(&mut dev).unwrap();

    assert!(vm.halted());
    assert_eq!(out.take(), b"hi\n");
    assert!(err.take().is_empty());
}

#[test]
fn console_error_reaches_stderr() {
    // LIT '!' ; LIT 19 ; DEO
    let rom = rom_with_halt(&[0x80, b'!', 0x80, 0x19, 0x17]);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let (out, err) = (Sink::default(), Sink::default());
    let mut dev =
        Varvara::with_console(Console::with_writers(out.clone(), err.clone()));
    vm.run(&mut dev).unwrap();

    assert!(out.take().is_empty());
    assert_eq!(err.take(), b"!");
}

#[test]
fn system_halt_stops_the_run_loop() {
    // The halt write comes first; the trailing ADD would fault if the
    // machine kept going.
    let mut rom = HALT.to_vec();
    rom.push(0x18);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let mut dev = Varvara::default();
    vm.run(&mut dev).unwrap();

    assert!(vm.halted());
    assert_eq!(vm.pc(), 0x0105);
}

#[test]
fn working_stack_pointer_is_readable() {
    // LIT2 aabb ; LIT 02 ; DEI -- the pointer is sampled after the port
    // byte is popped
    let rom = rom_with_halt(&[0xa0, 0xaa, 0xbb, 0x80, 0x02, 0x16]);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let mut dev = Varvara::default();
    vm.run(&mut dev).unwrap();

    assert_eq!(vm.stack().bytes(), [0xaa, 0xbb, 0x02]);
}

#[test]
fn return_stack_pointer_is_readable() {
    // LITr 77 ; LIT 03 ; DEI
    let rom = rom_with_halt(&[0xc0, 0x77, 0x80, 0x03, 0x16]);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let mut dev = Varvara::default();
    vm.run(&mut dev).unwrap();

    assert_eq!(vm.ret().bytes(), [0x77]);
    assert_eq!(vm.stack().bytes(), [0x01]);
}

#[test]
fn writing_the_stack_pointer_rewrites_depth() {
    // LIT2 aabb ; LIT 00 ; LIT 02 ; DEO drops the whole working stack
    let rom = rom_with_halt(&[0xa0, 0xaa, 0xbb, 0x80, 0x00, 0x80, 0x02, 0x17]);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let mut dev = Varvara::default();
    vm.run(&mut dev).unwrap();

    assert!(vm.halted());
    assert!(vm.stack().is_empty());
}

#[test]
fn unclaimed_devices_act_as_storage() {
    // LIT ab ; LIT 80 ; DEO ; LIT 80 ; DEI -- the Controller slot has no
    // device installed, so the byte just sits in port memory
    let rom = rom_with_halt(&[0x80, 0xab, 0x80, 0x80, 0x17, 0x80, 0x80, 0x16]);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let mut dev = Varvara::default();
    vm.run(&mut dev).unwrap();

    assert_eq!(vm.stack().bytes(), [0xab]);
}

#[test]
fn datetime_year_is_plausible() {
    // DEI2 at c0 reads the year as a short
    let rom = rom_with_halt(&[0x80, 0xc0, 0x36]);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let mut dev = Varvara::default();
    vm.run(&mut dev).unwrap();

    let b = vm.stack().bytes();
    let year = u16::from_be_bytes([b[0], b[1]]);
    assert!((2020..3000).contains(&year), "implausible year {year}");
}

#[test]
fn debug_dump_leaves_the_stacks_alone() {
    // LIT2 aabb ; LIT 01 ; LIT 0e ; DEO
    let rom = rom_with_halt(&[0xa0, 0xaa, 0xbb, 0x80, 0x01, 0x80, 0x0e, 0x17]);

    let mut ram = UxnRam::new();
    let mut vm = Uxn::new(&mut ram);
    vm.reset(&rom);
    let mut dev = Varvara::default();
    vm.run(&mut dev).unwrap();

    assert_eq!(vm.stack().bytes(), [0xaa, 0xbb]);
}
