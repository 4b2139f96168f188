//! Uxn virtual machine
//!
//! The machine is a pure interpreter: a 64 KiB address space, two fallible
//! 255-byte stacks, a 256-byte device port plane, and a fetch-decode-execute
//! loop over 32 base opcodes with three modifier bits (keep, return, short).
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Size of a single device in port memory
pub const DEV_SIZE: usize = 16;

/// Page of memory where program execution begins
pub const PAGE_PROGRAM: u16 = 0x0100;

/// Identifies which of the two machine stacks an operation touched
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    /// The working stack, conventionally holding operands
    Working,
    /// The return stack, conventionally holding call-return addresses
    Return,
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Role::Working => write!(f, "working"),
            Role::Return => write!(f, "return"),
        }
    }
}

/// Fatal machine faults
///
/// Any fault aborts the instruction that raised it; there is no recovery
/// inside the core.  Stack faults name the stack whose pointer tripped.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum UxnError {
    /// Pop from a stack with insufficient depth
    #[error("stack underflow on the {0} stack")]
    StackUnderflow(Role),

    /// Push onto a stack at capacity
    #[error("stack overflow on the {0} stack")]
    StackOverflow(Role),

    /// `DIV` with a zero divisor
    #[error("division by zero on the {0} stack")]
    DivideByZero(Role),

    /// A five-bit opcode outside the dispatch table
    ///
    /// Unreachable by construction (the mask covers every table entry), but
    /// kept so the dispatcher's default arm is a recognizable fault rather
    /// than a panic.
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
}

/// One of the machine's two LIFO stacks
///
/// The buffer holds 256 bytes but capacity is 255: a byte push fails once
/// the pointer reaches 255, and a short push fails at 254, so the pointer
/// itself always fits in a `u8`.  Shorts are stored big-endian, high byte
/// at the lower index.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stack {
    data: [u8; 256],

    /// Count of live bytes; the top of the stack is at `ptr - 1`
    ptr: u8,

    role: Role,
}

impl Stack {
    /// Builds an empty stack with the given role
    pub fn new(role: Role) -> Self {
        Self {
            data: [0u8; 256],
            ptr: 0,
            role,
        }
    }

    /// Pushes a single byte, failing if the stack is at capacity
    #[inline]
    pub fn push8(&mut self, v: u8) -> Result<(), UxnError> {
        if self.ptr == u8::MAX {
            return Err(UxnError::StackOverflow(self.role));
        }
        self.data[usize::from(self.ptr)] = v;
        self.ptr += 1;
        Ok(())
    }

    /// Pushes a big-endian short, failing if fewer than two cells remain
    #[inline]
    pub fn push16(&mut self, v: u16) -> Result<(), UxnError> {
        if self.ptr >= 0xfe {
            return Err(UxnError::StackOverflow(self.role));
        }
        let [hi, lo] = v.to_be_bytes();
        self.data[usize::from(self.ptr)] = hi;
        self.data[usize::from(self.ptr) + 1] = lo;
        self.ptr += 2;
        Ok(())
    }

    #[inline]
    fn push(&mut self, v: Value) -> Result<(), UxnError> {
        match v {
            Value::Short(v) => self.push16(v),
            Value::Byte(v) => self.push8(v),
        }
    }

    /// Returns the number of live bytes
    #[inline]
    pub fn len(&self) -> u8 {
        self.ptr
    }

    /// Checks whether the stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr == 0
    }

    /// Sets the stack pointer to a raw byte value
    ///
    /// This is the System device's pointer-write behavior: the byte is
    /// stored as-is, with no truncation or validation.
    #[inline]
    pub fn set_len(&mut self, n: u8) {
        self.ptr = n;
    }

    /// The live bytes, bottom of the stack first
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..usize::from(self.ptr)]
    }
}

/// An 8- or 16-bit operand
///
/// Each opcode is written once over `Value` (or over both widths behind a
/// macro) so that byte and short forms cannot drift apart.
#[derive(Copy, Clone, Debug)]
enum Value {
    Short(u16),
    Byte(u8),
}

impl Value {
    #[inline]
    fn wrapping_add(&self, i: u8) -> Self {
        match self {
            Value::Short(v) => Value::Short(v.wrapping_add(u16::from(i))),
            Value::Byte(v) => Value::Byte(v.wrapping_add(i)),
        }
    }
    #[inline]
    fn shr(&self, i: u32) -> Self {
        match self {
            Value::Short(v) => Value::Short(v.checked_shr(i).unwrap_or(0)),
            Value::Byte(v) => Value::Byte(v.checked_shr(i).unwrap_or(0)),
        }
    }
    #[inline]
    fn shl(&self, i: u32) -> Self {
        match self {
            Value::Short(v) => Value::Short(v.checked_shl(i).unwrap_or(0)),
            Value::Byte(v) => Value::Byte(v.checked_shl(i).unwrap_or(0)),
        }
    }
}

/// Per-instruction view of a stack, aware of keep mode
///
/// Pops move the view's *effective pointer* (`head`); the stack's real
/// pointer follows only when keep mode is off.  Pushes always go through
/// the real pointer, so under keep mode results land above the preserved
/// operands.  Callers perform all pops before any push.
struct StackView<'a> {
    stack: &'a mut Stack,

    /// Effective depth; starts at the real pointer and decreases on pop
    head: u8,

    keep: bool,
}

impl<'a> StackView<'a> {
    fn new(stack: &'a mut Stack, keep: bool) -> Self {
        let head = stack.ptr;
        Self { stack, head, keep }
    }

    fn role(&self) -> Role {
        self.stack.role
    }

    #[inline]
    fn pop_byte(&mut self) -> Result<u8, UxnError> {
        if self.head == 0 {
            return Err(UxnError::StackUnderflow(self.stack.role));
        }
        self.head -= 1;
        let v = self.stack.data[usize::from(self.head)];
        if !self.keep {
            self.stack.ptr = self.head;
        }
        Ok(v)
    }

    #[inline]
    fn pop_short(&mut self) -> Result<u16, UxnError> {
        if self.head < 2 {
            return Err(UxnError::StackUnderflow(self.stack.role));
        }
        self.head -= 2;
        let hi = self.stack.data[usize::from(self.head)];
        let lo = self.stack.data[usize::from(self.head) + 1];
        if !self.keep {
            self.stack.ptr = self.head;
        }
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Pops a [`Value::Short`] in short mode and a [`Value::Byte`] otherwise
    #[inline]
    fn pop(&mut self, short: bool) -> Result<Value, UxnError> {
        if short {
            self.pop_short().map(Value::Short)
        } else {
            self.pop_byte().map(Value::Byte)
        }
    }

    #[inline]
    fn push(&mut self, v: Value) -> Result<(), UxnError> {
        self.stack.push(v)
    }

    #[inline]
    fn push_byte(&mut self, v: u8) -> Result<(), UxnError> {
        self.stack.push8(v)
    }

    #[inline]
    fn push_short(&mut self, v: u16) -> Result<(), UxnError> {
        self.stack.push16(v)
    }
}

/// Modifier bits decoded from the high three bits of an instruction
#[derive(Copy, Clone, Debug)]
struct Mode {
    /// Pops leave the source stack intact
    keep: bool,
    /// Source and destination stacks trade places
    ret: bool,
    /// Operand values widen to 16 bits
    short: bool,
}

impl Mode {
    #[inline]
    fn decode(instr: u8) -> Self {
        Self {
            keep: instr & 0x80 != 0,
            ret: instr & 0x40 != 0,
            short: instr & 0x20 != 0,
        }
    }
}

/// Builds the source-stack view for this instruction
///
/// A macro rather than a method so the borrow is limited to the one stack
/// field, leaving the rest of the machine free.
macro_rules! src_view {
    ($self:ident, $m:ident) => {
        StackView::new(
            if $m.ret {
                &mut $self.ret
            } else {
                &mut $self.stack
            },
            $m.keep,
        )
    };
}

macro_rules! op_cmp {
    ($self:ident, $m:ident, $f:expr) => {{
        let mut s = src_view!($self, $m);
        #[allow(clippy::redundant_closure_call)]
        let v = if $m.short {
            let a = s.pop_short()?;
            let b = s.pop_short()?;
            ($f)(b, a)
        } else {
            let a = s.pop_byte()?;
            let b = s.pop_byte()?;
            ($f)(b, a)
        };
        s.push_byte(u8::from(v))?;
    }};
}

macro_rules! op_bin {
    ($self:ident, $m:ident, $f:expr) => {{
        let mut s = src_view!($self, $m);
        if $m.short {
            let a = s.pop_short()?;
            let b = s.pop_short()?;
            let f: fn(u16, u16) -> u16 = $f;
            s.push_short(f(b, a))?;
        } else {
            let a = s.pop_byte()?;
            let b = s.pop_byte()?;
            let f: fn(u8, u8) -> u8 = $f;
            s.push_byte(f(b, a))?;
        }
    }};
}

/// The virtual machine itself
pub struct Uxn<'a> {
    /// Device port memory, 16 ports for each of 16 devices
    dev: [u8; 256],
    /// 64 KiB of VM memory
    ram: &'a mut [u8; 65536],
    /// Working stack
    stack: Stack,
    /// Return stack
    ret: Stack,
    /// Program counter
    pc: u16,
    /// Set by the System device (or a device fault) to stop the run loop
    halted: bool,
}

impl<'a> Uxn<'a> {
    /// Builds a new `Uxn`, borrowing the given RAM
    pub fn new(ram: &'a mut [u8; 65536]) -> Self {
        Self {
            dev: [0u8; 256],
            ram,
            stack: Stack::new(Role::Working),
            ret: Stack::new(Role::Return),
            pc: 0,
            halted: false,
        }
    }

    /// Resets machine state and loads the given ROM at [`PAGE_PROGRAM`]
    ///
    /// RAM, port memory, and both stacks are zeroed first, so nothing from
    /// a previous ROM survives.  ROM data that would run past the end of
    /// RAM is dropped.
    pub fn reset(&mut self, rom: &[u8]) {
        self.dev.fill(0);
        self.ram.fill(0);
        self.stack = Stack::new(Role::Working);
        self.ret = Stack::new(Role::Return);
        let n = (self.ram.len() - usize::from(PAGE_PROGRAM)).min(rom.len());
        self.ram[usize::from(PAGE_PROGRAM)..][..n].copy_from_slice(&rom[..n]);
        self.pc = PAGE_PROGRAM;
        self.halted = false;
    }

    /// Reads a byte from RAM at the program counter, advancing it
    #[inline]
    fn next(&mut self) -> u8 {
        let out = self.ram[usize::from(self.pc)];
        self.pc = self.pc.wrapping_add(1);
        out
    }

    /// Reads a big-endian word from RAM at the program counter
    #[inline]
    fn next2(&mut self) -> u16 {
        let hi = self.next();
        let lo = self.next();
        u16::from_be_bytes([hi, lo])
    }

    /// Reads a byte from RAM
    #[inline]
    pub fn ram_read_byte(&self, addr: u16) -> u8 {
        self.ram[usize::from(addr)]
    }

    /// Writes a byte to RAM
    #[inline]
    pub fn ram_write_byte(&mut self, addr: u16, v: u8) {
        self.ram[usize::from(addr)] = v;
    }

    /// Reads a big-endian word from RAM
    ///
    /// If the address is at the top of RAM, the second byte wraps to 0
    #[inline]
    pub fn ram_read_word(&self, addr: u16) -> u16 {
        let hi = self.ram[usize::from(addr)];
        let lo = self.ram[usize::from(addr.wrapping_add(1))];
        u16::from_be_bytes([hi, lo])
    }

    /// Writes a big-endian word to RAM, wrapping at the top of RAM
    #[inline]
    pub fn ram_write_word(&mut self, addr: u16, v: u16) {
        let [hi, lo] = v.to_be_bytes();
        self.ram[usize::from(addr)] = hi;
        self.ram[usize::from(addr.wrapping_add(1))] = lo;
    }

    #[inline]
    fn ram_read(&self, addr: u16, short: bool) -> Value {
        if short {
            Value::Short(self.ram_read_word(addr))
        } else {
            Value::Byte(self.ram_read_byte(addr))
        }
    }

    #[inline]
    fn ram_write(&mut self, addr: u16, v: Value) {
        match v {
            Value::Short(v) => self.ram_write_word(addr, v),
            Value::Byte(v) => self.ram_write_byte(addr, v),
        }
    }

    /// Reads a byte of device port memory
    #[inline]
    pub fn read_dev_mem(&self, addr: u8) -> u8 {
        self.dev[usize::from(addr)]
    }

    /// Writes a byte of device port memory
    #[inline]
    pub fn write_dev_mem(&mut self, addr: u8, value: u8) {
        self.dev[usize::from(addr)] = value;
    }

    /// Shared borrow of the working stack
    #[inline]
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Mutable borrow of the working stack
    #[inline]
    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// Shared borrow of the return stack
    #[inline]
    pub fn ret(&self) -> &Stack {
        &self.ret
    }

    /// Mutable borrow of the return stack
    #[inline]
    pub fn ret_mut(&mut self) -> &mut Stack {
        &mut self.ret
    }

    /// The current program counter
    #[inline]
    pub fn pc(&self) -> u16 {
        self.pc
    }

    /// Whether the machine has been halted
    #[inline]
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Stops the run loop after the current instruction
    ///
    /// Called by devices; the System device's halt port goes through here.
    #[inline]
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Converts raw port memory into a [`Ports`] object
    #[inline]
    pub fn dev<D: Ports>(&self) -> &D {
        self.dev_at(D::BASE)
    }

    /// Returns a reference to a device's ports located at `pos`
    #[inline]
    pub fn dev_at<D: Ports>(&self, pos: u8) -> &D {
        Self::check_dev_size::<D>();
        D::ref_from(&self.dev[usize::from(pos)..][..DEV_SIZE]).unwrap()
    }

    /// Returns a mutable reference to a device's ports located at `pos`
    #[inline]
    pub fn dev_mut_at<D: Ports>(&mut self, pos: u8) -> &mut D {
        Self::check_dev_size::<D>();
        D::mut_from(&mut self.dev[usize::from(pos)..][..DEV_SIZE]).unwrap()
    }

    /// Returns a mutable reference to the given [`Ports`] object
    #[inline]
    pub fn dev_mut<D: Ports>(&mut self) -> &mut D {
        self.dev_mut_at(D::BASE)
    }

    /// Asserts that the given [`Ports`] object is of size [`DEV_SIZE`]
    #[inline]
    fn check_dev_size<D: Ports>() {
        struct AssertDevSize<D>(D);
        impl<D> AssertDevSize<D> {
            const ASSERT: () = if core::mem::size_of::<D>() != DEV_SIZE {
                panic!("dev must be 16 bytes");
            };
        }
        AssertDevSize::<D>::ASSERT
    }

    /// Runs the machine until it is halted or faults
    pub fn run<D: Device>(&mut self, dev: &mut D) -> Result<(), UxnError> {
        while !self.halted {
            self.step(dev)?;
        }
        Ok(())
    }

    /// Executes a single instruction
    ///
    /// Fetches the byte at the program counter, decodes the mode bits from
    /// its high three bits, and dispatches on the low five.  A fault aborts
    /// the instruction and is returned to the caller.
    pub fn step<D: Device>(&mut self, dev: &mut D) -> Result<(), UxnError> {
        let instr = self.next();
        let m = Mode::decode(instr);
        match instr & 0x1f {
            op::LIT => self.lit(m),
            op::INC => self.inc(m),
            op::POP => self.pop(m),
            op::NIP => self.nip(m),
            op::SWP => self.swp(m),
            op::ROT => self.rot(m),
            op::DUP => self.dup(m),
            op::OVR => self.ovr(m),
            op::EQU => self.equ(m),
            op::NEQ => self.neq(m),
            op::GTH => self.gth(m),
            op::LTH => self.lth(m),
            op::JMP => self.jmp(m),
            op::JCN => self.jcn(m),
            op::JSR => self.jsr(m),
            op::STH => self.sth(m),
            op::LDZ => self.ldz(m),
            op::STZ => self.stz(m),
            op::LDR => self.ldr(m),
            op::STR => self.str(m),
            op::LDA => self.lda(m),
            op::STA => self.sta(m),
            op::DEI => self.dei(dev, m),
            op::DEO => self.deo(dev, m),
            op::ADD => self.add(m),
            op::SUB => self.sub(m),
            op::MUL => self.mul(m),
            op::DIV => self.div(m),
            op::AND => self.and(m),
            op::ORA => self.ora(m),
            op::EOR => self.eor(m),
            op::SFT => self.sft(m),
            _ => Err(UxnError::UnknownOpcode(instr)),
        }
    }

    /// The source stack for this instruction, for pushes after pops are done
    #[inline]
    fn src_stack(&mut self, m: Mode) -> &mut Stack {
        if m.ret {
            &mut self.ret
        } else {
            &mut self.stack
        }
    }

    /// The destination stack, the target of `JSR` and `STH` pushes
    #[inline]
    fn dst_stack(&mut self, m: Mode) -> &mut Stack {
        if m.ret {
            &mut self.stack
        } else {
            &mut self.ret
        }
    }

    /// Moves the program counter: absolute for a short, signed-relative for
    /// a byte, wrapping mod 2^16 either way
    #[inline]
    fn warp(&mut self, target: Value) {
        match target {
            Value::Short(addr) => self.pc = addr,
            Value::Byte(offset) => {
                self.pc = self.pc.wrapping_add_signed(i16::from(offset as i8));
            }
        }
    }

    /// Literal
    ///
    /// ```text
    /// LIT -- a
    /// ```
    ///
    /// Pushes the next byte (or short) in memory and advances the program
    /// counter past it.  The literal is pushed whether or not the keep bit
    /// is set; with no operand pops, the bit has nothing to preserve.
    fn lit(&mut self, m: Mode) -> Result<(), UxnError> {
        let v = if m.short {
            Value::Short(self.next2())
        } else {
            Value::Byte(self.next())
        };
        self.src_stack(m).push(v)
    }

    /// Increment
    ///
    /// ```text
    /// INC a -- a+1
    /// ```
    fn inc(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let v = s.pop(m.short)?;
        s.push(v.wrapping_add(1))
    }

    /// Pop
    ///
    /// ```text
    /// POP a --
    /// ```
    fn pop(&mut self, m: Mode) -> Result<(), UxnError> {
        src_view!(self, m).pop(m.short)?;
        Ok(())
    }

    /// Nip
    ///
    /// ```text
    /// NIP b a -- a
    /// ```
    fn nip(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let a = s.pop(m.short)?;
        let _ = s.pop(m.short)?;
        s.push(a)
    }

    /// Swap
    ///
    /// ```text
    /// SWP b a -- a b
    /// ```
    fn swp(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let a = s.pop(m.short)?;
        let b = s.pop(m.short)?;
        s.push(a)?;
        s.push(b)
    }

    /// Rotate
    ///
    /// ```text
    /// ROT c b a -- b a c
    /// ```
    fn rot(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let a = s.pop(m.short)?;
        let b = s.pop(m.short)?;
        let c = s.pop(m.short)?;
        s.push(b)?;
        s.push(a)?;
        s.push(c)
    }

    /// Duplicate
    ///
    /// ```text
    /// DUP a -- a a
    /// ```
    fn dup(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let a = s.pop(m.short)?;
        s.push(a)?;
        s.push(a)
    }

    /// Over
    ///
    /// ```text
    /// OVR b a -- b a b
    /// ```
    fn ovr(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let a = s.pop(m.short)?;
        let b = s.pop(m.short)?;
        s.push(b)?;
        s.push(a)?;
        s.push(b)
    }

    /// Equal
    ///
    /// ```text
    /// EQU b a -- bool8
    /// ```
    ///
    /// The comparison result is a single byte in every mode.
    fn equ(&mut self, m: Mode) -> Result<(), UxnError> {
        op_cmp!(self, m, |b, a| b == a);
        Ok(())
    }

    /// Not Equal
    ///
    /// ```text
    /// NEQ b a -- bool8
    /// ```
    fn neq(&mut self, m: Mode) -> Result<(), UxnError> {
        op_cmp!(self, m, |b, a| b != a);
        Ok(())
    }

    /// Greater Than (unsigned)
    ///
    /// ```text
    /// GTH b a -- bool8
    /// ```
    fn gth(&mut self, m: Mode) -> Result<(), UxnError> {
        op_cmp!(self, m, |b, a| b > a);
        Ok(())
    }

    /// Lesser Than (unsigned)
    ///
    /// ```text
    /// LTH b a -- bool8
    /// ```
    fn lth(&mut self, m: Mode) -> Result<(), UxnError> {
        op_cmp!(self, m, |b, a| b < a);
        Ok(())
    }

    /// Jump
    ///
    /// ```text
    /// JMP addr --
    /// ```
    ///
    /// Moves the program counter by the signed byte at the top of the
    /// stack, or to an absolute address in short mode.
    fn jmp(&mut self, m: Mode) -> Result<(), UxnError> {
        let target = src_view!(self, m).pop(m.short)?;
        self.warp(target);
        Ok(())
    }

    /// Jump Conditional
    ///
    /// ```text
    /// JCN cond8 addr --
    /// ```
    ///
    /// Warps like `JMP` if the condition byte below the address is not
    /// zero.  The condition is a byte in every mode; only the address
    /// widens.
    fn jcn(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let target = s.pop(m.short)?;
        let cond = s.pop_byte()?;
        if cond != 0 {
            self.warp(target);
        }
        Ok(())
    }

    /// Jump Stash Return
    ///
    /// ```text
    /// JSR addr -- | ret16
    /// ```
    ///
    /// Pushes the program counter to the destination stack, then warps
    /// like `JMP`.  The stashed counter is always a short.
    fn jsr(&mut self, m: Mode) -> Result<(), UxnError> {
        let target = src_view!(self, m).pop(m.short)?;
        let pc = self.pc;
        self.dst_stack(m).push16(pc)?;
        self.warp(target);
        Ok(())
    }

    /// Stash
    ///
    /// ```text
    /// STH a -- | a
    /// ```
    ///
    /// Moves the top of the source stack to the destination stack.  In
    /// return mode the stacks are exchanged, so the value travels from the
    /// return stack to the working stack.
    fn sth(&mut self, m: Mode) -> Result<(), UxnError> {
        let v = src_view!(self, m).pop(m.short)?;
        self.dst_stack(m).push(v)
    }

    /// Load Zero-Page
    ///
    /// ```text
    /// LDZ addr8 -- value
    /// ```
    fn ldz(&mut self, m: Mode) -> Result<(), UxnError> {
        let addr = src_view!(self, m).pop_byte()?;
        let v = self.ram_read(u16::from(addr), m.short);
        self.src_stack(m).push(v)
    }

    /// Store Zero-Page
    ///
    /// ```text
    /// STZ val addr8 --
    /// ```
    fn stz(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let addr = s.pop_byte()?;
        let v = s.pop(m.short)?;
        self.ram_write(u16::from(addr), v);
        Ok(())
    }

    /// Load Relative
    ///
    /// ```text
    /// LDR off8 -- value
    /// ```
    ///
    /// Reads from a signed offset relative to the post-fetch program
    /// counter, within -128..=127 bytes.
    fn ldr(&mut self, m: Mode) -> Result<(), UxnError> {
        let offset = src_view!(self, m).pop_byte()? as i8;
        let addr = self.pc.wrapping_add_signed(i16::from(offset));
        let v = self.ram_read(addr, m.short);
        self.src_stack(m).push(v)
    }

    /// Store Relative
    ///
    /// ```text
    /// STR val off8 --
    /// ```
    fn str(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let offset = s.pop_byte()? as i8;
        let v = s.pop(m.short)?;
        let addr = self.pc.wrapping_add_signed(i16::from(offset));
        self.ram_write(addr, v);
        Ok(())
    }

    /// Load Absolute
    ///
    /// ```text
    /// LDA addr16 -- value
    /// ```
    fn lda(&mut self, m: Mode) -> Result<(), UxnError> {
        let addr = src_view!(self, m).pop_short()?;
        let v = self.ram_read(addr, m.short);
        self.src_stack(m).push(v)
    }

    /// Store Absolute
    ///
    /// ```text
    /// STA val addr16 --
    /// ```
    fn sta(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let addr = s.pop_short()?;
        let v = s.pop(m.short)?;
        self.ram_write(addr, v);
        Ok(())
    }

    /// Device Input
    ///
    /// ```text
    /// DEI port8 -- value
    /// ```
    ///
    /// Asks the device to refresh the byte at `port` in port memory, then
    /// pushes it.  Short mode reads `port` then the next port of the same
    /// device (the low nibble wraps), high byte first.  The port index is
    /// a byte in every mode.
    fn dei<D: Device>(&mut self, dev: &mut D, m: Mode) -> Result<(), UxnError> {
        let port = src_view!(self, m).pop_byte()?;
        let v = if m.short {
            dev.dei(self, port);
            let hi = self.dev[usize::from(port)];
            let next = next_port(port);
            dev.dei(self, next);
            let lo = self.dev[usize::from(next)];
            Value::Short(u16::from_be_bytes([hi, lo]))
        } else {
            dev.dei(self, port);
            Value::Byte(self.dev[usize::from(port)])
        };
        self.src_stack(m).push(v)
    }

    /// Device Output
    ///
    /// ```text
    /// DEO val port8 --
    /// ```
    ///
    /// Stores the value into port memory, then invokes the device's write
    /// handler, which may mutate the machine.  Short mode writes `port`
    /// then the next port of the same device, high byte first, with the
    /// handler invoked after each byte.
    fn deo<D: Device>(&mut self, dev: &mut D, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let port = s.pop_byte()?;
        match s.pop(m.short)? {
            Value::Short(v) => {
                let [hi, lo] = v.to_be_bytes();
                self.dev[usize::from(port)] = hi;
                dev.deo(self, port);
                let next = next_port(port);
                self.dev[usize::from(next)] = lo;
                dev.deo(self, next);
            }
            Value::Byte(v) => {
                self.dev[usize::from(port)] = v;
                dev.deo(self, port);
            }
        }
        Ok(())
    }

    /// Add
    ///
    /// ```text
    /// ADD b a -- b+a
    /// ```
    fn add(&mut self, m: Mode) -> Result<(), UxnError> {
        op_bin!(self, m, |b, a| b.wrapping_add(a));
        Ok(())
    }

    /// Subtract
    ///
    /// ```text
    /// SUB b a -- b-a
    /// ```
    fn sub(&mut self, m: Mode) -> Result<(), UxnError> {
        op_bin!(self, m, |b, a| b.wrapping_sub(a));
        Ok(())
    }

    /// Multiply
    ///
    /// ```text
    /// MUL b a -- b*a
    /// ```
    fn mul(&mut self, m: Mode) -> Result<(), UxnError> {
        op_bin!(self, m, |b, a| b.wrapping_mul(a));
        Ok(())
    }

    /// Divide
    ///
    /// ```text
    /// DIV b a -- b/a
    /// ```
    ///
    /// Rounds toward zero.  A zero divisor is a [`UxnError::DivideByZero`]
    /// fault, not a zero result.
    fn div(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        if m.short {
            let a = s.pop_short()?;
            let b = s.pop_short()?;
            if a == 0 {
                return Err(UxnError::DivideByZero(s.role()));
            }
            s.push_short(b / a)
        } else {
            let a = s.pop_byte()?;
            let b = s.pop_byte()?;
            if a == 0 {
                return Err(UxnError::DivideByZero(s.role()));
            }
            s.push_byte(b / a)
        }
    }

    /// And
    ///
    /// ```text
    /// AND b a -- b&a
    /// ```
    fn and(&mut self, m: Mode) -> Result<(), UxnError> {
        op_bin!(self, m, |b, a| b & a);
        Ok(())
    }

    /// Or
    ///
    /// ```text
    /// ORA b a -- b|a
    /// ```
    fn ora(&mut self, m: Mode) -> Result<(), UxnError> {
        op_bin!(self, m, |b, a| b | a);
        Ok(())
    }

    /// Exclusive Or
    ///
    /// ```text
    /// EOR b a -- b^a
    /// ```
    fn eor(&mut self, m: Mode) -> Result<(), UxnError> {
        op_bin!(self, m, |b, a| b ^ a);
        Ok(())
    }

    /// Shift
    ///
    /// ```text
    /// SFT b shift8 -- c
    /// ```
    ///
    /// Shifts `b` right by the low nibble of the shift byte, then left by
    /// the high nibble.  The shift byte stays 8-bit in short mode; only
    /// `b` widens.
    fn sft(&mut self, m: Mode) -> Result<(), UxnError> {
        let mut s = src_view!(self, m);
        let shift = s.pop_byte()?;
        let shr = u32::from(shift & 0x0f);
        let shl = u32::from(shift >> 4);
        let v = s.pop(m.short)?;
        s.push(v.shr(shr).shl(shl))
    }
}

/// Advances to the next port within the same device
///
/// 16-bit device access never crosses a device boundary; the low nibble
/// wraps instead.
#[inline]
const fn next_port(port: u8) -> u8 {
    (port & 0xf0) | (port.wrapping_add(1) & 0x0f)
}

/// Trait for a Uxn-compatible device
///
/// The dispatcher hands each handler a mutable machine borrow, so devices
/// keep no back-pointer of their own; they observe and mutate the CPU only
/// for the duration of one call.
pub trait Device {
    /// Performs the `DEI` operation for the given target
    ///
    /// This function must deposit its output byte into the machine's port
    /// memory at `target` (via [`Uxn::write_dev_mem`] or a [`Ports`]
    /// view); the dispatcher then copies that byte to the stack.
    fn dei(&mut self, vm: &mut Uxn, target: u8);

    /// Performs the `DEO` operation on the given target
    ///
    /// The output byte has already been written to port memory at `target`
    /// when this is called.  The handler may mutate the machine, including
    /// calling [`Uxn::halt`].
    fn deo(&mut self, vm: &mut Uxn, target: u8);
}

/// Trait for a type which can be cast over a device's 16 ports
pub trait Ports:
    zerocopy::AsBytes + zerocopy::FromBytes + zerocopy::FromZeroes
{
    /// Base address of the device in port memory, of the form `0xA0`
    const BASE: u8;
}

/// Device which does nothing
pub struct EmptyDevice;
impl Device for EmptyDevice {
    fn dei(&mut self, _vm: &mut Uxn, _target: u8) {
        // nothing to do here
    }
    fn deo(&mut self, _vm: &mut Uxn, _target: u8) {
        // nothing to do here
    }
}

/// Helper type for building a RAM array of the appropriate size
pub struct UxnRam(Box<[u8; 65536]>);

impl UxnRam {
    /// Builds a new zero-initialized RAM
    pub fn new() -> Self {
        UxnRam(vec![0u8; 65536].into_boxed_slice().try_into().unwrap())
    }
}

impl Default for UxnRam {
    fn default() -> Self {
        Self::new()
    }
}

impl core::ops::Deref for UxnRam {
    type Target = [u8; 65536];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl core::ops::DerefMut for UxnRam {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Base opcode constants and names
///
/// These are the low five bits of an instruction; the high three bits are
/// the keep / return / short modifiers.
#[allow(missing_docs)]
pub mod op {
    pub const LIT: u8 = 0x00;
    pub const INC: u8 = 0x01;
    pub const POP: u8 = 0x02;
    pub const NIP: u8 = 0x03;
    pub const SWP: u8 = 0x04;
    pub const ROT: u8 = 0x05;
    pub const DUP: u8 = 0x06;
    pub const OVR: u8 = 0x07;
    pub const EQU: u8 = 0x08;
    pub const NEQ: u8 = 0x09;
    pub const GTH: u8 = 0x0a;
    pub const LTH: u8 = 0x0b;
    pub const JMP: u8 = 0x0c;
    pub const JCN: u8 = 0x0d;
    pub const JSR: u8 = 0x0e;
    pub const STH: u8 = 0x0f;
    pub const LDZ: u8 = 0x10;
    pub const STZ: u8 = 0x11;
    pub const LDR: u8 = 0x12;
    pub const STR: u8 = 0x13;
    pub const LDA: u8 = 0x14;
    pub const STA: u8 = 0x15;
    pub const DEI: u8 = 0x16;
    pub const DEO: u8 = 0x17;
    pub const ADD: u8 = 0x18;
    pub const SUB: u8 = 0x19;
    pub const MUL: u8 = 0x1a;
    pub const DIV: u8 = 0x1b;
    pub const AND: u8 = 0x1c;
    pub const ORA: u8 = 0x1d;
    pub const EOR: u8 = 0x1e;
    pub const SFT: u8 = 0x1f;

    /// Names of the 32 base opcodes, indexed by `instr & 0x1f`
    pub const NAMES: [&str; 32] = [
        "LIT", "INC", "POP", "NIP", "SWP", "ROT", "DUP", "OVR", "EQU", "NEQ",
        "GTH", "LTH", "JMP", "JCN", "JSR", "STH", "LDZ", "STZ", "LDR", "STR",
        "LDA", "STA", "DEI", "DEO", "ADD", "SUB", "MUL", "DIV", "AND", "ORA",
        "EOR", "SFT",
    ];
}
