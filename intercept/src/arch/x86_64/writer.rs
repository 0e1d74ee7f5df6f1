#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    RAX = 0,
    RCX = 1,
    RDX = 2,
    RBX = 3,
    RSP = 4,
    RBP = 5,
    RSI = 6,
    RDI = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    #[inline]
    fn lo3(self) -> u8 {
        (self as u8) & 7
    }

    #[inline]
    fn is_extended(self) -> bool {
        (self as u8) >= 8
    }
}

/// `jmp rel32`.
pub const NEAR_JMP_SIZE: usize = 5;

/// `jmp [rip+0]; .quad target`.
pub const ABS_JMP_SIZE: usize = 14;

const ENDBR64: [u8; 4] = [0xF3, 0x0F, 0x1E, 0xFA];

/// Whether `p` starts with an `endbr64` landing pad.
///
/// # Safety
/// `p` must point to at least 4 readable bytes.
pub unsafe fn is_endbr64(p: *const u8) -> bool {
    core::ptr::read_unaligned(p as *const [u8; 4]) == ENDBR64
}

/// Whether a `jmp rel32` emitted at `from` can reach `to`.
pub fn near_jmp_reaches(from: u64, to: u64) -> bool {
    let rel = (to as i64).wrapping_sub(from as i64 + NEAR_JMP_SIZE as i64);
    rel >= i32::MIN as i64 && rel <= i32::MAX as i64
}

#[derive(Debug)]
pub struct X86_64Writer {
    base: *mut u8,
    code: *mut u8,
    pc: u64,
    size: usize,
}

impl X86_64Writer {
    /// # Safety
    /// `buffer` must be valid for writes of `size` bytes for the writer's lifetime.
    pub unsafe fn new(buffer: *mut u8, size: usize, pc: u64) -> Self {
        Self { base: buffer, code: buffer, pc, size }
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn offset(&self) -> usize {
        (self.code as usize).saturating_sub(self.base as usize)
    }

    fn can_write(&self, bytes: usize) -> bool {
        self.offset() + bytes <= self.size
    }

    unsafe fn emit(&mut self, byte: u8) {
        debug_assert!(self.can_write(1));
        self.code.write(byte);
        self.code = self.code.add(1);
        self.pc = self.pc.wrapping_add(1);
    }

    unsafe fn emit_u32_le(&mut self, val: u32) {
        debug_assert!(self.can_write(4));
        (self.code as *mut u32).write_unaligned(val);
        self.code = self.code.add(4);
        self.pc = self.pc.wrapping_add(4);
    }

    unsafe fn emit_u64_le(&mut self, val: u64) {
        debug_assert!(self.can_write(8));
        (self.code as *mut u64).write_unaligned(val);
        self.code = self.code.add(8);
        self.pc = self.pc.wrapping_add(8);
    }

    /// REX prefix: 0100 W R X B
    #[inline]
    fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
        0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8)
    }

    #[inline]
    fn modrm(mod_: u8, reg: u8, rm: u8) -> u8 {
        ((mod_ & 3) << 6) | ((reg & 7) << 3) | (rm & 7)
    }

    unsafe fn emit_rex_b(&mut self, reg: Reg) {
        if reg.is_extended() {
            self.emit(Self::rex(false, false, false, true));
        }
    }

    /// `push reg`
    pub unsafe fn put_push_reg(&mut self, reg: Reg) {
        self.emit_rex_b(reg);
        self.emit(0x50 + reg.lo3());
    }

    /// `pop reg`
    pub unsafe fn put_pop_reg(&mut self, reg: Reg) {
        self.emit_rex_b(reg);
        self.emit(0x58 + reg.lo3());
    }

    /// `mov reg, imm64` (10 bytes)
    pub unsafe fn put_mov_reg_imm64(&mut self, reg: Reg, imm: u64) {
        self.emit(Self::rex(true, false, false, reg.is_extended()));
        self.emit(0xB8 + reg.lo3());
        self.emit_u64_le(imm);
    }

    /// `sub reg, imm32` (64-bit)
    pub unsafe fn put_sub_reg_imm32(&mut self, reg: Reg, imm: u32) {
        self.emit(Self::rex(true, false, false, reg.is_extended()));
        self.emit(0x81);
        self.emit(Self::modrm(0b11, 5, reg.lo3()));
        self.emit_u32_le(imm);
    }

    /// `add reg, imm32` (64-bit)
    pub unsafe fn put_add_reg_imm32(&mut self, reg: Reg, imm: u32) {
        self.emit(Self::rex(true, false, false, reg.is_extended()));
        self.emit(0x81);
        self.emit(Self::modrm(0b11, 0, reg.lo3()));
        self.emit_u32_le(imm);
    }

    /// `call reg`
    pub unsafe fn put_call_reg(&mut self, reg: Reg) {
        self.emit_rex_b(reg);
        self.emit(0xFF);
        self.emit(Self::modrm(0b11, 2, reg.lo3()));
    }

    /// `jmp reg`
    pub unsafe fn put_jmp_reg(&mut self, reg: Reg) {
        self.emit_rex_b(reg);
        self.emit(0xFF);
        self.emit(Self::modrm(0b11, 4, reg.lo3()));
    }

    /// `jmp rel32` to an absolute `target`; caller checks [`near_jmp_reaches`].
    pub unsafe fn put_jmp_near(&mut self, target: u64) {
        self.emit(0xE9);
        let rel = (target as i64) - (self.pc as i64 + 4);
        self.emit_u32_le(rel as u32);
    }

    /// `jmp [rip+0]` followed by the 8-byte target (14 bytes, reaches anywhere).
    pub unsafe fn put_jmp_absolute(&mut self, target: u64) {
        self.emit(0xFF);
        self.emit(Self::modrm(0b00, 4, 0b101));
        self.emit_u32_le(0);
        self.emit_u64_le(target);
    }

    /// `fxsave [reg]`; the address must be 16-byte aligned.
    pub unsafe fn put_fxsave_reg_indirect(&mut self, reg: Reg) {
        self.put_0f_ae_indirect(0, reg);
    }

    /// `fxrstor [reg]`; the address must be 16-byte aligned.
    pub unsafe fn put_fxrstor_reg_indirect(&mut self, reg: Reg) {
        self.put_0f_ae_indirect(1, reg);
    }

    unsafe fn put_0f_ae_indirect(&mut self, ext: u8, reg: Reg) {
        self.emit_rex_b(reg);
        self.emit(0x0F);
        self.emit(0xAE);
        match reg.lo3() {
            // RSP/R12 need a SIB byte.
            4 => {
                self.emit(Self::modrm(0b00, ext, 0b100));
                self.emit(0x24);
            }
            // RBP/R13 with mod=00 would mean RIP-relative.
            5 => {
                self.emit(Self::modrm(0b01, ext, 0b101));
                self.emit(0x00);
            }
            lo => self.emit(Self::modrm(0b00, ext, lo)),
        }
    }

    /// `ud2`
    pub unsafe fn put_ud2(&mut self) {
        self.emit(0x0F);
        self.emit(0x0B);
    }
}
