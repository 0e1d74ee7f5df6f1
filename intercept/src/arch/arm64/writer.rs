#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    X0 = 0,
    X1 = 1,
    X2 = 2,
    X3 = 3,
    X4 = 4,
    X5 = 5,
    X6 = 6,
    X7 = 7,
    X8 = 8,
    X16 = 16,
    X17 = 17,
    X29 = 29,
    X30 = 30,
    SP = 31,
}

/// SIMD&FP register `Qn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QReg(pub u8);

/// `b imm26`.
pub const B_SIZE: usize = 4;

/// `ldr x16, #8; br x16; .quad target`.
pub const LDR_BR_SIZE: usize = 16;

/// Reach of `b`: ±128 MiB.
pub const B_RANGE: i64 = 128 * 1024 * 1024;

const BTI_C: u32 = 0xD503245F;

/// Whether `p` starts with a `bti c` landing pad.
///
/// # Safety
/// `p` must point to at least 4 readable bytes.
pub unsafe fn is_bti_c(p: *const u8) -> bool {
    core::ptr::read_unaligned(p as *const u32) == BTI_C
}

/// Whether a `b` emitted at `from` can reach `to`.
pub fn b_reaches(from: u64, to: u64) -> bool {
    let rel = (to as i64).wrapping_sub(from as i64);
    (-B_RANGE..B_RANGE).contains(&rel) && rel & 3 == 0
}

#[derive(Debug)]
pub struct Arm64Writer {
    base: *mut u32,
    code: *mut u32,
    pc: u64,
    size: usize,
}

impl Arm64Writer {
    /// # Safety
    /// `buffer` must be 4-byte aligned and valid for writes of `size` bytes.
    pub unsafe fn new(buffer: *mut u8, size: usize, pc: u64) -> Self {
        Self {
            base: buffer as *mut u32,
            code: buffer as *mut u32,
            pc,
            size,
        }
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

    unsafe fn put_u32(&mut self, insn: u32) {
        debug_assert!(self.can_write(4));
        self.code.write_unaligned(insn);
        self.code = self.code.add(1);
        self.pc = self.pc.wrapping_add(4);
    }

    unsafe fn put_u64_literal(&mut self, value: u64) {
        debug_assert!(self.can_write(8));
        (self.code as *mut u64).write_unaligned(value);
        self.code = self.code.add(2);
        self.pc = self.pc.wrapping_add(8);
    }

    pub unsafe fn put_br_reg(&mut self, reg: Reg) {
        self.put_u32(0xD61F0000 | ((reg as u32) << 5));
    }

    pub unsafe fn put_blr_reg(&mut self, reg: Reg) {
        self.put_u32(0xD63F0000 | ((reg as u32) << 5));
    }

    /// `b target`; caller checks [`b_reaches`].
    pub unsafe fn put_b_imm(&mut self, target: u64) {
        let imm = (target as i64 - self.pc as i64) >> 2;
        self.put_u32(0x1400_0000 | ((imm as u32) & 0x03FF_FFFF));
    }

    /// `sub sp, sp, #imm12`
    pub unsafe fn put_sub_sp_imm(&mut self, imm: u32) {
        debug_assert!(imm < 0x1000);
        let sp = Reg::SP as u32;
        self.put_u32(0xD100_0000 | ((imm & 0xFFF) << 10) | (sp << 5) | sp);
    }

    /// `add sp, sp, #imm12`
    pub unsafe fn put_add_sp_imm(&mut self, imm: u32) {
        debug_assert!(imm < 0x1000);
        let sp = Reg::SP as u32;
        self.put_u32(0x9100_0000 | ((imm & 0xFFF) << 10) | (sp << 5) | sp);
    }

    /// Load a 64-bit constant with MOVZ + 3x MOVK.
    pub unsafe fn put_mov_reg_u64(&mut self, dst: Reg, value: u64) {
        let rd = dst as u32;
        for hw in 0..4u32 {
            let imm16 = ((value >> (hw * 16)) & 0xFFFF) as u32;
            let opcode = if hw == 0 { 0xD280_0000 } else { 0xF280_0000 };
            self.put_u32(opcode | (hw << 21) | (imm16 << 5) | rd);
        }
    }

    /// `stp a, b, [base, #offset]` (64-bit, signed offset, multiple of 8).
    pub unsafe fn put_stp_reg_reg_offset(&mut self, a: Reg, b: Reg, base: Reg, offset: i32) {
        self.put_pair(0xA900_0000, a as u32, b as u32, base, offset, 8);
    }

    /// `ldp a, b, [base, #offset]` (64-bit, signed offset, multiple of 8).
    pub unsafe fn put_ldp_reg_reg_offset(&mut self, a: Reg, b: Reg, base: Reg, offset: i32) {
        self.put_pair(0xA940_0000, a as u32, b as u32, base, offset, 8);
    }

    /// `stp qa, qb, [base, #offset]` (128-bit, signed offset, multiple of 16).
    pub unsafe fn put_stp_q_offset(&mut self, a: QReg, b: QReg, base: Reg, offset: i32) {
        self.put_pair(0xAD00_0000, a.0 as u32, b.0 as u32, base, offset, 16);
    }

    /// `ldp qa, qb, [base, #offset]` (128-bit, signed offset, multiple of 16).
    pub unsafe fn put_ldp_q_offset(&mut self, a: QReg, b: QReg, base: Reg, offset: i32) {
        self.put_pair(0xAD40_0000, a.0 as u32, b.0 as u32, base, offset, 16);
    }

    unsafe fn put_pair(&mut self, opcode: u32, rt: u32, rt2: u32, base: Reg, offset: i32, scale: i32) {
        debug_assert!(offset % scale == 0);
        let imm7 = ((offset / scale) as u32) & 0x7F;
        self.put_u32(opcode | (imm7 << 15) | (rt2 << 10) | ((base as u32) << 5) | rt);
    }

    /// `ldr reg, #8; br reg; .quad addr` (16 bytes, reaches anywhere).
    pub unsafe fn put_ldr_br_address(&mut self, reg: Reg, addr: u64) {
        let imm19 = 2u32; // literal sits 8 bytes ahead
        self.put_u32(0x5800_0000 | (imm19 << 5) | reg as u32);
        self.put_br_reg(reg);
        self.put_u64_literal(addr);
    }
}
