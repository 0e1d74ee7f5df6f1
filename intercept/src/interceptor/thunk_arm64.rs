use super::invocation::stash_context_token;
use crate::arch::arm64::writer::{b_reaches, is_bti_c, Arm64Writer, QReg, Reg, LDR_BR_SIZE};
use crate::code::allocator::CodeAllocator;
use crate::types::HookError;

/// x0-x7, x8 (indirect result), lr, q0-q7.
const FRAME_SIZE: u32 = 0xD0;

const X_PAIRS: [(Reg, Reg, i32); 5] = [
    (Reg::X0, Reg::X1, 0),
    (Reg::X2, Reg::X3, 16),
    (Reg::X4, Reg::X5, 32),
    (Reg::X6, Reg::X7, 48),
    (Reg::X8, Reg::X30, 64),
];

const Q_PAIRS: [(u8, u8, i32); 4] = [(0, 1, 80), (2, 3, 112), (4, 5, 144), (6, 7, 176)];

/// Where the redirect is written: after a `bti c` landing pad, if any.
///
/// # Safety
/// `target` must be the entry of a mapped function.
pub(super) unsafe fn patch_site(target: usize) -> usize {
    if is_bti_c(target as *const u8) {
        target + 4
    } else {
        target
    }
}

/// Emit an entry thunk near `target` that publishes `token` and tail-jumps to
/// `trampoline` with every argument register intact.
pub(super) fn build_thunk(
    alloc: &mut CodeAllocator,
    target: usize,
    trampoline: usize,
    token: usize,
    near_range: usize,
) -> Result<usize, HookError> {
    let slice = alloc.alloc_near(target as *const u8, near_range)?;
    unsafe {
        let mut w = Arm64Writer::new(slice.data, slice.size, slice.pc as u64);
        w.put_sub_sp_imm(FRAME_SIZE);
        for (a, b, off) in X_PAIRS {
            w.put_stp_reg_reg_offset(a, b, Reg::SP, off);
        }
        for (a, b, off) in Q_PAIRS {
            w.put_stp_q_offset(QReg(a), QReg(b), Reg::SP, off);
        }

        w.put_mov_reg_u64(Reg::X0, token as u64);
        w.put_mov_reg_u64(Reg::X16, stash_context_token as usize as u64);
        w.put_blr_reg(Reg::X16);

        for (a, b, off) in Q_PAIRS {
            w.put_ldp_q_offset(QReg(a), QReg(b), Reg::SP, off);
        }
        for (a, b, off) in X_PAIRS {
            w.put_ldp_reg_reg_offset(a, b, Reg::SP, off);
        }
        w.put_add_sp_imm(FRAME_SIZE);

        // x16 is the intra-procedure-call scratch register.
        w.put_mov_reg_u64(Reg::X16, trampoline as u64);
        w.put_br_reg(Reg::X16);

        alloc.make_executable(&slice)?;
    }
    Ok(slice.pc as usize)
}

/// Bytes that send execution at `site` to `thunk`.
pub(super) fn redirect_bytes(site: usize, thunk: usize, force_far: bool) -> Vec<u8> {
    let mut buf = [0u32; LDR_BR_SIZE / 4];
    let len = unsafe {
        let mut w = Arm64Writer::new(buf.as_mut_ptr() as *mut u8, LDR_BR_SIZE, site as u64);
        if !force_far && b_reaches(site as u64, thunk as u64) {
            w.put_b_imm(thunk as u64);
        } else {
            w.put_ldr_br_address(Reg::X16, thunk as u64);
        }
        w.offset()
    };
    buf.iter().flat_map(|insn| insn.to_le_bytes()).take(len).collect()
}
