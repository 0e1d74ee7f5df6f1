use super::invocation::stash_context_token;
use crate::arch::x86_64::writer::{is_endbr64, near_jmp_reaches, Reg, X86_64Writer, ABS_JMP_SIZE};
use crate::code::allocator::CodeAllocator;
use crate::types::HookError;

/// FXSAVE area: x87/MMX/XMM state, 16-byte aligned.
const FXSAVE_SIZE: u32 = 512;

/// Argument registers saved around the stash call. Seven pushes on top of the
/// return address leave RSP 16-byte aligned for FXSAVE and the call.
const SAVED: [Reg; 7] = [Reg::RAX, Reg::RDI, Reg::RSI, Reg::RDX, Reg::RCX, Reg::R8, Reg::R9];

/// Where the redirect is written: after an `endbr64` landing pad, if any.
///
/// # Safety
/// `target` must be the entry of a mapped function.
pub(super) unsafe fn patch_site(target: usize) -> usize {
    if is_endbr64(target as *const u8) {
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
        let mut w = X86_64Writer::new(slice.data, slice.size, slice.pc as u64);
        for reg in SAVED {
            w.put_push_reg(reg);
        }
        w.put_sub_reg_imm32(Reg::RSP, FXSAVE_SIZE);
        w.put_fxsave_reg_indirect(Reg::RSP);

        w.put_mov_reg_imm64(Reg::RDI, token as u64);
        w.put_mov_reg_imm64(Reg::RAX, stash_context_token as usize as u64);
        w.put_call_reg(Reg::RAX);

        w.put_fxrstor_reg_indirect(Reg::RSP);
        w.put_add_reg_imm32(Reg::RSP, FXSAVE_SIZE);
        for reg in SAVED.iter().rev() {
            w.put_pop_reg(*reg);
        }

        // R11 is caller-saved and never carries an argument.
        w.put_mov_reg_imm64(Reg::R11, trampoline as u64);
        w.put_jmp_reg(Reg::R11);
        w.put_ud2();

        alloc.make_executable(&slice)?;
    }
    Ok(slice.pc as usize)
}

/// Bytes that send execution at `site` to `thunk`.
pub(super) fn redirect_bytes(site: usize, thunk: usize, force_far: bool) -> Vec<u8> {
    let mut buf = [0u8; ABS_JMP_SIZE];
    let len = unsafe {
        let mut w = X86_64Writer::new(buf.as_mut_ptr(), buf.len(), site as u64);
        if !force_far && near_jmp_reaches(site as u64, thunk as u64) {
            w.put_jmp_near(thunk as u64);
        } else {
            w.put_jmp_absolute(thunk as u64);
        }
        w.offset()
    };
    buf[..len].to_vec()
}
