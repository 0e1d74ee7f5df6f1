use crate::code::cache::invalidate_icache;
use crate::types::HookError;

#[cfg(unix)]
#[inline]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Page-aligned `(start, len)` covering `[addr, addr + size)`.
#[cfg(unix)]
#[inline]
fn page_span(addr: usize, size: usize) -> (usize, usize) {
    let page = page_size();
    let start = addr & !(page - 1);
    let end = (addr + size + page - 1) & !(page - 1);
    (start, end - start)
}

#[cfg(unix)]
fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(unix)]
#[inline]
fn debug_enabled() -> bool {
    crate::config().debug
}

#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    pub unsafe fn patch_code(addr: *mut u8, size: usize, apply: impl FnOnce(*mut u8)) -> Result<(), HookError> {
        let (page_start, map_size) = page_span(addr as usize, size);

        // RWX rather than RW: other functions on the same page may be running.
        if libc::mprotect(
            page_start as *mut libc::c_void,
            map_size,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        ) != 0
        {
            let errno = last_errno();
            if debug_enabled() {
                eprintln!(
                    "[fnswap-intercept] patcher: mprotect RWX failed errno={errno} page=0x{page_start:x} len=0x{map_size:x}"
                );
            }
            return Err(HookError::PatchFailed { address: addr as usize, errno });
        }

        apply(addr);

        libc::mprotect(page_start as *mut libc::c_void, map_size, libc::PROT_READ | libc::PROT_EXEC);

        // Whole span, after RX is back, so no stale line survives for a neighbour.
        invalidate_icache(page_start as *mut u8, map_size);
        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod darwin {
    use super::*;

    use mach2::boolean::boolean_t;
    use mach2::kern_return::{kern_return_t, KERN_SUCCESS};
    use mach2::traps::mach_task_self;
    use mach2::vm::{mach_vm_deallocate, mach_vm_protect};
    use mach2::vm_inherit::{vm_inherit_t, VM_INHERIT_NONE};
    use mach2::vm_prot::{vm_prot_t, VM_PROT_READ, VM_PROT_WRITE};
    use mach2::vm_statistics::VM_FLAGS_ANYWHERE;
    use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t, vm_address_t, vm_map_t, vm_size_t};

    const FALSE: boolean_t = 0;

    extern "C" {
        fn vm_remap(
            target_task: vm_map_t,
            target_address: *mut vm_address_t,
            size: vm_size_t,
            mask: vm_address_t,
            flags: libc::c_int,
            src_task: vm_map_t,
            src_address: vm_address_t,
            copy: boolean_t,
            cur_protection: *mut vm_prot_t,
            max_protection: *mut vm_prot_t,
            inheritance: vm_inherit_t,
        ) -> kern_return_t;
    }

    /// Map the code pages a second time and make that alias writable.
    ///
    /// Writing through a shared alias keeps the original mapping RX the whole time,
    /// which signed and shared-cache text requires.
    unsafe fn writable_alias(page_start: usize, map_size: usize) -> Option<usize> {
        let task = mach_task_self();
        let mut alias: vm_address_t = 0;
        let mut cur_prot: vm_prot_t = 0;
        let mut max_prot: vm_prot_t = 0;

        let kr = vm_remap(
            task,
            &mut alias,
            map_size as vm_size_t,
            0,
            VM_FLAGS_ANYWHERE,
            task,
            page_start as vm_address_t,
            FALSE,
            &mut cur_prot,
            &mut max_prot,
            VM_INHERIT_NONE,
        );
        if kr != KERN_SUCCESS {
            if debug_enabled() {
                eprintln!("[fnswap-intercept] patcher: vm_remap failed kr={kr} page=0x{page_start:x}");
            }
            return None;
        }

        // Never raise the maximum protection here: that forces a private copy and
        // the write would no longer reach the shared page.
        let kr = mach_vm_protect(
            task,
            alias as mach_vm_address_t,
            map_size as mach_vm_size_t,
            FALSE,
            VM_PROT_READ | VM_PROT_WRITE,
        );
        if kr != KERN_SUCCESS {
            if debug_enabled() {
                eprintln!(
                    "[fnswap-intercept] patcher: alias protect failed kr={kr} cur=0x{cur_prot:x} max=0x{max_prot:x}"
                );
            }
            mach_vm_deallocate(task, alias as mach_vm_address_t, map_size as mach_vm_size_t);
            return None;
        }
        Some(alias)
    }

    pub unsafe fn patch_code(addr: *mut u8, size: usize, apply: impl FnOnce(*mut u8)) -> Result<(), HookError> {
        let (page_start, map_size) = page_span(addr as usize, size);

        if let Some(alias) = writable_alias(page_start, map_size) {
            apply((alias + (addr as usize - page_start)) as *mut u8);
            mach_vm_deallocate(mach_task_self(), alias as mach_vm_address_t, map_size as mach_vm_size_t);
            invalidate_icache(addr, size);
            return Ok(());
        }

        // Locally built binaries usually allow a plain RWX flip.
        if libc::mprotect(
            page_start as *mut libc::c_void,
            map_size,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        ) != 0
        {
            let errno = last_errno();
            if debug_enabled() {
                eprintln!("[fnswap-intercept] patcher: mprotect RWX failed errno={errno} page=0x{page_start:x}");
            }
            return Err(HookError::PatchFailed { address: addr as usize, errno });
        }
        apply(addr);
        libc::mprotect(page_start as *mut libc::c_void, map_size, libc::PROT_READ | libc::PROT_EXEC);
        invalidate_icache(addr, size);
        Ok(())
    }
}

/// Patch code at `addr` for `size` bytes.
///
/// # Safety
/// `addr` must point to `size` bytes of executable memory. `apply` must write within that range.
pub unsafe fn patch_code(addr: *mut u8, size: usize, apply: impl FnOnce(*mut u8)) -> Result<(), HookError> {
    if size == 0 {
        return Ok(());
    }
    #[cfg(target_os = "macos")]
    {
        darwin::patch_code(addr, size, apply)
    }
    #[cfg(target_os = "linux")]
    {
        linux::patch_code(addr, size, apply)
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = (addr, size, apply);
        Err(HookError::Unsupported)
    }
}

/// Overwrite executable memory at `addr` with `bytes`.
///
/// # Safety
/// Same contract as [`patch_code`]; `bytes` must form complete instructions.
pub unsafe fn write_code(addr: *mut u8, bytes: &[u8]) -> Result<(), HookError> {
    patch_code(addr, bytes.len(), |p| {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), p, bytes.len());
    })
}

/// Copy `len` bytes of code starting at `addr`.
///
/// # Safety
/// `addr` must point to `len` readable bytes.
pub unsafe fn read_code(addr: *const u8, len: usize) -> Vec<u8> {
    core::slice::from_raw_parts(addr, len).to_vec()
}
