#[cfg(target_os = "macos")]
extern "C" {
    fn sys_icache_invalidate(addr: *mut core::ffi::c_void, size: usize);
    fn sys_dcache_flush(addr: *mut core::ffi::c_void, size: usize);
}

/// Make freshly written instructions visible to instruction fetch.
///
/// AArch64 keeps separate, non-coherent data and instruction caches, so new code
/// must be cleaned from the D-cache and the I-cache invalidated. x86_64 keeps them
/// coherent and this is a no-op there.
///
/// # Safety
/// `addr` must point to at least `size` bytes of mapped memory.
#[inline]
pub unsafe fn invalidate_icache(addr: *mut u8, size: usize) {
    #[cfg(target_os = "macos")]
    {
        sys_dcache_flush(addr as *mut core::ffi::c_void, size);
        sys_icache_invalidate(addr as *mut core::ffi::c_void, size);
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        extern "C" {
            fn __clear_cache(beg: *mut libc::c_void, end: *mut libc::c_void);
        }
        __clear_cache(addr as *mut libc::c_void, addr.add(size) as *mut libc::c_void);
    }

    #[cfg(not(any(target_os = "macos", all(target_os = "linux", target_arch = "aarch64"))))]
    {
        let _ = (addr, size);
    }
}

/// Strip pointer-authentication bits from a code pointer so it can be used as an
/// address. Only arm64e signs function pointers; everywhere else this is identity.
#[cfg(all(target_arch = "aarch64", target_os = "macos"))]
#[inline]
pub fn strip_code_ptr(ptr: usize) -> usize {
    let mut x = ptr as u64;
    unsafe {
        core::arch::asm!("xpaci {0}", inout(reg) x, options(nostack, preserves_flags));
    }
    x as usize
}

#[cfg(not(all(target_arch = "aarch64", target_os = "macos")))]
#[inline]
pub fn strip_code_ptr(ptr: usize) -> usize {
    ptr
}
