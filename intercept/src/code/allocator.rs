use crate::types::HookError;

/// A page of memory that receives generated code.
///
/// `data` is where the writer emits bytes; `pc` is the address the code runs at.
/// They coincide on every supported platform.
#[derive(Debug)]
pub struct CodeSlice {
    pub data: *mut u8,
    pub pc: *const u8,
    pub size: usize,
}

unsafe impl Send for CodeSlice {}
unsafe impl Sync for CodeSlice {}

impl CodeSlice {
    fn at(ptr: *mut u8, size: usize) -> Self {
        Self { data: ptr, pc: ptr as *const u8, size }
    }

    /// Absolute distance between this slice and `addr`.
    pub fn distance_to(&self, addr: usize) -> usize {
        (self.pc as usize).abs_diff(addr)
    }
}

/// Allocates RW pages for thunks and flips them to RX once written.
///
/// Pages are never returned to the system: a thread may still be executing a
/// thunk when its target is reverted.
#[derive(Debug)]
pub struct CodeAllocator {
    slab_size: usize,
}

impl Default for CodeAllocator {
    fn default() -> Self {
        Self { slab_size: page_size() }
    }
}

fn page_size() -> usize {
    #[cfg(unix)]
    unsafe {
        libc::sysconf(libc::_SC_PAGESIZE) as usize
    }
    #[cfg(not(unix))]
    {
        4096
    }
}

impl CodeAllocator {
    /// Allocate a page within `max_distance` bytes of `near`, falling back to any
    /// address when no gap in the window is free.
    pub fn alloc_near(&mut self, near: *const u8, max_distance: usize) -> Result<CodeSlice, HookError> {
        #[cfg(target_os = "linux")]
        {
            if let Some(slice) = self.alloc_in_linux_gap(near as usize, max_distance) {
                return Ok(slice);
            }
            self.alloc_any()
        }

        #[cfg(target_os = "macos")]
        {
            if let Some(slice) = self.alloc_in_mach_gap(near as usize, max_distance) {
                return Ok(slice);
            }
            self.alloc_any()
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = (near, max_distance);
            Err(HookError::Unsupported)
        }
    }

    /// Candidate base for a `need`-byte mapping inside the gap `[start, end)`,
    /// as close to `near` as the gap allows.
    fn candidate_in_gap(near: usize, start: usize, end: usize, need: usize) -> Option<usize> {
        let page = page_size();
        if end <= start || end - start < need {
            return None;
        }
        let start = (start + page - 1) & !(page - 1);
        let last = (end - need) & !(page - 1);
        if last < start {
            return None;
        }
        Some((near & !(page - 1)).clamp(start, last))
    }

    #[cfg(target_os = "linux")]
    fn alloc_in_linux_gap(&mut self, near: usize, max_distance: usize) -> Option<CodeSlice> {
        let need = self.slab_size;
        let win_start = near.saturating_sub(max_distance);
        let win_end = near.saturating_add(max_distance);

        let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
        let mut regions: Vec<(usize, usize)> = maps
            .lines()
            .filter_map(|line| {
                let (start, end) = line.split_whitespace().next()?.split_once('-')?;
                Some((usize::from_str_radix(start, 16).ok()?, usize::from_str_radix(end, 16).ok()?))
            })
            .collect();
        regions.sort_unstable_by_key(|&(start, _)| start);

        // Gaps between mapped regions, plus the tail of the window.
        let mut gaps = Vec::new();
        let mut prev_end = win_start;
        for &(start, end) in &regions {
            if start > win_end {
                break;
            }
            if start > prev_end {
                gaps.push((prev_end, start.min(win_end)));
            }
            prev_end = prev_end.max(end);
        }
        if prev_end < win_end {
            gaps.push((prev_end, win_end));
        }

        // Closest gaps first.
        gaps.sort_by_key(|&(start, end)| {
            Self::candidate_in_gap(near, start, end, need).map_or(usize::MAX, |c| c.abs_diff(near))
        });

        for (start, end) in gaps {
            let Some(candidate) = Self::candidate_in_gap(near, start, end, need) else { continue };
            let ptr = unsafe {
                libc::mmap(
                    candidate as *mut libc::c_void,
                    need,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                continue;
            }
            // Kernels older than 4.17 treat MAP_FIXED_NOREPLACE as a hint.
            if ptr as usize != candidate {
                unsafe { libc::munmap(ptr, need) };
                continue;
            }
            return Some(CodeSlice::at(ptr as *mut u8, need));
        }
        None
    }

    #[cfg(target_os = "macos")]
    fn alloc_in_mach_gap(&mut self, near: usize, max_distance: usize) -> Option<CodeSlice> {
        use mach2::kern_return::KERN_SUCCESS;
        use mach2::traps::mach_task_self;
        use mach2::vm::{mach_vm_allocate, mach_vm_region};
        use mach2::vm_region::{vm_region_basic_info_64, vm_region_info_t, VM_REGION_BASIC_INFO_64};
        use mach2::vm_statistics::VM_FLAGS_FIXED;
        use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

        let need = self.slab_size;
        let win_start = near.saturating_sub(max_distance);
        let win_end = near.saturating_add(max_distance);

        unsafe {
            let task = mach_task_self();
            let mut cursor = win_start as mach_vm_address_t;
            let mut prev_end = win_start;

            while (cursor as usize) < win_end {
                let mut region_addr = cursor;
                let mut region_size: mach_vm_size_t = 0;
                let mut info: vm_region_basic_info_64 = core::mem::zeroed();
                let mut info_count = vm_region_basic_info_64::count();
                let mut object_name: u32 = 0;
                let kr = mach_vm_region(
                    task,
                    &mut region_addr,
                    &mut region_size,
                    VM_REGION_BASIC_INFO_64,
                    (&mut info as *mut vm_region_basic_info_64) as vm_region_info_t,
                    &mut info_count,
                    &mut object_name,
                );
                // No region at or above the cursor: the rest of the window is free.
                let (gap_end, region_end) = if kr == KERN_SUCCESS {
                    (
                        (region_addr as usize).min(win_end),
                        (region_addr + region_size) as usize,
                    )
                } else {
                    (win_end, win_end)
                };

                if let Some(candidate) = Self::candidate_in_gap(near, prev_end, gap_end, need) {
                    let mut out = candidate as mach_vm_address_t;
                    if mach_vm_allocate(task, &mut out, need as mach_vm_size_t, VM_FLAGS_FIXED)
                        == KERN_SUCCESS
                    {
                        return Some(CodeSlice::at(out as *mut u8, need));
                    }
                }

                if kr != KERN_SUCCESS {
                    break;
                }
                prev_end = prev_end.max(region_end);
                cursor = region_end as mach_vm_address_t;
            }
        }
        None
    }

    pub fn alloc_any(&mut self) -> Result<CodeSlice, HookError> {
        #[cfg(unix)]
        unsafe {
            let ptr = libc::mmap(
                core::ptr::null_mut(),
                self.slab_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(HookError::AllocationFailed);
            }
            Ok(CodeSlice::at(ptr as *mut u8, self.slab_size))
        }

        #[cfg(not(unix))]
        {
            Err(HookError::Unsupported)
        }
    }

    /// Flip a written slice from RW to RX.
    ///
    /// # Safety
    /// `slice` must come from this allocator and hold complete instructions.
    pub unsafe fn make_executable(&self, slice: &CodeSlice) -> Result<(), HookError> {
        #[cfg(unix)]
        {
            if libc::mprotect(
                slice.data as *mut libc::c_void,
                slice.size,
                libc::PROT_READ | libc::PROT_EXEC,
            ) != 0
            {
                return Err(HookError::AllocationFailed);
            }
            crate::code::cache::invalidate_icache(slice.data, slice.size);
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let _ = slice;
            Err(HookError::Unsupported)
        }
    }
}
