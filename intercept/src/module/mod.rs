//! Symbol lookup in already-loaded modules.

use crate::types::HookError;
use std::ffi::CString;

fn symbol_cstr(symbol: &str) -> Result<CString, HookError> {
    if symbol.is_empty() {
        return Err(HookError::InvalidSymbol(symbol.to_string()));
    }
    CString::new(symbol).map_err(|_| HookError::InvalidSymbol(symbol.to_string()))
}

#[cfg(unix)]
unsafe fn dlsym_nonnull(handle: *mut libc::c_void, name: &CString) -> Option<usize> {
    let p = libc::dlsym(handle, name.as_ptr());
    (!p.is_null()).then_some(p as usize)
}

/// Spellings to try for `symbol`: as given, then the Mach-O `nlist` variant.
fn candidate_names(symbol: &str) -> Vec<String> {
    let mut names = vec![symbol.to_string()];
    if cfg!(target_os = "macos") {
        match symbol.strip_prefix('_') {
            Some(stripped) if !stripped.is_empty() => names.push(stripped.to_string()),
            Some(_) => {}
            None => names.push(format!("_{symbol}")),
        }
    }
    names
}

/// Resolve `symbol` across every module loaded into the process.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub fn find_global_export_by_name(symbol: &str) -> Result<usize, HookError> {
    symbol_cstr(symbol)?;
    for name in candidate_names(symbol) {
        let Ok(cstr) = CString::new(name) else { continue };
        if let Some(addr) = unsafe { dlsym_nonnull(libc::RTLD_DEFAULT, &cstr) } {
            return Ok(addr);
        }
    }
    Err(HookError::SymbolNotFound(symbol.to_string()))
}

/// Resolve `symbol` inside one already-loaded module.
///
/// `module_name` may be a full path or a file name such as `libc.so.6`; on Linux a
/// bare file name is also matched against the basenames of loaded objects. The
/// module is never loaded as a side effect.
#[cfg(any(target_os = "linux", target_os = "macos"))]
pub fn find_export_by_name(module_name: &str, symbol: &str) -> Result<usize, HookError> {
    symbol_cstr(symbol)?;
    let mut paths = vec![module_name.to_string()];
    #[cfg(target_os = "linux")]
    paths.extend(loaded_paths_with_basename(module_name));

    for path in paths {
        let Ok(path_cstr) = CString::new(path) else { continue };
        unsafe {
            let handle = libc::dlopen(path_cstr.as_ptr(), libc::RTLD_NOLOAD | libc::RTLD_LAZY);
            if handle.is_null() {
                continue;
            }
            let found = candidate_names(symbol)
                .into_iter()
                .filter_map(|name| CString::new(name).ok())
                .find_map(|name| dlsym_nonnull(handle, &name));
            libc::dlclose(handle);
            if let Some(addr) = found {
                return Ok(addr);
            }
        }
    }
    Err(HookError::SymbolNotFound(format!("{module_name}!{symbol}")))
}

/// Full paths of loaded objects whose file name is `basename`.
#[cfg(target_os = "linux")]
fn loaded_paths_with_basename(basename: &str) -> Vec<String> {
    use core::ffi::c_void;
    use std::ffi::CStr;

    struct Ctx<'a> {
        basename: &'a str,
        paths: Vec<String>,
    }

    unsafe extern "C" fn callback(info: *mut libc::dl_phdr_info, _size: libc::size_t, data: *mut c_void) -> libc::c_int {
        let ctx = &mut *(data as *mut Ctx<'_>);
        let info = &*info;
        if info.dlpi_name.is_null() || *info.dlpi_name == 0 {
            return 0;
        }
        let path = CStr::from_ptr(info.dlpi_name).to_string_lossy();
        if path.rsplit('/').next() == Some(ctx.basename) {
            ctx.paths.push(path.into_owned());
        }
        0
    }

    if basename.contains('/') {
        return Vec::new();
    }
    let mut ctx = Ctx { basename, paths: Vec::new() };
    unsafe {
        libc::dl_iterate_phdr(Some(callback), &mut ctx as *mut Ctx<'_> as *mut c_void);
    }
    ctx.paths
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn find_global_export_by_name(symbol: &str) -> Result<usize, HookError> {
    symbol_cstr(symbol)?;
    Err(HookError::Unsupported)
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
pub fn find_export_by_name(_module_name: &str, symbol: &str) -> Result<usize, HookError> {
    symbol_cstr(symbol)?;
    Err(HookError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_interior_nul() {
        assert_eq!(find_global_export_by_name(""), Err(HookError::InvalidSymbol(String::new())));
        assert!(matches!(
            find_global_export_by_name("get\0pid"),
            Err(HookError::InvalidSymbol(_))
        ));
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn finds_libc_getpid() {
        let addr = find_global_export_by_name("getpid").expect("getpid");
        assert_ne!(addr, 0);
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    fn unknown_symbol_is_not_found() {
        assert_eq!(
            find_global_export_by_name("fnswap_definitely_not_a_symbol"),
            Err(HookError::SymbolNotFound("fnswap_definitely_not_a_symbol".into()))
        );
    }

    #[test]
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn finds_export_in_named_module() {
        let global = find_global_export_by_name("atof").expect("global atof");
        let scoped = find_export_by_name("libc.so.6", "atof").expect("libc.so.6!atof");
        assert_eq!(global, scoped);
        assert!(find_export_by_name("libfnswap-missing.so", "atof").is_err());
    }

    #[test]
    #[cfg(target_os = "macos")]
    fn candidate_names_add_underscore_variant() {
        assert_eq!(candidate_names("atof"), ["atof", "_atof"]);
        assert_eq!(candidate_names("_atof"), ["_atof", "atof"]);
    }
}
