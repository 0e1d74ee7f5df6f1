//! Engine configuration, read once from the environment.

/// Default window for placing thunks next to their target.
///
/// Matches the reach of the shortest relative branch on each architecture so a
/// thunk found inside it can always be reached with the short redirect.
#[cfg(target_arch = "aarch64")]
pub const DEFAULT_NEAR_RANGE: usize = 128 * 1024 * 1024 - 4096;

#[cfg(not(target_arch = "aarch64"))]
pub const DEFAULT_NEAR_RANGE: usize = 0x7FFF_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Print verbose patcher diagnostics to stderr (`FNSWAP_HOOK_DEBUG`).
    pub debug: bool,
    /// Always emit the long absolute redirect (`FNSWAP_FAR_REDIRECT`).
    pub force_far_redirect: bool,
    /// Search window for near thunk allocation in bytes (`FNSWAP_NEAR_RANGE`).
    pub near_range: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            force_far_redirect: false,
            near_range: DEFAULT_NEAR_RANGE,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let near_range = match lookup("FNSWAP_NEAR_RANGE") {
            Some(raw) => match parse_size(&raw) {
                Some(n) => n.min(DEFAULT_NEAR_RANGE),
                None => {
                    log::warn!("ignoring unparsable FNSWAP_NEAR_RANGE={raw:?}");
                    defaults.near_range
                }
            },
            None => defaults.near_range,
        };
        Self {
            debug: lookup("FNSWAP_HOOK_DEBUG").is_some(),
            force_far_redirect: lookup("FNSWAP_FAR_REDIRECT").is_some(),
            near_range,
        }
    }
}

/// Accepts decimal or `0x`-prefixed hexadecimal byte counts.
fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}
