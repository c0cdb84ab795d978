/// Kernel name used when the configuration does not name one
pub const DEFAULT_KERNEL_NAME: &str = "xbean";

/// Default bound on waiting for a per-service lock, in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;

/// Default longest single wait on conditions before they are re-evaluated, in milliseconds
pub const DEFAULT_CONDITION_WAIT_MS: u64 = 1_000;
