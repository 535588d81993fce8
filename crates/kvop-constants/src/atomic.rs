//! Atomic operation limits.

/// Maximum number of read levels within one atomic operation attempt.
///
/// A read factory may register further read factories for the next level.
/// Exceeding this depth is a composition bug (a factory that keeps
/// registering itself), reported as an error instead of looping forever.
pub const MAX_READ_LEVELS: u32 = 10;
