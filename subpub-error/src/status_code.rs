use std::fmt;

use num_enum::IntoPrimitive;

/// Status codes used to categorise errors.
///
/// # Ranges
/// - 1xxx: general errors
/// - 4xxx: capacity
/// - 6xxx: network / IO
/// - 8xxx: protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 1xxx: general ===
    Internal = 1003,
    InvalidArgs = 1004,
    Unavailable = 1006,

    // === 4xxx: capacity ===
    TooManyConnections = 4002,

    // === 6xxx: network / IO ===
    Timeout = 6002,

    // === 8xxx: protocol ===
    InvalidCommand = 8001,
    ParseError = 8009,
}

impl StatusCode {
    /// Numeric value of the code.
    pub fn code(self) -> u32 {
        self.into()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}
