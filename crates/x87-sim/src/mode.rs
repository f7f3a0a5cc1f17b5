// Extended-precision floating-point mode and type used for x87 spills and
// `long double` values. Initialised once per process; the first
// initialisation fixes the type layout for every backend that follows.

use std::sync::OnceLock;

/// Bit layout of a floating-point mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatMode {
    pub name: &'static str,
    pub exponent_bits: u32,
    pub mantissa_bits: u32,
    /// The integer bit of the significand is stored explicitly.
    pub explicit_one: bool,
}

impl FloatMode {
    /// Sign + exponent + stored mantissa.
    #[must_use]
    pub const fn size_bits(&self) -> u32 {
        1 + self.exponent_bits + self.mantissa_bits
    }
}

/// The 80-bit x87 extended mode.
pub const MODE_E: FloatMode = FloatMode {
    name: "E",
    exponent_bits: 15,
    mantissa_bits: 64,
    explicit_one: true,
};

/// In-memory type of an extended value. Size and alignment include padding
/// and depend on the ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatType {
    pub mode: FloatMode,
    pub size_bytes: u32,
    pub align_bytes: u32,
}

static X86_TYPE_E: OnceLock<FloatType> = OnceLock::new();

/// Establish the extended float type. Later calls return the type fixed by
/// the first one.
pub fn init_x87_type(size_bytes: u32, align_bytes: u32) -> &'static FloatType {
    X86_TYPE_E.get_or_init(|| {
        tracing::debug!(size_bytes, align_bytes, "initialising x87 extended float type");
        FloatType {
            mode: MODE_E,
            size_bytes,
            align_bytes,
        }
    })
}

/// The extended float type, if [`init_x87_type`] has run.
pub fn x86_type_e() -> Option<&'static FloatType> {
    X86_TYPE_E.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_mode_is_80_bits() {
        assert_eq!(MODE_E.size_bits(), 80);
    }

    #[test]
    fn first_initialisation_wins() {
        let first = init_x87_type(12, 4);
        let second = init_x87_type(16, 16);
        assert_eq!(first, second);
        assert_eq!(x86_type_e(), Some(first));
    }
}
