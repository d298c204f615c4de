//! GREASE values (RFC 8701).

use rand::Rng;

/// Placeholder stored in blueprints wherever a GREASE value belongs.
/// The concrete value is chosen per ClientHello.
pub const GREASE_PLACEHOLDER: u16 = 0x0A0A;

/// Check whether a 16-bit code point is one of the sixteen GREASE values.
pub fn is_grease(value: u16) -> bool {
    let hi = (value >> 8) as u8;
    let lo = value as u8;
    hi == lo && hi & 0x0F == 0x0A
}

/// Drop GREASE values from a list, keeping order.
pub fn strip_grease(values: &[u16]) -> Vec<u16> {
    values.iter().copied().filter(|v| !is_grease(*v)).collect()
}

/// Build the GREASE value with the given nibble (0..16).
pub fn grease_value(nibble: u8) -> u16 {
    let n = u16::from(nibble & 0x0F);
    0x0A0A | (n << 12) | (n << 4)
}

/// GREASE values picked for a single ClientHello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreaseSet {
    pub cipher: u16,
    pub group: u16,
    pub version: u16,
    pub first_extension: u16,
    pub last_extension: u16,
}

impl GreaseSet {
    /// Pick a fresh set. The two extension values always differ.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let first: u8 = rng.gen_range(0..16);
        let mut last: u8 = rng.gen_range(0..16);
        if last == first {
            last = (last + 1) % 16;
        }
        Self {
            cipher: grease_value(rng.gen_range(0..16)),
            group: grease_value(rng.gen_range(0..16)),
            version: grease_value(rng.gen_range(0..16)),
            first_extension: grease_value(first),
            last_extension: grease_value(last),
        }
    }
}
