use crate::error::Result;
use anyhow::bail;
use std::fmt::Display;

/// An alignment. Always a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub(crate) struct Alignment {
    pub(crate) exponent: u8,
}

/// The minimum alignment that we support.
pub(crate) const MIN: Alignment = Alignment { exponent: 0 };

/// The maximum alignment that we support.
pub(crate) const MAX: Alignment = Alignment { exponent: 15 };

/// Alignment of an ELF word. Word-sized tables (.hash) and the symbol tables
/// use this, as does the program-header segment itself.
pub(crate) const WORD: Alignment = Alignment { exponent: 2 };

/// Alignment of the loadable code and data sections. Their end addresses
/// determine where the loader's mmap boundaries fall, so these are page
/// aligned.
pub(crate) const PAGE: Alignment = Alignment { exponent: 12 };

impl Alignment {
    pub(crate) fn new(raw: u64) -> Result<Self> {
        if !raw.is_power_of_two() {
            bail!("Invalid alignment 0x{raw:x}");
        }
        let exponent = raw.trailing_zeros();
        if exponent > u32::from(MAX.exponent) {
            bail!("Unsupported alignment 0x{raw:x}");
        }
        Ok(Alignment {
            exponent: exponent as u8,
        })
    }

    pub(crate) fn value(self) -> u64 {
        1 << self.exponent
    }

    pub(crate) fn align_up(self, value: u64) -> u64 {
        value.next_multiple_of(self.value())
    }

    pub(crate) fn is_aligned(self, value: u64) -> bool {
        value & (self.value() - 1) == 0
    }
}

impl Display for Alignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.value(), f)
    }
}

#[test]
fn test_align_up() {
    assert_eq!(Alignment::new(16).unwrap().align_up(16), 16);
    assert_eq!(Alignment::new(16).unwrap().align_up(15), 16);
    assert_eq!(Alignment::new(16).unwrap().align_up(1), 16);
    assert_eq!(Alignment::new(16).unwrap().align_up(0), 0);
    assert_eq!(Alignment::new(16).unwrap().align_up(31), 32);
}

#[test]
fn test_is_aligned() {
    assert!(PAGE.is_aligned(0));
    assert!(PAGE.is_aligned(0x2000));
    assert!(!PAGE.is_aligned(0x2001));
    assert!(MIN.is_aligned(17));
}

#[test]
fn test_new_rejects_non_power_of_two() {
    assert!(Alignment::new(0).is_err());
    assert!(Alignment::new(3).is_err());
    assert!(Alignment::new(1 << 20).is_err());
    assert_eq!(Alignment::new(4096).unwrap(), PAGE);
}
