//! Packages a compiler's ahead-of-time output (a read-only data blob, an
//! executable code blob and an optional zero-initialised region) into a
//! loadable little-endian `ET_DYN` ELF shared object.
//!
//! The emitter is strictly single-threaded and runs a two-phase protocol:
//! configure an [`ElfBuilder`], call [`ElfBuilder::init`] to pin down the
//! allocatable layout, let the code producer fix up its content against the
//! final addresses, then call [`ElfBuilder::write`] to commit the file.

pub(crate) use anyhow::bail;
pub(crate) use anyhow::ensure;

pub(crate) mod alignment;
pub mod arch;
pub mod builder;
pub(crate) mod dynamic;
pub mod elf;
pub mod error;
pub mod piece;
pub mod section;
pub mod symtab;

pub use crate::arch::Architecture;
pub use crate::builder::CodeLayout;
pub use crate::builder::CodeRegion;
pub use crate::builder::ElfBuilder;
pub use crate::elf::Elf32;
pub use crate::elf::Elf64;
pub use crate::elf::ElfTypes;
pub use crate::error::Result;
pub use crate::piece::CodeOutput;
pub use crate::section::SectionId;
pub use crate::symtab::SymtabBuilder;
