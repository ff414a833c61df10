use crate::bail;
use crate::error::Result;
use object::elf::EF_ARM_EABI_VER5;
use object::elf::EF_MIPS_ARCH_32R2;
use object::elf::EF_MIPS_ARCH_64R6;
use object::elf::EF_MIPS_CPIC;
use object::elf::EF_MIPS_NOREORDER;
use object::elf::EF_MIPS_PIC;
use object::elf::EM_386;
use object::elf::EM_AARCH64;
use object::elf::EM_ARM;
use object::elf::EM_MIPS;
use object::elf::EM_X86_64;
use std::fmt::Display;
use std::str::FromStr;

/// The o32 ABI marker from the MIPS psABI. A binutils extension that `object`
/// doesn't define.
const EF_MIPS_ABI_O32: u32 = 0x1000;

/// The instruction sets we can emit shared objects for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    Arm,
    Thumb2,
    Arm64,
    X86,
    X86_64,
    Mips,
    Mips64,
}

impl Architecture {
    /// The value for the file header's `e_machine` field.
    pub(crate) fn elf_machine(self) -> u16 {
        match self {
            Architecture::Arm | Architecture::Thumb2 => EM_ARM,
            Architecture::Arm64 => EM_AARCH64,
            Architecture::X86 => EM_386,
            Architecture::X86_64 => EM_X86_64,
            Architecture::Mips | Architecture::Mips64 => EM_MIPS,
        }
    }

    /// The value for the file header's `e_flags` field.
    pub(crate) fn elf_flags(self) -> u32 {
        match self {
            Architecture::Arm | Architecture::Thumb2 => EF_ARM_EABI_VER5,
            Architecture::Arm64 | Architecture::X86 | Architecture::X86_64 => 0,
            Architecture::Mips => {
                EF_MIPS_NOREORDER | EF_MIPS_PIC | EF_MIPS_CPIC | EF_MIPS_ABI_O32 | EF_MIPS_ARCH_32R2
            }
            Architecture::Mips64 => {
                EF_MIPS_NOREORDER | EF_MIPS_PIC | EF_MIPS_CPIC | EF_MIPS_ARCH_64R6
            }
        }
    }
}

impl FromStr for Architecture {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "arm" => Architecture::Arm,
            "thumb2" => Architecture::Thumb2,
            "arm64" | "aarch64" => Architecture::Arm64,
            "x86" => Architecture::X86,
            "x86_64" => Architecture::X86_64,
            "mips" | "mips32" => Architecture::Mips,
            "mips64" => Architecture::Mips64,
            _ => bail!("Unknown instruction set: {s}"),
        })
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arch = match self {
            Architecture::Arm => "arm",
            Architecture::Thumb2 => "thumb2",
            Architecture::Arm64 => "arm64",
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Mips => "mips",
            Architecture::Mips64 => "mips64",
        };
        write!(f, "{arch}")
    }
}
