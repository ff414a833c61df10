//! Parametric ELF record construction. The emitter is generic over the ELF
//! class; [`ElfTypes`] carries the wire-format record types for one class and
//! knows how to populate them from the class-independent logical records that
//! the rest of the crate works with. All fields are serialised little-endian.

use object::LittleEndian;
use object::Pod;
use object::U16;
use object::U32;
use object::U64;

/// Fixed section names. The section-header string table holds exactly these,
/// in assignment order.
pub mod secnames {
    pub const TEXT_SECTION_NAME: &str = ".text";
    pub const RODATA_SECTION_NAME: &str = ".rodata";
    pub const BSS_SECTION_NAME: &str = ".bss";
    pub const DYNSYM_SECTION_NAME: &str = ".dynsym";
    pub const DYNSTR_SECTION_NAME: &str = ".dynstr";
    pub const HASH_SECTION_NAME: &str = ".hash";
    pub const DYNAMIC_SECTION_NAME: &str = ".dynamic";
    pub const SHSTRTAB_SECTION_NAME: &str = ".shstrtab";
    pub const SYMTAB_SECTION_NAME: &str = ".symtab";
    pub const STRTAB_SECTION_NAME: &str = ".strtab";
    pub const EH_FRAME_SECTION_NAME: &str = ".eh_frame";
    pub const EH_FRAME_HDR_SECTION_NAME: &str = ".eh_frame_hdr";
}

/// Logical file header. Only the fields that vary between emissions appear
/// here; everything else (magic, class, endianness, `ET_DYN`, entry point,
/// record sizes) is fixed and filled in during serialisation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderRecord {
    pub machine: u16,
    pub flags: u32,
    pub phoff: u64,
    pub shoff: u64,
    pub phnum: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// Logical program header.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentRecord {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

/// Logical section header.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionRecord {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    pub sh_entsize: u64,
}

/// Logical symbol-table entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolRecord {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

/// The capability set for one ELF class: the primitive `Addr`/`Word`/`Sword`
/// types and the five record layouts, plus conversion from the logical
/// records. Note that `Word` is 32-bit in both classes (`Elf64_Word` is a
/// `u32`); only addresses and the address-sized record fields widen.
pub trait ElfTypes {
    const CLASS: u8;

    type Addr;
    type Word;
    type Sword;
    type Ehdr: Pod;
    type Phdr: Pod;
    type Shdr: Pod;
    type Sym: Pod;
    type Dyn: Pod;

    fn file_header(h: &HeaderRecord) -> Self::Ehdr;
    fn program_header(p: &SegmentRecord) -> Self::Phdr;
    fn section_header(s: &SectionRecord) -> Self::Shdr;
    fn symbol(s: &SymbolRecord) -> Self::Sym;
    fn dynamic_entry(tag: u32, value: u64) -> Self::Dyn;
}

/// The 32-bit little-endian ELF class.
pub struct Elf32;

/// The 64-bit little-endian ELF class.
pub struct Elf64;

impl ElfTypes for Elf32 {
    const CLASS: u8 = object::elf::ELFCLASS32;

    type Addr = u32;
    type Word = u32;
    type Sword = i32;
    type Ehdr = object::elf::FileHeader32<LittleEndian>;
    type Phdr = object::elf::ProgramHeader32<LittleEndian>;
    type Shdr = object::elf::SectionHeader32<LittleEndian>;
    type Sym = object::elf::Sym32<LittleEndian>;
    type Dyn = object::elf::Dyn32<LittleEndian>;

    fn file_header(h: &HeaderRecord) -> Self::Ehdr {
        let e = LittleEndian;
        object::elf::FileHeader32 {
            e_ident: ident(Self::CLASS),
            e_type: U16::new(e, object::elf::ET_DYN),
            e_machine: U16::new(e, h.machine),
            e_version: U32::new(e, u32::from(object::elf::EV_CURRENT)),
            e_entry: U32::new(e, 0),
            e_phoff: U32::new(e, h.phoff as u32),
            e_shoff: U32::new(e, h.shoff as u32),
            e_flags: U32::new(e, h.flags),
            e_ehsize: U16::new(e, size_of::<Self::Ehdr>() as u16),
            e_phentsize: U16::new(e, size_of::<Self::Phdr>() as u16),
            e_phnum: U16::new(e, h.phnum),
            e_shentsize: U16::new(e, size_of::<Self::Shdr>() as u16),
            e_shnum: U16::new(e, h.shnum),
            e_shstrndx: U16::new(e, h.shstrndx),
        }
    }

    fn program_header(p: &SegmentRecord) -> Self::Phdr {
        let e = LittleEndian;
        object::elf::ProgramHeader32 {
            p_type: U32::new(e, p.p_type),
            p_offset: U32::new(e, p.p_offset as u32),
            p_vaddr: U32::new(e, p.p_vaddr as u32),
            p_paddr: U32::new(e, p.p_paddr as u32),
            p_filesz: U32::new(e, p.p_filesz as u32),
            p_memsz: U32::new(e, p.p_memsz as u32),
            p_flags: U32::new(e, p.p_flags),
            p_align: U32::new(e, p.p_align as u32),
        }
    }

    fn section_header(s: &SectionRecord) -> Self::Shdr {
        let e = LittleEndian;
        object::elf::SectionHeader32 {
            sh_name: U32::new(e, s.sh_name),
            sh_type: U32::new(e, s.sh_type),
            sh_flags: U32::new(e, s.sh_flags as u32),
            sh_addr: U32::new(e, s.sh_addr as u32),
            sh_offset: U32::new(e, s.sh_offset as u32),
            sh_size: U32::new(e, s.sh_size as u32),
            sh_link: U32::new(e, s.sh_link),
            sh_info: U32::new(e, s.sh_info),
            sh_addralign: U32::new(e, s.sh_addralign as u32),
            sh_entsize: U32::new(e, s.sh_entsize as u32),
        }
    }

    fn symbol(s: &SymbolRecord) -> Self::Sym {
        let e = LittleEndian;
        object::elf::Sym32 {
            st_name: U32::new(e, s.st_name),
            st_value: U32::new(e, s.st_value as u32),
            st_size: U32::new(e, s.st_size as u32),
            st_info: s.st_info,
            st_other: s.st_other,
            st_shndx: U16::new(e, s.st_shndx),
        }
    }

    fn dynamic_entry(tag: u32, value: u64) -> Self::Dyn {
        let e = LittleEndian;
        object::elf::Dyn32 {
            d_tag: U32::new(e, tag),
            d_val: U32::new(e, value as u32),
        }
    }
}

impl ElfTypes for Elf64 {
    const CLASS: u8 = object::elf::ELFCLASS64;

    type Addr = u64;
    type Word = u32;
    type Sword = i32;
    type Ehdr = object::elf::FileHeader64<LittleEndian>;
    type Phdr = object::elf::ProgramHeader64<LittleEndian>;
    type Shdr = object::elf::SectionHeader64<LittleEndian>;
    type Sym = object::elf::Sym64<LittleEndian>;
    type Dyn = object::elf::Dyn64<LittleEndian>;

    fn file_header(h: &HeaderRecord) -> Self::Ehdr {
        let e = LittleEndian;
        object::elf::FileHeader64 {
            e_ident: ident(Self::CLASS),
            e_type: U16::new(e, object::elf::ET_DYN),
            e_machine: U16::new(e, h.machine),
            e_version: U32::new(e, u32::from(object::elf::EV_CURRENT)),
            e_entry: U64::new(e, 0),
            e_phoff: U64::new(e, h.phoff),
            e_shoff: U64::new(e, h.shoff),
            e_flags: U32::new(e, h.flags),
            e_ehsize: U16::new(e, size_of::<Self::Ehdr>() as u16),
            e_phentsize: U16::new(e, size_of::<Self::Phdr>() as u16),
            e_phnum: U16::new(e, h.phnum),
            e_shentsize: U16::new(e, size_of::<Self::Shdr>() as u16),
            e_shnum: U16::new(e, h.shnum),
            e_shstrndx: U16::new(e, h.shstrndx),
        }
    }

    fn program_header(p: &SegmentRecord) -> Self::Phdr {
        let e = LittleEndian;
        object::elf::ProgramHeader64 {
            p_type: U32::new(e, p.p_type),
            p_flags: U32::new(e, p.p_flags),
            p_offset: U64::new(e, p.p_offset),
            p_vaddr: U64::new(e, p.p_vaddr),
            p_paddr: U64::new(e, p.p_paddr),
            p_filesz: U64::new(e, p.p_filesz),
            p_memsz: U64::new(e, p.p_memsz),
            p_align: U64::new(e, p.p_align),
        }
    }

    fn section_header(s: &SectionRecord) -> Self::Shdr {
        let e = LittleEndian;
        object::elf::SectionHeader64 {
            sh_name: U32::new(e, s.sh_name),
            sh_type: U32::new(e, s.sh_type),
            sh_flags: U64::new(e, s.sh_flags),
            sh_addr: U64::new(e, s.sh_addr),
            sh_offset: U64::new(e, s.sh_offset),
            sh_size: U64::new(e, s.sh_size),
            sh_link: U32::new(e, s.sh_link),
            sh_info: U32::new(e, s.sh_info),
            sh_addralign: U64::new(e, s.sh_addralign),
            sh_entsize: U64::new(e, s.sh_entsize),
        }
    }

    fn symbol(s: &SymbolRecord) -> Self::Sym {
        let e = LittleEndian;
        object::elf::Sym64 {
            st_name: U32::new(e, s.st_name),
            st_info: s.st_info,
            st_other: s.st_other,
            st_shndx: U16::new(e, s.st_shndx),
            st_value: U64::new(e, s.st_value),
            st_size: U64::new(e, s.st_size),
        }
    }

    fn dynamic_entry(tag: u32, value: u64) -> Self::Dyn {
        let e = LittleEndian;
        object::elf::Dyn64 {
            d_tag: U64::new(e, u64::from(tag)),
            d_val: U64::new(e, value),
        }
    }
}

fn ident(class: u8) -> object::elf::Ident {
    object::elf::Ident {
        magic: object::elf::ELFMAG,
        class,
        data: object::elf::ELFDATA2LSB,
        version: object::elf::EV_CURRENT,
        os_abi: object::elf::ELFOSABI_LINUX,
        abi_version: 0,
        padding: [0; 7],
    }
}
