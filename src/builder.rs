//! The orchestrator. Owns every section builder and runs the two-phase
//! emission protocol:
//!
//! * `init` finalises the allocatable layout, so that the code producer can
//!   rely on final addresses while it fixes up its own content.
//! * `write` finalises the non-allocatable layout and program headers, then
//!   commits every byte of the file.
//!
//! The file layout (addresses equal file offsets within each load segment):
//!
//! ```text
//! +--------------------------+
//! | Ehdr                     |
//! | Phdr PHDR                |
//! | Phdr LOAD R              | .dynsym .dynstr .hash .eh_frame* .rodata
//! | Phdr LOAD R X            | .text
//! | Phdr LOAD RW             | .bss (optional)
//! | Phdr LOAD RW             | .dynamic
//! | Phdr DYNAMIC             | .dynamic
//! | Phdr GNU_EH_FRAME        | .eh_frame_hdr (optional)
//! | .dynsym                  | null, oatdata, oatexec, oatlastword, bss syms
//! | .dynstr                  | symbol names + SONAME
//! | .hash                    | nbucket, nchain, buckets[], chain[]
//! | .eh_frame .eh_frame_hdr  | (optional, allocatable raw sections)
//! | .rodata                  | \ streamed by the code producer
//! | .text                    | /
//! | .dynamic                 | at the .bss file offset (.bss has no bytes)
//! | .symtab .strtab          | (optional)
//! | other raw sections       | (optional, non-allocatable)
//! | .shstrtab                |
//! | section headers          |
//! +--------------------------+
//! ```

use crate::alignment;
use crate::alignment::Alignment;
use crate::arch::Architecture;
use crate::bail;
use crate::debug_assert_bail;
use crate::dynamic::DynamicBuilder;
#[allow(clippy::wildcard_imports)]
use crate::elf::secnames::*;
use crate::elf::ElfTypes;
use crate::elf::HeaderRecord;
use crate::elf::SectionRecord;
use crate::elf::SegmentRecord;
use crate::ensure;
use crate::error::Result;
use crate::piece::CodeOutput;
use crate::piece::FilePiece;
use crate::piece::write_pieces;
use crate::section::OatSectionBuilder;
use crate::section::RawSectionBuilder;
use crate::section::SectionBuilder;
use crate::section::SectionId;
use crate::section::SectionTable;
use crate::symtab::SymtabBuilder;
use anyhow::Context as _;
use std::io::Seek;
use std::io::Write;
use std::marker::PhantomData;
use std::path::Path;
use std::path::PathBuf;

/// Program-header slots, in their fixed positional order. When `.bss` is
/// empty its LOAD slot is skipped at serialisation and the remaining headers
/// are rebased contiguously.
const PH_PHDR: usize = 0;
const PH_LOAD_R: usize = 1;
const PH_LOAD_RX: usize = 2;
const PH_LOAD_RW_BSS: usize = 3;
const PH_LOAD_RW_DYNAMIC: usize = 4;
const PH_DYNAMIC: usize = 5;
const PH_EH_FRAME_HDR: usize = 6;
const PH_NUM: usize = 7;

/// Where one of the producer's blobs sits within its own output, and how big
/// it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeRegion {
    pub relative_offset: u64,
    pub size: u64,
}

/// Sizes and relative offsets of the producer's three regions. A zero-sized
/// `bss` disables the bss section, its load segment and its symbols.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeLayout {
    pub rodata: CodeRegion,
    pub text: CodeRegion,
    pub bss: CodeRegion,
}

pub struct ElfBuilder<'a, E: ElfTypes, W> {
    code_output: &'a mut dyn CodeOutput,
    file: W,
    output_path: PathBuf,
    add_symbols: bool,
    /// Set when configuration or an integrity check fails; once set, `write`
    /// refuses to produce output.
    fatal_error: bool,

    table: SectionTable,
    rodata: OatSectionBuilder,
    text: OatSectionBuilder,
    bss: OatSectionBuilder,
    dynsym: SymtabBuilder,
    symtab: SymtabBuilder,
    hash: SectionId,
    dynamic: DynamicBuilder,
    shstrtab: SectionId,
    raw_sections: Vec<RawSectionBuilder>,

    /// Sections in final header-table order, excluding the null header.
    section_order: Vec<SectionId>,
    next_index: u32,
    shstrtab_data: Vec<u8>,
    dynstr: Vec<u8>,
    dynstr_soname_offset: u32,
    hash_words: Vec<u32>,
    segments: [SegmentRecord; PH_NUM],
    header: HeaderRecord,
    _class: PhantomData<E>,
}

impl<'a, E: ElfTypes, W: Write + Seek> ElfBuilder<'a, E, W> {
    pub fn new(
        code_output: &'a mut dyn CodeOutput,
        file: W,
        output_path: &Path,
        isa: Architecture,
        code: CodeLayout,
        add_symbols: bool,
    ) -> ElfBuilder<'a, E, W> {
        let mut table = SectionTable::new();
        let text = OatSectionBuilder::new(
            &mut table,
            TEXT_SECTION_NAME,
            code.text.size,
            code.text.relative_offset,
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC | object::elf::SHF_EXECINSTR),
        );
        let rodata = OatSectionBuilder::new(
            &mut table,
            RODATA_SECTION_NAME,
            code.rodata.size,
            code.rodata.relative_offset,
            object::elf::SHT_PROGBITS,
            u64::from(object::elf::SHF_ALLOC),
        );
        let bss = OatSectionBuilder::new(
            &mut table,
            BSS_SECTION_NAME,
            code.bss.size,
            code.bss.relative_offset,
            object::elf::SHT_NOBITS,
            u64::from(object::elf::SHF_ALLOC),
        );
        let dynsym = SymtabBuilder::new(
            &mut table,
            DYNSYM_SECTION_NAME,
            object::elf::SHT_DYNSYM,
            DYNSTR_SECTION_NAME,
            object::elf::SHT_STRTAB,
            true,
            size_of::<E::Sym>() as u64,
        );
        let symtab = SymtabBuilder::new(
            &mut table,
            SYMTAB_SECTION_NAME,
            object::elf::SHT_SYMTAB,
            STRTAB_SECTION_NAME,
            object::elf::SHT_STRTAB,
            false,
            size_of::<E::Sym>() as u64,
        );
        let hash = table.add(SectionBuilder::new(
            HASH_SECTION_NAME,
            object::elf::SHT_HASH,
            u64::from(object::elf::SHF_ALLOC),
            Some(dynsym.section_id()),
            0,
            alignment::WORD,
            size_of::<E::Word>() as u64,
        ));
        let dynamic = DynamicBuilder::new(
            &mut table,
            DYNAMIC_SECTION_NAME,
            dynsym.strtab_id(),
            size_of::<E::Dyn>() as u64,
        );
        let shstrtab = table.add(SectionBuilder::new(
            SHSTRTAB_SECTION_NAME,
            object::elf::SHT_STRTAB,
            0,
            None,
            0,
            alignment::MIN,
            0,
        ));

        let mut builder = ElfBuilder {
            code_output,
            file,
            output_path: output_path.to_owned(),
            add_symbols,
            fatal_error: false,
            table,
            rodata,
            text,
            bss,
            dynsym,
            symtab,
            hash,
            dynamic,
            shstrtab,
            raw_sections: Vec::new(),
            section_order: Vec::new(),
            next_index: 1,
            shstrtab_data: Vec::new(),
            dynstr: Vec::new(),
            dynstr_soname_offset: 0,
            hash_words: Vec::new(),
            segments: [SegmentRecord::default(); PH_NUM],
            header: HeaderRecord {
                machine: isa.elf_machine(),
                flags: isa.elf_flags(),
                phoff: size_of::<E::Ehdr>() as u64,
                ..Default::default()
            },
            _class: PhantomData,
        };
        builder.setup_dynamic();
        builder.setup_required_symbols();
        builder
    }

    pub fn rodata_section(&self) -> SectionId {
        self.rodata.section
    }

    pub fn text_section(&self) -> SectionId {
        self.text.section
    }

    pub fn bss_section(&self) -> SectionId {
        self.bss.section
    }

    /// The producer regions as configured at construction.
    pub fn code_layout(&self) -> CodeLayout {
        CodeLayout {
            rodata: CodeRegion {
                relative_offset: self.rodata.relative_offset,
                size: self.rodata.size,
            },
            text: CodeRegion {
                relative_offset: self.text.relative_offset,
                size: self.text.size,
            },
            bss: CodeRegion {
                relative_offset: self.bss.relative_offset,
                size: self.bss.size,
            },
        }
    }

    /// The debug symbol table, emitted when the builder was configured with
    /// `add_symbols` and at least one symbol has been added.
    pub fn symtab_mut(&mut self) -> &mut SymtabBuilder {
        &mut self.symtab
    }

    /// Appends a caller-supplied dynamic tag.
    pub fn add_dynamic_tag(&mut self, tag: u32, value: u64) {
        self.dynamic.add_tag(tag, value, None);
    }

    /// Appends a caller-supplied dynamic tag whose value is relative to
    /// `section`'s virtual address.
    pub fn add_dynamic_tag_for_section(&mut self, tag: u32, value: u64, section: SectionId) {
        self.dynamic.add_tag(tag, value, Some(section));
    }

    /// Registers an auxiliary section with pre-formed content. Allocatable
    /// sections are placed between `.hash` and `.rodata` in registration
    /// order; the rest go after the symbol tables, also in registration
    /// order.
    pub fn register_raw_section(
        &mut self,
        name: &str,
        sh_type: u32,
        flags: u64,
        align: u64,
        entsize: u64,
        data: Vec<u8>,
    ) -> Result {
        let align = Alignment::new(align)?;
        let section = self
            .table
            .add(SectionBuilder::new(name, sh_type, flags, None, 0, align, entsize));
        self.raw_sections.push(RawSectionBuilder { section, data });
        Ok(())
    }

    pub fn find_raw_section(&self, name: &str) -> Option<SectionId> {
        self.raw_sections
            .iter()
            .map(|raw| raw.section)
            .find(|id| self.table.get(*id).name == name)
    }

    /// Finalises the allocatable layout. After this returns, every
    /// allocatable section has its final offset and address, so the code
    /// producer can patch its content against them. Failure latches the
    /// builder into a fatal state.
    pub fn init(&mut self) -> Result {
        if self.fatal_error {
            bail!("ELF builder is in a failed state");
        }
        let result = self.layout_allocatable();
        if result.is_err() {
            self.fatal_error = true;
        }
        result
    }

    /// Finalises the rest of the layout and commits the file. A no-op
    /// returning failure once a fatal error has been latched.
    pub fn write(&mut self) -> Result {
        if self.fatal_error {
            bail!(
                "Refusing to write `{}` after an earlier failure",
                self.output_path.display()
            );
        }
        let result = self.layout_rest_and_commit();
        if result.is_err() {
            self.fatal_error = true;
        }
        result
    }

    /// Hands back the file target.
    pub fn into_file(self) -> W {
        self.file
    }

    /// The four dynamic entries whose values are known up front. `DT_STRSZ`,
    /// `DT_SONAME` and `DT_NULL` are appended at materialisation.
    fn setup_dynamic(&mut self) {
        self.dynamic
            .add_tag(object::elf::DT_HASH, 0, Some(self.hash));
        self.dynamic
            .add_tag(object::elf::DT_STRTAB, 0, Some(self.dynsym.strtab_id()));
        self.dynamic
            .add_tag(object::elf::DT_SYMTAB, 0, Some(self.dynsym.section_id()));
        self.dynamic
            .add_tag(object::elf::DT_SYMENT, size_of::<E::Sym>() as u64, None);
    }

    /// The dynamic symbols the runtime looks up to find the embedded code:
    /// the start of each region plus a marker covering its final word.
    fn setup_required_symbols(&mut self) {
        let rodata = self.rodata.section;
        let text = self.text.section;
        self.dynsym.add_symbol(
            "oatdata",
            rodata,
            0,
            true,
            self.rodata.size,
            object::elf::STB_GLOBAL,
            object::elf::STT_OBJECT,
            0,
        );
        self.dynsym.add_symbol(
            "oatexec",
            text,
            0,
            true,
            self.text.size,
            object::elf::STB_GLOBAL,
            object::elf::STT_OBJECT,
            0,
        );
        if let Some(lastword) = self.text.size.checked_sub(4) {
            self.dynsym.add_symbol(
                "oatlastword",
                text,
                lastword,
                true,
                4,
                object::elf::STB_GLOBAL,
                object::elf::STT_OBJECT,
                0,
            );
        }
        if self.bss.size != 0 {
            let bss = self.bss.section;
            self.dynsym.add_symbol(
                "oatbss",
                bss,
                0,
                true,
                self.bss.size,
                object::elf::STB_GLOBAL,
                object::elf::STT_OBJECT,
                0,
            );
            if let Some(lastword) = self.bss.size.checked_sub(4) {
                self.dynsym.add_symbol(
                    "oatbsslastword",
                    bss,
                    lastword,
                    true,
                    4,
                    object::elf::STB_GLOBAL,
                    object::elf::STT_OBJECT,
                    0,
                );
            }
        }
    }

    fn including_debug_symbols(&self) -> bool {
        self.add_symbols && self.symtab.symbol_count() > 0
    }

    /// Gives `id` the next section index and appends its name to the
    /// section-header string table.
    fn assign_section(&mut self, id: SectionId) {
        let index = self.next_index;
        self.next_index += 1;
        let name_offset = self.shstrtab_data.len() as u32;
        let section = self.table.get_mut(id);
        section.index = index;
        section.name_offset = name_offset;
        self.shstrtab_data.extend_from_slice(section.name.as_bytes());
        self.shstrtab_data.push(0);
        self.section_order.push(id);
        tracing::debug!(
            section = %self.table.get(id).name,
            index,
            name_offset,
            "assigned section index"
        );
    }

    fn layout_allocatable(&mut self) -> Result {
        ensure!(
            self.text.size >= 4,
            "text region too small ({} bytes)",
            self.text.size
        );
        if self.bss.size != 0 {
            ensure!(
                self.bss.size >= 4,
                "bss region too small ({} bytes)",
                self.bss.size
            );
        }

        let phdr_offset = self.header.phoff;
        let phdr_size = (PH_NUM * size_of::<E::Phdr>()) as u64;
        let word_size = size_of::<E::Word>() as u64;
        tracing::debug!(phdr_offset, phdr_size, "program header table");

        // Template the seven program headers. Offsets and sizes that depend
        // on the full layout are filled in during write.
        self.segments = [SegmentRecord::default(); PH_NUM];
        self.segments[PH_PHDR] = SegmentRecord {
            p_type: object::elf::PT_PHDR,
            p_flags: object::elf::PF_R,
            p_offset: phdr_offset,
            p_vaddr: phdr_offset,
            p_paddr: phdr_offset,
            p_filesz: phdr_size,
            p_memsz: phdr_size,
            p_align: word_size,
        };
        self.segments[PH_LOAD_R] = SegmentRecord {
            p_type: object::elf::PT_LOAD,
            p_flags: object::elf::PF_R,
            ..Default::default()
        };
        self.segments[PH_LOAD_RX] = SegmentRecord {
            p_type: object::elf::PT_LOAD,
            p_flags: object::elf::PF_R | object::elf::PF_X,
            ..Default::default()
        };
        self.segments[PH_LOAD_RW_BSS] = SegmentRecord {
            p_type: object::elf::PT_LOAD,
            p_flags: object::elf::PF_R | object::elf::PF_W,
            ..Default::default()
        };
        self.segments[PH_LOAD_RW_DYNAMIC] = SegmentRecord {
            p_type: object::elf::PT_LOAD,
            p_flags: object::elf::PF_R | object::elf::PF_W,
            ..Default::default()
        };
        self.segments[PH_DYNAMIC] = SegmentRecord {
            p_type: object::elf::PT_DYNAMIC,
            p_flags: object::elf::PF_R | object::elf::PF_W,
            ..Default::default()
        };
        self.segments[PH_EH_FRAME_HDR] = SegmentRecord {
            p_type: object::elf::PT_NULL,
            p_flags: object::elf::PF_R,
            ..Default::default()
        };

        // The dynamic string table, with the SONAME (the output file's
        // basename) appended.
        self.dynstr = self.dynsym.generate_strtab(&mut self.table);
        self.dynstr_soname_offset = self.dynstr.len() as u32;
        let path = self.output_path.to_string_lossy();
        let soname = path.rsplit('/').next().unwrap_or_default();
        self.dynstr.extend_from_slice(soname.as_bytes());
        self.dynstr.push(0);
        tracing::debug!(
            dynstr_size = self.dynstr.len(),
            dynsym_entries = self.dynsym.table_len(),
            soname,
            "generated .dynstr"
        );

        // Section-index assignment, in fixed order. Index 0 stays reserved
        // for the null header.
        self.shstrtab_data = vec![0];
        self.assign_section(self.dynsym.section_id());
        self.assign_section(self.dynsym.strtab_id());
        self.assign_section(self.hash);
        self.assign_section(self.rodata.section);
        self.assign_section(self.text.section);
        if self.bss.size != 0 {
            self.assign_section(self.bss.section);
        }
        self.assign_section(self.dynamic.section_id());

        // The dynamic symbol table is closed from here on.
        self.hash_words = self.dynsym.generate_hash()?;
        tracing::debug!(
            hash_size = self.hash_words.len() * size_of::<E::Word>(),
            "generated .hash"
        );

        let base_offset = phdr_offset + phdr_size;

        {
            let size = self.dynsym.table_len() as u64 * size_of::<E::Sym>() as u64;
            let section = self.table.get_mut(self.dynsym.section_id());
            section.offset = section.align.align_up(base_offset);
            section.addr = section.offset;
            section.size = size;
        }
        let mut prev_end = self.table.get(self.dynsym.section_id()).end();

        {
            let size = self.dynstr.len() as u64;
            let section = self.table.get_mut(self.dynsym.strtab_id());
            section.offset = section.align.align_up(prev_end);
            section.addr = section.offset;
            section.size = size;
            prev_end = section.end();
        }

        {
            let size = (self.hash_words.len() * size_of::<E::Word>()) as u64;
            let section = self.table.get_mut(self.hash);
            section.offset = section.align.align_up(prev_end);
            section.addr = section.offset;
            section.size = size;
            prev_end = section.end();
        }

        // Allocatable raw sections sit ahead of .rodata so that .rodata and
        // .text stay adjacent. This also pulls .eh_frame into the read-only
        // load segment.
        for raw in &self.raw_sections {
            if !self.table.get(raw.section).is_alloc() {
                continue;
            }
            let size = raw.data.len() as u64;
            let section = self.table.get_mut(raw.section);
            section.offset = section.align.align_up(prev_end);
            section.addr = section.offset;
            section.size = size;
            prev_end = section.end();
        }

        {
            let size = self.rodata.size;
            let section = self.table.get_mut(self.rodata.section);
            section.offset = section.align.align_up(prev_end);
            section.addr = section.offset;
            section.size = size;
            prev_end = section.end();
        }
        ensure!(
            alignment::PAGE.is_aligned(prev_end),
            "rodata must end on a page boundary, ends at 0x{prev_end:x}"
        );

        {
            let size = self.text.size;
            let section = self.table.get_mut(self.text.section);
            section.offset = section.align.align_up(prev_end);
            section.addr = section.offset;
            section.size = size;
            prev_end = section.end();
        }

        // .bss occupies no file bytes, but its offset and address advance as
        // if it did.
        {
            let size = self.bss.size;
            let section = self.table.get_mut(self.bss.section);
            section.offset = section.align.align_up(prev_end);
            section.addr = section.offset;
            section.size = size;
        }

        {
            let bss_offset = self.table.get(self.bss.section).offset;
            let bss_end = bss_offset + self.bss.size;
            let size = self.dynamic.entry_count() as u64 * size_of::<E::Dyn>() as u64;
            let section = self.table.get_mut(self.dynamic.section_id());
            ensure!(
                section.align.is_aligned(bss_offset),
                "bss offset 0x{bss_offset:x} is not aligned for .dynamic"
            );
            section.offset = bss_offset;
            section.addr = section.align.align_up(bss_end);
            section.size = size;
        }

        self.check_eh_frame_layout()?;

        for id in [
            self.dynsym.section_id(),
            self.dynsym.strtab_id(),
            self.hash,
            self.rodata.section,
            self.text.section,
            self.dynamic.section_id(),
        ] {
            let section = self.table.get(id);
            tracing::debug!(
                section = %section.name,
                offset = section.offset,
                size = section.size,
                "allocatable layout"
            );
        }
        Ok(())
    }

    /// `.eh_frame` holds references into `.text` that the producer fixes up
    /// between init and write, and the unwinder expects its header right
    /// behind it.
    fn check_eh_frame_layout(&self) -> Result {
        let Some(hdr_id) = self.find_raw_section(EH_FRAME_HDR_SECTION_NAME) else {
            return Ok(());
        };
        let frame_id = self
            .find_raw_section(EH_FRAME_SECTION_NAME)
            .context(".eh_frame_hdr registered without .eh_frame")?;
        let frame = self.table.get(frame_id);
        let hdr = self.table.get(hdr_id);
        ensure!(
            frame.is_alloc() && hdr.is_alloc(),
            ".eh_frame and .eh_frame_hdr must be allocatable"
        );
        ensure!(
            frame.offset <= hdr.offset && frame.end() == hdr.offset,
            ".eh_frame (ends 0x{:x}) must immediately precede .eh_frame_hdr (at 0x{:x})",
            frame.end(),
            hdr.offset
        );
        Ok(())
    }

    fn layout_rest_and_commit(&mut self) -> Result {
        let mut strtab_data = Vec::new();
        if self.including_debug_symbols() {
            self.assign_section(self.symtab.section_id());
            self.assign_section(self.symtab.strtab_id());
            strtab_data = self.symtab.generate_strtab(&mut self.table);
            tracing::debug!(
                strtab_size = strtab_data.len(),
                symtab_entries = self.symtab.table_len(),
                "generated .strtab"
            );
        }

        // All remaining sections get their indices, raw sections first.
        let raw_ids: Vec<SectionId> = self.raw_sections.iter().map(|raw| raw.section).collect();
        for id in raw_ids {
            self.assign_section(id);
        }
        self.assign_section(self.shstrtab);

        // Non-allocatable layout. These sections are not mapped, so their
        // addresses are 0.
        let mut prev_end = self.table.get(self.dynamic.section_id()).end();
        if self.including_debug_symbols() {
            {
                let size = self.symtab.table_len() as u64 * size_of::<E::Sym>() as u64;
                let section = self.table.get_mut(self.symtab.section_id());
                section.offset = section.align.align_up(prev_end);
                section.addr = 0;
                section.size = size;
                prev_end = section.end();
            }
            {
                let size = strtab_data.len() as u64;
                let section = self.table.get_mut(self.symtab.strtab_id());
                section.offset = section.align.align_up(prev_end);
                section.addr = 0;
                section.size = size;
                prev_end = section.end();
            }
        }

        for raw in &self.raw_sections {
            if self.table.get(raw.section).is_alloc() {
                continue;
            }
            let size = raw.data.len() as u64;
            let section = self.table.get_mut(raw.section);
            section.offset = section.align.align_up(prev_end);
            section.addr = 0;
            section.size = size;
            prev_end = section.end();
        }

        {
            let size = self.shstrtab_data.len() as u64;
            let section = self.table.get_mut(self.shstrtab);
            section.offset = section.align.align_up(prev_end);
            section.addr = 0;
            section.size = size;
            prev_end = section.end();
        }

        // The section-header table comes last.
        let sections_offset = prev_end.next_multiple_of(size_of::<E::Word>() as u64);
        tracing::debug!(
            sections_offset,
            section_count = self.section_order.len() + 1,
            shstrtab_size = self.shstrtab_data.len(),
            "non-allocatable layout"
        );

        // Fill in the program headers from the final layout.
        {
            let rodata = self.table.get(self.rodata.section);
            let load_r = &mut self.segments[PH_LOAD_R];
            load_r.p_filesz = rodata.end();
            load_r.p_memsz = rodata.end();
            load_r.p_align = rodata.align.value();
        }
        {
            let text = self.table.get(self.text.section);
            let load_rx = &mut self.segments[PH_LOAD_RX];
            load_rx.p_offset = text.offset;
            load_rx.p_vaddr = text.offset;
            load_rx.p_paddr = text.offset;
            load_rx.p_filesz = text.size;
            load_rx.p_memsz = text.size;
            load_rx.p_align = text.align.value();
        }
        {
            let bss = self.table.get(self.bss.section);
            let load_rw = &mut self.segments[PH_LOAD_RW_BSS];
            load_rw.p_offset = bss.offset;
            load_rw.p_vaddr = bss.offset;
            load_rw.p_paddr = bss.offset;
            load_rw.p_filesz = 0;
            load_rw.p_memsz = bss.size;
            load_rw.p_align = bss.align.value();
        }
        {
            let dynamic = self.table.get(self.dynamic.section_id());
            for slot in [PH_LOAD_RW_DYNAMIC, PH_DYNAMIC] {
                let segment = &mut self.segments[slot];
                segment.p_offset = dynamic.offset;
                segment.p_vaddr = dynamic.addr;
                segment.p_paddr = dynamic.addr;
                segment.p_filesz = dynamic.size;
                segment.p_memsz = dynamic.size;
                segment.p_align = dynamic.align.value();
            }
        }
        if let Some(hdr_id) = self.find_raw_section(EH_FRAME_HDR_SECTION_NAME) {
            let hdr = self.table.get(hdr_id);
            let segment = &mut self.segments[PH_EH_FRAME_HDR];
            segment.p_type = object::elf::PT_GNU_EH_FRAME;
            segment.p_offset = hdr.offset;
            segment.p_vaddr = hdr.addr;
            segment.p_paddr = hdr.addr;
            segment.p_filesz = hdr.size;
            segment.p_memsz = hdr.size;
            segment.p_align = hdr.align.value();
        }

        let has_bss = self.bss.size != 0;
        self.header.shoff = sections_offset;
        self.header.phnum = (if has_bss { PH_NUM } else { PH_NUM - 1 }) as u16;
        self.header.shnum = (self.section_order.len() + 1) as u16;
        self.header.shstrndx = self.table.get(self.shstrtab).index as u16;

        // Everything is laid out; produce the final tables.
        let dynsym_records = self.dynsym.generate_symtab::<E>(&self.table);
        debug_assert_bail!(
            (dynsym_records.len() * size_of::<E::Sym>()) as u64
                == self.table.get(self.dynsym.section_id()).size,
            ".dynsym size does not match its layout"
        );
        let symtab_records = if self.including_debug_symbols() {
            self.symtab.generate_symtab::<E>(&self.table)
        } else {
            Vec::new()
        };
        let dynamic_entries = self.dynamic.materialize::<E>(
            &self.table,
            self.dynstr.len() as u64,
            u64::from(self.dynstr_soname_offset),
        );
        debug_assert_bail!(
            (dynamic_entries.len() * size_of::<E::Dyn>()) as u64
                == self.table.get(self.dynamic.section_id()).size,
            ".dynamic size does not match its layout"
        );

        let mut pieces = Vec::new();
        pieces.push(FilePiece::bytes(
            "file header",
            0,
            object::bytes_of(&E::file_header(&self.header)).to_vec(),
        ));

        let program_headers: Vec<E::Phdr> =
            self.segments.iter().map(E::program_header).collect();
        let phdr_bytes = object::bytes_of_slice(&program_headers);
        let phdr_entry = size_of::<E::Phdr>();
        let phdr_offset = self.header.phoff;
        if has_bss {
            pieces.push(FilePiece::bytes(
                "program headers",
                phdr_offset,
                phdr_bytes.to_vec(),
            ));
        } else {
            // Skip the unused bss LOAD slot and rebase the rest so that the
            // emitted table stays contiguous.
            pieces.push(FilePiece::bytes(
                "program headers",
                phdr_offset,
                phdr_bytes[..PH_LOAD_RW_BSS * phdr_entry].to_vec(),
            ));
            pieces.push(FilePiece::bytes(
                "program headers part 2",
                phdr_offset + (PH_LOAD_RW_BSS * phdr_entry) as u64,
                phdr_bytes[(PH_LOAD_RW_BSS + 1) * phdr_entry..].to_vec(),
            ));
        }

        pieces.push(FilePiece::bytes(
            DYNAMIC_SECTION_NAME,
            self.table.get(self.dynamic.section_id()).offset,
            object::bytes_of_slice(&dynamic_entries).to_vec(),
        ));
        pieces.push(FilePiece::bytes(
            DYNSYM_SECTION_NAME,
            self.table.get(self.dynsym.section_id()).offset,
            object::bytes_of_slice(&dynsym_records).to_vec(),
        ));
        pieces.push(FilePiece::bytes(
            DYNSTR_SECTION_NAME,
            self.table.get(self.dynsym.strtab_id()).offset,
            self.dynstr.clone(),
        ));
        pieces.push(FilePiece::bytes(
            HASH_SECTION_NAME,
            self.table.get(self.hash).offset,
            bytemuck::cast_slice(&self.hash_words).to_vec(),
        ));
        pieces.push(FilePiece::Code {
            offset: self.table.get(self.rodata.section).offset,
        });
        pieces.push(FilePiece::TextMarker {
            offset: self.table.get(self.text.section).offset,
        });
        if self.including_debug_symbols() {
            pieces.push(FilePiece::bytes(
                SYMTAB_SECTION_NAME,
                self.table.get(self.symtab.section_id()).offset,
                object::bytes_of_slice(&symtab_records).to_vec(),
            ));
            pieces.push(FilePiece::bytes(
                STRTAB_SECTION_NAME,
                self.table.get(self.symtab.strtab_id()).offset,
                strtab_data,
            ));
        }
        pieces.push(FilePiece::bytes(
            SHSTRTAB_SECTION_NAME,
            self.table.get(self.shstrtab).offset,
            self.shstrtab_data.clone(),
        ));
        for raw in &self.raw_sections {
            let section = self.table.get(raw.section);
            pieces.push(FilePiece::bytes(
                &section.name,
                section.offset,
                raw.data.clone(),
            ));
        }

        let shdr_size = size_of::<E::Shdr>() as u64;
        pieces.push(FilePiece::bytes(
            "null section header",
            sections_offset,
            object::bytes_of(&E::section_header(&SectionRecord::default())).to_vec(),
        ));
        for (i, id) in self.section_order.iter().enumerate() {
            pieces.push(FilePiece::bytes(
                "section header",
                sections_offset + (i as u64 + 1) * shdr_size,
                object::bytes_of(&E::section_header(&self.table.record(*id))).to_vec(),
            ));
        }

        write_pieces(pieces, &mut self.file, &mut *self.code_output)
            .with_context(|| format!("Failed to write `{}`", self.output_path.display()))
    }
}
