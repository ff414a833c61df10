//! Section descriptors. All sections live in a [`SectionTable`] arena owned
//! by the orchestrator and are referred to by [`SectionId`] handles, so that
//! symbols and dynamic entries can point at a section before its final index
//! and layout are known.

use crate::alignment::Alignment;
use crate::elf::SectionRecord;

/// A stable handle to a section in the arena. Distinct from the section's
/// final index in the emitted section-header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(u32);

impl SectionId {
    fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The base descriptor for a section. Name, type, flags, info, alignment and
/// entry size are fixed at construction; the address, offset, size, final
/// index and name-table offset are filled in as layout proceeds and never
/// change once the section-header table has been emitted.
#[derive(Debug)]
pub(crate) struct SectionBuilder {
    pub(crate) name: String,
    pub(crate) sh_type: u32,
    pub(crate) flags: u64,
    pub(crate) link: Option<SectionId>,
    pub(crate) info: u32,
    pub(crate) align: Alignment,
    pub(crate) entsize: u64,

    /// Index in the final section-header table. 0 until assigned (index 0 of
    /// the table itself is the null header).
    pub(crate) index: u32,
    /// Offset of the name in .shstrtab.
    pub(crate) name_offset: u32,
    pub(crate) addr: u64,
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl SectionBuilder {
    pub(crate) fn new(
        name: &str,
        sh_type: u32,
        flags: u64,
        link: Option<SectionId>,
        info: u32,
        align: Alignment,
        entsize: u64,
    ) -> SectionBuilder {
        SectionBuilder {
            name: name.to_owned(),
            sh_type,
            flags,
            link,
            info,
            align,
            entsize,
            index: 0,
            name_offset: 0,
            addr: 0,
            offset: 0,
            size: 0,
        }
    }

    /// File offset one past the section's content.
    pub(crate) fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub(crate) fn is_alloc(&self) -> bool {
        self.flags & u64::from(object::elf::SHF_ALLOC) != 0
    }
}

pub(crate) struct SectionTable {
    sections: Vec<SectionBuilder>,
}

impl SectionTable {
    pub(crate) fn new() -> SectionTable {
        SectionTable {
            sections: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, section: SectionBuilder) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(section);
        id
    }

    pub(crate) fn get(&self, id: SectionId) -> &SectionBuilder {
        &self.sections[id.as_usize()]
    }

    pub(crate) fn get_mut(&mut self, id: SectionId) -> &mut SectionBuilder {
        &mut self.sections[id.as_usize()]
    }

    /// The final index of `id`'s companion section, or 0 when it has none.
    pub(crate) fn link_index(&self, id: SectionId) -> u32 {
        self.get(id)
            .link
            .map_or(0, |link| self.get(link).index)
    }

    /// The header record for `id` as it will appear in the section-header
    /// table.
    pub(crate) fn record(&self, id: SectionId) -> SectionRecord {
        let section = self.get(id);
        SectionRecord {
            sh_name: section.name_offset,
            sh_type: section.sh_type,
            sh_flags: section.flags,
            sh_addr: section.addr,
            sh_offset: section.offset,
            sh_size: section.size,
            sh_link: self.link_index(id),
            sh_info: section.info,
            sh_addralign: section.align.value(),
            sh_entsize: section.entsize,
        }
    }
}

/// An auxiliary section supplied as a pre-formed byte buffer (debug info,
/// exception-handling frames).
pub(crate) struct RawSectionBuilder {
    pub(crate) section: SectionId,
    pub(crate) data: Vec<u8>,
}

/// A placeholder section whose content the code producer streams in
/// (`.rodata`, `.text` and the no-content `.bss`). Holds the caller-supplied
/// position of the content within the producer's own blob alongside its size.
pub(crate) struct OatSectionBuilder {
    pub(crate) section: SectionId,
    pub(crate) relative_offset: u64,
    pub(crate) size: u64,
}

impl OatSectionBuilder {
    pub(crate) fn new(
        table: &mut SectionTable,
        name: &str,
        size: u64,
        relative_offset: u64,
        sh_type: u32,
        flags: u64,
    ) -> OatSectionBuilder {
        let section = table.add(SectionBuilder::new(
            name,
            sh_type,
            flags,
            None,
            0,
            crate::alignment::PAGE,
            0,
        ));
        OatSectionBuilder {
            section,
            relative_offset,
            size,
        }
    }
}
