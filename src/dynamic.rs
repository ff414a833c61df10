//! Accumulates `.dynamic` entries. The final vector cannot be produced until
//! the dynamic string table is complete, since `DT_STRSZ` and `DT_SONAME`
//! depend on it; those and the terminating `DT_NULL` are appended at
//! materialisation and must not be supplied by callers.

use crate::alignment;
use crate::elf::ElfTypes;
use crate::section::SectionBuilder;
use crate::section::SectionId;
use crate::section::SectionTable;

struct DynamicEntry {
    section: Option<SectionId>,
    tag: u32,
    value: u64,
}

pub(crate) struct DynamicBuilder {
    section: SectionId,
    entries: Vec<DynamicEntry>,
}

impl DynamicBuilder {
    pub(crate) fn new(
        table: &mut SectionTable,
        name: &str,
        dynstr: SectionId,
        entry_size: u64,
    ) -> DynamicBuilder {
        let section = table.add(SectionBuilder::new(
            name,
            object::elf::SHT_DYNAMIC,
            u64::from(object::elf::SHF_ALLOC | object::elf::SHF_WRITE),
            Some(dynstr),
            0,
            alignment::PAGE,
            entry_size,
        ));
        DynamicBuilder {
            section,
            entries: Vec::new(),
        }
    }

    pub(crate) fn section_id(&self) -> SectionId {
        self.section
    }

    /// Appends an entry. `DT_NULL` is silently ignored; the terminator is
    /// added during materialisation.
    pub(crate) fn add_tag(&mut self, tag: u32, value: u64, section: Option<SectionId>) {
        if tag == object::elf::DT_NULL {
            return;
        }
        self.entries.push(DynamicEntry {
            section,
            tag,
            value,
        });
    }

    /// Number of entries in the emitted vector: the accumulated tags plus
    /// `DT_STRSZ`, `DT_SONAME` and `DT_NULL`.
    pub(crate) fn entry_count(&self) -> usize {
        self.entries.len() + 3
    }

    /// Produces the final vector. Entries attached to a section serialise as
    /// `value + section.sh_addr`; `strsz` and `soname_offset` are only known
    /// once the dynamic string table has been finalised.
    pub(crate) fn materialize<E: ElfTypes>(
        &self,
        table: &SectionTable,
        strsz: u64,
        soname_offset: u64,
    ) -> Vec<E::Dyn> {
        let mut out = Vec::with_capacity(self.entry_count());
        for entry in &self.entries {
            let value = match entry.section {
                Some(section) => entry.value + table.get(section).addr,
                None => entry.value,
            };
            out.push(E::dynamic_entry(entry.tag, value));
        }
        out.push(E::dynamic_entry(object::elf::DT_STRSZ, strsz));
        out.push(E::dynamic_entry(object::elf::DT_SONAME, soname_offset));
        out.push(E::dynamic_entry(object::elf::DT_NULL, 0));
        out
    }
}
