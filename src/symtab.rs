//! Symbol-table accumulation: the symbol list, its companion string table,
//! and the SysV hash table that the dynamic loader uses for lookups.

use crate::alignment;
use crate::bail;
use crate::elf::ElfTypes;
use crate::elf::SymbolRecord;
use crate::ensure;
use crate::error::Result;
use crate::section::SectionBuilder;
use crate::section::SectionId;
use crate::section::SectionTable;

pub(crate) fn make_st_info(binding: u8, sym_type: u8) -> u8 {
    (binding << 4) | (sym_type & 0xf)
}

struct SymbolEntry {
    name: String,
    section: SectionId,
    addr: u64,
    size: u64,
    is_relative: bool,
    info: u8,
    other: u8,
    /// Offset of the name in the companion string table. Populated by
    /// `generate_strtab`.
    name_offset: u32,
}

/// Accumulates symbols and owns the companion string-table section. Symbols
/// are emitted in insertion order after the implicit null symbol;
/// deduplication is the caller's responsibility (duplicates are caught when
/// the hash table is generated).
pub struct SymtabBuilder {
    section: SectionId,
    strtab: SectionId,
    symbols: Vec<SymbolEntry>,
}

impl SymtabBuilder {
    pub(crate) fn new(
        table: &mut SectionTable,
        name: &str,
        sh_type: u32,
        str_name: &str,
        str_type: u32,
        alloc: bool,
        sym_size: u64,
    ) -> SymtabBuilder {
        let flags = if alloc {
            u64::from(object::elf::SHF_ALLOC)
        } else {
            0
        };
        let strtab = table.add(SectionBuilder::new(
            str_name,
            str_type,
            flags,
            None,
            0,
            alignment::MIN,
            1,
        ));
        let section = table.add(SectionBuilder::new(
            name,
            sh_type,
            flags,
            Some(strtab),
            0,
            alignment::WORD,
            sym_size,
        ));
        SymtabBuilder {
            section,
            strtab,
            symbols: Vec::new(),
        }
    }

    /// Adds a symbol referring to `addr` within `section`. When `is_relative`
    /// is set, the emitted value is offset by the section's final file
    /// offset.
    #[allow(clippy::too_many_arguments)]
    pub fn add_symbol(
        &mut self,
        name: &str,
        section: SectionId,
        addr: u64,
        is_relative: bool,
        size: u64,
        binding: u8,
        sym_type: u8,
        other: u8,
    ) {
        self.symbols.push(SymbolEntry {
            name: name.to_owned(),
            section,
            addr,
            size,
            is_relative,
            info: make_st_info(binding, sym_type),
            other,
            name_offset: 0,
        });
    }

    /// Number of symbols added, excluding the implicit null symbol.
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Number of entries in the emitted symbol table, including the null
    /// symbol.
    pub(crate) fn table_len(&self) -> usize {
        self.symbols.len() + 1
    }

    pub(crate) fn section_id(&self) -> SectionId {
        self.section
    }

    pub(crate) fn strtab_id(&self) -> SectionId {
        self.strtab
    }

    /// Emits the string table (`\0 name0 \0 name1 \0 …`), recording each
    /// entry's name offset and setting the companion section's size.
    pub(crate) fn generate_strtab(&mut self, table: &mut SectionTable) -> Vec<u8> {
        let mut tab = vec![0u8];
        for symbol in &mut self.symbols {
            symbol.name_offset = tab.len() as u32;
            tab.extend_from_slice(symbol.name.as_bytes());
            tab.push(0);
        }
        table.get_mut(self.strtab).size = tab.len() as u64;
        tab
    }

    /// Emits the symbol records. The first entry is the zeroed null symbol;
    /// relative symbols resolve against their section's file offset and every
    /// entry's `st_shndx` is the owning section's final index.
    pub(crate) fn generate_symtab<E: ElfTypes>(&self, table: &SectionTable) -> Vec<E::Sym> {
        let mut out = Vec::with_capacity(self.table_len());
        out.push(E::symbol(&SymbolRecord::default()));
        for symbol in &self.symbols {
            let section = table.get(symbol.section);
            let value = if symbol.is_relative {
                symbol.addr + section.offset
            } else {
                symbol.addr
            };
            out.push(E::symbol(&SymbolRecord {
                st_name: symbol.name_offset,
                st_info: symbol.info,
                st_other: symbol.other,
                st_shndx: section.index as u16,
                st_value: value,
                st_size: symbol.size,
            }));
        }
        out
    }

    /// Builds the SysV hash table: `[nbuckets, nchain, buckets.., chains..]`.
    /// `nchain` covers every symbol-table entry including the null symbol.
    /// A symbol whose chain cell is already occupied at insertion has been
    /// added under the same name twice, which the format cannot represent.
    pub(crate) fn generate_hash(&self) -> Result<Vec<u32>> {
        let nbuckets: u32 = match self.symbols.len() {
            n if n < 8 => 2,
            n if n < 32 => 4,
            n if n < 256 => 16,
            // About 32 symbols per bucket.
            n => (n as u32 / 32).next_multiple_of(2),
        };
        let nchain = self.table_len() as u32;

        let mut hash = vec![nbuckets, nchain];
        hash.resize(2 + nbuckets as usize + nchain as usize, 0);
        let (buckets, chain) = hash[2..].split_at_mut(nbuckets as usize);

        for (i, symbol) in self.symbols.iter().enumerate() {
            // The null symbol occupies index 0.
            let index = i as u32 + 1;
            let bucket = (object::elf::hash(symbol.name.as_bytes()) % nbuckets) as usize;
            if buckets[bucket] == 0 {
                buckets[bucket] = index;
            } else {
                let mut cell = buckets[bucket];
                ensure!(cell < nchain, "Corrupt hash chain for `{}`", symbol.name);
                while chain[cell as usize] != 0 {
                    cell = chain[cell as usize];
                    ensure!(cell < nchain, "Corrupt hash chain for `{}`", symbol.name);
                }
                chain[cell as usize] = index;
                // A cell already holding this index means some symbol was
                // added under more than one name.
                if chain[index as usize] != 0 {
                    bail!("Duplicate symbol name `{}` in symbol table", symbol.name);
                }
            }
        }

        Ok(hash)
    }
}
