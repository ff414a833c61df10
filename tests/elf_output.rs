//! End-to-end checks on emitted shared objects: the files are re-parsed with
//! `object::read::elf` and verified field by field.

use object::LittleEndian;
use object::elf;
use object::read::elf::FileHeader as _;
use object::read::elf::SectionHeader as _;
use oatpack::Architecture;
use oatpack::CodeLayout;
use oatpack::CodeOutput;
use oatpack::CodeRegion;
use oatpack::Elf32;
use oatpack::Elf64;
use oatpack::ElfBuilder;
use oatpack::Result;
use std::io::Cursor;
use std::io::Write;
use std::path::Path;

const LE: LittleEndian = LittleEndian;

type FileHeader64 = elf::FileHeader64<LittleEndian>;
type FileHeader32 = elf::FileHeader32<LittleEndian>;
type SectionTable64<'data> = object::read::elf::SectionTable<'data, FileHeader64>;

/// Stands in for the compiler: emits a recognisable rodata blob followed by
/// the text blob, and records the offset it was asked to emit at.
struct TestCode {
    rodata: Vec<u8>,
    text: Vec<u8>,
    code_offset: Option<u64>,
}

impl TestCode {
    fn new(rodata_size: usize, text_size: usize) -> TestCode {
        TestCode {
            rodata: vec![0xaa; rodata_size],
            text: vec![0xbb; text_size],
            code_offset: None,
        }
    }
}

impl CodeOutput for TestCode {
    fn set_code_offset(&mut self, offset: u64) -> Result {
        self.code_offset = Some(offset);
        Ok(())
    }

    fn write(&mut self, out: &mut dyn Write) -> Result {
        out.write_all(&self.rodata)?;
        out.write_all(&self.text)?;
        Ok(())
    }
}

fn layout(rodata: u64, text: u64, bss: u64) -> CodeLayout {
    CodeLayout {
        rodata: CodeRegion {
            relative_offset: 0,
            size: rodata,
        },
        text: CodeRegion {
            relative_offset: rodata,
            size: text,
        },
        bss: CodeRegion {
            relative_offset: 0,
            size: bss,
        },
    }
}

fn emit64(
    path: &str,
    isa: Architecture,
    code: CodeLayout,
    add_symbols: bool,
    configure: impl FnOnce(&mut ElfBuilder<'_, Elf64, Cursor<Vec<u8>>>),
) -> (Vec<u8>, Option<u64>) {
    let mut producer = TestCode::new(code.rodata.size as usize, code.text.size as usize);
    let mut builder = ElfBuilder::<Elf64, _>::new(
        &mut producer,
        Cursor::new(Vec::new()),
        Path::new(path),
        isa,
        code,
        add_symbols,
    );
    configure(&mut builder);
    builder.init().unwrap();
    builder.write().unwrap();
    let bytes = builder.into_file().into_inner();
    (bytes, producer.code_offset)
}

fn parse64(data: &[u8]) -> (&FileHeader64, SectionTable64<'_>) {
    let header = FileHeader64::parse(data).unwrap();
    let sections = header.sections(LE, data).unwrap();
    (header, sections)
}

fn section<'data>(
    sections: &SectionTable64<'data>,
    name: &str,
) -> &'data elf::SectionHeader64<LittleEndian> {
    sections
        .section_by_name(LE, name.as_bytes())
        .unwrap_or_else(|| panic!("missing section {name}"))
        .1
}

fn dynamic_symbols<'data>(
    sections: &SectionTable64<'data>,
    data: &'data [u8],
) -> (&'data [elf::Sym64<LittleEndian>], &'data [u8]) {
    let symbols = object::slice_from_all_bytes(section(sections, ".dynsym").data(LE, data).unwrap())
        .unwrap();
    let strings = section(sections, ".dynstr").data(LE, data).unwrap();
    (symbols, strings)
}

fn cstr_at(strings: &[u8], offset: usize) -> &str {
    let rest = &strings[offset..];
    let end = rest.iter().position(|b| *b == 0).unwrap();
    std::str::from_utf8(&rest[..end]).unwrap()
}

fn find_symbol<'data>(
    symbols: &'data [elf::Sym64<LittleEndian>],
    strings: &[u8],
    name: &str,
) -> &'data elf::Sym64<LittleEndian> {
    symbols
        .iter()
        .find(|sym| cstr_at(strings, sym.st_name.get(LE) as usize) == name)
        .unwrap_or_else(|| panic!("missing symbol {name}"))
}

fn dynamic_entries<'data>(
    sections: &SectionTable64<'data>,
    data: &'data [u8],
) -> &'data [elf::Dyn64<LittleEndian>] {
    object::slice_from_all_bytes(section(sections, ".dynamic").data(LE, data).unwrap()).unwrap()
}

fn dynamic_value(entries: &[elf::Dyn64<LittleEndian>], tag: u32) -> u64 {
    let matches: Vec<_> = entries
        .iter()
        .filter(|entry| entry.d_tag.get(LE) == u64::from(tag))
        .collect();
    assert_eq!(matches.len(), 1, "expected exactly one tag {tag}");
    matches[0].d_val.get(LE)
}

/// Layout invariants that must hold for every emitted file.
fn check_common_invariants(data: &[u8]) {
    let (header, sections) = parse64(data);
    assert_eq!(header.e_ident.magic, elf::ELFMAG);
    assert_eq!(header.e_ident.data, elf::ELFDATA2LSB);
    assert_eq!(header.e_type.get(LE), elf::ET_DYN);

    let mut extents = Vec::new();
    for shdr in sections.iter().skip(1) {
        let addr = shdr.sh_addr.get(LE);
        let offset = shdr.sh_offset.get(LE);
        let flags = shdr.sh_flags.get(LE);
        if flags & u64::from(elf::SHF_ALLOC) != 0 && shdr.sh_type.get(LE) != elf::SHT_DYNAMIC {
            assert_eq!(addr, offset, "allocatable section must map at its offset");
        }
        let file_size = if shdr.sh_type.get(LE) == elf::SHT_NOBITS {
            0
        } else {
            shdr.sh_size.get(LE)
        };
        extents.push((offset, file_size));
    }
    // Section contents never overlap in the file.
    extents.sort_unstable();
    for pair in extents.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "sections overlap: {pair:?}");
    }

    // The dynamic vector is terminated and carries each mandatory tag once.
    let entries = dynamic_entries(&sections, data);
    assert_eq!(entries.last().unwrap().d_tag.get(LE), u64::from(elf::DT_NULL));
    for tag in [
        elf::DT_HASH,
        elf::DT_STRTAB,
        elf::DT_SYMTAB,
        elf::DT_SYMENT,
        elf::DT_STRSZ,
        elf::DT_SONAME,
    ] {
        dynamic_value(entries, tag);
    }

    // Every dynamic symbol resolves through the hash table to its own index.
    let (symbols, strings) = dynamic_symbols(&sections, data);
    let hash_data = section(&sections, ".hash").data(LE, data).unwrap();
    let words: Vec<u32> = hash_data
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    let nbuckets = words[0] as usize;
    let nchain = words[1] as usize;
    assert_eq!(nchain, symbols.len());
    let buckets = &words[2..2 + nbuckets];
    let chain = &words[2 + nbuckets..];
    for (index, symbol) in symbols.iter().enumerate().skip(1) {
        let name = cstr_at(strings, symbol.st_name.get(LE) as usize);
        let mut cell = buckets[(elf::hash(name.as_bytes()) as usize) % nbuckets] as usize;
        while cell != index {
            assert_ne!(cell, 0, "symbol {name} not reachable through .hash");
            cell = chain[cell] as usize;
        }
    }

    // Section names resolve through .shstrtab.
    let shstrtab = sections.section(object::SectionIndex(header.e_shstrndx.get(LE) as usize));
    assert_eq!(shstrtab.unwrap().sh_type.get(LE), elf::SHT_STRTAB);
}

#[test]
fn arm64_without_bss() {
    let (data, code_offset) = emit64(
        "/tmp/foo/bar.oat",
        Architecture::Arm64,
        layout(4096, 8192, 0),
        false,
        |builder| {
            assert_eq!(builder.code_layout().text.relative_offset, 4096);
            assert_eq!(builder.code_layout().text.size, 8192);
        },
    );
    check_common_invariants(&data);

    let (header, sections) = parse64(&data);
    assert_eq!(header.e_ident.class, elf::ELFCLASS64);
    assert_eq!(header.e_machine.get(LE), elf::EM_AARCH64);
    assert_eq!(header.e_flags.get(LE), 0);
    assert_eq!(header.e_phnum.get(LE), 6);
    assert_eq!(header.e_shnum.get(LE), 8);
    assert_eq!(header.e_shstrndx.get(LE), 7);
    assert_eq!(header.e_phoff.get(LE), 64);

    let names: Vec<&[u8]> = sections
        .iter()
        .map(|shdr| sections.section_name(LE, shdr).unwrap())
        .collect();
    assert_eq!(
        names,
        [
            &b""[..],
            b".dynsym",
            b".dynstr",
            b".hash",
            b".rodata",
            b".text",
            b".dynamic",
            b".shstrtab",
        ]
    );

    // Allocatable layout: fixed offsets, page-aligned code regions.
    assert_eq!(section(&sections, ".dynsym").sh_offset.get(LE), 456);
    assert_eq!(section(&sections, ".dynsym").sh_entsize.get(LE), 24);
    assert_eq!(section(&sections, ".dynstr").sh_offset.get(LE), 552);
    assert_eq!(section(&sections, ".hash").sh_offset.get(LE), 592);
    let rodata = section(&sections, ".rodata");
    assert_eq!(rodata.sh_offset.get(LE), 4096);
    assert_eq!(rodata.sh_size.get(LE), 4096);
    assert_eq!((rodata.sh_offset.get(LE) + rodata.sh_size.get(LE)) % 4096, 0);
    let text = section(&sections, ".text");
    assert_eq!(text.sh_offset.get(LE), 8192);
    assert_eq!(text.sh_size.get(LE), 8192);
    assert_eq!(text.sh_flags.get(LE), u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR));

    // .dynsym links to .dynstr, .hash links to .dynsym, .dynamic to .dynstr.
    assert_eq!(section(&sections, ".dynsym").sh_link.get(LE), 2);
    assert_eq!(section(&sections, ".hash").sh_link.get(LE), 1);
    assert_eq!(section(&sections, ".dynamic").sh_link.get(LE), 2);

    // Mandatory symbols, resolved against the final layout.
    let (symbols, strings) = dynamic_symbols(&sections, &data);
    assert_eq!(symbols.len(), 4);
    let oatdata = find_symbol(symbols, strings, "oatdata");
    assert_eq!(oatdata.st_value.get(LE), 4096);
    assert_eq!(oatdata.st_size.get(LE), 4096);
    assert_eq!(oatdata.st_shndx.get(LE), 4);
    assert_eq!(oatdata.st_info, 0x11);
    let oatexec = find_symbol(symbols, strings, "oatexec");
    assert_eq!(oatexec.st_value.get(LE), 8192);
    assert_eq!(oatexec.st_size.get(LE), 8192);
    assert_eq!(oatexec.st_shndx.get(LE), 5);
    let lastword = find_symbol(symbols, strings, "oatlastword");
    assert_eq!(lastword.st_value.get(LE), 8192 + 8188);
    assert_eq!(lastword.st_size.get(LE), 4);

    // Dynamic entries point into the read-only segment.
    let entries = dynamic_entries(&sections, &data);
    assert_eq!(dynamic_value(entries, elf::DT_HASH), 592);
    assert_eq!(dynamic_value(entries, elf::DT_STRTAB), 552);
    assert_eq!(dynamic_value(entries, elf::DT_SYMTAB), 456);
    assert_eq!(dynamic_value(entries, elf::DT_SYMENT), 24);
    assert_eq!(dynamic_value(entries, elf::DT_STRSZ), 37);

    // The hash table over {oatdata, oatexec, oatlastword}, byte for byte.
    let hash = section(&sections, ".hash").data(LE, data.as_slice()).unwrap();
    let words: Vec<u32> = hash
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    assert_eq!(words, [2, 4, 3, 1, 0, 2, 0, 0]);

    // Program headers: the bss slot is skipped and the table stays
    // contiguous.
    let segments = header.program_headers(LE, data.as_slice()).unwrap();
    let types: Vec<u32> = segments.iter().map(|phdr| phdr.p_type.get(LE)).collect();
    assert_eq!(
        types,
        [
            elf::PT_PHDR,
            elf::PT_LOAD,
            elf::PT_LOAD,
            elf::PT_LOAD,
            elf::PT_DYNAMIC,
            elf::PT_NULL,
        ]
    );
    assert_eq!(segments[0].p_offset.get(LE), 64);
    assert_eq!(segments[0].p_filesz.get(LE), 7 * 56);
    assert_eq!(segments[1].p_offset.get(LE), 0);
    assert_eq!(segments[1].p_filesz.get(LE), 8192);
    assert_eq!(segments[1].p_align.get(LE), 4096);
    assert_eq!(segments[1].p_flags.get(LE), elf::PF_R);
    assert_eq!(segments[2].p_offset.get(LE), 8192);
    assert_eq!(segments[2].p_filesz.get(LE), 8192);
    assert_eq!(segments[2].p_flags.get(LE), elf::PF_R | elf::PF_X);
    assert_eq!(segments[3].p_offset.get(LE), 16384);
    assert_eq!(segments[3].p_flags.get(LE), elf::PF_R | elf::PF_W);
    assert_eq!(segments[4].p_offset.get(LE), 16384);
    assert_eq!(segments[4].p_filesz.get(LE), 7 * 16);

    // The producer streamed rodata+text at the rodata offset.
    assert_eq!(code_offset, Some(4096));
    assert!(data[4096..8192].iter().all(|b| *b == 0xaa));
    assert!(data[8192..16384].iter().all(|b| *b == 0xbb));
}

#[test]
fn soname_is_output_basename() {
    let (data, _) = emit64(
        "/tmp/foo/bar.oat",
        Architecture::Arm64,
        layout(4096, 8192, 0),
        false,
        |_| {},
    );
    let (_, sections) = parse64(&data);
    let entries = dynamic_entries(&sections, &data);
    let soname_offset = dynamic_value(entries, elf::DT_SONAME);
    let strings = section(&sections, ".dynstr").data(LE, data.as_slice()).unwrap();
    assert_eq!(cstr_at(strings, soname_offset as usize), "bar.oat");
    assert_eq!(dynamic_value(entries, elf::DT_STRSZ), strings.len() as u64);

    // A bare file name is its own SONAME.
    let (data, _) = emit64("bare.so", Architecture::Arm64, layout(4096, 4096, 0), false, |_| {});
    let (_, sections) = parse64(&data);
    let entries = dynamic_entries(&sections, &data);
    let strings = section(&sections, ".dynstr").data(LE, data.as_slice()).unwrap();
    assert_eq!(
        cstr_at(strings, dynamic_value(entries, elf::DT_SONAME) as usize),
        "bare.so"
    );
}

#[test]
fn x86_64_with_bss() {
    let (data, _) = emit64(
        "/tmp/libtest.so",
        Architecture::X86_64,
        layout(4096, 4096, 4096),
        false,
        |_| {},
    );
    check_common_invariants(&data);

    let (header, sections) = parse64(&data);
    assert_eq!(header.e_machine.get(LE), elf::EM_X86_64);
    assert_eq!(header.e_phnum.get(LE), 7);
    assert_eq!(header.e_shnum.get(LE), 9);

    let bss = section(&sections, ".bss");
    assert_eq!(bss.sh_type.get(LE), elf::SHT_NOBITS);
    assert_eq!(bss.sh_offset.get(LE), 12288);
    assert_eq!(bss.sh_addr.get(LE), 12288);
    assert_eq!(bss.sh_size.get(LE), 4096);

    // .dynamic shares the bss file offset but lives past it in memory.
    let dynamic = section(&sections, ".dynamic");
    assert_eq!(dynamic.sh_offset.get(LE), 12288);
    assert_eq!(dynamic.sh_addr.get(LE), 16384);

    let (symbols, strings) = dynamic_symbols(&sections, &data);
    assert_eq!(symbols.len(), 6);
    let oatbss = find_symbol(symbols, strings, "oatbss");
    assert_eq!(oatbss.st_value.get(LE), 12288);
    assert_eq!(oatbss.st_size.get(LE), 4096);
    let bss_lastword = find_symbol(symbols, strings, "oatbsslastword");
    assert_eq!(bss_lastword.st_value.get(LE), 12288 + 4092);
    assert_eq!(bss_lastword.st_size.get(LE), 4);

    let segments = header.program_headers(LE, data.as_slice()).unwrap();
    let types: Vec<u32> = segments.iter().map(|phdr| phdr.p_type.get(LE)).collect();
    assert_eq!(
        types,
        [
            elf::PT_PHDR,
            elf::PT_LOAD,
            elf::PT_LOAD,
            elf::PT_LOAD,
            elf::PT_LOAD,
            elf::PT_DYNAMIC,
            elf::PT_NULL,
        ]
    );
    let load_bss = &segments[3];
    assert_eq!(load_bss.p_offset.get(LE), 12288);
    assert_eq!(load_bss.p_vaddr.get(LE), 12288);
    assert_eq!(load_bss.p_filesz.get(LE), 0);
    assert_eq!(load_bss.p_memsz.get(LE), 4096);
    let dynamic_load = &segments[4];
    assert_eq!(dynamic_load.p_offset.get(LE), 12288);
    assert_eq!(dynamic_load.p_vaddr.get(LE), 16384);
    assert_eq!(dynamic_load.p_filesz.get(LE), dynamic.sh_size.get(LE));
}

#[test]
fn caller_dynamic_tags_are_emitted() {
    let (data, _) = emit64(
        "/tmp/tags.so",
        Architecture::X86_64,
        layout(4096, 4096, 4096),
        false,
        |builder| {
            let bss = builder.bss_section();
            builder.add_dynamic_tag(elf::DT_FLAGS, u64::from(elf::DF_TEXTREL));
            builder.add_dynamic_tag_for_section(elf::DT_PLTGOT, 16, bss);
        },
    );
    check_common_invariants(&data);

    let (_, sections) = parse64(&data);
    let dynamic = section(&sections, ".dynamic");
    let entries = dynamic_entries(&sections, &data);
    assert_eq!(entries.len(), 9);
    assert_eq!(dynamic.sh_size.get(LE), 9 * 16);

    // Caller tags come after the four mandatory ones and ahead of the
    // finalisation tags.
    let tags: Vec<u64> = entries.iter().map(|entry| entry.d_tag.get(LE)).collect();
    assert_eq!(
        tags,
        [
            u64::from(elf::DT_HASH),
            u64::from(elf::DT_STRTAB),
            u64::from(elf::DT_SYMTAB),
            u64::from(elf::DT_SYMENT),
            u64::from(elf::DT_FLAGS),
            u64::from(elf::DT_PLTGOT),
            u64::from(elf::DT_STRSZ),
            u64::from(elf::DT_SONAME),
            u64::from(elf::DT_NULL),
        ]
    );

    // A plain tag keeps its value; a section-attached tag is rebased onto
    // the section's final address (.bss sits at 12288 in this layout).
    assert_eq!(dynamic_value(entries, elf::DT_FLAGS), u64::from(elf::DF_TEXTREL));
    let bss = section(&sections, ".bss");
    assert_eq!(bss.sh_addr.get(LE), 12288);
    assert_eq!(dynamic_value(entries, elf::DT_PLTGOT), 12288 + 16);
}

#[test]
fn mips32_flags_and_class() {
    let mut producer = TestCode::new(4096, 8192);
    let mut builder = ElfBuilder::<Elf32, _>::new(
        &mut producer,
        Cursor::new(Vec::new()),
        Path::new("/tmp/mips.oat"),
        Architecture::Mips,
        layout(4096, 8192, 0),
        false,
    );
    builder.init().unwrap();
    builder.write().unwrap();
    let data = builder.into_file().into_inner();

    let header = FileHeader32::parse(&*data).unwrap();
    assert_eq!(header.e_ident.class, elf::ELFCLASS32);
    assert_eq!(header.e_machine.get(LE), elf::EM_MIPS);
    assert_eq!(header.e_flags.get(LE), 0x7000_1007);
    assert_eq!(header.e_type.get(LE), elf::ET_DYN);
    assert_eq!(header.e_phoff.get(LE), 52);
    assert_eq!(header.e_ehsize.get(LE), 52);
    assert_eq!(header.e_phentsize.get(LE), 32);
    assert_eq!(header.e_shentsize.get(LE), 40);

    let sections = header.sections(LE, &*data).unwrap();
    let dynsym = sections.section_by_name(LE, b".dynsym").unwrap().1;
    assert_eq!(dynsym.sh_offset.get(LE), 276);
    assert_eq!(dynsym.sh_entsize.get(LE), 16);
    assert_eq!(dynsym.sh_size.get(LE), 4 * 16);
    let rodata = sections.section_by_name(LE, b".rodata").unwrap().1;
    assert_eq!(rodata.sh_offset.get(LE), 4096);
}

#[test]
fn eh_frame_pair_gets_a_gnu_eh_frame_segment() {
    let (data, _) = emit64(
        "/tmp/unwind.so",
        Architecture::Arm64,
        layout(4096, 8192, 0),
        false,
        |builder| {
            builder
                .register_raw_section(
                    ".eh_frame",
                    elf::SHT_PROGBITS,
                    u64::from(elf::SHF_ALLOC),
                    4,
                    0,
                    vec![0xe1; 256],
                )
                .unwrap();
            builder
                .register_raw_section(
                    ".eh_frame_hdr",
                    elf::SHT_PROGBITS,
                    u64::from(elf::SHF_ALLOC),
                    4,
                    0,
                    vec![0xe2; 40],
                )
                .unwrap();
        },
    );
    check_common_invariants(&data);

    let (header, sections) = parse64(&data);
    assert_eq!(header.e_shnum.get(LE), 10);

    // Both sit contiguously in the read-only segment, ahead of .rodata.
    let frame = section(&sections, ".eh_frame");
    let frame_hdr = section(&sections, ".eh_frame_hdr");
    assert_eq!(frame.sh_offset.get(LE), 624);
    assert_eq!(frame.sh_size.get(LE), 256);
    assert_eq!(frame_hdr.sh_offset.get(LE), 880);
    assert_eq!(
        frame.sh_offset.get(LE) + frame.sh_size.get(LE),
        frame_hdr.sh_offset.get(LE)
    );
    assert!(frame_hdr.sh_offset.get(LE) + frame_hdr.sh_size.get(LE) <= 4096);
    assert_eq!(&data[624..880], &[0xe1; 256][..]);
    assert_eq!(&data[880..920], &[0xe2; 40][..]);

    let segments = header.program_headers(LE, data.as_slice()).unwrap();
    let eh = segments
        .iter()
        .find(|phdr| phdr.p_type.get(LE) == elf::PT_GNU_EH_FRAME)
        .unwrap();
    assert_eq!(eh.p_offset.get(LE), 880);
    assert_eq!(eh.p_vaddr.get(LE), 880);
    assert_eq!(eh.p_filesz.get(LE), 40);
    assert_eq!(eh.p_flags.get(LE), elf::PF_R);
}

#[test]
fn non_alloc_raw_section_lands_after_load_segments() {
    let (data, _) = emit64(
        "/tmp/debug.so",
        Architecture::Arm64,
        layout(4096, 4096, 0),
        false,
        |builder| {
            builder
                .register_raw_section(".debug_info", elf::SHT_PROGBITS, 0, 1, 0, vec![0xd1; 100])
                .unwrap();
        },
    );
    check_common_invariants(&data);

    let (_, sections) = parse64(&data);
    let debug_info = section(&sections, ".debug_info");
    assert_eq!(debug_info.sh_addr.get(LE), 0);
    assert_eq!(debug_info.sh_size.get(LE), 100);
    let dynamic = section(&sections, ".dynamic");
    assert!(debug_info.sh_offset.get(LE) >= dynamic.sh_offset.get(LE) + dynamic.sh_size.get(LE));
    let offset = debug_info.sh_offset.get(LE) as usize;
    assert_eq!(&data[offset..offset + 100], &[0xd1; 100][..]);
}

#[test]
fn debug_symbols_are_emitted_on_request() {
    let (data, _) = emit64(
        "/tmp/symbols.so",
        Architecture::Arm64,
        layout(4096, 8192, 0),
        true,
        |builder| {
            let text = builder.text_section();
            let rodata = builder.rodata_section();
            builder
                .symtab_mut()
                .add_symbol("main", text, 0, true, 16, elf::STB_LOCAL, elf::STT_FUNC, 0);
            builder.symtab_mut().add_symbol(
                "data_start",
                rodata,
                0,
                true,
                32,
                elf::STB_LOCAL,
                elf::STT_OBJECT,
                0,
            );
        },
    );
    check_common_invariants(&data);

    let (header, sections) = parse64(&data);
    assert_eq!(header.e_shnum.get(LE), 10);
    let symtab = section(&sections, ".symtab");
    let strtab = section(&sections, ".strtab");
    assert_eq!(symtab.sh_addr.get(LE), 0);
    assert_eq!(strtab.sh_addr.get(LE), 0);
    assert_eq!(symtab.sh_link.get(LE), 8);
    assert_eq!(symtab.sh_entsize.get(LE), 24);
    assert_eq!(symtab.sh_size.get(LE), 3 * 24);

    let symbols: &[elf::Sym64<LittleEndian>] =
        object::slice_from_all_bytes(symtab.data(LE, data.as_slice()).unwrap()).unwrap();
    let strings = strtab.data(LE, data.as_slice()).unwrap();
    let main = find_symbol(symbols, strings, "main");
    assert_eq!(main.st_value.get(LE), 8192);
    assert_eq!(main.st_size.get(LE), 16);
    assert_eq!(main.st_info, elf::STT_FUNC & 0xf);
    let data_start = find_symbol(symbols, strings, "data_start");
    assert_eq!(data_start.st_value.get(LE), 4096);
    assert_eq!(data_start.st_size.get(LE), 32);
}

#[test]
fn symtab_is_skipped_without_symbols() {
    // add_symbols is set, but nothing was added.
    let (data, _) = emit64(
        "/tmp/nosyms.so",
        Architecture::Arm64,
        layout(4096, 4096, 0),
        true,
        |_| {},
    );
    let (header, sections) = parse64(&data);
    assert_eq!(header.e_shnum.get(LE), 8);
    assert!(sections.section_by_name(LE, b".symtab").is_none());
    assert!(sections.section_by_name(LE, b".strtab").is_none());
}

#[test]
fn unaligned_rodata_end_is_fatal_and_latches() {
    let mut producer = TestCode::new(100, 4096);
    let mut builder = ElfBuilder::<Elf64, _>::new(
        &mut producer,
        Cursor::new(Vec::new()),
        Path::new("/tmp/bad.so"),
        Architecture::Arm64,
        layout(100, 4096, 0),
        false,
    );
    assert!(builder.init().is_err());
    // Once latched, write refuses to produce anything.
    assert!(builder.write().is_err());
    assert!(builder.into_file().into_inner().is_empty());
}

#[test]
fn eh_frame_discontiguity_is_fatal() {
    let mut producer = TestCode::new(4096, 4096);
    let mut builder = ElfBuilder::<Elf64, _>::new(
        &mut producer,
        Cursor::new(Vec::new()),
        Path::new("/tmp/gap.so"),
        Architecture::Arm64,
        layout(4096, 4096, 0),
        false,
    );
    builder
        .register_raw_section(
            ".eh_frame",
            elf::SHT_PROGBITS,
            u64::from(elf::SHF_ALLOC),
            4,
            0,
            // Ends off the 8-byte grid, so the 8-aligned header leaves a gap.
            vec![0xe1; 253],
        )
        .unwrap();
    builder
        .register_raw_section(
            ".eh_frame_hdr",
            elf::SHT_PROGBITS,
            u64::from(elf::SHF_ALLOC),
            8,
            0,
            vec![0xe2; 40],
        )
        .unwrap();
    assert!(builder.init().is_err());
    assert!(builder.write().is_err());
}

#[test]
fn writes_a_real_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("libaot-test.so");
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .unwrap();

    let mut producer = TestCode::new(4096, 8192);
    let mut builder = ElfBuilder::<Elf64, _>::new(
        &mut producer,
        file,
        &path,
        Architecture::X86_64,
        layout(4096, 8192, 0),
        false,
    );
    builder.init().unwrap();
    builder.write().unwrap();
    drop(builder.into_file());

    let data = std::fs::read(&path).unwrap();
    check_common_invariants(&data);
    let (header, sections) = parse64(&data);
    assert_eq!(header.e_machine.get(LE), elf::EM_X86_64);
    let (symbols, strings) = dynamic_symbols(&sections, &data);
    assert_eq!(find_symbol(symbols, strings, "oatdata").st_value.get(LE), 4096);
}
