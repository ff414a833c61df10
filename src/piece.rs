//! Scheduled file writes. Emission builds a list of [`FilePiece`]s, each a
//! byte range at a known offset, then commits them in offset order against a
//! seekable sink.

use crate::error::Result;
use anyhow::Context as _;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

/// The compiler's code output, treated as opaque. It is told where in the
/// file its content will start, then streams the read-only data and
/// executable code sections as one contiguous blob.
pub trait CodeOutput {
    fn set_code_offset(&mut self, offset: u64) -> Result;
    fn write(&mut self, out: &mut dyn Write) -> Result;
}

pub(crate) enum FilePiece {
    /// In-memory bytes.
    Bytes {
        name: String,
        offset: u64,
        data: Vec<u8>,
    },
    /// Producer-driven: rodata and text, streamed as one blob.
    Code { offset: u64 },
    /// Placeholder for `.text`, which the `Code` piece already covers. Kept
    /// so the piece list describes every section.
    TextMarker { offset: u64 },
}

impl FilePiece {
    pub(crate) fn bytes(name: &str, offset: u64, data: Vec<u8>) -> FilePiece {
        FilePiece::Bytes {
            name: name.to_owned(),
            offset,
            data,
        }
    }

    fn offset(&self) -> u64 {
        match self {
            FilePiece::Bytes { offset, .. }
            | FilePiece::Code { offset }
            | FilePiece::TextMarker { offset } => *offset,
        }
    }

    fn description(&self) -> &str {
        match self {
            FilePiece::Bytes { name, .. } => name,
            FilePiece::Code { .. } => ".rodata",
            FilePiece::TextMarker { .. } => ".text",
        }
    }
}

/// Commits every piece: stable-sorts by offset, then seeks and writes each in
/// turn. A failed seek or short write aborts the emission, leaving the file
/// contents unspecified.
pub(crate) fn write_pieces<W: Write + Seek>(
    mut pieces: Vec<FilePiece>,
    file: &mut W,
    code_output: &mut dyn CodeOutput,
) -> Result {
    pieces.sort_by_key(FilePiece::offset);
    for piece in &pieces {
        file.seek(SeekFrom::Start(piece.offset()))
            .with_context(|| {
                format!(
                    "Failed to seek to {} at offset {}",
                    piece.description(),
                    piece.offset()
                )
            })?;
        match piece {
            FilePiece::Bytes { name, data, .. } => {
                file.write_all(data)
                    .with_context(|| format!("Failed to write {name}"))?;
            }
            FilePiece::Code { offset } => {
                code_output.set_code_offset(*offset)?;
                code_output
                    .write(file)
                    .context("Failed to write .rodata and .text")?;
            }
            FilePiece::TextMarker { .. } => {}
        }
    }
    Ok(())
}
