// Managed executable detection.
//
// A PE image is managed when its optional header carries a non-empty CLR
// runtime header entry (data directory 14). Anything that cannot be read
// or parsed is reported as "not managed".

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::trace;

const DOS_MAGIC: u16 = 0x5A4D; // "MZ"
const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"
const E_LFANEW_OFFSET: u64 = 0x3C;
const COFF_HEADER_SIZE: u64 = 20;

const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;

// Offset of the CLR directory entry from the start of the optional header.
const PE32_CLR_DIRECTORY: u64 = 208;
const PE32_PLUS_CLR_DIRECTORY: u64 = 224;

/// Returns true iff `path` is a PE image with a CLR runtime header. Never fails.
pub fn is_managed_executable(path: &Path) -> bool {
    match probe(path) {
        Ok(managed) => managed,
        Err(err) => {
            trace!(path = %path.display(), error = %err, "not a managed executable");
            false
        }
    }
}

struct BoundedReader {
    file: File,
    len: u64,
}

impl BoundedReader {
    fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    fn read_at<const N: usize>(&mut self, offset: u64) -> io::Result<[u8; N]> {
        let end = offset
            .checked_add(N as u64)
            .ok_or_else(|| out_of_range(offset))?;
        if end > self.len {
            return Err(out_of_range(offset));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; N];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn u16_at(&mut self, offset: u64) -> io::Result<u16> {
        self.read_at::<2>(offset).map(u16::from_le_bytes)
    }

    fn u32_at(&mut self, offset: u64) -> io::Result<u32> {
        self.read_at::<4>(offset).map(u32::from_le_bytes)
    }
}

fn out_of_range(offset: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("offset {offset:#x} beyond end of file"),
    )
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn probe(path: &Path) -> io::Result<bool> {
    let mut reader = BoundedReader::open(path)?;

    if reader.u16_at(0)? != DOS_MAGIC {
        return Err(invalid("missing MZ header"));
    }

    let pe_offset = u64::from(reader.u32_at(E_LFANEW_OFFSET)?);
    if reader.u32_at(pe_offset)? != PE_SIGNATURE {
        return Err(invalid("missing PE signature"));
    }

    let optional_header = pe_offset + 4 + COFF_HEADER_SIZE;
    let clr_entry = match reader.u16_at(optional_header)? {
        PE32_MAGIC => optional_header + PE32_CLR_DIRECTORY,
        PE32_PLUS_MAGIC => optional_header + PE32_PLUS_CLR_DIRECTORY,
        _ => return Err(invalid("unknown optional header magic")),
    };

    let rva = reader.u32_at(clr_entry)?;
    let size = reader.u32_at(clr_entry + 4)?;
    Ok(rva != 0 && size != 0)
}

/// Minimal PE images for tests: a DOS stub, PE signature, COFF header and an
/// optional header large enough to hold the CLR directory entry.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const PE_OFFSET: usize = 0x80;

    pub fn image(pe32_plus: bool, clr: Option<(u32, u32)>) -> Vec<u8> {
        let optional_header = PE_OFFSET + 4 + COFF_HEADER_SIZE as usize;
        let (magic, dir) = if pe32_plus {
            (PE32_PLUS_MAGIC, PE32_PLUS_CLR_DIRECTORY as usize)
        } else {
            (PE32_MAGIC, PE32_CLR_DIRECTORY as usize)
        };
        let mut bytes = vec![0u8; optional_header + dir + 16];

        bytes[0..2].copy_from_slice(&DOS_MAGIC.to_le_bytes());
        bytes[0x3C..0x40].copy_from_slice(&(PE_OFFSET as u32).to_le_bytes());
        bytes[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(&PE_SIGNATURE.to_le_bytes());
        bytes[optional_header..optional_header + 2].copy_from_slice(&magic.to_le_bytes());

        if let Some((rva, size)) = clr {
            let entry = optional_header + dir;
            bytes[entry..entry + 4].copy_from_slice(&rva.to_le_bytes());
            bytes[entry + 4..entry + 8].copy_from_slice(&size.to_le_bytes());
        }
        bytes
    }
}
