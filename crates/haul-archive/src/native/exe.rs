//! Bare executables. They open fine but have nothing to extract; probing refuses them.

use std::io::{self, SeekFrom};

use super::{FormatHandler, MemberVisitor, NativeArchive, NativeItem, ReadSeek};

const ELF_MAGIC: &[u8] = b"\x7fELF";
const MZ_MAGIC: &[u8] = b"MZ";
const PE_MAGIC: &[u8] = b"PE\0\0";
const E_LFANEW_OFFSET: usize = 0x3c;

struct Executable {
    format: &'static str,
}

impl NativeArchive for Executable {
    fn format(&self) -> &str {
        self.format
    }

    fn items(&self) -> &[NativeItem] {
        &[]
    }

    fn extract(
        &mut self,
        _stream: &mut dyn ReadSeek,
        _indices: &[usize],
        _visitor: &mut dyn MemberVisitor,
    ) -> io::Result<()> {
        Ok(())
    }
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Windows PE images: an `MZ` stub whose `e_lfanew` points at a `PE\0\0` header.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeHandler;

impl PeHandler {
    fn pe_offset(stub: &[u8]) -> Option<u64> {
        if !stub.starts_with(MZ_MAGIC) {
            return None;
        }
        let raw = stub.get(E_LFANEW_OFFSET..E_LFANEW_OFFSET + 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64)
    }
}

impl FormatHandler for PeHandler {
    fn name(&self) -> &str {
        "PE"
    }

    fn extensions(&self) -> &[&str] {
        &["exe", "dll"]
    }

    fn matches_signature(&self, header: &[u8]) -> bool {
        let Some(offset) = Self::pe_offset(header) else {
            return false;
        };
        let offset = offset as usize;
        header.get(offset..offset + 4) == Some(PE_MAGIC)
    }

    fn open(
        &self,
        stream: &mut dyn ReadSeek,
        size: u64,
        _hint: &str,
    ) -> io::Result<Box<dyn NativeArchive>> {
        let mut stub = [0u8; E_LFANEW_OFFSET + 4];
        stream
            .read_exact(&mut stub)
            .map_err(|_| invalid("too short for a PE image"))?;
        let offset = Self::pe_offset(&stub).ok_or_else(|| invalid("missing MZ stub"))?;
        if offset.saturating_add(4) > size {
            return Err(invalid("PE header offset past the end"));
        }

        stream.seek(SeekFrom::Start(offset))?;
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        if magic != PE_MAGIC {
            return Err(invalid("missing PE header"));
        }

        Ok(Box::new(Executable { format: "PE" }))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ElfHandler;

impl FormatHandler for ElfHandler {
    fn name(&self) -> &str {
        "ELF"
    }

    fn extensions(&self) -> &[&str] {
        &["so", "elf"]
    }

    fn matches_signature(&self, header: &[u8]) -> bool {
        header.starts_with(ELF_MAGIC)
    }

    fn open(
        &self,
        stream: &mut dyn ReadSeek,
        _size: u64,
        _hint: &str,
    ) -> io::Result<Box<dyn NativeArchive>> {
        let mut magic = [0u8; 4];
        stream
            .read_exact(&mut magic)
            .map_err(|_| invalid("too short for an ELF image"))?;
        if magic != ELF_MAGIC {
            return Err(invalid("missing ELF magic"));
        }
        Ok(Box::new(Executable { format: "ELF" }))
    }
}

/// A minimal PE image: `MZ` stub, `e_lfanew = 0x40`, `PE\0\0` right after.
#[cfg(test)]
pub(crate) fn minimal_pe() -> Vec<u8> {
    let mut image = vec![0u8; 0x80];
    image[..2].copy_from_slice(MZ_MAGIC);
    image[E_LFANEW_OFFSET..E_LFANEW_OFFSET + 4].copy_from_slice(&0x40u32.to_le_bytes());
    image[0x40..0x44].copy_from_slice(PE_MAGIC);
    image
}
