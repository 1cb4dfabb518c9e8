use std::io;

use cab::Cabinet;
use tracing::debug;

use super::window::{SubStream, find_signature};
use super::{
    FormatHandler, MemberAction, MemberVisitor, NativeArchive, NativeItem, ReadSeek, pump,
};

const SIGNATURE: &[u8] = b"MSCF";

const REGULAR_FILE: u32 = 0o100644;
const EXECUTABLE_FILE: u32 = 0o100755;

/// Microsoft cabinets, on their own or appended to an installer stub.
#[derive(Clone, Copy, Debug, Default)]
pub struct CabHandler;

impl FormatHandler for CabHandler {
    fn name(&self) -> &str {
        "cab"
    }

    fn extensions(&self) -> &[&str] {
        &["cab"]
    }

    fn matches_signature(&self, header: &[u8]) -> bool {
        header.starts_with(SIGNATURE)
    }

    fn open(
        &self,
        stream: &mut dyn ReadSeek,
        size: u64,
        _hint: &str,
    ) -> io::Result<Box<dyn NativeArchive>> {
        let mut from = 0;
        let mut last = None;
        while let Some(offset) = find_signature(stream, from, SIGNATURE)? {
            match CabArchive::open(stream, offset, size) {
                Ok(archive) => {
                    if offset > 0 {
                        debug!(offset, "found cabinet inside a larger file");
                    }
                    return Ok(archive);
                }
                Err(err) => {
                    debug!(offset, "not a cabinet: {err}");
                    last = Some(err);
                }
            }
            from = offset + 1;
        }

        Err(last.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "no cabinet signature found")
        }))
    }
}

struct CabArchive {
    offset: u64,
    len: u64,
    /// Member names as the cabinet stores them, backslashes included.
    names: Vec<String>,
    items: Vec<NativeItem>,
}

impl CabArchive {
    fn open(
        stream: &mut dyn ReadSeek,
        offset: u64,
        size: u64,
    ) -> io::Result<Box<dyn NativeArchive>> {
        let len = size.saturating_sub(offset);
        let cabinet = Cabinet::new(SubStream::new(stream, offset, len)?)?;

        let mut names = Vec::new();
        let mut items = Vec::new();
        for folder in cabinet.folder_entries() {
            for file in folder.file_entries() {
                let mode = if file.is_exec() {
                    EXECUTABLE_FILE
                } else {
                    REGULAR_FILE
                };
                names.push(file.name().to_string());
                items.push(NativeItem {
                    path: file.name().replace('\\', "/"),
                    size: u64::from(file.uncompressed_size()),
                    posix_attrib: Some(mode),
                    ..Default::default()
                });
            }
        }

        Ok(Box::new(Self {
            offset,
            len,
            names,
            items,
        }))
    }
}

impl NativeArchive for CabArchive {
    fn format(&self) -> &str {
        "cab"
    }

    fn items(&self) -> &[NativeItem] {
        &self.items
    }

    fn extract(
        &mut self,
        stream: &mut dyn ReadSeek,
        indices: &[usize],
        visitor: &mut dyn MemberVisitor,
    ) -> io::Result<()> {
        let total: u64 = indices
            .iter()
            .filter_map(|&i| self.items.get(i))
            .map(|item| item.size)
            .sum();
        let mut cabinet = Cabinet::new(SubStream::new(stream, self.offset, self.len)?)?;

        let mut done = 0u64;
        for &index in indices {
            let (Some(name), Some(item)) = (self.names.get(index), self.items.get(index)) else {
                continue;
            };

            let action = visitor.begin(index)?;
            if action == MemberAction::Stop {
                break;
            }
            // skipped members are never decoded
            if action == MemberAction::Extract {
                let mut reader = cabinet.read_file(name)?;
                pump(&mut reader, &mut *visitor)?;
            }

            done += item.size;
            if total > 0 {
                visitor.progress(done, total);
            }
            if action == MemberAction::Extract {
                visitor.finish(index)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn cabinet_of(files: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::{Cursor, Write};

    let mut builder = cab::CabinetBuilder::new();
    let folder = builder.add_folder(cab::CompressionType::MsZip);
    for (name, _) in files {
        folder.add_file(*name);
    }
    let mut writer = builder.build(Cursor::new(Vec::new())).unwrap();
    let mut contents = files.iter();
    while let Some(mut file) = writer.next_file().unwrap() {
        let (_, data) = contents.next().unwrap();
        file.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
