#![allow(dead_code)]

use std::io::{self, Cursor, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use haul_archive::native::{
    FormatHandler, MemberAction, MemberVisitor, NativeArchive, NativeItem, ReadSeek,
};
use haul_archive::{AfterSave, Checkpoint, SaveConsumer};

pub fn tempdir(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("Failed to create temp dir")
}

/// `bin/`, `bin/tool` (0o755), `tool -> bin/tool`, `README` (0o600).
pub fn tar_fixture() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    builder.append_data(&mut header, "bin/", io::empty()).unwrap();

    let mut header = tar::Header::new_gnu();
    header.set_size(11);
    header.set_mode(0o755);
    builder
        .append_data(&mut header, "bin/tool", &b"#!/bin/true"[..])
        .unwrap();

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    builder.append_link(&mut header, "tool", "bin/tool").unwrap();

    let mut header = tar::Header::new_gnu();
    header.set_size(6);
    header.set_mode(0o600);
    builder
        .append_data(&mut header, "README", &b"readme"[..])
        .unwrap();

    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// An `MZ` stub with no PE header, followed by a cabinet holding `setup.ini` and
/// `data\game.dat`.
pub fn cab_installer() -> Vec<u8> {
    let mut builder = cab::CabinetBuilder::new();
    let folder = builder.add_folder(cab::CompressionType::MsZip);
    folder.add_file("setup.ini");
    folder.add_file("data\\game.dat");

    let mut writer = builder.build(Cursor::new(Vec::new())).unwrap();
    let mut contents = [&b"[setup]"[..], &b"game data"[..]].into_iter();
    while let Some(mut file) = writer.next_file().unwrap() {
        file.write_all(contents.next().unwrap()).unwrap();
    }

    let mut image = b"MZ".to_vec();
    image.resize(0x200, 0);
    image.extend(writer.finish().unwrap().into_inner());
    image
}

/// Same layout as [`tar_fixture`].
pub fn zip_fixture() -> Vec<u8> {
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .add_directory("bin/", SimpleFileOptions::default())
        .unwrap();
    writer
        .start_file(
            "bin/tool",
            SimpleFileOptions::default().unix_permissions(0o755),
        )
        .unwrap();
    writer.write_all(b"#!/bin/true").unwrap();
    writer
        .add_symlink("tool", "bin/tool", SimpleFileOptions::default())
        .unwrap();
    writer
        .start_file(
            "README",
            SimpleFileOptions::default().unix_permissions(0o600),
        )
        .unwrap();
    writer.write_all(b"readme").unwrap();
    writer.finish().unwrap().into_inner()
}

/// Windows attributes flag saying the high word carries a unix `st_mode`.
const UNIX_EXTENSION: u32 = 0x8000;

/// Same layout as [`tar_fixture`], the symlink stored as content with unix attributes.
pub fn sevenz_fixture() -> Vec<u8> {
    use sevenz_rust::{SevenZArchiveEntry, SevenZWriter};

    let mut writer = SevenZWriter::new(Cursor::new(Vec::new())).unwrap();

    let mut dir = SevenZArchiveEntry::new();
    dir.name = "bin".into();
    dir.is_directory = true;
    writer.push_archive_entry(dir, None::<&[u8]>).unwrap();

    let mut tool = SevenZArchiveEntry::new();
    tool.name = "bin/tool".into();
    tool.has_windows_attributes = true;
    tool.windows_attributes = UNIX_EXTENSION | (0o100755 << 16);
    writer
        .push_archive_entry(tool, Some(&b"#!/bin/true"[..]))
        .unwrap();

    let mut link = SevenZArchiveEntry::new();
    link.name = "tool".into();
    link.has_windows_attributes = true;
    link.windows_attributes = UNIX_EXTENSION | (0o120777 << 16);
    writer
        .push_archive_entry(link, Some(&b"bin/tool"[..]))
        .unwrap();

    let mut readme = SevenZArchiveEntry::new();
    readme.name = "README".into();
    writer
        .push_archive_entry(readme, Some(&b"readme"[..]))
        .unwrap();

    writer.finish().unwrap().into_inner()
}

/// `MZ` stub pointing at a `PE\0\0` header.
pub fn pe_image() -> Vec<u8> {
    let mut image = vec![0u8; 0x80];
    image[..2].copy_from_slice(b"MZ");
    image[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
    image[0x40..0x44].copy_from_slice(b"PE\0\0");
    image
}

pub fn elf_image() -> Vec<u8> {
    let mut image = b"\x7fELF\x02\x01\x01\0".to_vec();
    image.resize(64, 0);
    image
}

pub const CHUNK_MAGIC: &[u8] = b"CHNK";
pub const CHUNK_LEN: usize = 8;

/// A made-up format: `CHNK` then fixed-size members, stored uncompressed.
///
/// Every member becomes `parts/NN.bin`, preceded by the `parts` directory, so resume
/// behavior can be exercised without a real codec that supports it.
pub struct ChunkedHandler;

pub fn chunked_fixture(members: usize) -> Vec<u8> {
    let mut data = CHUNK_MAGIC.to_vec();
    for i in 0..members {
        data.extend(std::iter::repeat_n(b'a' + i as u8, CHUNK_LEN));
    }
    data
}

struct ChunkedArchive {
    items: Vec<NativeItem>,
}

impl FormatHandler for ChunkedHandler {
    fn name(&self) -> &str {
        "chunked"
    }

    fn extensions(&self) -> &[&str] {
        &["chnk"]
    }

    fn matches_signature(&self, header: &[u8]) -> bool {
        header.starts_with(CHUNK_MAGIC)
    }

    fn open(
        &self,
        stream: &mut dyn ReadSeek,
        size: u64,
        _hint: &str,
    ) -> io::Result<Box<dyn NativeArchive>> {
        let mut magic = [0u8; 4];
        stream.read_exact(&mut magic)?;
        if magic != CHUNK_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not chunked"));
        }

        let members = (size as usize - CHUNK_MAGIC.len()) / CHUNK_LEN;
        let mut items = vec![NativeItem {
            path: "parts".into(),
            is_dir: true,
            ..Default::default()
        }];
        items.extend((0..members).map(|i| NativeItem {
            path: format!("parts/{i:02}.bin"),
            size: CHUNK_LEN as u64,
            packed_size: CHUNK_LEN as u64,
            posix_attrib: Some(0o100644),
            ..Default::default()
        }));
        Ok(Box::new(ChunkedArchive { items }))
    }
}

impl NativeArchive for ChunkedArchive {
    fn format(&self) -> &str {
        "chunked"
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
        let total: u64 = indices.iter().map(|&i| self.items[i].size).sum();
        let mut done = 0;
        for &index in indices {
            match visitor.begin(index)? {
                MemberAction::Stop => return Ok(()),
                MemberAction::Skip => {}
                MemberAction::Extract => {
                    // item 0 is the directory
                    let offset = CHUNK_MAGIC.len() + (index - 1) * CHUNK_LEN;
                    stream.seek(SeekFrom::Start(offset as u64))?;
                    let mut buf = [0u8; CHUNK_LEN];
                    stream.read_exact(&mut buf)?;
                    visitor.write(&buf)?;
                }
            }
            done += self.items[index].size;
            if total > 0 {
                visitor.progress(done, total);
            }
            visitor.finish(index)?;
        }
        Ok(())
    }
}

/// Saves every checkpoint as JSON and asks to stop after each one.
#[derive(Clone, Default)]
pub struct StopAfterEachSave {
    pub saved: Arc<Mutex<Option<String>>>,
}

impl StopAfterEachSave {
    pub fn load(&self) -> Option<Checkpoint> {
        self.saved
            .lock()
            .unwrap()
            .as_deref()
            .map(|json| serde_json::from_str(json).unwrap())
    }
}

impl SaveConsumer for StopAfterEachSave {
    fn should_save(&mut self, _bytes: u64) -> bool {
        true
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> haul_archive::Result<AfterSave> {
        *self.saved.lock().unwrap() = Some(serde_json::to_string(checkpoint)?);
        Ok(AfterSave::StopAfterSave)
    }
}
