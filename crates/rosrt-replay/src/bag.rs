// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bag files: recorded, ordered logs of timestamped messages.
//!
//! # Format Overview
//!
//! ```text
//! +----------------------------------------------------------+
//! |                  File Header (48 bytes)                   |
//! |  Magic (8) | Version (4) | Flags (4) | FirstTime (8)     |
//! |  LastTime (8) | MessageCount (8) | Reserved (8)          |
//! +----------------------------------------------------------+
//! |                  Record 0                                 |
//! |  time (8) | topic_len (2) | type_len (2) | md5_len (2)   |
//! |  payload_len (4) | topic | type | md5 | payload          |
//! +----------------------------------------------------------+
//! |                  Record 1 ...                             |
//! +----------------------------------------------------------+
//! ```
//!
//! The header carries first/last record time and the message count, so
//! both are available without scanning. Sequential reads yield envelopes
//! in non-decreasing record-time order; a reader that observes time going
//! backwards reports the file as corrupt.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

/// Magic bytes: "ROSRTBAG".
pub const MAGIC: [u8; 8] = *b"ROSRTBAG";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Errors raised by bag reading and writing.
#[derive(Debug, Error)]
pub enum BagError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bag not found: {0}")]
    NotFound(PathBuf),

    #[error("{0} is not a bag file")]
    NotABag(PathBuf),

    #[error("unsupported bag version {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt bag: {0}")]
    Corrupt(String),

    #[error("record time went backwards: {previous} then {found}")]
    TimeOrder { previous: u64, found: u64 },
}

/// One recorded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Wall clock at capture, nanoseconds.
    pub record_time_ns: u64,
    /// Resolved topic name.
    pub topic: String,
    /// Declared message type name.
    pub type_name: String,
    /// Declared type digest.
    pub md5sum: String,
    /// Serialized payload bytes.
    pub payload: Vec<u8>,
}

/// Fixed-size file header.
#[derive(Debug, Clone)]
pub struct BagHeader {
    pub version: u32,
    pub first_record_time_ns: u64,
    pub last_record_time_ns: u64,
    pub message_count: u64,
}

impl BagHeader {
    pub const SIZE: usize = 48;

    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&MAGIC)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(0)?; // flags, reserved
        w.write_u64::<LittleEndian>(self.first_record_time_ns)?;
        w.write_u64::<LittleEndian>(self.last_record_time_ns)?;
        w.write_u64::<LittleEndian>(self.message_count)?;
        w.write_u64::<LittleEndian>(0)?; // reserved
        Ok(())
    }

    fn read<R: Read>(r: &mut R, path: &Path) -> Result<Self, BagError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)
            .map_err(|_| BagError::NotABag(path.to_path_buf()))?;
        if magic != MAGIC {
            return Err(BagError::NotABag(path.to_path_buf()));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(BagError::UnsupportedVersion(version));
        }
        let _flags = r.read_u32::<LittleEndian>()?;
        let first_record_time_ns = r.read_u64::<LittleEndian>()?;
        let last_record_time_ns = r.read_u64::<LittleEndian>()?;
        let message_count = r.read_u64::<LittleEndian>()?;
        let _reserved = r.read_u64::<LittleEndian>()?;
        Ok(Self {
            version,
            first_record_time_ns,
            last_record_time_ns,
            message_count,
        })
    }
}

/// Sequential bag writer. `finalize` rewrites the header with the
/// observed time bounds and count.
pub struct BagWriter {
    file: BufWriter<File>,
    header: BagHeader,
    finalized: bool,
}

impl BagWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, BagError> {
        let file = File::create(path.as_ref())?;
        let mut file = BufWriter::new(file);
        let header = BagHeader {
            version: FORMAT_VERSION,
            first_record_time_ns: 0,
            last_record_time_ns: 0,
            message_count: 0,
        };
        header.write(&mut file)?;
        Ok(Self {
            file,
            header,
            finalized: false,
        })
    }

    /// Append one envelope. Record times must be non-decreasing.
    pub fn write(&mut self, envelope: &Envelope) -> Result<(), BagError> {
        if self.header.message_count > 0
            && envelope.record_time_ns < self.header.last_record_time_ns
        {
            return Err(BagError::TimeOrder {
                previous: self.header.last_record_time_ns,
                found: envelope.record_time_ns,
            });
        }
        self.file
            .write_u64::<LittleEndian>(envelope.record_time_ns)?;
        self.file
            .write_u16::<LittleEndian>(envelope.topic.len() as u16)?;
        self.file
            .write_u16::<LittleEndian>(envelope.type_name.len() as u16)?;
        self.file
            .write_u16::<LittleEndian>(envelope.md5sum.len() as u16)?;
        self.file
            .write_u32::<LittleEndian>(envelope.payload.len() as u32)?;
        self.file.write_all(envelope.topic.as_bytes())?;
        self.file.write_all(envelope.type_name.as_bytes())?;
        self.file.write_all(envelope.md5sum.as_bytes())?;
        self.file.write_all(&envelope.payload)?;

        if self.header.message_count == 0 {
            self.header.first_record_time_ns = envelope.record_time_ns;
        }
        self.header.last_record_time_ns = envelope.record_time_ns;
        self.header.message_count += 1;
        Ok(())
    }

    /// Rewrite the header and flush. Called automatically on drop if
    /// forgotten, but errors are only observable here.
    pub fn finalize(&mut self) -> Result<(), BagError> {
        if self.finalized {
            return Ok(());
        }
        self.file.flush()?;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(0))?;
        self.header.write(file)?;
        file.flush()?;
        self.finalized = true;
        Ok(())
    }
}

impl Drop for BagWriter {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(e) = self.finalize() {
                tracing::warn!("bag finalize on drop failed: {}", e);
            }
        }
    }
}

/// Sequential bag reader.
pub struct BagReader {
    path: PathBuf,
    file: BufReader<File>,
    header: BagHeader,
    read: u64,
    previous_time: u64,
}

impl BagReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BagError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(BagError::NotFound(path));
        }
        let mut file = BufReader::new(File::open(&path)?);
        let header = BagHeader::read(&mut file, &path)?;
        Ok(Self {
            path,
            file,
            header,
            read: 0,
            previous_time: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First record time, available without a scan.
    pub fn first_record_time_ns(&self) -> u64 {
        self.header.first_record_time_ns
    }

    /// Last record time, available without a scan.
    pub fn last_record_time_ns(&self) -> u64 {
        self.header.last_record_time_ns
    }

    pub fn message_count(&self) -> u64 {
        self.header.message_count
    }

    /// Recorded span in nanoseconds.
    pub fn duration_ns(&self) -> u64 {
        self.header
            .last_record_time_ns
            .saturating_sub(self.header.first_record_time_ns)
    }

    /// Read the next envelope; `Ok(None)` at end of file.
    pub fn next(&mut self) -> Result<Option<Envelope>, BagError> {
        if self.read >= self.header.message_count {
            return Ok(None);
        }
        let record_time_ns = self.file.read_u64::<LittleEndian>()?;
        if self.read > 0 && record_time_ns < self.previous_time {
            return Err(BagError::TimeOrder {
                previous: self.previous_time,
                found: record_time_ns,
            });
        }
        let topic_len = self.file.read_u16::<LittleEndian>()? as usize;
        let type_len = self.file.read_u16::<LittleEndian>()? as usize;
        let md5_len = self.file.read_u16::<LittleEndian>()? as usize;
        let payload_len = self.file.read_u32::<LittleEndian>()? as usize;

        let topic = self.read_string(topic_len)?;
        let type_name = self.read_string(type_len)?;
        let md5sum = self.read_string(md5_len)?;
        let mut payload = vec![0u8; payload_len];
        self.file.read_exact(&mut payload)?;

        self.read += 1;
        self.previous_time = record_time_ns;
        Ok(Some(Envelope {
            record_time_ns,
            topic,
            type_name,
            md5sum,
            payload,
        }))
    }

    fn read_string(&mut self, len: usize) -> Result<String, BagError> {
        let mut bytes = vec![0u8; len];
        self.file.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|_| BagError::Corrupt("non-utf8 name".to_string()))
    }
}

/// K-way merge over several bags, yielding envelopes in non-decreasing
/// record-time order across all inputs.
pub struct MergedReader {
    inputs: Vec<(BagReader, Option<Envelope>)>,
}

impl MergedReader {
    pub fn new(readers: Vec<BagReader>) -> Result<Self, BagError> {
        let mut inputs = Vec::with_capacity(readers.len());
        for mut reader in readers {
            let head = reader.next()?;
            inputs.push((reader, head));
        }
        Ok(Self { inputs })
    }

    /// Earliest first-record time across all inputs, `None` when every
    /// bag is empty.
    pub fn first_record_time_ns(&self) -> Option<u64> {
        self.inputs
            .iter()
            .filter(|(reader, _)| reader.message_count() > 0)
            .map(|(reader, _)| reader.first_record_time_ns())
            .min()
    }

    /// Latest last-record time across all inputs.
    pub fn last_record_time_ns(&self) -> Option<u64> {
        self.inputs
            .iter()
            .filter(|(reader, _)| reader.message_count() > 0)
            .map(|(reader, _)| reader.last_record_time_ns())
            .max()
    }

    pub fn total_messages(&self) -> u64 {
        self.inputs.iter().map(|(r, _)| r.message_count()).sum()
    }

    pub fn next(&mut self) -> Result<Option<Envelope>, BagError> {
        let index = self
            .inputs
            .iter()
            .enumerate()
            .filter_map(|(i, (_, head))| head.as_ref().map(|e| (i, e.record_time_ns)))
            .min_by_key(|(_, time)| *time)
            .map(|(i, _)| i);
        let Some(index) = index else {
            return Ok(None);
        };
        let (reader, head) = &mut self.inputs[index];
        let envelope = head.take();
        *head = reader.next()?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn envelope(time: u64, topic: &str, byte: u8) -> Envelope {
        Envelope {
            record_time_ns: time,
            topic: topic.to_string(),
            type_name: "rosrt_msgs/Text".to_string(),
            md5sum: "abc".to_string(),
            payload: vec![byte],
        }
    }

    fn write_bag(path: &Path, envelopes: &[Envelope]) {
        let mut writer = BagWriter::create(path).expect("create");
        for e in envelopes {
            writer.write(e).expect("write");
        }
        writer.finalize().expect("finalize");
    }

    #[test]
    fn header_carries_bounds_without_a_scan() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.bag");
        write_bag(
            &path,
            &[envelope(100, "/a", 0), envelope(250, "/a", 1), envelope(900, "/b", 2)],
        );

        let reader = BagReader::open(&path).expect("open");
        assert_eq!(reader.first_record_time_ns(), 100);
        assert_eq!(reader.last_record_time_ns(), 900);
        assert_eq!(reader.message_count(), 3);
        assert_eq!(reader.duration_ns(), 800);
    }

    #[test]
    fn roundtrip_preserves_envelopes_in_order() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("roundtrip.bag");
        let envelopes: Vec<_> = (0..10u8).map(|i| envelope(i as u64 * 10, "/t", i)).collect();
        write_bag(&path, &envelopes);

        let mut reader = BagReader::open(&path).expect("open");
        let mut back = Vec::new();
        while let Some(e) = reader.next().expect("next") {
            back.push(e);
        }
        assert_eq!(back, envelopes);
        assert!(reader.next().expect("eof").is_none());
    }

    #[test]
    fn writer_rejects_time_going_backwards() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("order.bag");
        let mut writer = BagWriter::create(&path).expect("create");
        writer.write(&envelope(50, "/t", 0)).expect("first");
        assert!(matches!(
            writer.write(&envelope(40, "/t", 1)),
            Err(BagError::TimeOrder { .. })
        ));
    }

    #[test]
    fn non_bag_files_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("not_a_bag");
        std::fs::write(&path, b"plain text, definitely not a bag").expect("write");
        assert!(matches!(
            BagReader::open(&path),
            Err(BagError::NotABag(_))
        ));
        assert!(matches!(
            BagReader::open(dir.path().join("missing.bag")),
            Err(BagError::NotFound(_))
        ));
    }

    #[test]
    fn merged_reader_interleaves_by_record_time() {
        let dir = tempdir().expect("tempdir");
        let a = dir.path().join("a.bag");
        let b = dir.path().join("b.bag");
        write_bag(&a, &[envelope(10, "/a", 0), envelope(30, "/a", 1)]);
        write_bag(&b, &[envelope(20, "/b", 2), envelope(40, "/b", 3)]);

        let mut merged = MergedReader::new(vec![
            BagReader::open(&a).expect("a"),
            BagReader::open(&b).expect("b"),
        ])
        .expect("merge");
        assert_eq!(merged.first_record_time_ns(), Some(10));
        assert_eq!(merged.last_record_time_ns(), Some(40));
        assert_eq!(merged.total_messages(), 4);

        let mut times = Vec::new();
        while let Some(e) = merged.next().expect("next") {
            times.push(e.record_time_ns);
        }
        assert_eq!(times, vec![10, 20, 30, 40]);
    }
}
