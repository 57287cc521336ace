//! TFRecord framing.
//!
//! Every record on disk is laid out as
//!
//! ```text
//! u64 length | u32 masked crc32c(length) | data[length] | u32 masked crc32c(data)
//! ```
//!
//! with all integers little endian.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};
use thiserror::Error;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const MASK_DELTA: u32 = 0xa282_ead8;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("cannot open record file '{path}'")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("record truncated: expected {expected} bytes")]
    Truncated { expected: u64 },
    #[error("length checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    LengthCrc { stored: u32, computed: u32 },
    #[error("data checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    DataCrc { stored: u32, computed: u32 },
    #[error("malformed protobuf: {0}")]
    Malformed(&'static str),
    #[error("example has no feature named '{0}'")]
    MissingFeature(String),
    #[error("feature '{0}' has the wrong type")]
    WrongFeatureType(String),
    #[error("image has {actual} bytes but its shape needs {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
}

pub fn masked_crc(data: &[u8]) -> u32 {
    let crc = CASTAGNOLI.checksum(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Streams the raw payloads out of a TFRecord file.
pub struct RecordReader<R> {
    inner: R,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| RecordError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns `Ok(None)` on a clean end of file, i.e. no bytes left
    /// before the next length header.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>, RecordError> {
        let mut header = [0u8; 8];
        let mut filled = 0;
        while filled < header.len() {
            match self.inner.read(&mut header[filled..])? {
                0 if filled == 0 => return Ok(None),
                0 => return Err(RecordError::Truncated { expected: 8 }),
                n => filled += n,
            }
        }

        let stored = self.read_u32()?;
        let computed = masked_crc(&header);
        if stored != computed {
            return Err(RecordError::LengthCrc { stored, computed });
        }

        let length = u64::from_le_bytes(header);
        let mut data = Vec::new();
        (&mut self.inner).take(length).read_to_end(&mut data)?;
        if data.len() as u64 != length {
            return Err(RecordError::Truncated { expected: length });
        }

        let stored = self.read_u32()?;
        let computed = masked_crc(&data);
        if stored != computed {
            return Err(RecordError::DataCrc { stored, computed });
        }

        Ok(Some(data))
    }

    fn read_u32(&mut self) -> Result<u32, RecordError> {
        self.inner
            .read_u32::<LittleEndian>()
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => RecordError::Truncated { expected: 4 },
                _ => RecordError::Io(e),
            })
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Vec<u8>, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

pub struct RecordWriter<W: Write> {
    inner: W,
}

impl RecordWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| RecordError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_record(&mut self, data: &[u8]) -> Result<(), RecordError> {
        let length = (data.len() as u64).to_le_bytes();
        self.inner.write_all(&length)?;
        self.inner.write_u32::<LittleEndian>(masked_crc(&length))?;
        self.inner.write_all(data)?;
        self.inner.write_u32::<LittleEndian>(masked_crc(data))?;
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W, RecordError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
