//! Just enough protobuf to read and write `tf.train.Example` payloads.
//!
//! ```text
//! Example   { Features features = 1; }
//! Features  { map<string, Feature> feature = 1; }
//! Feature   { oneof { BytesList = 1; FloatList = 2; Int64List = 3; } }
//! *List     { repeated value = 1; }
//! ```

use std::collections::BTreeMap;

use crate::tfrecord::RecordError;

const VARINT: u8 = 0;
const FIXED64: u8 = 1;
const LEN: u8 = 2;
const FIXED32: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum Feature {
    Bytes(Vec<Vec<u8>>),
    Float(Vec<f32>),
    Int64(Vec<i64>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Example {
    pub features: BTreeMap<String, Feature>,
}

struct Wire<'a> {
    buf: &'a [u8],
}

impl<'a> Wire<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn varint(&mut self) -> Result<u64, RecordError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let (&byte, rest) = self
                .buf
                .split_first()
                .ok_or(RecordError::Malformed("truncated varint"))?;
            self.buf = rest;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(RecordError::Malformed("varint longer than 10 bytes"))
    }

    fn key(&mut self) -> Result<(u64, u8), RecordError> {
        let key = self.varint()?;
        Ok((key >> 3, (key & 0x7) as u8))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RecordError> {
        if self.buf.len() < n {
            return Err(RecordError::Malformed("field runs past end of message"));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn delimited(&mut self) -> Result<&'a [u8], RecordError> {
        let len = self.varint()? as usize;
        self.take(len)
    }

    fn skip(&mut self, wire_type: u8) -> Result<(), RecordError> {
        match wire_type {
            VARINT => self.varint().map(drop),
            FIXED64 => self.take(8).map(drop),
            LEN => self.delimited().map(drop),
            FIXED32 => self.take(4).map(drop),
            _ => Err(RecordError::Malformed("unsupported wire type")),
        }
    }
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn put_key(out: &mut Vec<u8>, field: u64, wire_type: u8) {
    put_varint(out, (field << 3) | u64::from(wire_type));
}

fn put_delimited(out: &mut Vec<u8>, field: u64, bytes: &[u8]) {
    put_key(out, field, LEN);
    put_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

impl Feature {
    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let mut wire = Wire::new(buf);
        // an empty Feature carries no kind; treat it as an empty bytes list
        let mut feature = Feature::Bytes(Vec::new());

        while !wire.is_empty() {
            match wire.key()? {
                (1, LEN) => feature = Feature::Bytes(decode_bytes_list(wire.delimited()?)?),
                (2, LEN) => feature = Feature::Float(decode_float_list(wire.delimited()?)?),
                (3, LEN) => feature = Feature::Int64(decode_int64_list(wire.delimited()?)?),
                (_, wire_type) => wire.skip(wire_type)?,
            }
        }
        Ok(feature)
    }

    fn encode(&self) -> Vec<u8> {
        let mut list = Vec::new();
        let field = match self {
            Feature::Bytes(values) => {
                values.iter().for_each(|v| put_delimited(&mut list, 1, v));
                1
            }
            Feature::Float(values) => {
                let packed: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                put_delimited(&mut list, 1, &packed);
                2
            }
            Feature::Int64(values) => {
                let mut packed = Vec::new();
                values.iter().for_each(|v| put_varint(&mut packed, *v as u64));
                put_delimited(&mut list, 1, &packed);
                3
            }
        };

        let mut out = Vec::new();
        put_delimited(&mut out, field, &list);
        out
    }
}

fn decode_bytes_list(buf: &[u8]) -> Result<Vec<Vec<u8>>, RecordError> {
    let mut wire = Wire::new(buf);
    let mut values = Vec::new();
    while !wire.is_empty() {
        match wire.key()? {
            (1, LEN) => values.push(wire.delimited()?.to_vec()),
            (_, wire_type) => wire.skip(wire_type)?,
        }
    }
    Ok(values)
}

fn decode_float_list(buf: &[u8]) -> Result<Vec<f32>, RecordError> {
    let mut wire = Wire::new(buf);
    let mut values = Vec::new();
    while !wire.is_empty() {
        match wire.key()? {
            (1, LEN) => {
                let packed = wire.delimited()?;
                if packed.len() % 4 != 0 {
                    return Err(RecordError::Malformed("packed float list not a multiple of 4"));
                }
                values.extend(
                    packed
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
                );
            }
            (1, FIXED32) => {
                let c = wire.take(4)?;
                values.push(f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
            }
            (_, wire_type) => wire.skip(wire_type)?,
        }
    }
    Ok(values)
}

fn decode_int64_list(buf: &[u8]) -> Result<Vec<i64>, RecordError> {
    let mut wire = Wire::new(buf);
    let mut values = Vec::new();
    while !wire.is_empty() {
        match wire.key()? {
            (1, LEN) => {
                let mut packed = Wire::new(wire.delimited()?);
                while !packed.is_empty() {
                    values.push(packed.varint()? as i64);
                }
            }
            (1, VARINT) => values.push(wire.varint()? as i64),
            (_, wire_type) => wire.skip(wire_type)?,
        }
    }
    Ok(values)
}

fn decode_entry(buf: &[u8]) -> Result<(String, Feature), RecordError> {
    let mut wire = Wire::new(buf);
    let mut key = String::new();
    let mut value = Feature::Bytes(Vec::new());
    while !wire.is_empty() {
        match wire.key()? {
            (1, LEN) => {
                key = String::from_utf8(wire.delimited()?.to_vec())
                    .map_err(|_| RecordError::Malformed("feature name is not utf-8"))?
            }
            (2, LEN) => value = Feature::decode(wire.delimited()?)?,
            (_, wire_type) => wire.skip(wire_type)?,
        }
    }
    Ok((key, value))
}

impl Example {
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let mut example = Example::default();
        let mut wire = Wire::new(buf);

        while !wire.is_empty() {
            match wire.key()? {
                (1, LEN) => {
                    let mut features = Wire::new(wire.delimited()?);
                    while !features.is_empty() {
                        match features.key()? {
                            (1, LEN) => {
                                let (name, feature) = decode_entry(features.delimited()?)?;
                                example.features.insert(name, feature);
                            }
                            (_, wire_type) => features.skip(wire_type)?,
                        }
                    }
                }
                (_, wire_type) => wire.skip(wire_type)?,
            }
        }

        Ok(example)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut features = Vec::new();
        for (name, feature) in &self.features {
            let mut entry = Vec::new();
            put_delimited(&mut entry, 1, name.as_bytes());
            put_delimited(&mut entry, 2, &feature.encode());
            put_delimited(&mut features, 1, &entry);
        }

        let mut out = Vec::new();
        put_delimited(&mut out, 1, &features);
        out
    }

    pub fn insert(&mut self, name: impl Into<String>, feature: Feature) -> &mut Self {
        self.features.insert(name.into(), feature);
        self
    }

    fn get(&self, name: &str) -> Result<&Feature, RecordError> {
        self.features
            .get(name)
            .ok_or_else(|| RecordError::MissingFeature(name.to_string()))
    }

    pub fn int64(&self, name: &str) -> Result<&[i64], RecordError> {
        match self.get(name)? {
            Feature::Int64(values) => Ok(values),
            _ => Err(RecordError::WrongFeatureType(name.to_string())),
        }
    }

    /// First value of an int64 feature, as a size or index.
    pub fn scalar(&self, name: &str) -> Result<usize, RecordError> {
        self.int64(name)?
            .first()
            .and_then(|v| usize::try_from(*v).ok())
            .ok_or_else(|| RecordError::WrongFeatureType(name.to_string()))
    }

    pub fn bytes(&self, name: &str) -> Result<&[Vec<u8>], RecordError> {
        match self.get(name)? {
            Feature::Bytes(values) => Ok(values),
            _ => Err(RecordError::WrongFeatureType(name.to_string())),
        }
    }
}

/// A labelled image as stored by the preprocessing step: `height`,
/// `width`, `depth` and `label` int64 features plus the raw pixels in
/// `image_raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub height: usize,
    pub width: usize,
    pub depth: usize,
    pub label: usize,
    pub pixels: Vec<u8>,
}

impl ImageRecord {
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.depth)
    }

    pub fn from_example(example: &Example) -> Result<Self, RecordError> {
        let height = example.scalar("height")?;
        let width = example.scalar("width")?;
        let depth = example.scalar("depth")?;
        let label = example.scalar("label")?;
        let pixels = example
            .bytes("image_raw")?
            .first()
            .cloned()
            .ok_or_else(|| RecordError::WrongFeatureType("image_raw".to_string()))?;

        let expected = height
            .checked_mul(width)
            .and_then(|n| n.checked_mul(depth))
            .ok_or(RecordError::Malformed("image shape overflows"))?;
        if pixels.len() != expected {
            return Err(RecordError::ShapeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            height,
            width,
            depth,
            label,
            pixels,
        })
    }

    pub fn to_example(&self) -> Example {
        let mut example = Example::default();
        example
            .insert("height", Feature::Int64(vec![self.height as i64]))
            .insert("width", Feature::Int64(vec![self.width as i64]))
            .insert("depth", Feature::Int64(vec![self.depth as i64]))
            .insert("label", Feature::Int64(vec![self.label as i64]))
            .insert("image_raw", Feature::Bytes(vec![self.pixels.clone()]));
        example
    }
}
