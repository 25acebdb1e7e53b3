//! Wire format of the trace container.
//!
//! A trace is a stream of framed blocks. Each block is a 12-byte header
//! (`u32` raw type, `u64` payload size) followed by `size` payload bytes.
//! The top bit of the raw type is a compression flag; masking it yields the
//! canonical block kind. Function- and method-call payloads begin with a
//! 32-bit API call identifier; method-call parameter streams additionally
//! begin with the `u64` capture id of the receiver object.
//!
//! All integers are little-endian.

use std::io::Write;

use crate::error::{ReplayError, ReplayResult};

pub const BLOCK_HEADER_SIZE: usize = 12;

/// Top bit of the raw block type; set when the payload is compressed.
pub const COMPRESSED_BLOCK_BIT: u32 = 0x8000_0000;

pub const API_CALL_ID_SIZE: usize = 4;

/// Label of the annotation that stores the saved replay-option string.
pub const ANNOTATION_LABEL_REPLAY_OPTIONS: &str = "replay-options";

/// Fixed-size prefix of an annotation payload: annotation type plus the two
/// string lengths.
pub const ANNOTATION_BASE_SIZE: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Raw on-disk type field, compression bit included.
    pub block_type: u32,
    /// Payload size in bytes, excluding this header.
    pub size: u64,
}

impl BlockHeader {
    pub fn new(kind: BlockType, size: u64) -> Self {
        Self {
            block_type: kind.as_raw(),
            size,
        }
    }

    pub fn parse(bytes: &[u8; BLOCK_HEADER_SIZE]) -> Self {
        let block_type = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let size = u64::from_le_bytes([
            bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11],
        ]);
        Self { block_type, size }
    }

    pub fn to_bytes(self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE];
        bytes[..4].copy_from_slice(&self.block_type.to_le_bytes());
        bytes[4..].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    /// Canonical block kind with the compression bit masked off.
    pub fn kind(self) -> BlockType {
        BlockType::from_raw(self.block_type & !COMPRESSED_BLOCK_BIT)
    }

    pub fn is_compressed(self) -> bool {
        self.block_type & COMPRESSED_BLOCK_BIT != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockType {
    FunctionCall,
    MethodCall,
    MetaData,
    StateMarker,
    Annotation,
    Unknown(u32),
}

impl BlockType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::FunctionCall,
            2 => Self::MethodCall,
            3 => Self::MetaData,
            4 => Self::StateMarker,
            5 => Self::Annotation,
            other => Self::Unknown(other),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::FunctionCall => 1,
            Self::MethodCall => 2,
            Self::MetaData => 3,
            Self::StateMarker => 4,
            Self::Annotation => 5,
            Self::Unknown(other) => other,
        }
    }
}

/// Identifier of one recorded API entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ApiCallId(pub u32);

impl ApiCallId {
    pub const UNKNOWN: ApiCallId = ApiCallId(0);

    pub const D3D12_CREATE_DEVICE: ApiCallId = ApiCallId(0x1001);
    pub const CREATE_DXGI_FACTORY: ApiCallId = ApiCallId(0x1002);

    pub const IUNKNOWN_ADD_REF: ApiCallId = ApiCallId(0x1101);
    pub const IUNKNOWN_RELEASE: ApiCallId = ApiCallId(0x1102);

    pub const ID3D12DEVICE_CREATE_DESCRIPTOR_HEAP: ApiCallId = ApiCallId(0x1201);
    pub const ID3D12DEVICE_GET_DESCRIPTOR_HANDLE_INCREMENT_SIZE: ApiCallId = ApiCallId(0x1202);
    pub const ID3D12DEVICE_CREATE_COMMITTED_RESOURCE: ApiCallId = ApiCallId(0x1203);
    pub const ID3D12DEVICE_CREATE_CONSTANT_BUFFER_VIEW: ApiCallId = ApiCallId(0x1204);

    pub const ID3D12DESCRIPTOR_HEAP_GET_CPU_HANDLE_FOR_HEAP_START: ApiCallId = ApiCallId(0x1301);
    pub const ID3D12DESCRIPTOR_HEAP_GET_GPU_HANDLE_FOR_HEAP_START: ApiCallId = ApiCallId(0x1302);

    pub const ID3D12RESOURCE_GET_GPU_VIRTUAL_ADDRESS: ApiCallId = ApiCallId(0x1401);
    pub const ID3D12RESOURCE_MAP: ApiCallId = ApiCallId(0x1402);
    pub const ID3D12RESOURCE_UNMAP: ApiCallId = ApiCallId(0x1403);
    pub const ID3D12RESOURCE_WRITE_TO_SUBRESOURCE: ApiCallId = ApiCallId(0x1404);
    pub const ID3D12RESOURCE_READ_FROM_SUBRESOURCE: ApiCallId = ApiCallId(0x1405);

    pub const IDXGI_FACTORY_CREATE_SWAP_CHAIN: ApiCallId = ApiCallId(0x1501);
    pub const IDXGI_FACTORY2_CREATE_SWAP_CHAIN_FOR_HWND: ApiCallId = ApiCallId(0x1502);

    pub const IDXGI_SWAP_CHAIN_PRESENT: ApiCallId = ApiCallId(0x1601);
    pub const IDXGI_SWAP_CHAIN1_PRESENT1: ApiCallId = ApiCallId(0x1602);

    /// Pseudo-call: writes a region of a mapped memory range.
    pub const FILL_MEMORY: ApiCallId = ApiCallId(0x1f01);
}

/// Calls whose completion marks end-of-frame.
pub const FRAME_DELIMITERS: [ApiCallId; 2] = [
    ApiCallId::IDXGI_SWAP_CHAIN_PRESENT,
    ApiCallId::IDXGI_SWAP_CHAIN1_PRESENT1,
];

pub fn is_frame_delimiter(call_id: ApiCallId) -> bool {
    FRAME_DELIMITERS.contains(&call_id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MetaDataId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateMarkerType {
    FrameBegin,
    FrameEnd,
    Unknown(u32),
}

impl StateMarkerType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::FrameBegin,
            2 => Self::FrameEnd,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationType {
    Unknown,
    Text,
    Json,
    Xml,
}

impl AnnotationType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Text,
            2 => Self::Json,
            3 => Self::Xml,
            _ => Self::Unknown,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Text => 1,
            Self::Json => 2,
            Self::Xml => 3,
        }
    }
}

/// A decoded annotation block payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub annotation_type: AnnotationType,
    pub label: String,
    pub data: String,
}

impl Annotation {
    /// Decodes `{u32 type, u32 label_len, u32 data_len, label, data}`.
    pub fn parse(payload: &[u8]) -> ReplayResult<Self> {
        let mut reader = ByteReader::new(payload);
        let annotation_type = AnnotationType::from_raw(reader.read_u32()?);
        let label_len = reader.read_u32()? as usize;
        let data_len = reader.read_u32()? as usize;
        let label = reader.read_bytes(label_len)?;
        let data = reader.read_bytes(data_len)?;
        let label = std::str::from_utf8(label)
            .map_err(|_| ReplayError::InvalidTrace("annotation label is not UTF-8".to_string()))?;
        let data = std::str::from_utf8(data)
            .map_err(|_| ReplayError::InvalidTrace("annotation data is not UTF-8".to_string()))?;
        Ok(Self {
            annotation_type,
            label: label.to_string(),
            data: data.to_string(),
        })
    }

    pub fn payload_size(label: &str, data: &str) -> u64 {
        (ANNOTATION_BASE_SIZE + label.len() + data.len()) as u64
    }
}

/// Writes a complete, uncompressed annotation block (header plus payload).
pub fn write_annotation_block(
    writer: &mut dyn Write,
    annotation_type: AnnotationType,
    label: &str,
    data: &str,
) -> std::io::Result<()> {
    let header = BlockHeader::new(BlockType::Annotation, Annotation::payload_size(label, data));
    writer.write_all(&header.to_bytes())?;
    writer.write_all(&annotation_type.as_raw().to_le_bytes())?;
    writer.write_all(&(label.len() as u32).to_le_bytes())?;
    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    writer.write_all(label.as_bytes())?;
    writer.write_all(data.as_bytes())?;
    Ok(())
}

/// Little-endian cursor over a block's parameter stream.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn read_bytes(&mut self, count: usize) -> ReplayResult<&'a [u8]> {
        if self.remaining() < count {
            return Err(ReplayError::InvalidTrace(format!(
                "parameter stream underrun: wanted {count} bytes, {} remain",
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> ReplayResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> ReplayResult<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> ReplayResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i32(&mut self) -> ReplayResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> ReplayResult<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }
}

/// Little-endian builder for parameter streams and block payloads.
#[derive(Default)]
pub struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.write_u32(value as u32)
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_and_masks_compression_bit() {
        let header = BlockHeader {
            block_type: BlockType::MethodCall.as_raw() | COMPRESSED_BLOCK_BIT,
            size: 48,
        };
        let parsed = BlockHeader::parse(&header.to_bytes());
        assert_eq!(parsed, header);
        assert_eq!(parsed.kind(), BlockType::MethodCall);
        assert!(parsed.is_compressed());

        let plain = BlockHeader::new(BlockType::Annotation, 7);
        assert!(!plain.is_compressed());
        assert_eq!(plain.kind(), BlockType::Annotation);
    }

    #[test]
    fn unknown_block_types_are_preserved() {
        assert_eq!(BlockType::from_raw(9), BlockType::Unknown(9));
        assert_eq!(BlockType::Unknown(9).as_raw(), 9);
    }

    #[test]
    fn frame_delimiters_are_the_present_family() {
        assert!(is_frame_delimiter(ApiCallId::IDXGI_SWAP_CHAIN_PRESENT));
        assert!(is_frame_delimiter(ApiCallId::IDXGI_SWAP_CHAIN1_PRESENT1));
        assert!(!is_frame_delimiter(ApiCallId::ID3D12RESOURCE_MAP));
        assert!(!is_frame_delimiter(ApiCallId::UNKNOWN));
    }

    #[test]
    fn annotation_round_trips_through_block_writer() {
        let mut encoded = Vec::new();
        write_annotation_block(&mut encoded, AnnotationType::Text, "replay-options", "--foo")
            .unwrap();

        let mut header_bytes = [0u8; BLOCK_HEADER_SIZE];
        header_bytes.copy_from_slice(&encoded[..BLOCK_HEADER_SIZE]);
        let header = BlockHeader::parse(&header_bytes);
        assert_eq!(header.kind(), BlockType::Annotation);
        assert_eq!(header.size, Annotation::payload_size("replay-options", "--foo"));

        let annotation = Annotation::parse(&encoded[BLOCK_HEADER_SIZE..]).unwrap();
        assert_eq!(annotation.annotation_type, AnnotationType::Text);
        assert_eq!(annotation.label, "replay-options");
        assert_eq!(annotation.data, "--foo");
    }

    #[test]
    fn annotation_parse_rejects_truncated_payload() {
        let mut writer = ByteWriter::new();
        writer.write_u32(1).write_u32(10).write_u32(0).write_bytes(b"abc");
        assert!(Annotation::parse(&writer.into_vec()).is_err());
    }

    #[test]
    fn byte_reader_reports_underrun() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u16().unwrap(), 0x0201);
        assert!(reader.read_u32().is_err());
    }
}
