//! Framed-block stream processor with an optional in-memory preload window.
//!
//! The processor parses the trace container and drives an
//! [`ApiCallConsumer`]. It can transparently switch between two source
//! modes: direct file read, or replay from a buffer of frames captured
//! up-front ([`PreloadStatus::Record`] / [`PreloadStatus::Replay`]). The
//! consumer never observes the difference — the decoded block sequence is
//! identical either way.

use std::cell::RefCell;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::annotation::AnnotationHandler;
use crate::env_config::{self, define_env_flag};
use crate::error::{ReplayError, ReplayResult};
use crate::format::{
    self, Annotation, ApiCallId, BlockHeader, BlockType, MetaDataId, StateMarkerType,
    API_CALL_ID_SIZE, BLOCK_HEADER_SIZE,
};
use crate::preload_buffer::PreloadBuffer;

define_env_flag!(enabled_when(block_trace_enabled, "DX12_REPLAY_TRACE_BLOCKS"));

/// Incremental preload reservations never request less than this unless the
/// allocator pushes back.
const PRELOAD_CHUNK_FLOOR: u64 = 1 << 20;

/// Receiver of decoded call blocks. The replay consumer implements this;
/// [`NullConsumer`] exists for parse-only passes (preload sizing, annotation
/// scans).
pub trait ApiCallConsumer {
    fn process_function_call(
        &mut self,
        header: &BlockHeader,
        call_id: ApiCallId,
        parameters: &[u8],
    ) -> ReplayResult<()>;

    fn process_method_call(
        &mut self,
        header: &BlockHeader,
        call_id: ApiCallId,
        parameters: &[u8],
    ) -> ReplayResult<()>;

    fn process_metadata(
        &mut self,
        _header: &BlockHeader,
        _meta_data_id: MetaDataId,
        _body: &[u8],
    ) -> ReplayResult<()> {
        Ok(())
    }

    fn process_state_marker(
        &mut self,
        _header: &BlockHeader,
        _marker: StateMarkerType,
        _body: &[u8],
    ) -> ReplayResult<()> {
        Ok(())
    }
}

/// Consumer that discards every call. Parses, but replays nothing.
pub struct NullConsumer;

impl ApiCallConsumer for NullConsumer {
    fn process_function_call(
        &mut self,
        _header: &BlockHeader,
        _call_id: ApiCallId,
        _parameters: &[u8],
    ) -> ReplayResult<()> {
        Ok(())
    }

    fn process_method_call(
        &mut self,
        _header: &BlockHeader,
        _call_id: ApiCallId,
        _parameters: &[u8],
    ) -> ReplayResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreloadStatus {
    /// Normal direct-from-file replay.
    Inactive,
    /// A preload window is being captured; blocks are buffered, not
    /// dispatched.
    Record,
    /// The preload buffer is being drained; blocks are dispatched.
    Replay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorError {
    ReadingBlockHeader,
    ReadingBlockData,
}

pub struct FileProcessor {
    file: BufReader<File>,
    file_path: PathBuf,
    status: PreloadStatus,
    preload_buffer: PreloadBuffer,
    /// Frames captured so far by the active preload pass.
    preload_frame_count: u64,
    annotation_handler: Option<Rc<RefCell<dyn AnnotationHandler>>>,
    bytes_read: u64,
    block_index: u64,
    current_frame_number: u64,
    error_state: Option<ProcessorError>,
}

impl FileProcessor {
    pub fn open(path: impl AsRef<Path>) -> ReplayResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            file: BufReader::new(file),
            file_path: path.to_path_buf(),
            status: PreloadStatus::Inactive,
            preload_buffer: PreloadBuffer::new(),
            preload_frame_count: 0,
            annotation_handler: None,
            bytes_read: 0,
            block_index: 0,
            current_frame_number: 1,
            error_state: None,
        })
    }

    /// Number of the frame currently being replayed. Starts at 1 and
    /// advances once per frame delimiter consumed in replay mode.
    pub fn current_frame_number(&self) -> u64 {
        self.current_frame_number
    }

    /// Bytes consumed so far, counted across both the file and the preload
    /// buffer.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn block_index(&self) -> u64 {
        self.block_index
    }

    pub fn preload_status(&self) -> PreloadStatus {
        self.status
    }

    pub fn error_state(&self) -> Option<ProcessorError> {
        self.error_state
    }

    pub fn set_annotation_handler(&mut self, handler: Rc<RefCell<dyn AnnotationHandler>>) {
        self.annotation_handler = Some(handler);
    }

    /// Executes the inner loop until one frame delimiter is consumed.
    /// Returns `Ok(false)` on clean end of stream before a delimiter.
    pub fn process_next_frame(&mut self, consumer: &mut dyn ApiCallConsumer) -> ReplayResult<bool> {
        self.process_blocks(consumer)
    }

    /// Captures the next `count` frames into the preload buffer, then
    /// switches to replaying them. A dry-run pass over the same file sizes
    /// the up-front reservation; each recorded frame tops the reservation up
    /// when remaining capacity runs low, halving the request on allocation
    /// failure down to one byte.
    pub fn preload_next_frames(&mut self, count: u64) -> ReplayResult<()> {
        let bytes_needed = self.required_byte_size_for_frames(count)?;
        self.preload_buffer.reserve(bytes_needed as usize);
        debug!(bytes = bytes_needed, frames = count, "preload reserved");

        self.status = PreloadStatus::Record;
        self.preload_frame_count = 0;
        let mut null = NullConsumer;
        for _ in 0..count {
            let mut chunk = self.next_buffer_chunk_size();
            if chunk > 0 {
                while chunk > 1 && !self.preload_buffer.reserve(chunk as usize) {
                    chunk /= 2;
                }
                debug!(bytes = chunk, "preload reserved additional");
            }
            if !self.process_next_frame(&mut null)? {
                break;
            }
            self.preload_frame_count += 1;
        }
        self.status = PreloadStatus::Replay;
        Ok(())
    }

    /// Advances an auxiliary parse-only processor over the same file for
    /// `count` frames past our position and reports the bytes they span.
    fn required_byte_size_for_frames(&self, count: u64) -> ReplayResult<u64> {
        let mut probe = FileProcessor::open(&self.file_path)?;
        let mut null = NullConsumer;
        while probe.current_frame_number() < self.current_frame_number + count {
            if !probe.process_next_frame(&mut null)? {
                break;
            }
            trace!(
                frame = probe.current_frame_number(),
                bytes = probe.bytes_read(),
                "preload sizing pass"
            );
        }
        Ok(probe.bytes_read().saturating_sub(self.bytes_read))
    }

    /// `max(floor, average frame size)` when remaining capacity would not
    /// hold an average frame, zero otherwise.
    fn next_buffer_chunk_size(&self) -> u64 {
        let floor = env_config::env_var_positive_u64("DX12_REPLAY_PRELOAD_CHUNK_BYTES")
            .unwrap_or(PRELOAD_CHUNK_FLOOR);
        let frames_processed =
            (self.current_frame_number - 1 + self.preload_frame_count).max(1);
        let average_frame_size = (self.bytes_read / frames_processed).max(floor);
        let capacity_left = (self.preload_buffer.capacity() - self.preload_buffer.size()) as u64;
        if capacity_left < average_frame_size {
            average_frame_size
        } else {
            0
        }
    }

    fn process_blocks(&mut self, consumer: &mut dyn ApiCallConsumer) -> ReplayResult<bool> {
        loop {
            let Some(header) = self.read_block_header()? else {
                return Ok(false);
            };
            if block_trace_enabled() {
                trace!(
                    block_index = self.block_index,
                    block_type = header.block_type,
                    size = header.size,
                    "decoded block header"
                );
            }
            let payload_size = usize::try_from(header.size).map_err(|_| {
                ReplayError::InvalidTrace(format!(
                    "block payload size {} exceeds addressable memory",
                    header.size
                ))
            })?;

            match header.kind() {
                BlockType::FunctionCall | BlockType::MethodCall => {
                    if payload_size < API_CALL_ID_SIZE {
                        self.error_state = Some(ProcessorError::ReadingBlockData);
                        return Err(ReplayError::InvalidTrace(
                            "call block smaller than its call id".to_string(),
                        ));
                    }
                    let mut id_bytes = [0u8; API_CALL_ID_SIZE];
                    self.read_exact(&mut id_bytes, "call id")?;
                    let call_id = ApiCallId(u32::from_le_bytes(id_bytes));
                    let is_delimiter = format::is_frame_delimiter(call_id);
                    let parameters_size = payload_size - API_CALL_ID_SIZE;

                    if self.status == PreloadStatus::Record {
                        self.preload_buffer.reserve(BLOCK_HEADER_SIZE + payload_size);
                        self.preload_buffer.append_header(&header);
                        self.preload_buffer.append(&id_bytes);
                        let parameters =
                            self.read_payload(parameters_size, "call block parameters")?;
                        self.preload_buffer.append(&parameters);
                        if is_delimiter {
                            break;
                        }
                    } else {
                        let parameters =
                            self.read_payload(parameters_size, "call block parameters")?;
                        if header.kind() == BlockType::FunctionCall {
                            consumer.process_function_call(&header, call_id, &parameters)?;
                        } else {
                            consumer.process_method_call(&header, call_id, &parameters)?;
                        }
                        if is_delimiter {
                            // Make sure to increment the frame number on the
                            // way out.
                            self.current_frame_number += 1;
                            self.block_index += 1;
                            break;
                        }
                    }
                }
                BlockType::MetaData => {
                    if self.status == PreloadStatus::Record {
                        self.capture_block(&header, payload_size)?;
                    } else {
                        if payload_size < 4 {
                            self.error_state = Some(ProcessorError::ReadingBlockData);
                            return Err(ReplayError::InvalidTrace(
                                "meta-data block smaller than its id".to_string(),
                            ));
                        }
                        let mut id_bytes = [0u8; 4];
                        self.read_exact(&mut id_bytes, "meta-data id")?;
                        let body = self.read_payload(payload_size - 4, "meta-data block body")?;
                        let meta_data_id = MetaDataId(u32::from_le_bytes(id_bytes));
                        consumer.process_metadata(&header, meta_data_id, &body)?;
                    }
                }
                BlockType::StateMarker => {
                    if self.status == PreloadStatus::Record {
                        self.capture_block(&header, payload_size)?;
                    } else {
                        if payload_size < 4 {
                            self.error_state = Some(ProcessorError::ReadingBlockData);
                            return Err(ReplayError::InvalidTrace(
                                "state marker block smaller than its marker type".to_string(),
                            ));
                        }
                        let mut marker_bytes = [0u8; 4];
                        self.read_exact(&mut marker_bytes, "state marker type")?;
                        let body = self.read_payload(payload_size - 4, "state marker body")?;
                        let marker = StateMarkerType::from_raw(u32::from_le_bytes(marker_bytes));
                        consumer.process_state_marker(&header, marker, &body)?;
                    }
                }
                BlockType::Annotation => match self.annotation_handler.clone() {
                    Some(handler) => {
                        if self.status == PreloadStatus::Record {
                            self.capture_block(&header, payload_size)?;
                        } else {
                            let payload = self.read_payload(payload_size, "annotation block")?;
                            let annotation = Annotation::parse(&payload)?;
                            handler.borrow_mut().process_annotation(
                                self.block_index,
                                annotation.annotation_type,
                                &annotation.label,
                                &annotation.data,
                            );
                        }
                    }
                    None => {
                        // No handler registered: the annotation can be
                        // skipped outright.
                        self.skip_bytes(payload_size, "annotation block")?;
                    }
                },
                BlockType::Unknown(raw) => {
                    warn!(block_type = raw, "skipping unrecognized file block");
                    self.skip_bytes(payload_size, "unrecognized block")?;
                }
            }

            if self.status != PreloadStatus::Record {
                self.block_index += 1;
            }
        }
        Ok(true)
    }

    /// Buffers one complete non-call block (header plus payload) during a
    /// preload recording pass.
    fn capture_block(&mut self, header: &BlockHeader, payload_size: usize) -> ReplayResult<()> {
        self.preload_buffer.reserve(BLOCK_HEADER_SIZE + payload_size);
        self.preload_buffer.append_header(header);
        let payload = self.read_payload(payload_size, "preloaded block payload")?;
        self.preload_buffer.append(&payload);
        Ok(())
    }

    /// Reads from the active source: the preload buffer while draining a
    /// replay window, the file otherwise. When the buffer is exhausted
    /// mid-session the processor transitions silently back to direct-file
    /// reads.
    fn read_source(&mut self, destination: &mut [u8]) -> std::io::Result<usize> {
        let mut total = 0;
        if self.status == PreloadStatus::Replay {
            total = self.preload_buffer.read(destination);
            if self.preload_buffer.replay_finished() {
                self.status = PreloadStatus::Inactive;
            }
            if total == destination.len() {
                self.bytes_read += total as u64;
                return Ok(total);
            }
        }
        while total < destination.len() {
            let count = self.file.read(&mut destination[total..])?;
            if count == 0 {
                break;
            }
            total += count;
        }
        self.bytes_read += total as u64;
        Ok(total)
    }

    fn read_block_header(&mut self) -> ReplayResult<Option<BlockHeader>> {
        let mut bytes = [0u8; BLOCK_HEADER_SIZE];
        let count = match self.read_source(&mut bytes) {
            Ok(count) => count,
            Err(error) => {
                self.error_state = Some(ProcessorError::ReadingBlockHeader);
                return Err(error.into());
            }
        };
        if count == 0 {
            // Clean end of stream.
            return Ok(None);
        }
        if count < BLOCK_HEADER_SIZE {
            self.error_state = Some(ProcessorError::ReadingBlockHeader);
            return Err(ReplayError::InvalidTrace(format!(
                "truncated block header: read {count} of {BLOCK_HEADER_SIZE} bytes"
            )));
        }
        Ok(Some(BlockHeader::parse(&bytes)))
    }

    fn read_exact(&mut self, destination: &mut [u8], what: &str) -> ReplayResult<()> {
        let wanted = destination.len();
        let count = match self.read_source(destination) {
            Ok(count) => count,
            Err(error) => {
                self.error_state = Some(ProcessorError::ReadingBlockData);
                return Err(error.into());
            }
        };
        if count < wanted {
            self.error_state = Some(ProcessorError::ReadingBlockData);
            return Err(ReplayError::InvalidTrace(format!(
                "failed to read {what}: read {count} of {wanted} bytes"
            )));
        }
        Ok(())
    }

    fn read_payload(&mut self, size: usize, what: &str) -> ReplayResult<Vec<u8>> {
        let mut payload = vec![0u8; size];
        self.read_exact(&mut payload, what)?;
        Ok(payload)
    }

    fn skip_bytes(&mut self, mut size: usize, what: &str) -> ReplayResult<()> {
        let mut scratch = [0u8; 4096];
        while size > 0 {
            let chunk = size.min(scratch.len());
            self.read_exact(&mut scratch[..chunk], what)?;
            size -= chunk;
        }
        Ok(())
    }
}
