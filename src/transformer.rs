//! Write side of the annotation pipeline: file-to-file transformers.
//!
//! The transform loop copies a trace byte-for-byte and hands every
//! uncompressed annotation block to an [`AnnotationEdit`] strategy, which
//! decides whether the block is kept, rewritten, or dropped, and which gets
//! a chance to emit annotations before and after the copy.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{ReplayError, ReplayResult};
use crate::format::{
    self, Annotation, AnnotationType, BlockHeader, BlockType, ANNOTATION_LABEL_REPLAY_OPTIONS,
    BLOCK_HEADER_SIZE,
};

pub enum AnnotationAction {
    /// Copy the block through unchanged.
    Keep,
    /// Re-emit the block with this data, keeping its label and type.
    Replace(String),
    /// Suppress the block.
    Drop,
}

/// Editing strategy driven by [`transform_file`].
pub trait AnnotationEdit {
    /// Called once before any input block is copied.
    fn begin(&mut self, _output: &mut dyn Write) -> ReplayResult<()> {
        Ok(())
    }

    fn edit(
        &mut self,
        annotation_type: AnnotationType,
        label: &str,
        data: &str,
    ) -> AnnotationAction;

    /// Called once after the whole input has been copied.
    fn finish(&mut self, _output: &mut dyn Write) -> ReplayResult<()> {
        Ok(())
    }
}

/// Replaces or deletes annotations by label and appends any set-but-
/// unencountered annotations at the end of the output.
#[derive(Default)]
pub struct AnnotationEditor {
    pending: BTreeMap<String, (AnnotationType, String)>,
}

impl AnnotationEditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `label` to carry `data`. Empty data deletes the annotation
    /// instead.
    pub fn set_annotation(
        &mut self,
        label: impl Into<String>,
        annotation_type: AnnotationType,
        data: impl Into<String>,
    ) {
        self.pending
            .insert(label.into(), (annotation_type, data.into()));
    }
}

impl AnnotationEdit for AnnotationEditor {
    fn edit(
        &mut self,
        _annotation_type: AnnotationType,
        label: &str,
        _data: &str,
    ) -> AnnotationAction {
        match self.pending.remove(label) {
            Some((_, new_data)) if new_data.is_empty() => AnnotationAction::Drop,
            Some((_, new_data)) => AnnotationAction::Replace(new_data),
            None => AnnotationAction::Keep,
        }
    }

    fn finish(&mut self, output: &mut dyn Write) -> ReplayResult<()> {
        for (label, (annotation_type, data)) in std::mem::take(&mut self.pending) {
            format::write_annotation_block(output, annotation_type, &label, &data)?;
        }
        Ok(())
    }
}

/// Rewrites the saved replay-option string: writes the new annotation first,
/// then copies the remainder of the file while suppressing any pre-existing
/// `"replay-options"` annotation.
#[derive(Default)]
pub struct ReplayOptionsEditor {
    replay_options: String,
}

impl ReplayOptionsEditor {
    pub fn new(replay_options: impl Into<String>) -> Self {
        Self {
            replay_options: replay_options.into(),
        }
    }
}

impl AnnotationEdit for ReplayOptionsEditor {
    fn begin(&mut self, output: &mut dyn Write) -> ReplayResult<()> {
        if !self.replay_options.is_empty() {
            format::write_annotation_block(
                output,
                AnnotationType::Text,
                ANNOTATION_LABEL_REPLAY_OPTIONS,
                &self.replay_options,
            )?;
        }
        Ok(())
    }

    fn edit(
        &mut self,
        _annotation_type: AnnotationType,
        label: &str,
        _data: &str,
    ) -> AnnotationAction {
        if label == ANNOTATION_LABEL_REPLAY_OPTIONS {
            AnnotationAction::Drop
        } else {
            AnnotationAction::Keep
        }
    }
}

/// Streams `input` to `output`, applying `edit` to every annotation block.
/// Everything else is copied byte-identically, compressed payloads included.
pub fn transform_file(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    edit: &mut dyn AnnotationEdit,
) -> ReplayResult<()> {
    let mut reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);

    edit.begin(&mut writer)?;

    loop {
        let mut header_bytes = [0u8; BLOCK_HEADER_SIZE];
        let count = read_up_to(&mut reader, &mut header_bytes)?;
        if count == 0 {
            break;
        }
        if count < BLOCK_HEADER_SIZE {
            return Err(ReplayError::InvalidTrace(format!(
                "truncated block header: read {count} of {BLOCK_HEADER_SIZE} bytes"
            )));
        }
        let header = BlockHeader::parse(&header_bytes);
        let payload_size = usize::try_from(header.size).map_err(|_| {
            ReplayError::InvalidTrace(format!(
                "block payload size {} exceeds addressable memory",
                header.size
            ))
        })?;
        let mut payload = vec![0u8; payload_size];
        let count = read_up_to(&mut reader, &mut payload)?;
        if count < payload_size {
            return Err(ReplayError::InvalidTrace(format!(
                "truncated block payload: read {count} of {payload_size} bytes"
            )));
        }

        if header.kind() == BlockType::Annotation && !header.is_compressed() {
            let annotation = Annotation::parse(&payload)?;
            match edit.edit(
                annotation.annotation_type,
                &annotation.label,
                &annotation.data,
            ) {
                AnnotationAction::Keep => {
                    writer.write_all(&header_bytes)?;
                    writer.write_all(&payload)?;
                }
                AnnotationAction::Replace(data) => {
                    format::write_annotation_block(
                        &mut writer,
                        annotation.annotation_type,
                        &annotation.label,
                        &data,
                    )?;
                }
                AnnotationAction::Drop => {}
            }
        } else {
            writer.write_all(&header_bytes)?;
            writer.write_all(&payload)?;
        }
    }

    edit.finish(&mut writer)?;
    writer.flush()?;
    Ok(())
}

fn read_up_to(reader: &mut impl Read, destination: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < destination.len() {
        let count = reader.read(&mut destination[total..])?;
        if count == 0 {
            break;
        }
        total += count;
    }
    Ok(total)
}
