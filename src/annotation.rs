//! Read side of the annotation pipeline.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::error::ReplayResult;
use crate::file_processor::{FileProcessor, NullConsumer};
use crate::format::{AnnotationType, ANNOTATION_LABEL_REPLAY_OPTIONS};

/// Receiver of labelled side-channel records embedded in the stream.
pub trait AnnotationHandler {
    fn process_annotation(
        &mut self,
        block_index: u64,
        annotation_type: AnnotationType,
        label: &str,
        data: &str,
    );
}

/// Retains the data of the `"replay-options"` annotation verbatim. The last
/// occurrence in the stream wins.
#[derive(Default)]
pub struct ReplayOptionsHandler {
    replay_options: String,
}

impl ReplayOptionsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replay_options(&self) -> &str {
        &self.replay_options
    }

    /// The saved option string split into whitespace-separated arguments.
    pub fn to_args(&self) -> Vec<String> {
        self.replay_options
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

impl AnnotationHandler for ReplayOptionsHandler {
    fn process_annotation(
        &mut self,
        _block_index: u64,
        _annotation_type: AnnotationType,
        label: &str,
        data: &str,
    ) {
        if label == ANNOTATION_LABEL_REPLAY_OPTIONS {
            self.replay_options = data.to_string();
        }
    }
}

/// Scans a trace file and returns the replay arguments saved in its
/// `"replay-options"` annotation, empty when none is present.
pub fn get_trace_replay_options(path: impl AsRef<Path>) -> ReplayResult<Vec<String>> {
    let mut processor = FileProcessor::open(path)?;
    let handler = Rc::new(RefCell::new(ReplayOptionsHandler::new()));
    processor.set_annotation_handler(handler.clone());

    let mut null = NullConsumer;
    while processor.process_next_frame(&mut null)? {}

    let args = handler.borrow().to_args();
    Ok(args)
}
