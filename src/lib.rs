//! Deterministic replay of captured Direct3D 12 / DXGI call streams.
//!
//! A trace file is a framed container of heterogeneous blocks recorded at
//! every API boundary crossing of a target application. This crate parses
//! that container ([`FileProcessor`]), translates capture-time identifiers
//! (object handles, descriptor handles, GPU virtual addresses, mapped-memory
//! ids) into their replay-time equivalents, and re-executes the workload
//! against an injected [`Driver`] ([`ReplayConsumer`]). A small annotation
//! pipeline reads and rewrites labelled side-channel records such as the
//! saved replay-option string.

use std::path::Path;

pub mod address_map;
pub mod annotation;
pub mod consumer;
pub mod driver;
pub(crate) mod env_config;
pub mod error;
pub mod file_processor;
pub mod format;
pub mod object_info;
pub mod options;
pub mod platform;
pub mod preload_buffer;
pub mod transformer;
pub mod window;

pub use annotation::{get_trace_replay_options, AnnotationHandler, ReplayOptionsHandler};
pub use consumer::ReplayConsumer;
pub use driver::{Driver, DriverObject, DriverObjectRef, HResult};
pub use error::{ReplayError, ReplayErrorClass, ReplayResult};
pub use file_processor::{
    ApiCallConsumer, FileProcessor, NullConsumer, PreloadStatus, ProcessorError,
};
pub use options::ReplayOptions;
pub use preload_buffer::PreloadBuffer;
pub use transformer::{transform_file, AnnotationEditor, ReplayOptionsEditor};
pub use window::{Window, WindowFactory, WindowHandleKind, WindowId};

/// Replays a trace end-to-end with the given collaborators, honoring the
/// replay options saved in the trace. Returns the number of frames replayed.
pub fn replay_file(
    path: impl AsRef<Path>,
    driver: Box<dyn Driver>,
    window_factory: Box<dyn WindowFactory>,
) -> ReplayResult<u64> {
    let path = path.as_ref();
    let args = get_trace_replay_options(path)?;
    let options = ReplayOptions::parse(&args)?;

    let mut processor = FileProcessor::open(path)?;
    let mut consumer = ReplayConsumer::new(driver, window_factory);
    if options.preload_frames > 0 {
        processor.preload_next_frames(options.preload_frames)?;
    }

    let mut frames = 0;
    while processor.process_next_frame(&mut consumer)? {
        frames += 1;
    }
    Ok(frames)
}
