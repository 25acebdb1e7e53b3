use std::fmt;

#[derive(Debug)]
pub enum ReplayError {
    /// The trace stream is structurally corrupt: a block header or block
    /// payload could not be read in full before end of file, or a parameter
    /// stream did not decode.
    InvalidTrace(String),

    /// A call referenced a capture-time object id that was never produced by
    /// a creation override. Indicates upstream decoder corruption.
    UnknownObject(u64),

    /// An object was found but does not carry the extra-info variant its call
    /// requires (e.g. a descriptor heap created on a device with no recorded
    /// increment tables).
    MissingObjectInfo(u64),

    /// The window factory could not produce a window backing a swapchain.
    WindowCreation(String),

    /// No driver or window factory implementation is available on this
    /// platform.
    BackendUnavailable(String),

    InvalidOptions(String),

    Io(std::io::Error),

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayErrorClass {
    InvalidInput,
    Unsupported,
    Fatal,
}

impl ReplayError {
    pub fn class(&self) -> ReplayErrorClass {
        match self {
            Self::InvalidOptions(_) => ReplayErrorClass::InvalidInput,
            Self::BackendUnavailable(_) => ReplayErrorClass::Unsupported,
            Self::InvalidTrace(_)
            | Self::UnknownObject(_)
            | Self::MissingObjectInfo(_)
            | Self::WindowCreation(_)
            | Self::Io(_)
            | Self::Platform(_) => ReplayErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ReplayErrorClass::Fatal
    }
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTrace(message) => write!(f, "corrupt trace stream: {message}"),
            Self::UnknownObject(id) => {
                write!(f, "call references unknown capture-time object id {id}")
            }
            Self::MissingObjectInfo(id) => write!(
                f,
                "object {id} does not have the associated info structure its call requires"
            ),
            Self::WindowCreation(message) => write!(
                f,
                "failed to create a window, replay cannot continue: {message}"
            ),
            Self::BackendUnavailable(message) => {
                write!(f, "no available replay backend: {message}")
            }
            Self::InvalidOptions(message) => write!(f, "invalid replay options: {message}"),
            Self::Io(inner) => write!(f, "trace file i/o failed: {inner}"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(inner) => Some(inner),
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ReplayError {
    fn from(inner: std::io::Error) -> Self {
        Self::Io(inner)
    }
}

pub type ReplayResult<T> = Result<T, ReplayError>;
