use crate::error::ReplayResult;

/// Stable identifier of a replay-created window, derived from its native
/// handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

impl WindowId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowHandleKind {
    Win32Hwnd,
}

/// An OS window hosting a replayed swapchain.
pub trait Window {
    fn id(&self) -> WindowId;

    /// Native handle of the requested kind, or `None` when the window cannot
    /// provide one.
    fn native_handle(&self, kind: WindowHandleKind) -> Option<isize>;
}

/// Capability that creates and destroys the windows backing swapchains.
/// Injected into the replay consumer at construction.
pub trait WindowFactory {
    fn create(&mut self, x: i32, y: i32, width: u32, height: u32)
        -> ReplayResult<Box<dyn Window>>;

    fn destroy(&mut self, window: Box<dyn Window>);
}
