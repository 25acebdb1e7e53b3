//! [`WindowFactory`] implementation over plain Win32 windows.

use anyhow::Context;
use tracing::debug;
use windows::core::PCWSTR;
use windows::Win32::Foundation::HWND;
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, RegisterClassW, WNDCLASSW,
    WS_OVERLAPPEDWINDOW, WS_VISIBLE,
};

use crate::error::{ReplayError, ReplayResult};
use crate::window::{Window, WindowFactory, WindowHandleKind, WindowId};

struct Win32Window {
    hwnd_raw: isize,
}

impl Window for Win32Window {
    fn id(&self) -> WindowId {
        WindowId::from_raw(self.hwnd_raw as usize as u64)
    }

    fn native_handle(&self, kind: WindowHandleKind) -> Option<isize> {
        match kind {
            WindowHandleKind::Win32Hwnd => Some(self.hwnd_raw),
        }
    }
}

pub(crate) struct Win32WindowFactory {
    /// Wide window-class name; the factory owns the backing storage so the
    /// pointer registered with the class stays valid.
    class_name: Vec<u16>,
}

impl Win32WindowFactory {
    pub(crate) fn new() -> ReplayResult<Self> {
        let class_name: Vec<u16> = "dx12_replay_window\0".encode_utf16().collect();
        let hinstance = unsafe { GetModuleHandleW(None) }
            .context("GetModuleHandleW failed")
            .map_err(ReplayError::Platform)?;

        let class = WNDCLASSW {
            lpfnWndProc: Some(DefWindowProcW),
            hInstance: hinstance.into(),
            lpszClassName: PCWSTR(class_name.as_ptr()),
            ..Default::default()
        };
        // Zero means registration failed, usually because a previous factory
        // already registered the class in this process. Either way the class
        // is usable afterwards.
        if unsafe { RegisterClassW(&class) } == 0 {
            debug!("window class was already registered");
        }

        Ok(Self { class_name })
    }
}

impl WindowFactory for Win32WindowFactory {
    fn create(
        &mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> ReplayResult<Box<dyn Window>> {
        let hinstance = unsafe { GetModuleHandleW(None) }
            .context("GetModuleHandleW failed")
            .map_err(ReplayError::Platform)?;
        let title: Vec<u16> = "dx12-replay\0".encode_utf16().collect();

        let hwnd = unsafe {
            CreateWindowExW(
                Default::default(),
                PCWSTR(self.class_name.as_ptr()),
                PCWSTR(title.as_ptr()),
                WS_OVERLAPPEDWINDOW | WS_VISIBLE,
                x,
                y,
                width as i32,
                height as i32,
                None,
                None,
                hinstance,
                None,
            )
        }
        .map_err(|error| ReplayError::WindowCreation(format!("CreateWindowExW failed: {error}")))?;

        Ok(Box::new(Win32Window {
            hwnd_raw: hwnd.0 as isize,
        }))
    }

    fn destroy(&mut self, window: Box<dyn Window>) {
        let Some(raw) = window.native_handle(WindowHandleKind::Win32Hwnd) else {
            return;
        };
        let hwnd = HWND(raw as _);
        if let Err(error) = unsafe { DestroyWindow(hwnd) } {
            debug!(%error, "DestroyWindow failed");
        }
    }
}
