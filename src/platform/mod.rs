use crate::driver::Driver;
use crate::error::ReplayResult;
use crate::window::WindowFactory;
#[cfg(not(target_os = "windows"))]
use crate::error::ReplayError;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(target_os = "windows")]
pub fn build_driver() -> ReplayResult<Box<dyn Driver>> {
    Ok(Box::new(windows::driver::D3d12Driver::new()))
}

#[cfg(target_os = "windows")]
pub fn build_window_factory() -> ReplayResult<Box<dyn WindowFactory>> {
    Ok(Box::new(windows::window::Win32WindowFactory::new()?))
}

#[cfg(not(target_os = "windows"))]
pub fn build_driver() -> ReplayResult<Box<dyn Driver>> {
    Err(ReplayError::BackendUnavailable(
        "Direct3D 12 replay is only supported on Windows".to_string(),
    ))
}

#[cfg(not(target_os = "windows"))]
pub fn build_window_factory() -> ReplayResult<Box<dyn WindowFactory>> {
    Err(ReplayError::BackendUnavailable(
        "Direct3D 12 replay is only supported on Windows".to_string(),
    ))
}
