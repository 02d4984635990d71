// Presentation surface - binds a window handle to the instance
//
// Platform-specific surface creation from raw window/display handles.
// The surface loader is shared with the swapchain for capability queries.

use anyhow::{Context, Result};
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Create a presentation surface for the given raw handles.
///
/// Supported platforms: Win32, Xlib, Wayland.
pub fn create_surface(
    entry: &Entry,
    instance: &ash::Instance,
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    match (display_handle, window_handle) {
        #[cfg(target_os = "windows")]
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle
                .hinstance
                .map(|h| h.get())
                .unwrap_or(0) as *const std::ffi::c_void;
            let hwnd = handle.hwnd.get() as *const std::ffi::c_void;

            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);

            let loader = ash::extensions::khr::Win32Surface::new(entry, instance);
            unsafe { loader.create_win32_surface(&create_info, None) }
                .context("Failed to create Win32 surface")
        }

        #[cfg(all(unix, not(target_os = "macos")))]
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .context("Xlib display handle is missing")?
                .as_ptr();

            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut vk::Display)
                .window(handle.window);

            let loader = ash::extensions::khr::XlibSurface::new(entry, instance);
            unsafe { loader.create_xlib_surface(&create_info, None) }
                .context("Failed to create Xlib surface")
        }

        #[cfg(all(unix, not(target_os = "macos")))]
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(handle.surface.as_ptr());

            let loader = ash::extensions::khr::WaylandSurface::new(entry, instance);
            unsafe { loader.create_wayland_surface(&create_info, None) }
                .context("Failed to create Wayland surface")
        }

        _ => anyhow::bail!("Unsupported window handle type"),
    }
}
