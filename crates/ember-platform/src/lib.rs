// SPDX-License-Identifier: CEPL-1.0
//! Thin layer over `winit`: the renderer only ever needs the framebuffer
//! size in physical pixels, so that is all this crate translates.
pub use winit;

use ember_render::RenderSize;
use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

/// Attributes for the main window. Zero dimensions are bumped to one pixel,
/// since some platforms refuse to create an empty window.
pub fn window_attributes(title: &str, size: RenderSize) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(size.width.max(1), size.height.max(1)))
}

pub fn to_render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Current framebuffer size of `window`, which is what the surface extent
/// falls back to when the compositor lets the application choose.
pub fn framebuffer_size(window: &Window) -> RenderSize {
    to_render_size(window.inner_size())
}
