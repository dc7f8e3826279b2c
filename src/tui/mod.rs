pub mod alert_overlay;
pub mod confirm_overlay;
pub mod detail_overlay;
pub mod footer;
pub mod header;
pub mod list;
pub mod render;
pub mod spinner;
pub mod trigger_overlay;

pub use render::render;

use ratatui::layout::Rect;

/// A `width` x `height` box centered in `area`, shrunk to fit.
pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}
