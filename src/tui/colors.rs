//! Color constants for the terminal user interface.

use ratatui::style::Color;

/// Most of the delivery's tasks are planned.
pub const DARK_GREEN: Color = Color::Rgb(0, 80, 0);
/// Planning under way.
pub const GOLD: Color = Color::Rgb(255, 215, 0);
/// Little or nothing planned yet.
pub const DARK_RED: Color = Color::Rgb(114, 0, 0);
/// Dialog and form accents.
pub const DARK_PURPLE: Color = Color::Rgb(86, 60, 92);

/// Bar color for a delivery's planning progress in `[0, 1]`.
pub fn progress_color(progress: f64) -> Color {
    if progress >= 0.75 {
        DARK_GREEN
    } else if progress >= 0.25 {
        GOLD
    } else {
        DARK_RED
    }
}

/// Readable foreground for text drawn on `bg`.
pub fn text_on(bg: Color) -> Color {
    match bg {
        GOLD => Color::Rgb(20, 20, 20),
        _ => Color::White,
    }
}
