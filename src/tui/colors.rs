//! Color constants for the terminal user interface.

use ratatui::style::Color;

use crate::fields::{Priority, Status};

/// Used for the To Do column
pub const STEEL_BLUE: Color = Color::Rgb(70, 130, 180);
/// Used for the In Progress column
pub const GOLD: Color = Color::Rgb(255, 215, 0);
/// Used for the Completed column
pub const DARK_GREEN: Color = Color::Rgb(0, 80, 0);
/// Used for overdue cards
pub const DARK_RED: Color = Color::Rgb(114, 0, 0);

pub fn column_color(status: Status) -> Color {
    match status {
        Status::Todo => STEEL_BLUE,
        Status::InProgress => GOLD,
        Status::Completed => DARK_GREEN,
    }
}

pub fn priority_color(priority: Priority) -> Color {
    match priority {
        Priority::High => Color::LightRed,
        Priority::Medium => Color::Yellow,
        Priority::Low => Color::Gray,
    }
}

/// Readable foreground on top of `background`.
pub fn text_on(background: Color) -> Color {
    match background {
        GOLD => Color::Rgb(20, 20, 20),
        _ => Color::White,
    }
}
