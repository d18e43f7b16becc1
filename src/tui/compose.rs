//! Composer line: bordered single-line input with horizontal scrolling.

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph},
    Frame,
};
use unicode_width::UnicodeWidthChar;

use crate::sync::composer::Composer;

/// Border, input, border.
pub const COMPOSE_HEIGHT: u16 = 3;

pub fn render(area: Rect, frame: &mut Frame, composer: &Composer, uploading: bool) {
    let title = if uploading { " uploading... " } else { " message " };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Yellow))
        .title(title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.height == 0 || inner.width < 2 {
        return;
    }
    let input_area = Rect::new(inner.x, inner.y, inner.width, 1);

    if composer.input().is_empty() {
        let placeholder = " Type a message, or /file <path> to attach";
        let line = Line::from(Span::styled(
            placeholder.chars().take(inner.width as usize).collect::<String>(),
            Style::default().fg(Color::DarkGray),
        ));
        frame.render_widget(Paragraph::new(line), input_area);
        frame.set_cursor_position((input_area.x + 1, input_area.y));
        return;
    }

    let view = visible_window(composer.input(), composer.cursor(), inner.width as usize - 1);
    frame.render_widget(
        Paragraph::new(Line::from(format!(" {}", view.text))),
        input_area,
    );
    frame.set_cursor_position((input_area.x + 1 + view.cursor_col as u16, input_area.y));
}

struct Window {
    text: String,
    cursor_col: usize,
}

/// Slice of `input` that fits in `width` columns and contains the cursor.
fn visible_window(input: &str, cursor: usize, width: usize) -> Window {
    let chars: Vec<char> = input.chars().collect();
    let col = |c: &char| c.width().unwrap_or(0);

    // Walk left from the cursor until the window is full.
    let mut start = cursor.min(chars.len());
    let mut used = 0;
    while start > 0 && used + col(&chars[start - 1]) < width {
        used += col(&chars[start - 1]);
        start -= 1;
    }

    let mut text = String::new();
    let mut total = 0;
    for c in &chars[start..] {
        if total + col(c) > width {
            break;
        }
        total += col(c);
        text.push(*c);
    }

    Window {
        text,
        cursor_col: used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_fits() {
        let w = visible_window("hello", 5, 20);
        assert_eq!(w.text, "hello");
        assert_eq!(w.cursor_col, 5);
    }

    #[test]
    fn test_long_input_scrolls_to_cursor() {
        let input = "abcdefghijklmnopqrstuvwxyz";
        let w = visible_window(input, 26, 10);
        assert!(w.text.ends_with('z'));
        assert_eq!(w.cursor_col, 9);

        let w = visible_window(input, 0, 10);
        assert_eq!(w.text, "abcdefghij");
        assert_eq!(w.cursor_col, 0);
    }

    #[test]
    fn test_wide_chars_count_double() {
        let w = visible_window("日本語", 3, 10);
        assert_eq!(w.cursor_col, 6);
    }
}
