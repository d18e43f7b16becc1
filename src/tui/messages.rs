//! Message list: scrolling, selection and rendering.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
};
use unicode_width::UnicodeWidthStr;

use crate::models::ChatMessage;
use crate::sync::ChatSyncEngine;

/// Scroll position (lines above the bottom) and selected message.
#[derive(Debug, Default)]
pub struct MessagesView {
    scroll_from_bottom: usize,
    max_scroll: usize,
    selected: Option<usize>,
}

impl MessagesView {
    pub fn scroll_from_bottom(&self) -> usize {
        self.scroll_from_bottom
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.scroll_from_bottom = (self.scroll_from_bottom + lines).min(self.max_scroll);
    }

    /// Returns true once the bottom is reached.
    pub fn scroll_down(&mut self, lines: usize) -> bool {
        self.scroll_from_bottom = self.scroll_from_bottom.saturating_sub(lines);
        self.scroll_from_bottom == 0
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_from_bottom = 0;
    }

    /// Last rendered limit, so scrolling up stops at the first line.
    pub fn set_max_scroll(&mut self, max: usize) {
        self.max_scroll = max;
        self.scroll_from_bottom = self.scroll_from_bottom.min(max);
    }

    /// Up arrow: first press selects the newest message.
    pub fn select_previous(&mut self, count: usize) {
        self.selected = match self.selected {
            _ if count == 0 => None,
            None => Some(count - 1),
            Some(i) => Some(i.saturating_sub(1)),
        };
    }

    /// Down arrow: moving past the newest message clears the selection.
    pub fn select_next(&mut self, count: usize) {
        self.selected = match self.selected {
            Some(i) if i + 1 < count => Some(i + 1),
            _ => None,
        };
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }
}

/// Render the list; returns the maximum scroll offset for this size.
pub fn render(area: Rect, buf: &mut Buffer, engine: &ChatSyncEngine, view: &MessagesView) -> usize {
    if area.height == 0 || area.width < 8 {
        return 0;
    }

    if engine.messages().is_empty() {
        let line = Line::from(Span::styled(
            " No messages yet.",
            Style::default().fg(Color::DarkGray),
        ));
        Paragraph::new(line).render(area, buf);
        return 0;
    }

    let lines = build_lines(engine, view.selected(), area.width as usize);
    let visible = area.height as usize;
    let max_scroll = lines.len().saturating_sub(visible);
    let from_bottom = view.scroll_from_bottom().min(max_scroll);
    let top = max_scroll - from_bottom;

    for (row, line) in lines.iter().skip(top).take(visible).enumerate() {
        let line_area = Rect::new(area.x, area.y + row as u16, area.width, 1);
        Paragraph::new(line.clone()).render(line_area, buf);
    }

    if top > 0 {
        buf[(area.x + area.width - 1, area.y)].set_char('^');
    }
    if from_bottom > 0 {
        buf[(area.x + area.width - 1, area.y + area.height - 1)].set_char('v');
    }

    max_scroll
}

fn build_lines(
    engine: &ChatSyncEngine,
    selected: Option<usize>,
    width: usize,
) -> Vec<Line<'static>> {
    let own_id = engine.context().user_id.as_str();
    let mut lines = Vec::new();

    for (idx, message) in engine.messages().iter().enumerate() {
        let is_own = message.user_id == own_id;
        let is_selected = selected == Some(idx);
        lines.push(header_line(
            message,
            is_own,
            is_own && engine.is_read_by_others(&message.id),
            is_selected,
        ));

        for text in wrap_text(&message.content, width.saturating_sub(3)) {
            lines.push(Line::from(format!("  {}", text)));
        }

        if let Some(ref file) = message.file {
            let kind = if file.is_image() { "image" } else { "file" };
            lines.push(Line::from(Span::styled(
                format!("  [{}] {}", kind, file.label()),
                Style::default().fg(Color::Cyan),
            )));
        }

        if is_selected {
            let readers = engine.readers_of(&message.id);
            let text = if readers.is_empty() {
                "  not read by anyone yet".to_string()
            } else {
                format!("  read by {}", readers.join(", "))
            };
            lines.push(Line::from(Span::styled(
                text,
                Style::default().fg(Color::Yellow),
            )));
        }

        lines.push(Line::from(""));
    }

    lines
}

fn header_line(message: &ChatMessage, is_own: bool, read: bool, selected: bool) -> Line<'static> {
    let mut name_style = Style::default().add_modifier(Modifier::BOLD);
    name_style = if is_own {
        name_style.fg(Color::Green)
    } else {
        name_style.fg(Color::Cyan)
    };
    if selected {
        name_style = name_style.add_modifier(Modifier::REVERSED);
    }

    let role = message
        .author
        .as_ref()
        .map(|p| p.role.as_str())
        .unwrap_or("unknown");
    let time = message
        .created_at
        .with_timezone(&chrono::Local)
        .format("%H:%M")
        .to_string();

    let mut spans = vec![
        Span::styled(format!(" {}", message.author_name()), name_style),
        Span::styled(format!(" ({})", role), Style::default().fg(Color::DarkGray)),
        Span::styled(format!("  {}", time), Style::default().fg(Color::DarkGray)),
    ];
    if is_own {
        let (mark, color) = if read {
            ("  \u{2713}\u{2713}", Color::Green)
        } else {
            ("  \u{2713}", Color::DarkGray)
        };
        spans.push(Span::styled(mark, Style::default().fg(color)));
    }
    Line::from(spans)
}

/// Word wrap by display width. Words longer than a line are split.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    if max_width == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for raw_line in text.lines() {
        let mut current = String::new();
        for word in raw_line.split_whitespace() {
            let needed = if current.is_empty() {
                word.width()
            } else {
                current.width() + 1 + word.width()
            };
            if needed <= max_width {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                continue;
            }
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            for c in word.chars() {
                if !current.is_empty() && current.width() + c.to_string().width() > max_width {
                    out.push(std::mem::take(&mut current));
                }
                current.push(c);
            }
        }
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_text_words() {
        assert_eq!(
            wrap_text("a pauta de hoje", 8),
            vec!["a pauta", "de hoje"]
        );
    }

    #[test]
    fn test_wrap_text_splits_long_word_and_keeps_blank_lines() {
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_text("a\n\nb", 10), vec!["a", "", "b"]);
    }

    #[test]
    fn test_selection_moves() {
        let mut view = MessagesView::default();
        view.select_previous(3);
        assert_eq!(view.selected(), Some(2));
        view.select_previous(3);
        view.select_previous(3);
        view.select_previous(3);
        assert_eq!(view.selected(), Some(0));
        view.select_next(3);
        view.select_next(3);
        view.select_next(3);
        assert_eq!(view.selected(), None);

        view.select_previous(0);
        assert_eq!(view.selected(), None);
    }

    #[test]
    fn test_scroll_clamped() {
        let mut view = MessagesView::default();
        view.set_max_scroll(5);
        view.scroll_up(10);
        assert_eq!(view.scroll_from_bottom(), 5);
        assert!(!view.scroll_down(2));
        assert!(view.scroll_down(10));
    }
}
