//! Screen layout: header, chat panel or launcher badge, status bar.

use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
    Frame,
};

use super::app::App;
use super::compose;
use super::messages;
use crate::sync::Phase;

/// Main render function. Returns the message list's scroll limit.
pub fn render(frame: &mut Frame, app: &App) -> usize {
    let [header_area, main_area, status_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Fill(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    render_header(header_area, frame.buffer_mut(), app);
    render_status(status_area, frame.buffer_mut(), app);

    let engine = app.engine();
    if engine.phase() == Phase::Disabled {
        return 0;
    }
    if !engine.is_open() {
        render_launcher(main_area, frame.buffer_mut(), app);
        return 0;
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Gray))
        .title(" Team chat ");
    let inner = block.inner(main_area);
    frame.render_widget(block, main_area);

    let [list_area, typing_area, compose_area] = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(1),
        Constraint::Length(compose::COMPOSE_HEIGHT),
    ])
    .areas(inner);

    let max_scroll = if engine.phase() == Phase::Loading {
        Paragraph::new(Span::styled(
            " Loading messages...",
            Style::default().fg(Color::DarkGray),
        ))
        .render(list_area, frame.buffer_mut());
        0
    } else {
        messages::render(list_area, frame.buffer_mut(), engine, app.view())
    };

    render_typing(typing_area, frame.buffer_mut(), app);
    compose::render(compose_area, frame, engine.composer(), engine.is_uploading());

    max_scroll
}

fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let ctx = app.engine().context();
    let title = Span::styled(
        " Gaivota News",
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );
    let right = format!("{} ({}) ", ctx.display_name, ctx.role.as_str());
    let padding = (area.width as usize).saturating_sub(" Gaivota News".len() + right.len());

    let line = Line::from(vec![
        title,
        Span::raw(" ".repeat(padding)),
        Span::styled(right, Style::default().fg(Color::Cyan)),
    ]);
    Paragraph::new(line)
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

/// Collapsed widget: a small badge with the unread count.
fn render_launcher(area: Rect, buf: &mut Buffer, app: &App) {
    let unread = app.engine().unread_count();
    let label = if unread > 0 {
        format!(" Team chat ({} new) ", unread)
    } else {
        " Team chat ".to_string()
    };
    let width = (label.len() as u16 + 2).min(area.width);
    let [_, column] = Layout::horizontal([Constraint::Fill(1), Constraint::Length(width)])
        .areas(area);
    let [badge] = Layout::vertical([Constraint::Length(3)])
        .flex(Flex::End)
        .areas(column);

    let style = if unread > 0 {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    };
    Paragraph::new(Span::styled(label, style))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(style)
                .title_bottom(" Tab "),
        )
        .render(badge, buf);
}

fn render_typing(area: Rect, buf: &mut Buffer, app: &App) {
    let names: Vec<&str> = app.engine().typing_users().collect();
    let text = match names.len() {
        0 => return,
        1 => format!(" {} is typing...", names[0]),
        _ => format!(" {} are typing...", names.join(", ")),
    };
    Paragraph::new(Span::styled(
        text,
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::ITALIC),
    ))
    .render(area, buf);
}

fn render_status(area: Rect, buf: &mut Buffer, app: &App) {
    if let Some(notice) = app.notice() {
        Paragraph::new(Span::styled(
            format!(" {} ", notice),
            Style::default().fg(Color::Red),
        ))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
        return;
    }

    let engine = app.engine();
    let sep = Span::styled(" | ", Style::default().fg(Color::Gray));
    let phase = match engine.phase() {
        Phase::Idle | Phase::Loading => Span::styled(" loading", Style::default().fg(Color::Yellow)),
        Phase::Live => Span::styled(
            format!(" {}", app.source_label()),
            Style::default().fg(Color::Green),
        ),
        Phase::Disabled => Span::styled(
            " chat not available for your role",
            Style::default().fg(Color::Red),
        ),
        Phase::Unmounted => Span::styled(" closed", Style::default().fg(Color::Gray)),
    };
    let sound = Span::styled(
        if engine.sound_enabled() { "sound on" } else { "sound off" },
        Style::default().fg(Color::Cyan),
    );
    let keys = Span::styled(
        "Tab panel  C-s sound  Esc quit",
        Style::default().fg(Color::Gray),
    );

    let mut spans = vec![phase, sep.clone(), sound, sep.clone(), keys];
    if let Some(log) = app.latest_log() {
        spans.push(sep);
        spans.push(Span::styled(log, Style::default().fg(Color::Gray)));
    }
    Paragraph::new(Line::from(spans))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}
