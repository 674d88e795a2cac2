use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use chatstore_core::{ChatRole, ChatState, ChatStore, Field, Store};
use crate::app::App;

const SIDE_PANEL_WIDTH: u16 = 32;

/// Parse a line of text with markdown bold (**text**) and convert to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            // Consume the second *
            chars.next();

            // Push any accumulated plain text
            if !current_text.is_empty() {
                spans.push(Span::raw(std::mem::take(&mut current_text)));
            }

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;

            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                spans.push(Span::styled(
                    bold_text,
                    Style::default().add_modifier(Modifier::BOLD),
                ));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

fn role_header(role: ChatRole) -> Line<'static> {
    match role {
        ChatRole::User => Line::from(Span::styled(
            "You:",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        )),
        ChatRole::Assistant => Line::from(Span::styled(
            "AI:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
    }
}

/// Transcript lines for the chat pane
fn chat_lines(state: &ChatState, animation_frame: u8) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = Vec::new();

    for msg in &state.data {
        lines.push(role_header(msg.role));
        match msg.role {
            ChatRole::User => {
                lines.extend(msg.content.lines().map(|l| Line::from(l.to_string())));
            }
            ChatRole::Assistant => {
                lines.extend(msg.content.lines().map(parse_markdown_line));
            }
        }
        lines.push(Line::default());
    }

    // Live region for the answer being streamed
    if state.streamdiv || state.waiting {
        lines.push(role_header(ChatRole::Assistant));
        if state.waiting && state.answer.is_empty() {
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        } else {
            lines.extend(state.answer.lines().map(parse_markdown_line));
            lines.push(Line::from(Span::styled("▌", Style::default().fg(Color::Yellow))));
        }
    }

    lines
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();
    let state = app.store.snapshot();

    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let chat_column = if state.toggled {
        let [chat_column, panel_area] = Layout::horizontal([
            Constraint::Min(0),
            Constraint::Length(SIDE_PANEL_WIDTH),
        ])
        .areas(body_area);
        render_store_panel(app, &state, frame, panel_area);
        chat_column
    } else {
        body_area
    };

    let [chat_area, input_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
    ])
    .areas(chat_column);

    render_chat(app, &state, frame, chat_area);
    render_input(app, &state, frame, input_area);
    render_footer(app, &state, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" chatstore ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("{} ", app.session.model()),
            Style::default().fg(Color::White),
        ),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_chat(app: &mut App, state: &ChatState, frame: &mut Frame, area: Rect) {
    // Inner size excludes the borders
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let border_color = if state.streamdiv { Color::Yellow } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Chat ");

    let text = if state.data.is_empty() && !state.streamdiv && !state.waiting {
        Text::from(Span::styled(
            "Ask the model anything...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(chat_lines(state, app.animation_frame))
    };

    if app.follow {
        app.scroll_to_bottom();
    } else {
        app.scroll = app.scroll.min(app.max_scroll());
    }

    let chat = Paragraph::new(text)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, state: &ChatState, frame: &mut Frame, input_area: Rect) {
    let busy = state.waiting || state.streamdiv;
    let input_border_color = if busy { Color::DarkGray } else { Color::Yellow };
    let title = if busy { " Answering... " } else { " Ask (Enter to send) " };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(input_border_color))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let inner_width = input_area.width.saturating_sub(2) as usize;
    let cursor_pos = app.cursor;

    // Calculate scroll offset to keep cursor visible
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app.input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, input_area);

    let cursor_x = (cursor_pos - scroll_offset) as u16;
    frame.set_cursor_position((
        input_area.x + cursor_x + 1,
        input_area.y + 1,
    ));
}

/// Shows the raw field values of the chat store
fn render_store_panel(app: &App, state: &ChatState, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(format!(" Store: {} ", ChatStore::ID));

    let label_style = Style::default().fg(Color::DarkGray);
    let flag = |on: bool| {
        if on {
            Span::styled("true", Style::default().fg(Color::Green))
        } else {
            Span::styled("false", Style::default().fg(Color::Red))
        }
    };

    let mut lines = Vec::new();
    for field in Field::all() {
        let value = match field {
            Field::Data => Span::raw(format!(
                "{} ({} you / {} ai)",
                state.data.len(),
                app.message_count(ChatRole::User),
                app.message_count(ChatRole::Assistant),
            )),
            Field::Answer => Span::raw(format!("{} chars", state.answer.chars().count())),
            Field::Streamdiv => flag(state.streamdiv),
            Field::Toggled => flag(state.toggled),
            Field::Waiting => flag(state.waiting),
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{:<10}", field.name()), label_style),
            value,
        ]));
    }
    lines.push(Line::default());
    lines.push(Line::from(vec![
        Span::styled(format!("{:<10}", "version"), label_style),
        Span::raw(app.last_version.to_string()),
    ]));
    lines.push(Line::from(vec![
        Span::styled(format!("{:<10}", "stores"), label_style),
        Span::raw(app.registry.ids().join(", ")),
    ]));

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_footer(app: &App, state: &ChatState, frame: &mut Frame, area: Rect) {
    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let status = if state.waiting {
        Span::styled(" WAITING ", Style::default().bg(Color::Yellow).fg(Color::Black))
    } else if state.streamdiv {
        Span::styled(" STREAMING ", Style::default().bg(Color::Green).fg(Color::Black))
    } else {
        Span::styled(" READY ", Style::default().bg(Color::Blue).fg(Color::White))
    };

    let mut spans = vec![status, Span::raw(" ")];
    for (key, label) in [
        ("Enter", "send"),
        ("Tab", "store panel"),
        ("PgUp/PgDn", "scroll"),
        ("^L", "clear"),
        ("Esc", "quit"),
    ] {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
    }
    if !app.follow {
        spans.push(Span::styled(" [scrolled] ", Style::default().fg(Color::DarkGray)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
