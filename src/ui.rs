use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::io;
use textwrap::wrap;
use tui_input::Input;

use payphone::models::{Conversation, DeliveryStatus, Message, Participant};

// Export types needed by main module
pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

pub fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Search,
    Conversations,
    Compose,
}

/// Popup listing users a new conversation can be started with.
pub struct NewChatDialog {
    pub users: Vec<Participant>,
    pub selected: usize,
}

pub struct ChatUI {
    pub current_user_id: String,
    // Snapshots handed over by the engine; the UI never mutates entities.
    pub conversations: Vec<Conversation>,
    pub messages: Vec<Message>,
    pub active_conversation: Option<Conversation>,
    pub search: Input,
    pub compose: Input,
    pub focus: Focus,
    pub selected: usize,
    pub sending: bool,
    pub unread_total: u32,
    pub status_line: Option<String>,
    pub new_chat: Option<NewChatDialog>,
}

impl ChatUI {
    pub fn new(current_user_id: &str) -> Self {
        ChatUI {
            current_user_id: current_user_id.to_string(),
            conversations: Vec::new(),
            messages: Vec::new(),
            active_conversation: None,
            search: Input::default(),
            compose: Input::default(),
            focus: Focus::Conversations,
            selected: 0,
            sending: false,
            unread_total: 0,
            status_line: None,
            new_chat: None,
        }
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.conversations.get(self.selected)
    }

    pub fn select_next(&mut self) {
        if !self.conversations.is_empty() {
            self.selected = (self.selected + 1).min(self.conversations.len() - 1);
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    /// Keep the selection in range after the list was refreshed/filtered.
    pub fn clamp_selection(&mut self) {
        if self.conversations.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.conversations.len() {
            self.selected = self.conversations.len() - 1;
        }
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_line = Some(message.into());
    }

    pub fn clear_status(&mut self) {
        self.status_line = None;
    }

    pub fn draw<B: Backend>(&mut self, f: &mut Frame<B>) {
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(5), Constraint::Length(1)])
            .split(f.size());

        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(34), Constraint::Percentage(66)])
            .split(outer[0]);

        self.draw_conversation_pane(f, panes[0]);
        self.draw_chat_pane(f, panes[1]);
        self.draw_status_bar(f, outer[1]);

        if self.new_chat.is_some() {
            self.draw_new_chat_dialog(f);
        }
    }

    fn draw_conversation_pane<B: Backend>(&mut self, f: &mut Frame<B>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(3)])
            .split(area);

        let search_style = if self.focus == Focus::Search {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let search = Paragraph::new(self.search.value())
            .style(search_style)
            .block(Block::default().borders(Borders::ALL).title("Search"));
        f.render_widget(search, rows[0]);
        if self.focus == Focus::Search {
            f.set_cursor(
                rows[0].x + self.search.visual_cursor() as u16 + 1,
                rows[0].y + 1,
            );
        }

        let width = rows[1].width.saturating_sub(2) as usize;
        let items: Vec<ListItem> = self
            .conversations
            .iter()
            .map(|c| conversation_item(c, &self.current_user_id, width))
            .collect();

        let title = if self.unread_total > 0 {
            format!("Chats ({} unread)", self.unread_total)
        } else {
            "Chats".to_string()
        };
        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().bg(Color::DarkGray));
        let mut state = ListState::default();
        if !self.conversations.is_empty() {
            state.select(Some(self.selected));
        }
        f.render_stateful_widget(list, rows[1], &mut state);
    }

    fn draw_chat_pane<B: Backend>(&mut self, f: &mut Frame<B>, area: Rect) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(3),
                Constraint::Length(3),
            ])
            .split(area);

        // Header: who we are talking to and whether they are around.
        let header = match &self.active_conversation {
            Some(conversation) => {
                let presence = presence_line(&conversation.participant);
                Line::from(vec![
                    Span::styled(
                        conversation.participant.name.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                    Span::raw("  "),
                    Span::styled(presence, Style::default().fg(Color::DarkGray)),
                ])
            }
            None => Line::from(Span::styled(
                "Select a conversation",
                Style::default().fg(Color::DarkGray),
            )),
        };
        f.render_widget(
            Paragraph::new(header).block(Block::default().borders(Borders::BOTTOM)),
            rows[0],
        );

        // History, newest at the bottom.
        let inner_width = rows[1].width.saturating_sub(2) as usize;
        let mut lines: Vec<Line> = Vec::new();
        for message in &self.messages {
            message_lines(message, &self.current_user_id, inner_width, &mut lines);
        }
        let inner_height = rows[1].height.saturating_sub(2) as usize;
        let scroll = lines.len().saturating_sub(inner_height) as u16;
        let history = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL))
            .scroll((scroll, 0));
        f.render_widget(history, rows[1]);

        // Compose box.
        let compose_title = if self.sending {
            "Message (sending...)"
        } else {
            "Message"
        };
        let compose_style = if self.focus == Focus::Compose {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        let compose = Paragraph::new(self.compose.value())
            .style(compose_style)
            .block(Block::default().borders(Borders::ALL).title(compose_title));
        f.render_widget(compose, rows[2]);
        if self.focus == Focus::Compose {
            f.set_cursor(
                rows[2].x + self.compose.visual_cursor() as u16 + 1,
                rows[2].y + 1,
            );
        }
    }

    fn draw_status_bar<B: Backend>(&self, f: &mut Frame<B>, area: Rect) {
        let text = match &self.status_line {
            Some(status) => status.clone(),
            None => {
                "Tab: focus | Enter: open/send | Ctrl+N: new chat | Ctrl+P: pin | Ctrl+D: delete | Esc: quit"
                    .to_string()
            }
        };
        let style = if self.status_line.is_some() {
            Style::default().fg(Color::Red)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        f.render_widget(Paragraph::new(text).style(style), area);
    }

    fn draw_new_chat_dialog<B: Backend>(&mut self, f: &mut Frame<B>) {
        let Some(dialog) = &self.new_chat else {
            return;
        };
        let area = centered_rect(50, 60, f.size());
        f.render_widget(Clear, area);

        let items: Vec<ListItem> = dialog
            .users
            .iter()
            .map(|u| {
                let presence = if u.is_online { " (online)" } else { "" };
                ListItem::new(format!("{}{}", u.name, presence))
            })
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title("New chat (Enter to start, Esc to close)"),
            )
            .highlight_style(Style::default().bg(Color::DarkGray));
        let mut state = ListState::default();
        if !dialog.users.is_empty() {
            state.select(Some(dialog.selected));
        }
        f.render_stateful_widget(list, area, &mut state);
    }
}

/// One conversation row: name with pin/unread markers, then a preview line.
fn conversation_item<'a>(
    conversation: &'a Conversation,
    current_user_id: &str,
    width: usize,
) -> ListItem<'a> {
    let mut title_spans = vec![Span::styled(
        conversation.participant.name.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    if conversation.is_pinned {
        title_spans.push(Span::styled(" *", Style::default().fg(Color::Yellow)));
    }
    if conversation.unread_count > 0 {
        title_spans.push(Span::styled(
            format!(" ({})", conversation.unread_count),
            Style::default().fg(Color::Magenta),
        ));
    }
    if conversation.participant.is_online {
        title_spans.push(Span::styled(" •", Style::default().fg(Color::Green)));
    }

    let preview = match &conversation.last_message {
        Some(last) => {
            let ticks = if last.sender_id == current_user_id {
                format!("{} ", status_glyph(last.status))
            } else {
                String::new()
            };
            let time = format_relative(last.sent_at);
            let avail = width.saturating_sub(ticks.len() + time.len() + 3).max(8);
            let mut text = last.text.replace('\n', " ");
            if text.chars().count() > avail {
                text = text.chars().take(avail.saturating_sub(3)).collect();
                text.push_str("...");
            }
            Line::from(vec![
                Span::styled(ticks, Style::default().fg(Color::DarkGray)),
                Span::raw(text),
                Span::raw(" "),
                Span::styled(time, Style::default().fg(Color::DarkGray)),
            ])
        }
        None => Line::from(Span::styled(
            "No messages yet",
            Style::default().fg(Color::DarkGray),
        )),
    };

    ListItem::new(vec![Line::from(title_spans), preview])
}

/// Render one message into the history pane, own messages pushed to the
/// right edge.
fn message_lines(
    message: &Message,
    current_user_id: &str,
    width: usize,
    lines: &mut Vec<Line<'static>>,
) {
    let own = message.sender_id == current_user_id;
    let body_width = (width * 2 / 3).max(16);
    let style = if message.status == DeliveryStatus::Failed {
        Style::default().fg(Color::Red)
    } else if own {
        Style::default().fg(Color::Magenta)
    } else {
        Style::default()
    };

    for wrapped in wrap(&message.text, body_width) {
        let text = wrapped.into_owned();
        if own {
            let pad = width.saturating_sub(text.len());
            lines.push(Line::from(vec![
                Span::raw(" ".repeat(pad)),
                Span::styled(text, style),
            ]));
        } else {
            lines.push(Line::from(Span::styled(text, style)));
        }
    }

    let time = message.sent_at.with_timezone(&Local).format("%H:%M");
    let meta = if own {
        format!("{} {}", time, status_glyph(message.status))
    } else {
        time.to_string()
    };
    let meta_style = if message.status == DeliveryStatus::Read && own {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    if own {
        let pad = width.saturating_sub(meta.len());
        lines.push(Line::from(vec![
            Span::raw(" ".repeat(pad)),
            Span::styled(meta, meta_style),
        ]));
    } else {
        lines.push(Line::from(Span::styled(meta, meta_style)));
    }
}

pub fn status_glyph(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "…",
        DeliveryStatus::Sent => "✓",
        DeliveryStatus::Delivered => "✓✓",
        DeliveryStatus::Read => "✓✓",
        DeliveryStatus::Failed => "✗",
    }
}

fn presence_line(participant: &Participant) -> String {
    if participant.is_online {
        "Online".to_string()
    } else {
        match participant.last_seen {
            Some(at) => format!("Last seen {}", format_relative(at)),
            None => "Offline".to_string(),
        }
    }
}

/// Compact relative timestamp for the list pane: 5m, 3h, 2d, then a date.
fn format_relative(at: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(at);
    let mins = elapsed.num_minutes();
    if mins < 1 {
        return "now".to_string();
    }
    if mins < 60 {
        return format!("{}m", mins);
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return format!("{}h", hours);
    }
    let days = elapsed.num_days();
    if days < 7 {
        return format!("{}d", days);
    }
    at.with_timezone(&Local).format("%b %d").to_string()
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
