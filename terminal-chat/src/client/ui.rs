//! Terminal rendering and the render/input loop.
//!
//! The whole screen is redrawn every tick: a status header, the most recent
//! log lines that fit, a separator and the input line. Content is clipped to
//! the terminal, never wrapped, so any terminal size renders without error.

use std::io::{self, Stdout};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use crossterm::event::{self, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use super::network::NetEvent;
use super::view::{ChatView, LineKind};
use crate::message::ClientEvent;

/// Upper bound on how long input polling blocks before the screen is redrawn.
pub const TICK: Duration = Duration::from_millis(100);

/// Puts the terminal into raw/alternate-screen mode and restores it on drop.
struct TerminalGuard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw terminal mode")?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(err).context("failed to enter alternate screen");
        }
        let terminal = match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => terminal,
            Err(err) => {
                let _ = disable_raw_mode();
                let _ = execute!(io::stdout(), LeaveAlternateScreen);
                return Err(err).context("failed to initialize terminal");
            }
        };
        Ok(Self { terminal })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            warn!(?err, "failed to disable raw mode");
        }
        if let Err(err) = execute!(self.terminal.backend_mut(), LeaveAlternateScreen) {
            warn!(?err, "failed to leave alternate screen");
        }
        let _ = self.terminal.show_cursor();
    }
}

/// Runs the chat view on the current thread until the user quits.
pub fn run(requests: UnboundedSender<ClientEvent>, events: Receiver<NetEvent>) -> Result<()> {
    let mut guard = TerminalGuard::enter()?;
    let mut view = ChatView::new();
    run_loop(&mut guard.terminal, &mut view, &requests, &events)
}

fn run_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    view: &mut ChatView,
    requests: &UnboundedSender<ClientEvent>,
    events: &Receiver<NetEvent>,
) -> Result<()> {
    loop {
        drain_events(view, events);

        terminal
            .draw(|frame| render(frame, view))
            .context("failed to draw chat view")?;

        if event::poll(TICK).context("failed to poll terminal input")? {
            if let Event::Key(key) = event::read().context("failed to read terminal input")? {
                if let Some(request) = view.handle_key(key) {
                    send_request(view, requests, request);
                }
            }
        }

        if view.should_quit() {
            break;
        }
    }

    Ok(())
}

/// Applies every pending network event without blocking.
pub fn drain_events(view: &mut ChatView, events: &Receiver<NetEvent>) {
    while let Ok(event) = events.try_recv() {
        view.apply(event);
    }
}

fn send_request(
    view: &mut ChatView,
    requests: &UnboundedSender<ClientEvent>,
    request: ClientEvent,
) {
    if requests.send(request).is_err() {
        view.apply(NetEvent::Offline);
    }
}

pub fn render(frame: &mut ratatui::Frame, view: &ChatView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(0),    // Log
            Constraint::Length(1), // Separator
            Constraint::Length(1), // Input
        ])
        .split(frame.area());

    let header = format!(
        " Terminal Chat | Nick: {} | Room: {} ",
        view.nickname().unwrap_or("None"),
        view.room()
    );
    let header_style = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::REVERSED);
    frame.render_widget(Paragraph::new(header).style(header_style), chunks[0]);

    let log_height = chunks[1].height as usize;
    let skip = view.log().len().saturating_sub(log_height);
    let lines: Vec<Line> = view
        .log()
        .iter()
        .skip(skip)
        .map(|line| match line.kind {
            LineKind::System => {
                Line::styled(line.text.as_str(), Style::default().fg(Color::Green))
            }
            LineKind::Chat => Line::raw(line.text.as_str()),
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), chunks[1]);

    let separator = "-".repeat(chunks[2].width as usize);
    frame.render_widget(Paragraph::new(separator), chunks[2]);

    let prompt = format!("[{}]> ", view.nickname().unwrap_or("?"));
    let cursor_offset = prompt.chars().count() + view.input().chars().count();
    let input = Line::from(vec![
        Span::styled(prompt, Style::default().fg(Color::Cyan)),
        Span::raw(view.input()),
    ]);
    frame.render_widget(Paragraph::new(input), chunks[3]);

    if let Some(position) = cursor_position(chunks[3], cursor_offset) {
        frame.set_cursor_position(position);
    }
}

/// Cursor cell for the input line, clamped to the last column. `None` if the line is not visible.
fn cursor_position(area: Rect, offset: usize) -> Option<(u16, u16)> {
    if area.width == 0 || area.height == 0 {
        return None;
    }
    let offset = u16::try_from(offset).unwrap_or(u16::MAX);
    let x = area.x.saturating_add(offset.min(area.width - 1));
    Some((x, area.y))
}
