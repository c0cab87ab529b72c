use crate::heatmap::{self, Colorbar, HeatmapView};
use crate::recorder;
use crate::scheduler::{Notice, SessionHandle};
use crate::serial_link;
use chrono::Local;
use color_eyre::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    DefaultTerminal, Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span, Text},
    widgets::{Block, Paragraph, Widget},
};
use std::{sync::mpsc, time::Duration};

/// Redraw interval; the heatmap updates on its own thread in between.
const TICK: Duration = Duration::from_millis(33);
const FPS_STEPS: [u32; 7] = [1, 5, 10, 15, 20, 30, 60];

/// The terminal front-end. Holds no acquisition state of its own.
pub struct App {
    running: bool,
    session: SessionHandle,
    notices: mpsc::Receiver<Notice>,
    /// Status message to show at bottom.
    status: String,
    ports: Vec<String>,
}

impl App {
    /// Construct a new instance of [`App`].
    pub fn new(session: SessionHandle, notices: mpsc::Receiver<Notice>) -> Self {
        let ports = serial_link::available_ports();
        let status = match ports.first() {
            Some(p) => format!("Found {} serial port(s), first is {p}. Press p to select.", ports.len()),
            None => "No serial ports found. Showing simulated data.".into(),
        };
        Self {
            running: false,
            session,
            notices,
            status,
            ports,
        }
    }

    /// Run the application's main loop.
    pub fn run(mut self, mut terminal: DefaultTerminal) -> Result<()> {
        self.running = true;
        while self.running {
            self.poll_notices();
            terminal.draw(|frame| self.render(frame))?;
            self.handle_crossterm_events()?;
        }
        Ok(())
    }

    /// Renders the user interface.
    fn render(&mut self, frame: &mut Frame) {
        let layout = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![Constraint::Length(34), Constraint::Min(10)])
            .split(frame.area());
        let body = Layout::default()
            .direction(Direction::Vertical)
            .constraints(vec![
                Constraint::Min(4),
                Constraint::Length(1),
                Constraint::Length(3),
            ])
            .split(layout[1]);

        let settings = self.session.settings();

        // --- Left: current selections and key help ---
        let current = self.session.current_frame();
        let fps = settings
            .frames_per_second
            .map_or_else(|| "max".to_string(), |f| f.to_string());
        let lines = [
            format!("Source:   {}", settings.data_source),
            format!("Port:     {}", settings.port.as_deref().unwrap_or("<none>")),
            format!("FPS:      {fps}"),
            format!("Rotation: {}°", settings.rotation.degrees()),
            format!("Mirror:   {}", if settings.mirror { "on" } else { "off" }),
            format!("Colours:  {}", settings.gradient),
            format!("Grid:     {}x{}", current.rows(), current.cols()),
            format!("Peak:     {}", current.peak()),
            String::new(),
            format!(
                "{}  {}",
                if self.session.is_paused() { "[paused]" } else { "[live]" },
                if self.session.is_recording() { "● REC" } else { "" }
            ),
        ];
        let mut options = Text::default();
        for line in lines {
            options.extend([Line::from(line)]);
        }
        options.extend([Line::from("")]);
        for help in [
            "space pause   s source",
            "p port  P rescan",
            "r rotate  m mirror  g colours",
            "+/- fps  0 max fps",
            "ctrl+s record  q quit",
        ] {
            options.extend([Line::from(Span::styled(help, Style::default().fg(Color::Gray)))]);
        }
        frame.render_widget(
            Paragraph::new(options).block(Block::bordered().title("Pressure Mat")),
            layout[0],
        );

        // --- Heatmap ---
        let heatmap_block = Block::bordered().title("Heatmap");
        let inner = heatmap_block.inner(body[0]);
        heatmap_block.render(body[0], frame.buffer_mut());
        let (width, height) = heatmap::canvas_for(inner);
        if settings.canvas_size != (width, height) {
            self.session.resize_canvas(width, height);
        }
        self.session.with_bitmap(|bitmap| match bitmap {
            Some(bitmap) => frame.render_widget(HeatmapView::new(bitmap), inner),
            None => frame.render_widget(Paragraph::new("Waiting for data..."), inner),
        });

        frame.render_widget(
            Colorbar {
                gradient: settings.gradient,
                min: settings.value_min,
                max: settings.value_max,
            },
            body[1],
        );

        frame.render_widget(
            Paragraph::new(self.status.as_str()).block(Block::bordered().title("Status")),
            body[2],
        );
    }

    /// Reads the crossterm events and updates the state of [`App`].
    fn handle_crossterm_events(&mut self) -> Result<()> {
        if event::poll(TICK)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => self.on_key_event(key),
                _ => {}
            }
        }
        Ok(())
    }

    /// Handles the key events and updates the state of [`App`].
    fn on_key_event(&mut self, key: KeyEvent) {
        match (key.modifiers, key.code) {
            (_, KeyCode::Esc | KeyCode::Char('q'))
            | (KeyModifiers::CONTROL, KeyCode::Char('c') | KeyCode::Char('C')) => self.quit(),
            (KeyModifiers::CONTROL, KeyCode::Char('s') | KeyCode::Char('S')) => {
                self.toggle_recording()
            }
            (_, KeyCode::Char(' ')) => {
                if self.session.is_paused() {
                    self.session.resume();
                    self.status = "Resumed.".into();
                } else {
                    self.session.pause();
                    self.status = "Paused.".into();
                }
            }
            (_, KeyCode::Char('s')) => {
                self.session.update_settings(|s| s.data_source = s.data_source.next());
                self.status = format!("Source: {}", self.session.settings().data_source);
            }
            (_, KeyCode::Char('p')) => self.next_port(),
            (_, KeyCode::Char('P')) => {
                self.ports = serial_link::available_ports();
                self.status = format!("{} serial port(s) found.", self.ports.len());
            }
            (_, KeyCode::Char('r')) => self.session.update_settings(|s| s.rotation = s.rotation.next()),
            (_, KeyCode::Char('m')) => self.session.update_settings(|s| s.mirror = !s.mirror),
            (_, KeyCode::Char('g')) => self.session.update_settings(|s| s.gradient = s.gradient.next()),
            (_, KeyCode::Char('+') | KeyCode::Char('=')) => {
                self.session.update_settings(|s| s.frames_per_second = step_fps(s.frames_per_second, true))
            }
            (_, KeyCode::Char('-')) => {
                self.session.update_settings(|s| s.frames_per_second = step_fps(s.frames_per_second, false))
            }
            (_, KeyCode::Char('0')) => self.session.update_settings(|s| s.frames_per_second = None),
            _ => {}
        }
    }

    /// Selects the next known port; the scheduler connects on its next cycle.
    fn next_port(&mut self) {
        if self.ports.is_empty() {
            self.ports = serial_link::available_ports();
        }
        if self.ports.is_empty() {
            self.status = "No serial ports found.".into();
            return;
        }
        let current = self.session.settings().port;
        let idx = current
            .and_then(|p| self.ports.iter().position(|q| *q == p))
            .map_or(0, |i| (i + 1) % self.ports.len());
        let port = self.ports[idx].clone();
        self.status = format!("Connecting to {port}...");
        self.session.update_settings(|s| s.port = Some(port));
    }

    fn toggle_recording(&mut self) {
        if self.session.is_recording() {
            self.session.stop_recording();
            return;
        }
        let settings = self.session.settings();
        let path = recorder::recording_path(
            &settings.record_dir(),
            &settings.record_filename,
            settings.record_append_datetime,
            Local::now(),
        );
        self.session.start_recording(path);
    }

    /// Drain pending notices from the acquisition thread into the status line.
    fn poll_notices(&mut self) {
        loop {
            match self.notices.try_recv() {
                Ok(notice) => self.status = describe(notice),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.status = "Acquisition thread stopped unexpectedly.".into();
                    break;
                }
            }
        }
    }

    fn quit(&mut self) {
        self.running = false;
    }
}

fn describe(notice: Notice) -> String {
    match notice {
        Notice::LinkFailed { port, error } => {
            format!("Serial port error on {port}: {error}. Select a port with p.")
        }
        Notice::RecordingStarted(path) => format!("Recording to {}", path.display()),
        Notice::RecordingStopped { path, frames } => {
            format!("Saved {frames} frames to {}", path.display())
        }
        Notice::RecordingFailed(reason) => format!("Recording failed: {reason}"),
    }
}

/// Walks `FPS_STEPS`; stepping past the top means unlimited.
fn step_fps(current: Option<u32>, up: bool) -> Option<u32> {
    match (current, up) {
        (None, true) => None,
        (None, false) => FPS_STEPS.last().copied(),
        (Some(fps), true) => FPS_STEPS.iter().copied().find(|&s| s > fps),
        (Some(fps), false) => FPS_STEPS.iter().rev().copied().find(|&s| s < fps).or(Some(fps)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_steps_up_to_unlimited() {
        assert_eq!(step_fps(Some(10), true), Some(15));
        assert_eq!(step_fps(Some(60), true), None);
        assert_eq!(step_fps(None, true), None);
    }

    #[test]
    fn fps_steps_down_from_unlimited() {
        assert_eq!(step_fps(None, false), Some(60));
        assert_eq!(step_fps(Some(15), false), Some(10));
        assert_eq!(step_fps(Some(1), false), Some(1));
    }

    #[test]
    fn link_failure_tells_user_to_reselect() {
        let text = describe(Notice::LinkFailed {
            port: "COM3".into(),
            error: crate::error::LinkError::OpenFailure {
                port: "COM3".into(),
                reason: "access denied".into(),
            },
        });
        assert!(text.contains("COM3"));
        assert!(text.contains("access denied"));
    }
}
