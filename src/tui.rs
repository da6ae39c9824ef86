use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant, SystemTime};
use std::{
    fmt,
    sync::{Arc, Mutex},
    thread,
};

use camino::Utf8PathBuf;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::domain::CaseState;
use crate::error::DocketError;
use crate::status::{JsonStatusStore, StatusStore};

const EVENTS_MAX: usize = 6;
const LOGS_MAX: usize = 200;
const SUMMARY_REFRESH: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Operational,
    Logs,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Fetch,
    Run,
    Store,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Fetch => "Fetch",
            Phase::Run => "Run",
            Phase::Store => "Store",
        }
    }

    fn index(self) -> usize {
        match self {
            Phase::Resolve => 0,
            Phase::Fetch => 1,
            Phase::Run => 2,
            Phase::Store => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default)]
struct StatusSummary {
    term: Option<String>,
    tracked: usize,
    ready: usize,
    complete: usize,
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    current_case: Option<String>,
    last_elapsed: Option<Duration>,
    cases_done: usize,
    failures: usize,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    summary: StatusSummary,
    last_summary_update: Instant,
    started: Instant,
    active: bool,
    finished: bool,
}

/// Full-screen dashboard shown while a command runs on a worker thread.
pub struct Tui {
    kind: ProgressSinkKind,
    status_path: Utf8PathBuf,
    state: Arc<Mutex<AppState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            match parse_phase(&message) {
                Some((phase, payload)) => {
                    if phase == Phase::Store && state.phase != Phase::Store {
                        state.cases_done = state.cases_done.saturating_add(1);
                    }
                    state.phase = phase;
                    state.status = payload.to_string();
                    if let Some(case) = parse_case(payload) {
                        state.current_case = Some(case.to_string());
                    }
                }
                None => state.status = message.clone(),
            }
            if message.contains("failed") {
                state.failures = state.failures.saturating_add(1);
            }
            if let Some(elapsed) = event.elapsed {
                state.last_elapsed = Some(elapsed);
            }

            let line = match event.elapsed {
                Some(elapsed) => format!("{message} ({} ms)", elapsed.as_millis()),
                None => message,
            };
            push_bounded(&mut state.events, line.clone(), EVENTS_MAX);
            push_bounded(&mut state.logs, format!("[{}] {line}", timestamp()), LOGS_MAX);
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind, status_path: Utf8PathBuf) -> Self {
        let summary = compute_summary(&status_path).unwrap_or_default();
        Self {
            kind,
            status_path,
            state: Arc::new(Mutex::new(AppState {
                status: "ready".to_string(),
                phase: Phase::Resolve,
                current_case: None,
                last_elapsed: None,
                cases_done: 0,
                failures: 0,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Operational,
                summary,
                last_summary_update: Instant::now(),
                started: Instant::now(),
                active: false,
                finished: false,
            })),
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread and redraws until it returns. `q` or `Esc`
    /// leaves the dashboard; the worker is not interrupted mid-request.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, DocketError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            self.refresh_summary();
            if let Ok(state) = self.state.lock() {
                let elapsed = state.started.elapsed();
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick, elapsed))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                self.set_active(false);
                leave_screen()?;
                handle.join().ok();
                return result.map_err(miette::Report::new);
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        break;
                    }
                }
            }

            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        leave_screen()?;
        Err(miette::Report::msg("aborted"))
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::F(1) | KeyCode::Char('?') => self.set_view(View::Help),
            KeyCode::F(4) | KeyCode::Char('l') => self.set_view(View::Logs),
            KeyCode::F(3) | KeyCode::Char('o') => self.set_view(View::Operational),
            KeyCode::Up => self.scroll_logs(1),
            KeyCode::Down => self.scroll_logs(-1),
            _ => {}
        }
        false
    }

    fn set_view(&self, view: View) {
        if let Ok(mut state) = self.state.lock() {
            state.view = view;
        }
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            state.finished = !active;
            if active {
                state.started = Instant::now();
                state.phase = Phase::Resolve;
                state.cases_done = 0;
                state.failures = 0;
                state.current_case = None;
            }
        }
    }

    fn refresh_summary(&self) {
        if let Ok(mut state) = self.state.lock() {
            if state.last_summary_update.elapsed() < SUMMARY_REFRESH {
                return;
            }
            if let Some(summary) = compute_summary(&self.status_path) {
                state.summary = summary;
            }
            state.last_summary_update = Instant::now();
        }
    }

    fn scroll_logs(&mut self, delta: i16) {
        let max = self.state.lock().map(|state| state.logs.len()).unwrap_or(0);
        let max_scroll = max.saturating_sub(1) as i16;
        let next = (self.log_scroll as i16 + delta).clamp(0, max_scroll);
        self.log_scroll = next as u16;
    }
}

fn leave_screen() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout().execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(())
}

fn draw_ui(
    frame: &mut ratatui::Frame,
    tui: &Tui,
    state: &AppState,
    tick: usize,
    elapsed: Duration,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(2),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tui.kind, tick), chunks[0]);

    match state.view {
        View::Operational => {
            let main = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[1]);
            frame.render_widget(draw_status_panel(state, elapsed), main[0]);
            frame.render_widget(draw_details_panel(state), main[1]);
        }
        View::Logs => frame.render_widget(draw_logs_view(state, tui.log_scroll), chunks[1]),
        View::Help => frame.render_widget(draw_help(), chunks[1]),
    }

    let footer = Paragraph::new(Line::from(Span::styled(
        "q quit   F1/? help   F3/o overview   F4/l logs   Up/Down scroll",
        Style::default().fg(Color::Gray),
    )))
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[2]);
}

fn draw_header(state: &AppState, kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Discover => "Discover",
        ProgressSinkKind::FetchSources => "Fetch sources",
        ProgressSinkKind::Run => "Pipeline",
        ProgressSinkKind::Status => "Status",
    };
    let header_line = Line::from(vec![
        Span::styled(
            "DOCKET",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let summary = &state.summary;
    let store_line = Line::from(Span::styled(
        format!(
            "Term: {}   Tracked: {}   Ready: {}   Complete: {}",
            summary.term.as_deref().unwrap_or("--"),
            summary.tracked,
            summary.ready,
            summary.complete
        ),
        Style::default().fg(Color::Gray),
    ));
    Paragraph::new(vec![header_line, store_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState, elapsed: Duration) -> Paragraph<'static> {
    let progress = phase_progress(state.phase);
    let phase_color = if state.active {
        Color::Cyan
    } else if state.finished {
        Color::Green
    } else {
        Color::Yellow
    };
    let mut lines = vec![
        Line::from(Span::styled(
            "STATUS / PROGRESS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(format!("{:<7} ", state.phase), Style::default().fg(phase_color)),
            Span::raw(progress_bar(progress)),
            Span::raw(format!(" {progress:>3}%")),
        ]),
        Line::from(vec![
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", elapsed.as_secs())),
            Span::styled("   Cases done: ", Style::default().fg(Color::Gray)),
            Span::raw(state.cases_done.to_string()),
            Span::styled("   Failures: ", Style::default().fg(Color::Gray)),
            Span::styled(
                state.failures.to_string(),
                Style::default().fg(if state.failures > 0 {
                    Color::Red
                } else {
                    Color::Gray
                }),
            ),
        ]),
        Line::from(vec![
            Span::styled("Now: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(Span::styled("Recent events:", Style::default().fg(Color::Gray))),
    ];
    for event in state.events.iter().rev().take(4) {
        lines.push(Line::from(format!("- {event}")));
    }

    Paragraph::new(lines)
        .block(Block::default().borders(Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_details_panel(state: &AppState) -> Paragraph<'static> {
    let last = state
        .last_elapsed
        .map(|elapsed| format!("{:.1}s", elapsed.as_secs_f64()))
        .unwrap_or_else(|| "--".to_string());
    let lines = vec![
        Line::from(Span::styled(
            "DETAILS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled("Case: ", Style::default().fg(Color::Gray)),
            Span::raw(state.current_case.clone().unwrap_or_else(|| "n/a".to_string())),
        ]),
        Line::from(vec![
            Span::styled("Last case took: ", Style::default().fg(Color::Gray)),
            Span::raw(last),
        ]),
    ];
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs_view(state: &AppState, scroll: u16) -> Paragraph<'static> {
    let total = state.logs.len();
    let visible = 12usize;
    let start = total.saturating_sub(scroll as usize + visible);
    let mut lines = Vec::with_capacity(visible + 1);
    lines.push(Line::from(Span::styled(
        "LOGS (scrollable)",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )));
    for line in state.logs.iter().skip(start).take(visible) {
        lines.push(Line::from(line.clone()));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_help() -> Paragraph<'static> {
    let lines = vec![
        Line::from("Commands: docket discover | fetch-sources | run | status"),
        Line::from("Batch runs continue past a failing case; see the logs view for details."),
        Line::from("Set RUST_LOG=info for step output on stderr with --non-interactive."),
    ];
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true })
}

fn phase_progress(phase: Phase) -> u8 {
    (((phase.index() + 1) as f64 / 4.0) * 100.0) as u8
}

fn progress_bar(percent: u8) -> String {
    let total = 10;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (name, payload) = rest.split_once(';')?;
    let phase = match name {
        "Resolve" => Phase::Resolve,
        "Fetch" => Phase::Fetch,
        "Run" => Phase::Run,
        "Store" => Phase::Store,
        _ => return None,
    };
    Some((phase, payload.trim()))
}

/// Docket number from payloads such as `[2] 25-332 pipeline`.
fn parse_case(payload: &str) -> Option<&str> {
    payload
        .split_whitespace()
        .map(|word| word.trim_end_matches(':'))
        .find(|word| word.contains('-') && word.chars().any(|ch| ch.is_ascii_digit()))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    let hours = (secs / 3600) % 24;
    let mins = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{hours:02}:{mins:02}:{seconds:02}")
}

fn compute_summary(status_path: &Utf8PathBuf) -> Option<StatusSummary> {
    let status = JsonStatusStore::at(status_path.clone()).load().ok()?;
    Some(StatusSummary {
        term: status.term.clone(),
        tracked: status.cases.len(),
        ready: status.count_in(CaseState::PipelineReady),
        complete: status.count_in(CaseState::PipelineComplete),
    })
}
