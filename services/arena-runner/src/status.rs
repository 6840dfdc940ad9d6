//! Status aggregation for all running session units
//!
//! Units never touch the terminal or the history file directly: every line
//! goes through `StatusBoard::report`, which updates the unit's rolling
//! history under a short in-memory lock and queues the durable record (and,
//! if enabled, a live-view redraw) for a writer on the blocking pool. The
//! single writer keeps file records in report order and never stalls an
//! async worker on disk or terminal I/O.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::sync::{Mutex, MutexGuard};

use arena_session::Reporter;
use chrono::Local;
use terminal_size::Width;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StatusConfig;

/// Room reserved on a live-view line for the name and time prefix.
const PREFIX_WIDTH: usize = 25;
const NAME_WIDTH: usize = 10;

/// Latest line of one unit, as shown in the live view and `/health`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub unit: String,
    pub line: Option<String>,
}

#[derive(Debug, Clone)]
struct Latest {
    time: String,
    message: String,
}

struct UnitEntry {
    unit: String,
    latest: Option<Latest>,
    history: VecDeque<String>,
}

struct Board {
    units: Vec<UnitEntry>,
    /// Taken by `stop`; once gone nothing more reaches the file or terminal.
    sink: Option<mpsc::UnboundedSender<SinkEvent>>,
}

impl Board {
    fn entry(&mut self, unit: &str) -> &mut UnitEntry {
        let idx = match self.units.iter().position(|e| e.unit == unit) {
            Some(idx) => idx,
            None => {
                self.units.push(UnitEntry {
                    unit: unit.to_string(),
                    latest: None,
                    history: VecDeque::new(),
                });
                self.units.len() - 1
            }
        };
        &mut self.units[idx]
    }

    fn send(&self, event: SinkEvent) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }

    /// Units sorted by name, as the live view lists them.
    fn live_view(&self) -> LiveView {
        let mut units: Vec<_> = self
            .units
            .iter()
            .map(|e| (e.unit.clone(), e.latest.clone()))
            .collect();
        units.sort_by(|a, b| a.0.cmp(&b.0));
        LiveView {
            units,
            running: self.sink.is_some(),
        }
    }
}

#[derive(Debug)]
struct LiveView {
    units: Vec<(String, Option<Latest>)>,
    running: bool,
}

enum SinkEvent {
    Record(String),
    Draw(LiveView),
}

pub struct StatusBoard {
    board: Mutex<Board>,
    writer: Mutex<Option<JoinHandle<()>>>,
    run_id: Uuid,
    depth: usize,
    width: usize,
    live_view: bool,
}

impl StatusBoard {
    /// Open (or create) the history file, start the writer and queue the
    /// run-start banner.
    pub async fn open(config: &StatusConfig, run_id: Uuid) -> io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.history_file)
            .await?
            .into_std()
            .await;

        let (sink, events) = mpsc::unbounded_channel();
        let fallback_width = config.width;
        let writer = tokio::task::spawn_blocking(move || write_loop(file, events, fallback_width));

        let board = Self {
            board: Mutex::new(Board {
                units: Vec::new(),
                sink: Some(sink),
            }),
            writer: Mutex::new(Some(writer)),
            run_id,
            depth: config.history_depth.max(1),
            width: config.width,
            live_view: config.live_view,
        };
        board.lock().send(SinkEvent::Record(format!(
            "===== run {run_id} started {} =====",
            timestamp()
        )));
        Ok(board)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn add_unit(&self, unit: &str) {
        self.lock().entry(unit);
    }

    pub fn remove_unit(&self, unit: &str) {
        self.lock().units.retain(|e| e.unit != unit);
    }

    /// Latest line per registered unit, in registration order, cut to the
    /// configured width.
    pub fn snapshot(&self) -> Vec<UnitStatus> {
        self.lock()
            .units
            .iter()
            .map(|e| UnitStatus {
                unit: e.unit.clone(),
                line: e.latest.as_ref().map(|l| format_line(&e.unit, l, self.width)),
            })
            .collect()
    }

    /// Rolling history of one unit, oldest first.
    pub fn history(&self, unit: &str) -> Vec<String> {
        self.lock()
            .units
            .iter()
            .find(|e| e.unit == unit)
            .map(|e| e.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Queue the run-end banner, close the sink and wait for the writer to
    /// flush the history file. Idempotent.
    pub async fn stop(&self) {
        {
            let mut board = self.lock();
            let Some(sink) = board.sink.take() else {
                return;
            };
            let banner = format!("===== run {} ended {} =====", self.run_id, timestamp());
            let _ = sink.send(SinkEvent::Record(banner));
        }

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(writer) = writer
            && let Err(e) = writer.await
        {
            warn!(error = %e, "status writer task failed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Reporter for StatusBoard {
    fn register(&self, unit: &str) {
        self.add_unit(unit);
    }

    fn report(&self, unit: &str, message: &str) {
        info!(unit, message, "status");

        let now = Local::now();
        let mut board = self.lock();
        let depth = self.depth;
        let entry = board.entry(unit);
        entry.latest = Some(Latest {
            time: now.format("%H:%M:%S").to_string(),
            message: message.to_string(),
        });
        entry.history.push_back(message.to_string());
        while entry.history.len() > depth {
            entry.history.pop_front();
        }

        board.send(SinkEvent::Record(format!(
            "[{}] [{unit}] {message}",
            now.format("%Y-%m-%d %H:%M:%S")
        )));
        if self.live_view {
            let view = board.live_view();
            board.send(SinkEvent::Draw(view));
        }
    }
}

/// Drains sink events until every sender is gone, then flushes the file.
fn write_loop(mut file: File, mut events: mpsc::UnboundedReceiver<SinkEvent>, fallback_width: usize) {
    while let Some(event) = events.blocking_recv() {
        match event {
            SinkEvent::Record(record) => {
                if let Err(e) = writeln!(file, "{record}") {
                    warn!(error = %e, "failed to append to history file");
                }
            }
            SinkEvent::Draw(view) => {
                let screen = render_view(&view, view_width(fallback_width), &timestamp());
                let mut out = io::stdout().lock();
                let _ = write!(out, "\x1b[2J\x1b[H{screen}");
                let _ = out.flush();
            }
        }
    }
    if let Err(e) = file.flush() {
        warn!(error = %e, "failed to flush history file");
    }
}

/// Columns of the terminal on stdout, or `fallback` when stdout is not a TTY.
fn view_width(fallback: usize) -> usize {
    let columns = io::stdout()
        .is_terminal()
        .then(terminal_size::terminal_size)
        .flatten()
        .map(|(Width(columns), _)| usize::from(columns));
    resolve_width(columns, fallback)
}

fn resolve_width(columns: Option<usize>, fallback: usize) -> usize {
    columns.filter(|&c| c > 0).unwrap_or(fallback)
}

fn render_view(view: &LiveView, width: usize, now: &str) -> String {
    let heavy = "=".repeat(width);
    let light = "-".repeat(width);
    let mut screen = String::new();

    screen.push_str(&format!("{heavy}\n{:^width$}\n{heavy}\n", "arena-runner"));
    screen.push_str(&format!("time:  {now}\n"));
    screen.push_str(&format!(
        "state: {}\n{light}\n",
        if view.running { "running" } else { "stopped" }
    ));
    for (unit, latest) in &view.units {
        match latest {
            Some(latest) => screen.push_str(&format_line(unit, latest, width)),
            None => {
                screen.push('[');
                screen.push_str(&pad_name(unit));
                screen.push_str("] waiting");
            }
        }
        screen.push('\n');
    }
    screen.push_str(&format!(
        "\n{light}\nactive units: {} | Ctrl+C to stop\n{heavy}\n",
        view.units.len()
    ));
    screen
}

fn format_line(unit: &str, latest: &Latest, width: usize) -> String {
    format!(
        "[{}] [{}] {}",
        pad_name(unit),
        latest.time,
        truncate(&latest.message, width.saturating_sub(PREFIX_WIDTH))
    )
}

fn pad_name(unit: &str) -> String {
    let name: String = unit.chars().take(NAME_WIDTH).collect();
    format!("{name:<width$}", width = NAME_WIDTH)
}

fn truncate(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let mut cut: String = message.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
