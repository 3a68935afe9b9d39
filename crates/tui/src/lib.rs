pub mod app;
pub mod forms;
pub mod keymap;
pub mod view;
pub mod worker;

use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::Terminal;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use app::{App, LaunchOptions};

use app::Command;
use keymap::{map_key_event, Msg};
use view::Viewports;
use worker::Worker;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to start background runtime: {0}")]
    Runtime(#[source] io::Error),
}

pub fn run(options: LaunchOptions) -> Result<(), TuiError> {
    let worker = Worker::new().map_err(TuiError::Runtime)?;
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, App::from_options(options), worker);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut app: App,
    mut worker: Worker,
) -> Result<(), TuiError> {
    info!("event loop started");
    let result = drive(terminal, &mut app, &mut worker);
    info!("event loop finished");
    worker.shutdown();
    result
}

fn drive(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut App,
    worker: &mut Worker,
) -> Result<(), TuiError> {
    let tick_rate = app.settings().tick_rate();
    let mut last_tick = Instant::now();
    let mut viewports = None;

    loop {
        let size = terminal.size()?;
        let current = Viewports::for_area(Rect::new(0, 0, size.width, size.height));
        if viewports != Some(current) {
            app.apply_viewports(current);
            viewports = Some(current);
        }

        dispatch_commands(app, worker);
        terminal.draw(|frame| view::render(frame, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.key_context()) {
                        let children = worker.children(app.loader());
                        app.handle(message, &children);
                    }
                }
            }
        }

        while let Some(event) = worker.try_next() {
            app.handle_worker_event(event);
        }

        if last_tick.elapsed() >= tick_rate {
            app.handle(Msg::Tick, &worker.children(None));
            last_tick = Instant::now();
        }

        if app.should_quit() {
            return Ok(());
        }
    }
}

fn dispatch_commands(app: &mut App, worker: &Worker) {
    for command in app.drain_commands() {
        match command {
            Command::Connect { ticket, info } => {
                debug!(connection = %info.name, "connecting");
                worker.connect(ticket, info);
            }
            Command::Load { ticket, request } => match app.loader() {
                Some(loader) => {
                    debug!(request = %request.describe(), "submitting");
                    worker.submit(ticket, loader, request);
                }
                None => warn!(request = %request.describe(), "no session; request dropped"),
            },
            Command::HealthCheck { ticket } => worker.health_check(ticket),
        }
    }
}
