//! Dashboard entry point and terminal setup.

use std::{io, sync::Arc};

use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{prelude::CrosstermBackend, Terminal};
use tokio::runtime::Handle;
use tracing::info;

use crate::api::DeliveryApi;
use crate::session::Session;
use crate::tui::{app::App, worker::Worker};

/// Take over the terminal and run the dashboard until the user quits.
/// Requests are spawned onto `handle`.
pub fn run_tui(handle: Handle, api: Box<dyn DeliveryApi>, session: Session) -> io::Result<()> {
    info!(email = %session.email, "starting dashboard");
    let worker = Worker::new(handle, Arc::from(api), session);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(worker);
    let result = app.run(&mut terminal);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}
