//! Main application logic for the terminal user interface.
//!
//! `App` owns the dashboard state: the delivery directory with its search,
//! client filter and sort, the open delivery, the scheduling form, and the
//! dialogs. Network work goes through the [`Worker`]; responses are applied in
//! [`App::handle_response`] only while they still match what is on screen.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use ratatui::{
    backend::Backend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Gauge, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use tracing::{debug, info, warn};

use crate::{
    cmd::truncate,
    delivery::format_local,
    detail::DeliveryDetail,
    directory::{DeliveryDirectory, ListQuery},
    fields::ScheduleMode,
    scheduler::ScheduleDraft,
    tui::{
        colors::{progress_color, text_on, DARK_PURPLE, DARK_RED, GOLD},
        enums::{AppState, InputMode, PendingAction},
        input::InputField,
        schedule_form::{
            ScheduleForm, DAYS_ORDER, FIRST_DAY_ORDER, PERSON_ORDER, SLOT_ORDER, START_DATE_ORDER,
            TASK_NAME_ORDER,
        },
        utils::centered_rect,
        worker::{Request, Response, Worker},
    },
};

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

pub struct App {
    state: AppState,
    worker: Worker,
    directory: DeliveryDirectory,
    query: ListQuery,
    list_state: TableState,
    search: InputField,
    input_mode: InputMode,
    /// Delivery the detail screen is showing or waiting for.
    detail_code: Option<String>,
    detail: Option<DeliveryDetail>,
    detail_state: TableState,
    form: Option<ScheduleForm>,
    confirm_action: Option<PendingAction>,
    /// Screen to return to when Help closes.
    help_return: AppState,
    error_message: String,
    status_message: String,
    tick: usize,
}

impl App {
    /// Create the app and request the first page of deliveries.
    pub fn new(worker: Worker) -> Self {
        let mut app = App {
            state: AppState::DeliveryList,
            worker,
            directory: DeliveryDirectory::new(),
            query: ListQuery::default(),
            list_state: TableState::default(),
            search: InputField::new(),
            input_mode: InputMode::None,
            detail_code: None,
            detail: None,
            detail_state: TableState::default(),
            form: None,
            confirm_action: None,
            help_return: AppState::DeliveryList,
            error_message: String::new(),
            status_message: String::new(),
            tick: 0,
        };
        app.request_next_page();
        app
    }

    fn request_next_page(&mut self) {
        if !self.directory.wants_more() {
            return;
        }
        self.directory.loading = true;
        self.worker.dispatch(Request::Page { page: self.directory.next_page });
    }

    fn visible_codes(&self) -> Vec<String> {
        self.directory
            .visible(&self.query)
            .into_iter()
            .map(|d| d.code.clone())
            .collect()
    }

    fn selected_code(&self) -> Option<String> {
        let index = self.list_state.selected()?;
        self.visible_codes().into_iter().nth(index)
    }

    /// Keep the list selection inside the visible rows.
    fn clamp_selection(&mut self) {
        let len = self.visible_codes().len();
        match self.list_state.selected() {
            _ if len == 0 => self.list_state.select(None),
            None => self.list_state.select(Some(0)),
            Some(i) if i >= len => self.list_state.select(Some(len - 1)),
            Some(_) => {}
        }
    }

    fn show_error(&mut self, message: String) {
        warn!(%message, "showing error");
        self.error_message = message;
        self.state = AppState::Error;
    }

    fn open_detail(&mut self, code: String) {
        info!(%code, "opening delivery");
        self.detail = None;
        self.detail_state = TableState::default();
        self.detail_code = Some(code.clone());
        self.state = AppState::DeliveryDetail;
        self.worker.dispatch(Request::Detail { code });
    }

    fn close_detail(&mut self) {
        self.detail_code = None;
        self.detail = None;
        self.form = None;
        self.state = AppState::DeliveryList;
    }

    fn open_form(&mut self, draft: ScheduleDraft) {
        let Some(code) = self.detail_code.clone() else {
            return;
        };
        let key = draft.key().to_string();
        self.form = Some(ScheduleForm::new(&code, draft));
        self.state = AppState::ScheduleForm;
        self.worker.dispatch(Request::History { key });
    }

    fn selected_task_key(&self) -> Option<String> {
        let detail = self.detail.as_ref()?;
        let index = self.detail_state.selected()?;
        detail.tasks.get(index).map(|t| t.key().to_string())
    }

    /// Apply a finished request if it still belongs to the current view.
    pub fn handle_response(&mut self, response: Response) {
        match response {
            Response::Page { page, result } => {
                if !self.directory.loading || page != self.directory.next_page {
                    debug!(page, expected = self.directory.next_page, "discarding stale page");
                    return;
                }
                match result {
                    Ok(rows) => {
                        let added = self.directory.finish_page(&rows);
                        debug!(page, added, "page merged");
                        self.clamp_selection();
                    }
                    Err(e) => {
                        self.directory.loading = false;
                        warn!(page, error = %e, "page failed");
                        self.status_message = format!("{e} (press 'n' to retry)");
                    }
                }
            }
            Response::Detail { code, result } => {
                if self.detail_code.as_deref() != Some(code.as_str()) {
                    debug!(%code, "discarding stale delivery detail");
                    return;
                }
                match result {
                    Ok(detail) => {
                        if !detail.tasks.is_empty() {
                            self.detail_state.select(Some(0));
                        }
                        self.detail = Some(*detail);
                    }
                    Err(e) => self.show_error(e.to_string()),
                }
            }
            Response::History { key, result } => {
                let Some(form) = self.form.as_mut() else {
                    debug!(%key, "discarding history, form closed");
                    return;
                };
                match result {
                    Ok((entry, allocations)) => {
                        if form.draft.load_history(&key, entry.as_ref()) {
                            form.draft.load_allocations(&allocations);
                            form.sync_from_draft();
                            form.update_active_field();
                            form.history_loaded = true;
                        }
                    }
                    Err(e) if key == form.key() => form.error = Some(e.to_string()),
                    Err(_) => debug!(%key, "discarding stale history failure"),
                }
            }
            Response::Submitted { code, key, result } => {
                let form_matches = self
                    .form
                    .as_ref()
                    .is_some_and(|f| f.delivery_code == code && f.key() == key);
                match result {
                    Ok(receipt) => {
                        if let Some(detail) = self.detail.as_mut().filter(|d| d.code == code) {
                            detail.apply_receipt(&receipt);
                        }
                        if form_matches {
                            self.form = None;
                            self.state = AppState::DeliveryDetail;
                        }
                        self.status_message = format!("Task {key} scheduled");
                    }
                    Err(e) => match self.form.as_mut() {
                        Some(form) if form_matches => {
                            form.submitting = false;
                            form.error = Some(e.to_string());
                        }
                        _ => self.status_message = e.to_string(),
                    },
                }
            }
            Response::Deleted { code, result } => match result {
                Ok(message) => {
                    self.directory.remove(&code);
                    self.clamp_selection();
                    self.status_message = message;
                }
                Err(e) => self.status_message = e.to_string(),
            },
        }
    }

    fn move_list_selection(&mut self, down: bool) {
        let len = self.visible_codes().len();
        if len == 0 {
            return;
        }
        let current = self.list_state.selected().unwrap_or(0);
        let next = if down { (current + 1).min(len - 1) } else { current.saturating_sub(1) };
        self.list_state.select(Some(next));
        if down && next == len - 1 {
            self.request_next_page();
        }
    }

    fn cycle_client(&mut self) {
        let clients = self.directory.clients();
        self.query.client = match clients.iter().position(|c| *c == self.query.client) {
            None if self.query.client.is_empty() => clients.first().cloned().unwrap_or_default(),
            Some(i) if i + 1 < clients.len() => clients[i + 1].clone(),
            _ => String::new(),
        };
        self.list_state.select(Some(0));
        self.clamp_selection();
    }

    fn handle_list_input(&mut self, key: KeyCode, modifiers: KeyModifiers) -> bool {
        if self.input_mode == InputMode::Search {
            match key {
                KeyCode::Esc => {
                    self.search.clear();
                    self.input_mode = InputMode::None;
                }
                KeyCode::Enter => self.input_mode = InputMode::None,
                KeyCode::Backspace => self.search.handle_backspace(),
                KeyCode::Left => self.search.move_cursor_left(),
                KeyCode::Right => self.search.move_cursor_right(),
                KeyCode::Char(c) => self.search.handle_char(c),
                _ => {}
            }
            self.query.search = self.search.value.clone();
            self.clamp_selection();
            return false;
        }

        match key {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Up | KeyCode::Char('k') => self.move_list_selection(false),
            KeyCode::Down | KeyCode::Char('j') => self.move_list_selection(true),
            KeyCode::Enter => {
                if let Some(code) = self.selected_code() {
                    self.open_detail(code);
                }
            }
            KeyCode::Char('/') => {
                self.input_mode = InputMode::Search;
                self.search.active = true;
            }
            KeyCode::Char('c') => self.cycle_client(),
            KeyCode::Char('s') => self.query.sort = self.query.sort.toggled(),
            KeyCode::Char('n') => {
                self.directory.exhausted = false;
                self.request_next_page();
            }
            KeyCode::Char('d') => {
                if let Some(code) = self.selected_code() {
                    self.confirm_action = Some(PendingAction::DeleteDelivery(code));
                    self.state = AppState::Confirm;
                }
            }
            KeyCode::Char('h') | KeyCode::F(1) => {
                self.help_return = AppState::DeliveryList;
                self.state = AppState::Help;
            }
            _ => {}
        }
        false
    }

    fn handle_detail_input(&mut self, key: KeyCode, modifiers: KeyModifiers) -> bool {
        let task_count = self.detail.as_ref().map_or(0, |d| d.tasks.len());
        match key {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return true,
            KeyCode::Esc | KeyCode::Char('q') => self.close_detail(),
            KeyCode::Up | KeyCode::Char('k') => {
                if let Some(i) = self.detail_state.selected() {
                    self.detail_state.select(Some(i.saturating_sub(1)));
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if let Some(i) = self.detail_state.selected() {
                    self.detail_state.select(Some((i + 1).min(task_count.saturating_sub(1))));
                }
            }
            KeyCode::Enter => {
                let Some(key) = self.selected_task_key() else {
                    return false;
                };
                match self.detail.as_ref().and_then(|d| d.open_task(&key)) {
                    Some(draft) => self.open_form(draft),
                    None => {
                        self.status_message =
                            "Task already scheduled; press 'r' to reschedule or 'a' to reassign".into();
                    }
                }
            }
            KeyCode::Char(c @ ('r' | 'a')) => {
                let mode = if c == 'r' { ScheduleMode::Reschedule } else { ScheduleMode::Reassign };
                let draft = self
                    .selected_task_key()
                    .and_then(|key| self.detail.as_ref()?.open_task_action(&key, mode));
                if let Some(draft) = draft {
                    self.open_form(draft);
                }
            }
            KeyCode::Char('h') | KeyCode::F(1) => {
                self.help_return = AppState::DeliveryDetail;
                self.state = AppState::Help;
            }
            _ => {}
        }
        false
    }

    fn handle_form_input(&mut self, key: KeyCode, modifiers: KeyModifiers) -> bool {
        let Some(form) = self.form.as_mut() else {
            self.state = AppState::DeliveryDetail;
            return false;
        };
        match key {
            KeyCode::Esc => {
                self.form = None;
                self.state = AppState::DeliveryDetail;
            }
            KeyCode::Char('s') if modifiers.contains(KeyModifiers::CONTROL) => {
                if form.submitting {
                    return false;
                }
                if let Ok(draft) = form.prepare_submit() {
                    form.submitting = true;
                    let code = form.delivery_code.clone();
                    self.worker.dispatch(Request::Submit { code, draft: Box::new(draft) });
                }
            }
            KeyCode::Tab | KeyCode::Down => form.next_field(),
            KeyCode::BackTab | KeyCode::Up => form.prev_field(),
            KeyCode::Left => form.handle_left_right(false),
            KeyCode::Right => form.handle_left_right(true),
            KeyCode::Backspace => form.handle_backspace(),
            KeyCode::Enter => form.next_field(),
            KeyCode::Char(c) => form.handle_char(c),
            _ => {}
        }
        false
    }

    fn handle_confirm_input(&mut self, key: KeyCode) -> bool {
        match key {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(PendingAction::DeleteDelivery(code)) = self.confirm_action.take() {
                    self.worker.dispatch(Request::Delete { code });
                }
                self.state = AppState::DeliveryList;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.confirm_action = None;
                self.state = AppState::DeliveryList;
            }
            _ => {}
        }
        false
    }

    /// Dispatch a key press to the current screen. Returns `true` to quit.
    pub fn handle_key(&mut self, key: KeyCode, modifiers: KeyModifiers) -> bool {
        if self.state != AppState::ScheduleForm {
            self.status_message.clear();
        }
        match self.state {
            AppState::DeliveryList => self.handle_list_input(key, modifiers),
            AppState::DeliveryDetail => self.handle_detail_input(key, modifiers),
            AppState::ScheduleForm => self.handle_form_input(key, modifiers),
            AppState::Confirm => self.handle_confirm_input(key),
            AppState::Help => {
                self.state = self.help_return;
                false
            }
            AppState::Error => {
                if matches!(key, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q')) {
                    self.close_detail();
                }
                false
            }
        }
    }

    /// Render the delivery directory.
    fn render_list(&mut self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(area);

        let client = if self.query.client.is_empty() { "All clients" } else { self.query.client.as_str() };
        let header_text = Line::from(vec![
            Span::styled("DELIVERY TRACKER", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  "),
            Span::styled(
                format!("{}  |  Sorted by {}  |  {}", client, self.query.sort.label(), self.worker.email()),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::ITALIC),
            ),
        ]);
        f.render_widget(
            Paragraph::new(header_text)
                .block(Block::default().borders(Borders::ALL))
                .alignment(Alignment::Center),
            chunks[0],
        );

        let header = Row::new(
            ["Code", "Client", "Initiated", "Deadline", "Planned"]
                .iter()
                .map(|h| Cell::from(*h).style(Style::default().add_modifier(Modifier::BOLD))),
        )
        .style(Style::default().bg(DARK_PURPLE).fg(Color::White));

        let visible = self.directory.visible(&self.query);
        let shown = visible.len();
        let rows: Vec<Row> = visible
            .iter()
            .map(|d| {
                let planned = format!(
                    "{}/{} ({:.0}%)",
                    d.tasks_planned,
                    d.tasks_total,
                    d.progress() * 100.0
                );
                Row::new(vec![
                    Cell::from(d.code.clone()),
                    Cell::from(truncate(&d.client, 24)),
                    Cell::from(d.initiated_label()),
                    Cell::from(d.deadline.clone()),
                    Cell::from(planned).style(Style::default().fg(progress_color(d.progress()))),
                ])
            })
            .collect();

        let widths = [
            Constraint::Length(14),
            Constraint::Length(26),
            Constraint::Length(18),
            Constraint::Length(22),
            Constraint::Min(12),
        ];
        let more = if self.directory.exhausted { "" } else { "+" };
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(format!(
                "Deliveries ({}/{}{}) - Press 'h' for help",
                shown,
                self.directory.deliveries.len(),
                more
            )))
            .row_highlight_style(Style::default().bg(Color::Gray).fg(Color::Black))
            .highlight_symbol(">> ");

        f.render_stateful_widget(table, chunks[1], &mut self.list_state);
    }

    /// Render the open delivery and its tasks.
    fn render_detail(&mut self, f: &mut Frame, area: Rect) {
        let Some(detail) = &self.detail else {
            let code = self.detail_code.as_deref().unwrap_or("");
            f.render_widget(
                Paragraph::new(format!("Loading delivery {code}..."))
                    .block(Block::default().borders(Borders::ALL).title("Delivery"))
                    .alignment(Alignment::Center),
                area,
            );
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(7), Constraint::Min(0)])
            .split(area);

        let bold = Style::default().add_modifier(Modifier::BOLD);
        let text = vec![
            Line::from(vec![Span::styled("Delivery: ", bold), Span::raw(&detail.code)]),
            Line::from(vec![Span::styled("Client: ", bold), Span::raw(&detail.client)]),
            Line::from(vec![Span::styled("Description: ", bold), Span::raw(&detail.short_description)]),
            Line::from(vec![
                Span::styled("Planned: ", bold),
                Span::raw(format!(
                    "{} -> {}",
                    format_local(detail.planned_start, "No start time"),
                    format_local(detail.planned_delivery, "No delivery time")
                )),
            ]),
        ];
        f.render_widget(
            Paragraph::new(text)
                .block(Block::default().borders(Borders::ALL).title("Delivery Details"))
                .wrap(Wrap { trim: true }),
            chunks[0],
        );

        let header = Row::new(
            ["Key", "Task", "Responsible", "Time", "Status"]
                .iter()
                .map(|h| Cell::from(*h).style(bold)),
        )
        .style(Style::default().bg(DARK_PURPLE).fg(Color::White));

        let rows: Vec<Row> = detail
            .tasks
            .iter()
            .map(|t| {
                let (status, style) = if t.scheduled {
                    ("Scheduled", Style::default().fg(Color::DarkGray))
                } else {
                    ("Unscheduled", Style::default().fg(Color::White))
                };
                Row::new(vec![
                    Cell::from(t.key().to_string()),
                    Cell::from(t.title().to_string()),
                    Cell::from(t.person_responsible.clone()),
                    Cell::from(t.time_label()),
                    Cell::from(status),
                ])
                .style(style)
            })
            .collect();

        let widths = [
            Constraint::Length(10),
            Constraint::Min(30),
            Constraint::Length(20),
            Constraint::Length(10),
            Constraint::Length(12),
        ];
        let table = Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(
                "Tasks - [Enter] schedule, [r]eschedule, [a]ssign, [Esc] back",
            ))
            .row_highlight_style(Style::default().bg(Color::Gray).fg(Color::Black))
            .highlight_symbol(">> ");
        f.render_stateful_widget(table, chunks[1], &mut self.detail_state);
    }

    /// Render the scheduling form over the detail screen.
    fn render_form(&mut self, f: &mut Frame, area: Rect) {
        let Some(form) = &self.form else {
            return;
        };
        let area = centered_rect(80, 90, area);
        f.render_widget(Clear, area);

        let title = format!("{} Task {}", form.draft.mode.label(), form.key());
        let block = Block::default().borders(Borders::ALL).title(title);
        let inner = block.inner(area);
        f.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(6), Constraint::Min(0), Constraint::Length(3)])
            .split(inner);

        let label = |order: usize, name: &str| {
            let style = if form.current_field == order {
                Style::default().fg(GOLD).add_modifier(Modifier::BOLD)
            } else {
                Style::default().add_modifier(Modifier::BOLD)
            };
            Span::styled(format!("{name:<18}"), style)
        };
        let end = form
            .draft
            .end_date()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into());
        let fields = vec![
            Line::from(vec![label(TASK_NAME_ORDER, "Task name"), Span::raw(&form.task_name.value)]),
            Line::from(vec![label(PERSON_ORDER, "Responsible"), Span::raw(&form.person.value)]),
            Line::from(vec![
                label(START_DATE_ORDER, "Start (YYYY-MM-DD)"),
                Span::raw(&form.start_date.value),
                Span::styled(format!("   ends {end}"), Style::default().fg(Color::DarkGray)),
            ]),
            Line::from(vec![label(DAYS_ORDER, "Number of days"), Span::raw(&form.days.value)]),
            Line::from(vec![label(SLOT_ORDER, "Delivery slot"), Span::raw(format!("< {} >", form.slot_label()))]),
            Line::from(vec![
                Span::styled(format!("{:<18}", "Total time"), Style::default().add_modifier(Modifier::BOLD)),
                Span::raw(form.draft.total_time_label()),
            ]),
        ];
        f.render_widget(Paragraph::new(fields), chunks[0]);

        // One gauge per day, scrolled so the selected day stays visible.
        let day_area = chunks[1];
        let capacity = day_area.height as usize;
        let first = form.current_day().map_or(0, |d| d.saturating_sub(capacity.saturating_sub(1)));
        for (row, index) in (first..form.day_inputs.len()).take(capacity).enumerate() {
            let rect = Rect::new(day_area.x, day_area.y + row as u16, day_area.width, 1);
            let minutes = form.draft.durations().get(index).copied().unwrap_or(0);
            let ceiling = form.draft.capacity_ceiling(index);
            let date = form.draft.day_date(index).map(|d| d.to_string()).unwrap_or_else(|| "----------".into());
            let committed = form
                .draft
                .committed(index)
                .map(|c| format!(", {c} booked"))
                .unwrap_or_default();
            let ratio = if ceiling == 0 { 0.0 } else { (minutes as f64 / ceiling as f64).clamp(0.0, 1.0) };
            let selected = form.current_field == FIRST_DAY_ORDER + index;
            let color = if selected { GOLD } else if ceiling == 0 { DARK_RED } else { DARK_PURPLE };
            let gauge = Gauge::default()
                .gauge_style(Style::default().fg(color).bg(Color::Black))
                .ratio(ratio)
                .label(format!(
                    "Day {} {}: {} min (max {}{})",
                    index + 1,
                    date,
                    form.day_inputs[index].value,
                    ceiling,
                    committed
                ));
            f.render_widget(gauge, rect);
        }

        let footer = match (&form.error, form.submitting, form.history_loaded) {
            (Some(err), _, _) => Span::styled(err.clone(), Style::default().fg(Color::Red)),
            (None, true, _) => Span::raw("Submitting..."),
            (None, false, false) => Span::raw("Loading task history..."),
            (None, false, true) => Span::raw("Tab/Shift+Tab move, Left/Right adjust, Ctrl+S submit, Esc cancel"),
        };
        f.render_widget(
            Paragraph::new(Line::from(footer))
                .block(Block::default().borders(Borders::TOP))
                .wrap(Wrap { trim: true }),
            chunks[2],
        );
    }

    fn render_help(&mut self, f: &mut Frame, area: Rect) {
        let bold = Style::default().add_modifier(Modifier::BOLD);
        let help_text = vec![
            Line::from(vec![Span::styled("Delivery Tracker Help", bold)]),
            Line::from(""),
            Line::from(vec![Span::styled("Delivery List:", bold)]),
            Line::from("  Up/Down, j/k   Move (the last row loads more)"),
            Line::from("  Enter          Open delivery"),
            Line::from("  /              Search by client"),
            Line::from("  c              Cycle client filter"),
            Line::from("  s              Toggle earliest/latest initiated"),
            Line::from("  n              Load next page"),
            Line::from("  d              Delete delivery"),
            Line::from("  q/Esc          Quit"),
            Line::from(""),
            Line::from(vec![Span::styled("Delivery Detail:", bold)]),
            Line::from("  Enter          Schedule an unscheduled task"),
            Line::from("  r / a          Reschedule / reassign a task"),
            Line::from("  Esc            Back to list"),
            Line::from(""),
            Line::from(vec![Span::styled("Schedule Form:", bold)]),
            Line::from("  Tab/Shift+Tab  Move between fields"),
            Line::from("  Left/Right     Change slot, or slide a day's minutes"),
            Line::from("  Ctrl+S         Submit"),
            Line::from("  Esc            Cancel"),
            Line::from(""),
            Line::from("Nobody is planned beyond 8 hours on any day."),
        ];
        f.render_widget(
            Paragraph::new(help_text)
                .block(Block::default().borders(Borders::ALL).title("Help - Press any key to return"))
                .wrap(Wrap { trim: true }),
            area,
        );
    }

    fn render_confirm(&mut self, f: &mut Frame, area: Rect) {
        let area = centered_rect(50, 20, area);
        f.render_widget(Clear, area);
        let action = self.confirm_action.as_ref().map(PendingAction::describe).unwrap_or_default();
        let text = vec![
            Line::from(""),
            Line::from(vec![Span::styled(
                "Are you sure you want to:",
                Style::default().add_modifier(Modifier::BOLD),
            )]),
            Line::from(action),
            Line::from(""),
            Line::from("Press 'y' to confirm, 'n' to cancel"),
        ];
        f.render_widget(
            Paragraph::new(text)
                .block(Block::default().title("Confirm Action").borders(Borders::ALL).style(Style::default().bg(DARK_RED)))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true }),
            area,
        );
    }

    fn render_error(&mut self, f: &mut Frame, area: Rect) {
        let area = centered_rect(60, 25, area);
        f.render_widget(Clear, area);
        let text = vec![
            Line::from(""),
            Line::from(self.error_message.as_str()),
            Line::from(""),
            Line::from("Press Esc to return to the delivery list"),
        ];
        f.render_widget(
            Paragraph::new(text)
                .block(Block::default().title("Error").borders(Borders::ALL).style(Style::default().bg(DARK_RED)))
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true }),
            area,
        );
    }

    fn status_text(&self) -> String {
        let loading = if self.worker.busy() {
            format!("{} Loading...  ", SPINNER[self.tick % SPINNER.len()])
        } else {
            String::new()
        };
        let body = if !self.status_message.is_empty() {
            self.status_message.clone()
        } else if self.input_mode == InputMode::Search {
            format!("Search: {} (Esc to clear, Enter to confirm)", self.search.value)
        } else {
            match self.state {
                AppState::DeliveryList if !self.query.search.is_empty() => format!(
                    "Deliveries: {} (client matching '{}') | Press 'h' for help",
                    self.directory.visible(&self.query).len(),
                    self.query.search
                ),
                AppState::DeliveryList => {
                    format!("Deliveries: {} | Press 'h' for help", self.directory.visible(&self.query).len())
                }
                AppState::DeliveryDetail => "Delivery Details".to_string(),
                AppState::ScheduleForm => "Schedule Task".to_string(),
                AppState::Help => "Help".to_string(),
                AppState::Confirm => "Confirm Action".to_string(),
                AppState::Error => "Error".to_string(),
            }
        };
        format!("{loading}{body}")
    }

    fn render_status_bar(&mut self, f: &mut Frame, area: Rect) {
        let bg = if self.worker.busy() { GOLD } else { DARK_PURPLE };
        f.render_widget(
            Paragraph::new(self.status_text())
                .style(Style::default().bg(bg).fg(text_on(bg)))
                .alignment(Alignment::Left),
            area,
        );
    }

    fn render(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(f.area());

        match self.state {
            AppState::DeliveryList => self.render_list(f, chunks[0]),
            AppState::DeliveryDetail => self.render_detail(f, chunks[0]),
            AppState::ScheduleForm => {
                self.render_detail(f, chunks[0]);
                self.render_form(f, chunks[0]);
            }
            AppState::Help => self.render_help(f, chunks[0]),
            AppState::Confirm => {
                self.render_list(f, chunks[0]);
                self.render_confirm(f, chunks[0]);
            }
            AppState::Error => {
                self.render_list(f, chunks[0]);
                self.render_error(f, chunks[0]);
            }
        }

        self.render_status_bar(f, chunks[1]);
    }

    /// Main event loop: draw, apply finished requests, handle one key.
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            while let Some(response) = self.worker.try_recv() {
                self.handle_response(response);
            }
            self.tick = self.tick.wrapping_add(1);
            terminal.draw(|f| self.render(f))?;

            if event::poll(Duration::from_millis(80))? {
                if let Event::Key(key) = event::read()? {
                    if self.handle_key(key.code, key.modifiers) {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::runtime::Handle;

    use super::*;
    use crate::api::fake::FakeApi;
    use crate::delivery::{DeliveryPage, KeyDurations, KeyEntry, TaskRecord};
    use crate::error::{AppError, ScheduleError};
    use crate::scheduler::ScheduleReceipt;
    use crate::session::{token_for, Session};
    use crate::tui::worker::Worker;

    fn app() -> App {
        let session = Session::from_token(&token_for("a@example.com", None)).unwrap();
        App::new(Worker::new(Handle::current(), Arc::new(FakeApi::default()), session))
    }

    fn header(code: &str, client: &str, start: &str) -> TaskRecord {
        serde_json::from_value(json!({
            "DelCode_w_o__": code, "Step_ID": "0", "Client": client, "Key": format!("{code}-H"),
            "Planned_Start_Timestamp": { "value": start }
        }))
        .unwrap()
    }

    fn page(headers: &[(&str, &str, &str)]) -> DeliveryPage {
        headers
            .iter()
            .map(|(code, client, start)| (code.to_string(), vec![header(code, client, start)]))
            .collect()
    }

    fn detail(code: &str) -> DeliveryDetail {
        let rows: Vec<TaskRecord> = serde_json::from_value(json!([
            { "DelCode_w_o__": code, "Step_ID": 0, "Client": "Omved", "Key": "H" },
            { "DelCode_w_o__": code, "Step_ID": 1, "Key": "K1", "Task_Details": "Wireframes", "Responsibility": "A" }
        ]))
        .unwrap();
        let page = DeliveryPage::from([(code.to_string(), rows)]);
        DeliveryDetail::from_parts(code, &page, &KeyDurations::new()).unwrap()
    }

    fn press(app: &mut App, key: KeyCode) {
        app.handle_key(key, KeyModifiers::NONE);
    }

    #[tokio::test]
    async fn test_first_page_requested_on_start() {
        let app = app();
        assert!(app.directory.loading);
        assert_eq!(app.directory.next_page, 0);
        assert!(app.worker.busy());
    }

    #[tokio::test]
    async fn test_stale_page_is_discarded() {
        let mut app = app();
        let rows = page(&[("DEL-1", "Omved", "2024-06-01T09:00:00Z")]);
        app.handle_response(Response::Page { page: 4, result: Ok(rows.clone()) });
        assert!(app.directory.deliveries.is_empty());

        app.handle_response(Response::Page { page: 0, result: Ok(rows) });
        assert_eq!(app.directory.deliveries.len(), 1);
        assert_eq!(app.directory.next_page, 1);
        assert_eq!(app.list_state.selected(), Some(0));
    }

    #[tokio::test]
    async fn test_stale_detail_is_discarded() {
        let mut app = app();
        app.open_detail("DEL-1".into());
        app.handle_response(Response::Detail { code: "DEL-2".into(), result: Ok(Box::new(detail("DEL-2"))) });
        assert!(app.detail.is_none());

        app.handle_response(Response::Detail { code: "DEL-1".into(), result: Ok(Box::new(detail("DEL-1"))) });
        assert_eq!(app.detail.as_ref().unwrap().code, "DEL-1");

        press(&mut app, KeyCode::Esc);
        app.handle_response(Response::Detail { code: "DEL-1".into(), result: Ok(Box::new(detail("DEL-1"))) });
        assert!(app.detail.is_none());
        assert_eq!(app.state, AppState::DeliveryList);
    }

    #[tokio::test]
    async fn test_history_for_another_task_is_ignored() {
        let mut app = app();
        app.open_detail("DEL-1".into());
        app.handle_response(Response::Detail { code: "DEL-1".into(), result: Ok(Box::new(detail("DEL-1"))) });
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.state, AppState::ScheduleForm);

        let entry = KeyEntry { entries: vec![], total_duration: 200 };
        app.handle_response(Response::History { key: "K9".into(), result: Ok((Some(entry.clone()), vec![])) });
        let form = app.form.as_ref().unwrap();
        assert!(!form.history_loaded);
        assert_eq!(form.draft.total_minutes(), 0);

        app.handle_response(Response::History { key: "K1".into(), result: Ok((Some(entry), vec![])) });
        assert_eq!(app.form.as_ref().unwrap().draft.total_time_label(), "3h 20m");
    }

    #[tokio::test]
    async fn test_failed_submit_keeps_the_form() {
        let mut app = app();
        app.open_detail("DEL-1".into());
        app.handle_response(Response::Detail { code: "DEL-1".into(), result: Ok(Box::new(detail("DEL-1"))) });
        press(&mut app, KeyCode::Enter);
        app.form.as_mut().unwrap().submitting = true;

        let err = AppError::Schedule(ScheduleError::InvalidDate("x".into()));
        app.handle_response(Response::Submitted { code: "DEL-1".into(), key: "K1".into(), result: Err(err) });
        let form = app.form.as_ref().unwrap();
        assert!(!form.submitting);
        assert!(form.error.is_some());
        assert_eq!(form.draft.task_name, "Wireframes");
        assert_eq!(app.state, AppState::ScheduleForm);
    }

    #[tokio::test]
    async fn test_successful_submit_updates_the_task() {
        let mut app = app();
        app.open_detail("DEL-1".into());
        app.handle_response(Response::Detail { code: "DEL-1".into(), result: Ok(Box::new(detail("DEL-1"))) });
        press(&mut app, KeyCode::Enter);

        let receipt = ScheduleReceipt {
            key: "K1".into(),
            responsible: "B".into(),
            total_minutes: 90,
            planned_delivery: Some("2024-06-03 16:00:00.000000 UTC".into()),
        };
        app.handle_response(Response::Submitted { code: "DEL-1".into(), key: "K1".into(), result: Ok(receipt) });
        assert!(app.form.is_none());
        assert_eq!(app.state, AppState::DeliveryDetail);
        let task = app.detail.as_ref().unwrap().task("K1").unwrap();
        assert!(task.scheduled);
        assert_eq!(task.person_responsible, "B");
        assert_eq!(task.time_label(), "1h 30m");

        // A scheduled task no longer opens the form on Enter.
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.state, AppState::DeliveryDetail);
        press(&mut app, KeyCode::Char('r'));
        assert_eq!(app.form.as_ref().unwrap().draft.mode, ScheduleMode::Reschedule);
    }

    #[tokio::test]
    async fn test_client_filter_cycles_back_to_all() {
        let mut app = app();
        let rows = page(&[
            ("DEL-1", "Omved", "2024-06-01T09:00:00Z"),
            ("DEL-2", "Vedam", "2024-06-02T09:00:00Z"),
        ]);
        app.handle_response(Response::Page { page: 0, result: Ok(rows) });

        press(&mut app, KeyCode::Char('c'));
        assert_eq!(app.query.client, "Omved");
        press(&mut app, KeyCode::Char('c'));
        assert_eq!(app.query.client, "Vedam");
        assert_eq!(app.visible_codes(), vec!["DEL-2"]);
        press(&mut app, KeyCode::Char('c'));
        assert_eq!(app.query.client, "");
        assert_eq!(app.visible_codes().len(), 2);
    }

    #[tokio::test]
    async fn test_search_and_sort_keys() {
        let mut app = app();
        let rows = page(&[
            ("DEL-1", "Omved", "2024-06-01T09:00:00Z"),
            ("DEL-2", "Vedam", "2024-06-02T09:00:00Z"),
        ]);
        app.handle_response(Response::Page { page: 0, result: Ok(rows) });
        assert_eq!(app.visible_codes(), vec!["DEL-1", "DEL-2"]);
        press(&mut app, KeyCode::Char('s'));
        assert_eq!(app.visible_codes(), vec!["DEL-2", "DEL-1"]);

        press(&mut app, KeyCode::Char('/'));
        for c in "VED".chars() {
            press(&mut app, KeyCode::Char(c));
        }
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.visible_codes(), vec!["DEL-2"]);
        assert_eq!(app.input_mode, InputMode::None);
    }

    #[tokio::test]
    async fn test_delete_needs_confirmation() {
        let mut app = app();
        let rows = page(&[
            ("DEL-1", "Omved", "2024-06-01T09:00:00Z"),
            ("DEL-2", "Vedam", "2024-06-02T09:00:00Z"),
        ]);
        app.handle_response(Response::Page { page: 0, result: Ok(rows) });

        press(&mut app, KeyCode::Char('d'));
        assert_eq!(app.state, AppState::Confirm);
        assert_eq!(app.confirm_action, Some(PendingAction::DeleteDelivery("DEL-1".into())));
        press(&mut app, KeyCode::Char('n'));
        assert_eq!(app.state, AppState::DeliveryList);
        assert!(app.confirm_action.is_none());

        press(&mut app, KeyCode::Char('d'));
        press(&mut app, KeyCode::Char('y'));
        assert!(app.confirm_action.is_none());
        assert_eq!(app.directory.deliveries.len(), 2);

        app.handle_response(Response::Deleted { code: "DEL-1".into(), result: Ok("Delivery DEL-1 deleted.".into()) });
        assert_eq!(app.visible_codes(), vec!["DEL-2"]);
        assert_eq!(app.status_message, "Delivery DEL-1 deleted.");
    }

    #[tokio::test]
    async fn test_detail_failure_shows_error_and_returns_to_list() {
        let mut app = app();
        app.open_detail("DEL-9".into());
        app.handle_response(Response::Detail {
            code: "DEL-9".into(),
            result: Err(AppError::DeliveryNotFound("DEL-9".into())),
        });
        assert_eq!(app.state, AppState::Error);
        assert!(app.error_message.contains("DEL-9"));
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.state, AppState::DeliveryList);
    }
}
