//! Command implementations for the CLI interface.
//!
//! Each subcommand loads what it needs (session, API client), drives the
//! directory, detail or scheduler, and prints a plain-text result. Errors are
//! returned to `main`, which reports them and exits non-zero.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use chrono::{Local, Utc};
use clap::Subcommand;
use clap_complete::{generate, Shell};
use tokio::runtime::Runtime;
use tracing::info;

use crate::api::{DeliveryApi, HttpApi};
use crate::config::Config;
use crate::delivery::{format_local, Delivery};
use crate::detail::DeliveryDetail;
use crate::directory::{DeliveryDirectory, ListQuery};
use crate::error::AppError;
use crate::fields::*;
use crate::scheduler::ScheduleDraft;
use crate::session::Session;
use crate::tui::run::run_tui;

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the interactive dashboard.
    Ui,

    /// Start a session from an identity token.
    Login {
        /// Signed token issued by the identity provider.
        token: String,
    },

    /// End the current session.
    Logout,

    /// Show the signed-in user.
    Whoami,

    /// List deliveries.
    List {
        /// Stop after this many pages (default: until a page adds nothing new).
        #[arg(long)]
        pages: Option<u32>,
        /// Case-insensitive search on the client name.
        #[arg(long, default_value = "")]
        search: String,
        /// Only show this client (exact match).
        #[arg(long, default_value = "")]
        client: String,
        /// Sort by initiation date.
        #[arg(long, value_enum, default_value_t = SortOrder::Earliest)]
        sort: SortOrder,
    },

    /// Show a delivery and its tasks.
    View {
        /// Delivery code.
        code: String,
    },

    /// Schedule, reschedule or reassign a task.
    Schedule {
        /// Delivery code.
        code: String,
        /// Task key.
        key: String,
        /// Why the task is being scheduled.
        #[arg(long, value_enum, default_value_t = ScheduleMode::Schedule)]
        mode: ScheduleMode,
        /// Task name (defaults to the current one).
        #[arg(long)]
        name: Option<String>,
        /// Start date, YYYY-MM-DD.
        #[arg(long)]
        start: Option<String>,
        /// Number of days.
        #[arg(long)]
        days: Option<String>,
        /// Minutes for each day, in order. May be repeated.
        #[arg(long = "duration", allow_negative_numbers = true)]
        durations: Vec<i64>,
        /// Responsible person.
        #[arg(long)]
        person: Option<String>,
        /// Delivery slot: 1pm | 4pm | 7pm.
        #[arg(long, value_enum)]
        slot: Option<DeliverySlot>,
        /// Print the payload instead of submitting it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete a delivery.
    Delete {
        /// Delivery code.
        code: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Everything a command needs besides its arguments.
pub struct Context {
    pub config: Config,
    pub state_dir: PathBuf,
    pub runtime: Runtime,
}

impl Context {
    /// The current session, or `NotLoggedIn`.
    pub fn session(&self) -> Result<Session, AppError> {
        Session::load(&self.state_dir, Utc::now())?.ok_or(AppError::NotLoggedIn)
    }

    pub fn api(&self, session: &Session) -> Result<HttpApi, AppError> {
        Ok(HttpApi::new(&self.config, Some(session.token.clone()))?)
    }
}

/// Launch the terminal user interface.
pub fn cmd_ui(ctx: &Context) -> Result<(), AppError> {
    let session = ctx.session()?;
    let api = ctx.api(&session)?;
    run_tui(ctx.runtime.handle().clone(), Box::new(api), session)?;
    Ok(())
}

pub fn cmd_login(ctx: &Context, token: &str) -> Result<(), AppError> {
    let session = Session::login(token, &ctx.state_dir)?;
    println!("Logged in as {}", session.email);
    Ok(())
}

pub fn cmd_logout(ctx: &Context) -> Result<(), AppError> {
    Session::logout(&ctx.state_dir)?;
    println!("Logged out.");
    Ok(())
}

pub fn cmd_whoami(ctx: &Context) -> Result<(), AppError> {
    let session = ctx.session()?;
    match session.expires_at {
        Some(exp) => println!("{} (session expires {})", session.email, format_local(Some(exp), "-")),
        None => println!("{}", session.email),
    }
    Ok(())
}

/// Load pages until exhausted (or `pages` is reached) and print the matching deliveries.
pub fn cmd_list(ctx: &Context, pages: Option<u32>, search: String, client: String, sort: SortOrder) -> Result<(), AppError> {
    let session = ctx.session()?;
    let api = ctx.api(&session)?;
    let mut directory = DeliveryDirectory::new();

    ctx.runtime.block_on(async {
        let mut fetched = 0;
        while directory.wants_more() && pages.map_or(true, |max| fetched < max) {
            directory.load_next_page(&api, &session).await?;
            fetched += 1;
        }
        Ok::<_, AppError>(())
    })?;

    let query = ListQuery { search, client, sort };
    let rows = directory.visible(&query);
    println!("You have {} active deliveries ({})", rows.len(), sort.label());
    print_deliveries(&rows);
    Ok(())
}

/// Print deliveries in a formatted table.
pub fn print_deliveries(rows: &[&Delivery]) {
    println!(
        "{:<14} {:<24} {:<12} {:>5} {:<17} {}",
        "Code", "Client", "Planned", "Prog", "Initiated", "Deadline"
    );
    for d in rows {
        println!(
            "{:<14} {:<24} {:<12} {:>4}% {:<17} {}",
            truncate(&d.code, 14),
            truncate(&d.client, 24),
            format!("{} of {}", d.tasks_planned, d.tasks_total),
            (d.progress() * 100.0).round() as u32,
            d.initiated_label(),
            d.deadline
        );
    }
}

pub fn cmd_view(ctx: &Context, code: &str) -> Result<(), AppError> {
    let session = ctx.session()?;
    let api = ctx.api(&session)?;
    let detail = ctx.runtime.block_on(DeliveryDetail::load(&api, &session, code))?;
    print_detail(&detail);
    Ok(())
}

fn print_detail(detail: &DeliveryDetail) {
    println!("Delivery Details for {}", detail.client);
    println!("{}", detail.short_description);
    println!("Start Time: {}", format_local(detail.planned_start, "N/A"));
    println!("Delivery Deadline: {}", format_local(detail.planned_delivery, "N/A"));
    println!();
    if detail.tasks.is_empty() {
        println!("No tasks available for this delivery.");
        return;
    }
    println!("{:<10} {:<11} {:<18} {:<9} {}", "Key", "Status", "Responsible", "Time", "Task");
    for t in &detail.tasks {
        println!(
            "{:<10} {:<11} {:<18} {:<9} {}",
            truncate(t.key(), 10),
            if t.scheduled { "Scheduled" } else { "Unscheduled" },
            truncate(&t.person_responsible, 18),
            t.time_label(),
            t.title()
        );
    }
}

/// Run the scheduler non-interactively and submit the result.
#[allow(clippy::too_many_arguments)]
pub fn cmd_schedule(
    ctx: &Context,
    code: String,
    key: String,
    mode: ScheduleMode,
    name: Option<String>,
    start: Option<String>,
    days: Option<String>,
    durations: Vec<i64>,
    person: Option<String>,
    slot: Option<DeliverySlot>,
    dry_run: bool,
) -> Result<(), AppError> {
    let session = ctx.session()?;
    let api = ctx.api(&session)?;

    ctx.runtime.block_on(async {
        let mut detail = DeliveryDetail::load(&api, &session, &code).await?;
        let task = detail.task(&key).ok_or_else(|| AppError::TaskNotFound {
            code: code.clone(),
            key: key.clone(),
        })?;
        let mut draft = match mode {
            ScheduleMode::Schedule => detail
                .open_task(&key)
                .ok_or_else(|| AppError::AlreadyScheduled(task.key().to_string()))?,
            other => detail
                .open_task_action(&key, other)
                .ok_or_else(|| AppError::TaskNotFound { code: code.clone(), key: key.clone() })?,
        };

        let (history, allocations) =
            tokio::try_join!(api.fetch_key_durations(), api.fetch_person_allocations())?;
        draft.load_history(&key, history.get(&key));
        draft.load_allocations(&allocations);

        apply_schedule_args(&mut draft, name, start, days, &durations, person, slot)?;
        print_draft(&draft);

        if dry_run {
            let payload = draft.build_payload(Local::now().date_naive())?;
            println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
            return Ok(());
        }

        let receipt = draft.submit(&api, Local::now().date_naive()).await?;
        detail.apply_receipt(&receipt);
        println!("Task Updated: {} {} ({})", mode.label(), key, format_minutes(receipt.total_minutes));
        Ok(())
    })
}

/// Apply command-line edits to a draft in form order.
pub fn apply_schedule_args(
    draft: &mut ScheduleDraft,
    name: Option<String>,
    start: Option<String>,
    days: Option<String>,
    durations: &[i64],
    person: Option<String>,
    slot: Option<DeliverySlot>,
) -> Result<(), AppError> {
    if let Some(name) = name {
        draft.set_task_name(&name);
    }
    if let Some(person) = person {
        draft.set_responsible_person(&person);
    }
    if let Some(start) = start {
        draft.set_start_date(&start)?;
    }
    if let Some(days) = days {
        draft.set_number_of_days(&days);
    }
    for (i, &minutes) in durations.iter().enumerate() {
        let stored = draft.set_day_duration(i, minutes, DurationInput::Entry)?;
        if stored as i64 != minutes {
            println!("Day {}: {} minutes requested, {} allowed", i + 1, minutes, stored);
        }
    }
    draft.set_delivery_slot(slot.or(draft.slot));
    Ok(())
}

fn print_draft(draft: &ScheduleDraft) {
    let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "-".into());
    println!("{} Task: {}", draft.mode.label(), draft.task_name);
    println!(
        "Start {}  Days {}  End {}  Responsible {}  Slot {}",
        date(draft.start_date()),
        draft.days(),
        date(draft.end_date()),
        if draft.responsible.is_empty() { "-" } else { draft.responsible.as_str() },
        draft.slot.map(DeliverySlot::label).unwrap_or("-")
    );
    for (i, minutes) in draft.durations().iter().enumerate() {
        println!(
            "  Day {:<3} {:<10} {:>3}m  (max {}m)",
            i + 1,
            date(draft.day_date(i)),
            minutes,
            draft.capacity_ceiling(i)
        );
    }
    println!("Total {}", draft.total_time_label());
}

/// Delete a delivery after confirmation.
pub fn cmd_delete(ctx: &Context, code: &str, yes: bool) -> Result<(), AppError> {
    let session = ctx.session()?;
    let api = ctx.api(&session)?;
    let confirmed = yes || confirm(&format!("Are you sure you want to delete delivery: {code}?"))?;
    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }
    let message = ctx.runtime.block_on(api.delete_delivery(code))?;
    info!(code, "delivery deleted from the command line");
    println!("{message}");
    Ok(())
}

fn confirm(question: &str) -> io::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

pub fn cmd_completions(shell: Shell) {
    use clap::CommandFactory;
    let mut cmd = crate::cli::Cli::command();
    generate(shell, &mut cmd, "dt", &mut io::stdout());
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{PersonDayEntry, TaskRecord, ApiTimestamp};
    use serde_json::json;

    fn draft() -> ScheduleDraft {
        let task: TaskRecord = serde_json::from_value(json!({
            "DelCode_w_o__": "DEL-42", "Key": "K1", "Task_Details": "Copy", "Responsibility": "A"
        }))
        .unwrap();
        ScheduleDraft::new(task, ScheduleMode::Schedule)
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Piaggio Vehicles Pvt. Ltd.", 8), "Piaggio…");
    }

    #[test]
    fn test_schedule_args_follow_form_rules() {
        let mut d = draft();
        d.load_allocations(&[PersonDayEntry {
            responsibility: "B".into(),
            day: Some(ApiTimestamp::Plain("2024-06-02".into())),
            minutes: 300,
        }]);
        apply_schedule_args(
            &mut d,
            None,
            Some("2024-06-01".into()),
            Some("3".into()),
            &[60, 250, 0],
            Some("B".into()),
            Some(DeliverySlot::FourPm),
        )
        .unwrap();
        assert_eq!(d.durations(), &[60, 180, 1]);
        assert_eq!(d.responsible, "B");
        assert_eq!(d.slot, Some(DeliverySlot::FourPm));
    }

    #[test]
    fn test_schedule_args_reject_extra_durations() {
        let mut d = draft();
        let err = apply_schedule_args(&mut d, None, Some("2024-06-01".into()), Some("1".into()), &[60, 60], None, None)
            .unwrap_err();
        assert!(err.to_string().contains("outside"));
    }
}
