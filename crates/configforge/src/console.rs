//! Colorful console output for engine and session events.
//!
//! Provides a custom `tracing` layer that formats solve and session
//! lifecycle events with colors.
//!
//! ## Log Levels
//!
//! - **INFO**: Session lifecycle, solve results and rule messages
//! - **DEBUG**: Solve starts, propagation and resolve scope
//! - **TRACE**: Individual choice points and backtracks

use num_format::{Locale, ToFormattedString};
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT: OnceLock<()> = OnceLock::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_FILTER: &str = "configforge_engine=info,configforge_session=info";

/// Initializes the console output.
///
/// Safe to call multiple times - only the first call has effect.
/// `RUST_LOG` overrides the default filter.
pub fn init() {
    INIT.get_or_init(|| {
        EPOCH.get_or_init(Instant::now);
        print_banner();

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(ConfigConsoleLayer)
            .try_init();
    });
}

fn elapsed_secs() -> f64 {
    EPOCH.get().map_or(0.0, |epoch| epoch.elapsed().as_secs_f64())
}

fn print_banner() {
    let banner = r#"
  ___           __ _      ___
 / __|___ _ _  / _(_)__ _| __|__ _ _ __ _ ___
| (__/ _ \ ' \|  _| / _` | _/ _ \ '_/ _` / -_)
 \___\___/_||_|_| |_\__, |_|\___/_| \__, \___|
                    |___/           |___/
"#;

    let version_line = format!("              v{} - Product Configuration Engine\n", VERSION);

    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", banner.bright_cyan());
    let _ = writeln!(stdout, "{}", version_line.bright_white().bold());
    let _ = stdout.flush();
}

/// A tracing layer that formats engine and session events with colors.
pub struct ConfigConsoleLayer;

impl<S: Subscriber> Layer<S> for ConfigConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();

        if !target.starts_with("configforge_engine") && !target.starts_with("configforge_session") {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let output = format_event(&visitor, *metadata.level());
        if !output.is_empty() {
            let _ = writeln!(io::stdout(), "{}", output);
        }
    }
}

#[derive(Default)]
struct EventVisitor {
    event: Option<String>,
    session: Option<String>,
    outcome: Option<String>,
    mode: Option<String>,
    severity: Option<String>,
    source: Option<String>,
    message: Option<String>,
    constraint: Option<String>,
    instances: Option<u64>,
    assignments: Option<u64>,
    context: Option<u64>,
    duration_ms: Option<u64>,
    evaluations: Option<u64>,
    choice_points: Option<u64>,
    backtracks: Option<u64>,
    touched: Option<u64>,
    depth: Option<u64>,
}

impl EventVisitor {
    fn set_text(&mut self, name: &str, value: String) {
        match name {
            "event" => self.event = Some(value),
            "session" => self.session = Some(value),
            "outcome" => self.outcome = Some(value),
            "mode" => self.mode = Some(value),
            "severity" => self.severity = Some(value),
            "source" => self.source = Some(value),
            "message" => self.message = Some(value),
            "constraint" => self.constraint = Some(value),
            _ => {}
        }
    }
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let s = format!("{:?}", value);
        self.set_text(field.name(), s.trim_matches('"').to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "instances" => self.instances = Some(value),
            "assignments" => self.assignments = Some(value),
            "context" => self.context = Some(value),
            "duration_ms" => self.duration_ms = Some(value),
            "evaluations" => self.evaluations = Some(value),
            "choice_points" => self.choice_points = Some(value),
            "backtracks" => self.backtracks = Some(value),
            "touched" => self.touched = Some(value),
            "depth" => self.depth = Some(value),
            _ => {}
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_u64(field, value as u64);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.set_text(field.name(), value.to_string());
    }
}

fn format_event(v: &EventVisitor, level: Level) -> String {
    let event = v.event.as_deref().unwrap_or("");

    match event {
        "session_open" => format_session_open(v),
        "session_close" => format_session_close(v),
        "solve_start" => format_solve_start(v),
        "solve_end" => format_solve_end(v),
        "rule_message" => format_rule_message(v),
        "propagation_contradiction" => format_contradiction(v),
        "backtrack" if level == Level::TRACE => format_backtrack(v),
        _ => String::new(),
    }
}

fn format_elapsed() -> String {
    format!("{:>7.3}s", elapsed_secs()).bright_black().to_string()
}

fn format_session_open(v: &EventVisitor) -> String {
    let session = v.session.as_deref().unwrap_or("session");
    let instances = v.instances.unwrap_or(0);
    let context = v.context.unwrap_or(0);

    format!(
        "{} {} {} opened │ {} instances │ {} context values",
        format_elapsed(),
        "▶".bright_green().bold(),
        session.white().bold(),
        instances.to_formatted_string(&Locale::en).bright_yellow(),
        context.to_formatted_string(&Locale::en).bright_yellow(),
    )
}

fn format_session_close(v: &EventVisitor) -> String {
    let session = v.session.as_deref().unwrap_or("session");

    format!(
        "{} {} {} closed │ {} │ {} choice points │ {} backtracks",
        format_elapsed(),
        "■".bright_cyan().bold(),
        session.white().bold(),
        format_duration_ms(v.duration_ms.unwrap_or(0)).yellow(),
        v.choice_points
            .unwrap_or(0)
            .to_formatted_string(&Locale::en)
            .white(),
        v.backtracks.unwrap_or(0).to_formatted_string(&Locale::en).white(),
    )
}

fn format_solve_start(v: &EventVisitor) -> String {
    let mode = v.mode.as_deref().unwrap_or("full");

    format!(
        "{} {} Solving ({}) │ {} instances │ {} assignments",
        format_elapsed(),
        "▶".bright_blue(),
        mode.white().bold(),
        v.instances.unwrap_or(0).to_formatted_string(&Locale::en).bright_yellow(),
        v.assignments
            .unwrap_or(0)
            .to_formatted_string(&Locale::en)
            .bright_yellow(),
    )
}

fn format_solve_end(v: &EventVisitor) -> String {
    let outcome = v.outcome.as_deref().unwrap_or("unknown");

    format!(
        "{} {} {} │ {} │ {} evaluations │ {} choice points │ {} backtracks │ {} touched",
        format_elapsed(),
        "◀".bright_blue(),
        format_outcome(outcome),
        format_duration_ms(v.duration_ms.unwrap_or(0)).yellow(),
        v.evaluations
            .unwrap_or(0)
            .to_formatted_string(&Locale::en)
            .bright_magenta()
            .bold(),
        v.choice_points
            .unwrap_or(0)
            .to_formatted_string(&Locale::en)
            .white(),
        v.backtracks.unwrap_or(0).to_formatted_string(&Locale::en).white(),
        v.touched.unwrap_or(0).to_formatted_string(&Locale::en).white(),
    )
}

fn format_rule_message(v: &EventVisitor) -> String {
    let severity = v.severity.as_deref().unwrap_or("Info");
    let message = v.message.as_deref().unwrap_or("");
    let source = v.source.as_deref().unwrap_or("");

    let tag = match severity {
        "Error" => "ERROR".bright_red().bold().to_string(),
        "Warning" => "WARN".yellow().bold().to_string(),
        _ => "INFO".bright_green().to_string(),
    };

    format!(
        "{} {} {} {}",
        format_elapsed(),
        tag,
        message.white(),
        format!("({source})").bright_black()
    )
}

fn format_contradiction(v: &EventVisitor) -> String {
    let constraint = v.constraint.as_deref().unwrap_or("");

    format!(
        "{} {} contradiction │ {}",
        format_elapsed(),
        "✗".bright_red(),
        constraint.bright_red()
    )
}

fn format_backtrack(v: &EventVisitor) -> String {
    format!(
        "{} {} backtrack │ depth {}",
        format_elapsed(),
        "↩".bright_black(),
        v.depth.unwrap_or(0).to_formatted_string(&Locale::en).bright_black()
    )
}

fn format_outcome(outcome: &str) -> String {
    match outcome {
        "solved" => "SOLVED".bright_green().bold().to_string(),
        "incomplete" => "INCOMPLETE".yellow().bold().to_string(),
        "conflict" => "CONFLICT".bright_red().bold().to_string(),
        other => other.to_uppercase().bright_magenta().bold().to_string(),
    }
}

fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.2}s", ms as f64 / 1000.0)
    } else {
        let mins = ms / 60_000;
        let secs = (ms % 60_000) / 1000;
        format!("{}m {}s", mins, secs)
    }
}
