//! Log formatting and run reporting.
//!
//! Log lines are written to stderr by a [`SeverityFormatter`]: warnings are
//! yellow, errors red, everything else plain. The board being processed is
//! prefixed from the enclosing span, so interleaved output of parallel boards
//! stays readable:
//!
//! ```text
//! [board=rpi3] Building job(s) for boot
//! [board=rpi3]   Fetching artifacts for mainline/master/defconfig
//! [board=bbb] Device is retired, not sending jobs
//! ```

use std::fmt;

use anyhow::Result;
use console::Style;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

use crate::config::ColorChoice;
use crate::launcher::{BoardOutcome, RunSummary};

/// Colours a log message by severity.
pub fn paint(level: Level, message: &str, color: bool) -> String {
    let style = match level {
        Level::WARN => Style::new().yellow(),
        Level::ERROR => Style::new().red(),
        _ => return message.to_string(),
    };
    style.force_styling(color).apply_to(message).to_string()
}

/// Event formatter mapping severity to presentation.
#[derive(Debug, Clone, Copy)]
pub struct SeverityFormatter {
    color: bool,
}

impl SeverityFormatter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }
}

impl<S, N> FormatEvent<S, N> for SeverityFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut line = String::new();

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        line.push('[');
                        line.push_str(fields);
                        line.push_str("] ");
                    }
                }
            }
        }

        ctx.format_fields(Writer::new(&mut line), event)?;
        writeln!(writer, "{}", paint(*event.metadata().level(), &line, self.color))
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects debug level.
pub fn init_logging(verbose: bool, color: ColorChoice) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let color = match color {
        ColorChoice::Auto => console::colors_enabled_stderr(),
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(SeverityFormatter::new(color))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {}", e))
}

/// Short reason a board was skipped, `None` if it was processed.
pub fn skip_reason(outcome: &BoardOutcome) -> Option<String> {
    match outcome {
        BoardOutcome::Unavailable(status) => Some(format!("device {}", status)),
        BoardOutcome::StatusUnknown(e) => Some(format!("status unknown ({})", e)),
        BoardOutcome::RootfsUnavailable(e) => Some(format!("no rootfs ({})", e)),
        BoardOutcome::Processed(_) => None,
    }
}

/// Prints the end-of-run summary to stdout.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("Launch Results:");
    println!("  Boards:       {}", summary.boards.len());
    println!(
        "  Skipped:      {}",
        console::style(summary.skipped_boards()).yellow()
    );
    println!(
        "  Dispatched:   {}",
        console::style(summary.dispatched()).green()
    );
    println!(
        "  No artifacts: {}",
        console::style(summary.no_artifacts()).yellow()
    );
    println!("  Failed:       {}", console::style(summary.failures()).red());

    for board in &summary.boards {
        if let Some(reason) = skip_reason(&board.outcome) {
            println!(
                "  {} {}",
                console::style(&board.board).yellow(),
                console::style(reason).dim()
            );
        }
    }

    println!();
    if summary.success() {
        println!("{}", console::style("All jobs dispatched.").green().bold());
    } else {
        println!("{}", console::style("Some jobs were not dispatched.").red().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceStatus;

    #[test]
    fn test_paint_by_severity() {
        assert_eq!(paint(Level::INFO, "fetching", true), "fetching");
        assert_eq!(paint(Level::DEBUG, "fetching", true), "fetching");
        assert_eq!(
            paint(Level::WARN, "unreachable", true),
            "\u{1b}[33munreachable\u{1b}[0m"
        );
        assert_eq!(
            paint(Level::ERROR, "no artifacts", true),
            "\u{1b}[31mno artifacts\u{1b}[0m"
        );
    }

    #[test]
    fn test_paint_without_color_is_plain() {
        assert_eq!(paint(Level::ERROR, "no artifacts", false), "no artifacts");
    }

    #[test]
    fn test_skip_reason() {
        assert_eq!(
            skip_reason(&BoardOutcome::Unavailable(DeviceStatus::Retired)).as_deref(),
            Some("device retired")
        );
        assert_eq!(skip_reason(&BoardOutcome::Processed(Vec::new())), None);
    }
}
