use core::fmt as core_fmt;

use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{
        self, FmtContext,
        format::{FormatEvent, FormatFields},
    },
    registry::LookupSpan,
};

/// `[timestamp] LEVEL target:line > message` lines, optionally coloured.
pub struct LineFormatter {
    use_ansi: bool,
}

impl LineFormatter {
    pub fn new(use_ansi: bool) -> Self {
        Self { use_ansi }
    }
}

fn level_colour(level: &tracing::Level) -> &'static str {
    match *level {
        tracing::Level::ERROR => "\x1b[31m",
        tracing::Level::WARN => "\x1b[33m",
        tracing::Level::INFO => "\x1b[32m",
        tracing::Level::DEBUG => "\x1b[34m",
        tracing::Level::TRACE => "\x1b[35m",
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> core_fmt::Result {
        let (reset, bold, dim) = if self.use_ansi {
            ("\x1b[0m", "\x1b[1m", "\x1b[2m")
        } else {
            ("", "", "")
        };

        let format = time::macros::format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        );
        let now =
            time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
        let timestamp = now
            .format(&format)
            .unwrap_or_else(|_| "unknown time".to_string());
        write!(writer, "{dim}[{timestamp}]{reset} ")?;

        let metadata = event.metadata();
        let level = metadata.level();
        let level_str = format!("{: <5}", level.to_string());
        if self.use_ansi {
            write!(writer, "{}{bold}{level_str}{reset} ", level_colour(level))?;
        } else {
            write!(writer, "{level_str} ")?;
        }

        let line = metadata
            .line()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "??".to_string());
        write!(writer, "{dim}{}:{line}{reset} > ", metadata.target())?;

        ctx.format_fields(writer.by_ref(), event)?;
        write!(writer, "{reset}")?;
        writeln!(writer)
    }
}
