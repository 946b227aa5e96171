use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths for aligned output
const SOURCE_WIDTH: usize = 16;
const LOG_LEVEL_WIDTH: usize = 9;

/// Column formatter: `[timestamp] [source] [level] message key=value...`
pub struct ZkLogFormatter {
    service_name: String,
    color_enabled: bool,
}

/// Log with a `component` field, rendered as `zk-<component>`
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

impl ZkLogFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            color_enabled: is_terminal(),
        }
    }

    fn format_source(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(comp) => format!("zk-{}", comp),
            None => self.service_name.clone(),
        };

        if name.chars().count() > SOURCE_WIDTH {
            let truncated: String = name.chars().take(SOURCE_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SOURCE_WIDTH)
        }
    }

    fn format_level(level: &Level) -> String {
        let label = match *level {
            Level::ERROR => "✗ ERROR",
            Level::WARN => "⚠ WARN",
            Level::INFO => "ℹ INFO",
            Level::DEBUG => "◦ DEBUG",
            Level::TRACE => "◦ TRACE",
        };
        format!("{:<width$}", label, width = LOG_LEVEL_WIDTH)
    }

    fn color_for_level(&self, level: &Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }

        match *level {
            Level::ERROR => COLOR_BRIGHT_RED,
            Level::WARN => COLOR_BRIGHT_YELLOW,
            Level::INFO => COLOR_GREEN,
            Level::DEBUG | Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }
}

impl<S, N> FormatEvent<S, N> for ZkLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let level = event.metadata().level();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        // session engine events carry no component; name them by crate
        let component = visitor.component.as_deref().or_else(|| {
            let target = event.metadata().target();
            if target.starts_with("zk_session") {
                Some("session")
            } else if target.starts_with("zk_wire") {
                Some("wire")
            } else {
                None
            }
        });

        let color = self.color_for_level(level);
        let (reset, cyan) = if self.color_enabled {
            (COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "")
        };

        write!(
            writer,
            "{}[{}] [{}] [{}{}{}] {}",
            cyan,
            timestamp,
            self.format_source(component),
            color,
            Self::format_level(level),
            reset,
            visitor.message
        )?;
        for (key, value) in &visitor.extra {
            write!(writer, " {}={}", key, value)?;
        }
        writeln!(writer, "{}", reset)
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        let rendered = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(rendered);

        match field.name() {
            "message" => self.message = rendered,
            "component" => self.component = Some(rendered),
            name => self.extra.push((name, rendered)),
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.extra.push((name, value.to_string())),
        }
    }
}

fn is_terminal() -> bool {
    match std::env::var("TERM") {
        Ok(term) => term != "dumb",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> ZkLogFormatter {
        ZkLogFormatter {
            service_name: "zk-client".to_string(),
            color_enabled: false,
        }
    }

    #[test]
    fn test_source_column() {
        let formatter = plain();
        assert_eq!(formatter.format_source(None), "zk-client       ");
        assert_eq!(formatter.format_source(Some("session")), "zk-session      ");

        let long = formatter.format_source(Some("very-long-component"));
        assert_eq!(long.chars().count(), SOURCE_WIDTH);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_no_color_without_terminal() {
        let formatter = plain();
        assert_eq!(formatter.color_for_level(&Level::ERROR), "");
        assert!(ZkLogFormatter::format_level(&Level::WARN).starts_with("⚠ WARN"));
    }
}
