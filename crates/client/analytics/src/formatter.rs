use console::{Style, StyledObject};
use std::{fmt, time::SystemTime};
use time::{format_description::BorrowedFormatItem, macros::format_description, OffsetDateTime, UtcOffset};
use tracing::{field::Visit, Level, Subscriber};
use tracing_core::Field;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

pub fn display_fn<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result>(f: F) -> impl fmt::Display {
    DisplayFromFn(f)
}
struct DisplayFromFn<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result>(F);
impl<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result> fmt::Display for DisplayFromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.0)(f)
    }
}

/// Collects the structured fields of an event, except for the message.
#[derive(Default)]
struct FieldsVisitor {
    fields: Vec<(&'static str, String)>,
}

impl Visit for FieldsVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() != "message" {
            self.fields.push((field.name(), value.to_string()));
        }
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.push((field.name(), value.to_string()));
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.push((field.name(), value.to_string()));
    }
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.push((field.name(), value.to_string()));
    }
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() != "message" {
            // Remove quotes from Debug formatting
            self.fields.push((field.name(), format!("{value:?}").trim_matches('"').to_string()));
        }
    }
}

pub fn visit_message(event: &tracing::Event<'_>, f: impl FnOnce(&dyn fmt::Debug) -> fmt::Result) -> fmt::Result {
    struct Visitor<F>(Option<F>, fmt::Result);
    impl<F: FnOnce(&dyn fmt::Debug) -> fmt::Result> Visit for Visitor<F> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                if let Some(f) = self.0.take() {
                    self.1 = (f)(value);
                }
            }
        }
    }
    let mut visitor = Visitor(Some(f), Ok(()));
    event.record(&mut visitor);
    visitor.1
}

pub struct CustomFormatter {
    local_offset: UtcOffset,
    dim_style: Style,
    open_bracket_dim: StyledObject<&'static str>,
    closed_bracket_dim: StyledObject<&'static str>,
    ts_format: &'static [BorrowedFormatItem<'static>],
}

impl CustomFormatter {
    pub fn new() -> Self {
        let dim_style = Style::new().dim();
        Self {
            open_bracket_dim: dim_style.apply_to("["),
            closed_bracket_dim: dim_style.apply_to("]"),
            local_offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
            dim_style,
            ts_format: format_description!("[year]-[month]-[day] [hour]:[minute]:[second]:[subsecond digits:3]"),
        }
    }

    fn timestamp_fmt<'a>(&'a self, ts: &'a SystemTime) -> impl fmt::Display + 'a {
        display_fn(|f| {
            let datetime: OffsetDateTime = (*ts).into();
            let local_datetime = datetime.to_offset(self.local_offset);
            match local_datetime.format(self.ts_format) {
                Ok(ts) => {
                    write!(f, "{}{}{}", self.open_bracket_dim, self.dim_style.apply_to(ts), self.closed_bracket_dim)
                }
                Err(_) => {
                    write!(f, "<error>")
                }
            }
        })
    }

    fn fields_fmt<'a>(&'a self, fields: &'a [(&'static str, String)]) -> impl fmt::Display + 'a {
        display_fn(move |f| {
            for (name, value) in fields {
                write!(f, " {}", self.dim_style.apply_to(format!("{name}={value}")))?;
            }
            Ok(())
        })
    }

    fn format_without_target(
        &self,
        writer: &mut Writer<'_>,
        event: &tracing::Event<'_>,
        ts: &SystemTime,
        level: &Level,
        level_style: &Style,
    ) -> fmt::Result {
        let mut fields = FieldsVisitor::default();
        event.record(&mut fields);
        visit_message(event, |message| {
            writeln!(
                writer,
                "{} {} {:?}{}",
                self.timestamp_fmt(ts),
                level_style.apply_to(level),
                message,
                self.fields_fmt(&fields.fields)
            )
        })
    }

    fn format_with_target(
        &self,
        writer: &mut Writer<'_>,
        event: &tracing::Event<'_>,
        target: &str,
        ts: &SystemTime,
        level: &Level,
        level_style: &Style,
    ) -> fmt::Result {
        let mut fields = FieldsVisitor::default();
        event.record(&mut fields);
        visit_message(event, |message| {
            writeln!(
                writer,
                "{} {} {} {:?}{}",
                self.timestamp_fmt(ts),
                level_style.apply_to(level),
                self.dim_style.apply_to(target),
                message,
                self.fields_fmt(&fields.fields)
            )
        })
    }
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let ts = SystemTime::now();

        let metadata = event.metadata();
        let level = metadata.level();
        let target = metadata.target();

        match *level {
            Level::INFO => self.format_without_target(&mut writer, event, &ts, level, &Style::new().green()),
            Level::WARN => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().yellow()),
            Level::ERROR => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().red()),
            Level::DEBUG => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().blue()),
            Level::TRACE => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().cyan()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::{Arc, Mutex},
    };
    use tracing_subscriber::layer::SubscriberExt as _;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let buf = SharedBuf::default();
        let writer = buf.clone();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .event_format(CustomFormatter::new())
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buf.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn info_has_no_target_and_keeps_fields() {
        let out = capture(|| tracing::info!(slot = 3u64, peer = "peer-1", "Committed block"));
        assert!(out.contains("INFO"), "{out}");
        assert!(out.contains("Committed block"), "{out}");
        assert!(out.contains("slot=3"), "{out}");
        assert!(out.contains("peer=peer-1"), "{out}");
        assert!(!out.contains(module_path!()), "{out}");
    }

    #[test]
    fn warn_has_target() {
        let out = capture(|| tracing::warn!("Storage is down"));
        assert!(out.contains("WARN"), "{out}");
        assert!(out.contains(module_path!()), "{out}");
        assert!(out.ends_with('\n'));
    }
}
