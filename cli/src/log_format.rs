//! `tracing_subscriber` event formatter that tags each log line with the
//! `trace_id`/`span_id` of its enclosing span, so a line in `LOG_FILE` can be
//! joined back to the `exec_trace`/`tool_call` rows it corresponds to.
//!
//! Line shape: `TIMESTAMP [trace_id=X span_id=Y] LEVEL target: fields` when
//! the event has an enclosing span, else `TIMESTAMP LEVEL target: fields`.

use std::fmt;

use tracing_core::Subscriber;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::{LookupSpan, SpanRef};

/// The root span of the current scope supplies `trace_id`; the immediate
/// parent supplies `span_id`. A top-level span (no ancestors) uses its own
/// id for both.
fn trace_and_span_ids<S>(span: &SpanRef<'_, S>) -> (String, String)
where
    S: for<'a> LookupSpan<'a>,
{
    let span_id = span.id().into_u64().to_string();
    let trace_id = span.scope().from_root().next().map(|root| root.id().into_u64().to_string()).unwrap_or_else(|| span_id.clone());
    (trace_id, span_id)
}

pub struct TextWithSpanIds {
    timer: SystemTime,
    with_level: bool,
    with_target: bool,
}

impl Default for TextWithSpanIds {
    fn default() -> Self {
        Self { timer: SystemTime::default(), with_level: true, with_target: true }
    }
}

impl TextWithSpanIds {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn with_level(mut self, on: bool) -> Self {
        self.with_level = on;
        self
    }

    #[allow(dead_code)]
    pub fn with_target(mut self, on: bool) -> Self {
        self.with_target = on;
        self
    }
}

impl<S, N> FormatEvent<S, N> for TextWithSpanIds
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &tracing_core::Event<'_>) -> fmt::Result {
        self.timer.format_time(&mut writer)?;

        if let Some(span) = ctx.parent_span() {
            let (trace_id, span_id) = trace_and_span_ids(&span);
            write!(writer, " [trace_id={trace_id} span_id={span_id}]")?;
        }

        if self.with_level {
            write!(writer, " {}", event.metadata().level())?;
        }
        if self.with_target {
            write!(writer, " {}:", event.metadata().target())?;
        }
        write!(writer, " ")?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone)]
    struct VecWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for VecWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn level_and_target_toggles_stick() {
        let formatter = TextWithSpanIds::new().with_level(false).with_target(false);
        assert!(!formatter.with_level);
        assert!(!formatter.with_target);
    }

    #[test]
    fn emitted_line_carries_trace_and_span_ids() {
        let sink = Arc::new(Mutex::new(Vec::<u8>::new()));
        let writer = {
            let sink = Arc::clone(&sink);
            move || VecWriter(Arc::clone(&sink))
        };

        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer().event_format(TextWithSpanIds::new()).with_writer(writer).with_ansi(false),
        );

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("ingest_turn");
            let _guard = span.enter();
            tracing::info!(memory_id = "m1", "card ingested");
        });

        let output = String::from_utf8(sink.lock().unwrap().clone()).unwrap();
        assert!(output.contains("trace_id="));
        assert!(output.contains("span_id="));
        assert!(output.contains("INFO"));
        assert!(output.contains("card ingested"));
        assert!(output.contains("memory_id=\"m1\""));
    }
}
