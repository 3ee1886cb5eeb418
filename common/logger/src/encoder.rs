use crate::config::{EncoderConfig, LevelEncoding, LogEncoding};
use crate::LoggerError;
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use serde_json::{Map, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_log::NormalizeEvent;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

const MESSAGE_FIELD: &str = "message";
const SPANS_KEY: &str = "spans";

/// Renders an [`Event`] as a single line, either as a JSON object
/// or as tab separated values, using the key names of the [`EncoderConfig`].
#[derive(Debug, Clone)]
pub struct EventEncoder {
    encoding: LogEncoding,
    config: EncoderConfig,
}

impl EventEncoder {
    pub fn new(encoding: LogEncoding, config: EncoderConfig) -> Result<Self, LoggerError> {
        if config.message_key.is_empty() {
            return Err(LoggerError::LoggerConfigurationError {
                message: "The encoder message_key cannot be empty".to_owned(),
            });
        }
        if StrftimeItems::new(&config.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(LoggerError::LoggerConfigurationError {
                message: format!("Cannot parse the encoder time_format: [{}]", config.time_format),
            });
        }
        Ok(Self { encoding, config })
    }

    fn encode_level(&self, level: &Level) -> String {
        match self.config.level_encoding {
            LevelEncoding::Lowercase => level.to_string().to_lowercase(),
            LevelEncoding::Capital => level.to_string(),
        }
    }

    fn format_json<S, N>(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        metadata: &Metadata<'_>,
        time: String,
        fields: FieldsVisitor,
    ) -> fmt::Result
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        N: for<'a> FormatFields<'a> + 'static,
    {
        let mut record = Map::new();
        insert_if_key(&mut record, &self.config.time_key, Value::from(time));
        let level = self.encode_level(metadata.level());
        insert_if_key(&mut record, &self.config.level_key, Value::from(level));
        insert_if_key(&mut record, &self.config.name_key, Value::from(metadata.target()));
        if let Some(caller) = caller(metadata) {
            insert_if_key(&mut record, &self.config.caller_key, Value::from(caller));
        }
        let message = fields.message.unwrap_or_default();
        record.insert(self.config.message_key.clone(), Value::from(message));

        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<Value> =
                scope.from_root().map(|span| Value::from(span.name())).collect();
            if !spans.is_empty() {
                record.insert(SPANS_KEY.to_owned(), Value::Array(spans));
            }
        }

        for (key, value) in fields.fields {
            record.entry(key).or_insert(value);
        }

        let line = serde_json::to_string(&record).map_err(|_| fmt::Error)?;
        writeln!(writer, "{}", line)
    }

    fn format_console<S, N>(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        metadata: &Metadata<'_>,
        time: String,
        fields: FieldsVisitor,
    ) -> fmt::Result
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        N: for<'a> FormatFields<'a> + 'static,
    {
        let mut columns = vec![];
        if !self.config.time_key.is_empty() {
            columns.push(time);
        }
        if !self.config.level_key.is_empty() {
            columns.push(self.encode_level(metadata.level()));
        }
        if !self.config.name_key.is_empty() {
            columns.push(metadata.target().to_owned());
        }
        if !self.config.caller_key.is_empty() {
            if let Some(caller) = caller(metadata) {
                columns.push(caller);
            }
        }

        let mut message = String::new();
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                message.push_str(span.name());
                let extensions = span.extensions();
                if let Some(span_fields) = extensions.get::<FormattedFields<N>>() {
                    if !span_fields.fields.is_empty() {
                        message.push('{');
                        message.push_str(&span_fields.fields);
                        message.push('}');
                    }
                }
                message.push_str(": ");
            }
        }
        message.push_str(&fields.message.unwrap_or_default());
        columns.push(message);

        if !fields.fields.is_empty() {
            let key_values: Vec<String> = fields
                .fields
                .iter()
                .map(|(key, value)| match value {
                    Value::String(text) => format!("{}={}", key, text),
                    other => format!("{}={}", key, other),
                })
                .collect();
            columns.push(key_values.join(" "));
        }

        writeln!(writer, "{}", columns.join("\t"))
    }
}

impl<S, N> FormatEvent<S, N> for EventEncoder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Events coming from the `log` crate carry their real metadata in the `log.*` fields
        let normalized_metadata = event.normalized_metadata();
        let metadata = normalized_metadata.as_ref().unwrap_or_else(|| event.metadata());

        let mut fields = FieldsVisitor::default();
        event.record(&mut fields);

        let time = Local::now().format(&self.config.time_format).to_string();

        match self.encoding {
            LogEncoding::Json => self.format_json(ctx, writer, metadata, time, fields),
            LogEncoding::Console => self.format_console(ctx, writer, metadata, time, fields),
        }
    }
}

fn caller(metadata: &Metadata<'_>) -> Option<String> {
    match (metadata.file(), metadata.line()) {
        (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
        (Some(file), None) => Some(file.to_owned()),
        _ => None,
    }
}

fn insert_if_key(record: &mut Map<String, Value>, key: &str, value: Value) {
    if !key.is_empty() {
        record.insert(key.to_owned(), value);
    }
}

#[derive(Default)]
struct FieldsVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldsVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == MESSAGE_FIELD {
            self.message = Some(match value {
                Value::String(text) => text,
                other => other.to_string(),
            });
        } else if !name.starts_with("log.") {
            self.fields.insert(name.to_owned(), value);
        }
    }
}

impl Visit for FieldsVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{:?}", value)));
    }
}
