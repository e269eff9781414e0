//! Newline-delimited JSON decoding for the GradeSync progress stream.
//!
//! Bytes arrive in arbitrary chunks off the wire. [`NdjsonDecoder`] keeps the
//! trailing, possibly incomplete, fragment between calls and decodes every
//! complete line into a [`StreamEvent`].

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::debug;

/// One decoded record from the progress stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Keep-alive, carries nothing
    Heartbeat,
    /// Incremental progress report
    Progress(ProgressUpdate),
    /// Upstream failure; the stream is aborted
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Final result of the sync
    Final {
        #[serde(default)]
        result: JsonValue,
    },
    /// Any event type this relay does not know about
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Message carried by an `error` event.
    pub fn error_message(&self) -> Option<String> {
        match self {
            StreamEvent::Error { error, message } => Some(
                error
                    .clone()
                    .or_else(|| message.clone())
                    .unwrap_or_else(|| "GradeSync reported an error".to_string()),
            ),
            _ => None,
        }
    }
}

/// Fields of a `progress` event. Numeric fields that are missing, null or not
/// numbers decode as `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub current_step: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_steps: Option<f64>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub sub_current: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub sub_total: Option<f64>,
    #[serde(default)]
    pub sub_label: Option<String>,
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    let number = match value {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|n| n.is_finite()))
}

/// Incremental decoder with a carry-over buffer.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    /// Decode whatever is left once the connection has closed.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest).into_iter().collect()
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &[u8]) -> Option<StreamEvent> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_slice::<StreamEvent>(line) {
        Ok(event) => Some(event),
        Err(err) => {
            debug!(
                error = %err,
                line = %String::from_utf8_lossy(&line[..line.len().min(200)]),
                "Skipping malformed stream record"
            );
            None
        }
    }
}
