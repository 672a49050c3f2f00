use serde_json::{Map, Value};

use auditscope_types::{DisplayLogRecord, RawLogRecord};

use crate::message::{text, MessageExtractor};
use crate::noise::NoiseClassifier;

/// Maps raw API records into display records
pub struct LogNormalizer;

impl LogNormalizer {
    /// Normalize a single raw record
    pub fn normalize(record: RawLogRecord) -> DisplayLogRecord {
        let payload = Self::coerce_payload(record.payload);
        let fields = payload.as_object();
        let field = |key: &str| fields.and_then(|f| text(f.get(key)));

        let level = field("level").or_else(|| field("severity")).unwrap_or_default();

        let logger = ["logger", "eventName", "component", "topic"]
            .into_iter()
            .find_map(field)
            .unwrap_or_else(|| record.kind.clone());

        let transaction_id = field("transactionId")
            .or_else(|| {
                fields
                    .and_then(|f| f.get("trackingIds"))
                    .and_then(Value::as_array)
                    .and_then(|ids| text(ids.first()))
            })
            .unwrap_or_default();

        let message = MessageExtractor::extract(&payload);

        DisplayLogRecord {
            timestamp: record.timestamp,
            source: record.source,
            kind: record.kind,
            level,
            logger,
            transaction_id,
            message,
            payload,
        }
    }

    /// Normalize a page of records, dropping the ones classified as noise
    pub fn normalize_batch(
        records: Vec<RawLogRecord>,
        classifier: &NoiseClassifier,
    ) -> Vec<DisplayLogRecord> {
        records
            .into_iter()
            .map(Self::normalize)
            .filter(|r| !classifier.is_noise_record(&r.logger, &r.kind))
            .collect()
    }

    /// A bare string payload becomes `{ "message": payload }`
    fn coerce_payload(payload: Value) -> Value {
        match payload {
            Value::String(s) => {
                let mut map = Map::new();
                map.insert("message".to_string(), Value::String(s));
                Value::Object(map)
            }
            other => other,
        }
    }
}
