//! Columnar batch artifacts.
//!
//! A batch is stored as one Parquet file. Each row carries the synthetic `_etl_*` columns
//! followed by one nullable text column per payload column holding the JSON encoded value.
//! Payload columns are stored under [`PAYLOAD_COLUMN_PREFIX`], so any source column name,
//! including `_etl_*` ones, is kept apart from the synthetic columns. A null cell means the
//! column was absent from that event's payload.

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int64Array, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit, TimestampMicrosecondType};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{ErrorKind, EtlResult};
use crate::types::{ChangeEvent, ChangeOperation, OrderingToken, PrimaryKey, RowPayload};
use crate::{bail, etl_error};

/// Prefix of the artifact columns holding payload values.
pub const PAYLOAD_COLUMN_PREFIX: &str = "payload.";

pub const OPERATION_COLUMN: &str = "_etl_operation";
pub const TOKEN_POSITION_COLUMN: &str = "_etl_token_position";
pub const TOKEN_COLUMN: &str = "_etl_token";
pub const PRIMARY_KEY_COLUMN: &str = "_etl_primary_key";
pub const INGESTED_AT_COLUMN: &str = "_etl_ingested_at";
pub const SOURCE_TIMESTAMP_COLUMN: &str = "_etl_source_timestamp";

const TIMEZONE: &str = "UTC";

/// File extension of artifacts.
pub const ARTIFACT_EXTENSION: &str = "parquet";

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some(TIMEZONE.into()))
}

fn payload_field(column: &str) -> String {
    format!("{PAYLOAD_COLUMN_PREFIX}{column}")
}

fn artifact_schema(payload_columns: &BTreeSet<&str>) -> Schema {
    let mut fields = vec![
        Field::new(OPERATION_COLUMN, DataType::Utf8, false),
        Field::new(TOKEN_POSITION_COLUMN, DataType::Int64, false),
        Field::new(TOKEN_COLUMN, DataType::Utf8, false),
        Field::new(PRIMARY_KEY_COLUMN, DataType::Utf8, false),
        Field::new(INGESTED_AT_COLUMN, timestamp_type(), false),
        Field::new(SOURCE_TIMESTAMP_COLUMN, timestamp_type(), false),
    ];
    fields.extend(
        payload_columns
            .iter()
            .map(|column| Field::new(payload_field(column), DataType::Utf8, true)),
    );

    Schema::new(fields)
}

/// Serializes `events` into a Parquet artifact, preserving their order.
pub fn encode_events(events: &[ChangeEvent]) -> EtlResult<Bytes> {
    if events.is_empty() {
        bail!(ErrorKind::InvalidState, "Cannot encode an empty batch");
    }

    let mut payload_columns = BTreeSet::new();
    for event in events {
        payload_columns.extend(event.payload.keys().map(String::as_str));
    }

    let schema = Arc::new(artifact_schema(&payload_columns));

    let mut tokens = Vec::with_capacity(events.len());
    for event in events {
        tokens.push(serde_json::to_string(&event.token)?);
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            events.iter().map(|event| event.operation.as_str()),
        )),
        Arc::new(Int64Array::from_iter_values(
            events.iter().map(|event| event.token.position),
        )),
        Arc::new(StringArray::from(tokens)),
        Arc::new(StringArray::from_iter_values(
            events.iter().map(|event| event.key.to_json_string()),
        )),
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(
                events.iter().map(|event| event.ingested_at.timestamp_micros()),
            )
            .with_timezone(TIMEZONE),
        ),
        Arc::new(
            TimestampMicrosecondArray::from_iter_values(
                events
                    .iter()
                    .map(|event| event.source_timestamp.timestamp_micros()),
            )
            .with_timezone(TIMEZONE),
        ),
    ];

    for column in &payload_columns {
        let mut values = Vec::with_capacity(events.len());
        for event in events {
            let value = match event.payload.get(*column) {
                Some(value) => Some(serde_json::to_string(value)?),
                None => None,
            };
            values.push(value);
        }
        columns.push(Arc::new(StringArray::from(values)));
    }

    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let mut buffer = Vec::new();
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(Bytes::from(buffer))
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> EtlResult<&'a arrow::array::StringArray> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_string_opt::<i32>())
        .ok_or_else(|| {
            etl_error!(
                ErrorKind::InvalidData,
                "Artifact column is missing or mistyped",
                format!("column `{name}` is not a text column")
            )
        })
}

fn timestamp_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> EtlResult<&'a TimestampMicrosecondArray> {
    batch
        .column_by_name(name)
        .and_then(|column| column.as_primitive_opt::<TimestampMicrosecondType>())
        .ok_or_else(|| {
            etl_error!(
                ErrorKind::InvalidData,
                "Artifact column is missing or mistyped",
                format!("column `{name}` is not a timestamp column")
            )
        })
}

fn timestamp_value(array: &TimestampMicrosecondArray, index: usize) -> EtlResult<DateTime<Utc>> {
    let micros = array.value(index);
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        etl_error!(
            ErrorKind::InvalidData,
            "Artifact timestamp is out of range",
            format!("{micros} microseconds")
        )
    })
}

/// Reads the events back from an artifact produced by [`encode_events`].
pub fn decode_artifact(bytes: Bytes) -> EtlResult<Vec<ChangeEvent>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;

    let mut events = Vec::new();
    for batch in reader {
        let batch = batch?;

        let operations = string_column(&batch, OPERATION_COLUMN)?;
        let tokens = string_column(&batch, TOKEN_COLUMN)?;
        let keys = string_column(&batch, PRIMARY_KEY_COLUMN)?;
        let ingested_at = timestamp_column(&batch, INGESTED_AT_COLUMN)?;
        let source_timestamps = timestamp_column(&batch, SOURCE_TIMESTAMP_COLUMN)?;

        let schema = batch.schema();
        let mut payload_columns = Vec::new();
        for field in schema.fields() {
            if let Some(column) = field.name().strip_prefix(PAYLOAD_COLUMN_PREFIX) {
                let values = string_column(&batch, field.name())?;
                payload_columns.push((column.to_owned(), values));
            }
        }

        for index in 0..batch.num_rows() {
            let mut payload = RowPayload::new();
            for (name, values) in &payload_columns {
                if values.is_null(index) {
                    continue;
                }
                payload.insert(name.clone(), serde_json::from_str(values.value(index))?);
            }

            let token: OrderingToken = serde_json::from_str(tokens.value(index))?;
            events.push(ChangeEvent {
                operation: ChangeOperation::parse(operations.value(index))?,
                key: PrimaryKey::from_json_str(keys.value(index))?,
                payload,
                token,
                source_timestamp: timestamp_value(source_timestamps, index)?,
                ingested_at: timestamp_value(ingested_at, index)?,
            });
        }
    }

    Ok(events)
}
