//! Parquet encoding of normalized batches.
//!
//! The schema is the contract with the warehouse: `INFER_SCHEMA` derives the
//! `news_api_data` table from it and `COPY INTO` matches columns by name.
//! Files are written uncompressed so that two batches with the same shape
//! encode to the same number of bytes.

use crate::error::Result;
use crate::models::NormalizedRecord;
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

pub fn news_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("newsTitle", DataType::Utf8, false),
        Field::new("timestamp", DataType::Utf8, false),
        Field::new("url_source", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("author", DataType::Utf8, true),
        Field::new("urlToImage", DataType::Utf8, true),
        Field::new("processed_at", DataType::Utf8, false),
    ]))
}

fn utf8<'a>(values: impl Iterator<Item = &'a str>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

fn nullable_utf8<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(values.collect::<StringArray>())
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::UNCOMPRESSED)
        .set_created_by(concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")).to_string())
        .build()
}

/// Encode `records` as a single-row-group Parquet file.
pub fn encode_records(records: &[NormalizedRecord]) -> Result<Bytes> {
    let schema = news_schema();
    let columns = vec![
        utf8(records.iter().map(|r| r.news_title.as_str())),
        utf8(records.iter().map(|r| r.timestamp.as_str())),
        utf8(records.iter().map(|r| r.url_source.as_str())),
        utf8(records.iter().map(|r| r.content.as_str())),
        utf8(records.iter().map(|r| r.source.as_str())),
        nullable_utf8(records.iter().map(|r| r.author.as_deref())),
        nullable_utf8(records.iter().map(|r| r.url_to_image.as_deref())),
        utf8(records.iter().map(|r| r.processed_at.as_str())),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(writer_properties()))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(Bytes::from(buf))
}
