//! Parquet files made of UTF-8 text columns.
//!
//! The metadata corpus arrives as Parquet and the join artifact is written
//! as ZSTD-compressed Parquet. Rows are read through a projected, forward-only
//! `RowIter` that owns its file, so a reader can be parked between chunks
//! without re-opening or re-scanning anything.

use crate::error::{PipelineError, Result};
use parquet::basic::{Compression, ZstdLevel};
use parquet::data_type::{ByteArray, ByteArrayType};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::reader::RowIter;
use parquet::record::{Field, Row};
use parquet::schema::parser::parse_message_type;
use parquet::schema::types::Type;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Rows buffered before a row group is flushed.
pub const DEFAULT_ROW_GROUP_ROWS: usize = 65_536;

// ============================================================================
// Writer
// ============================================================================

/// A text column: name, and whether it may hold nulls.
#[derive(Clone, Copy, Debug)]
pub struct TextColumn {
    pub name: &'static str,
    pub nullable: bool,
}

impl TextColumn {
    pub const fn required(name: &'static str) -> Self {
        Self { name, nullable: false }
    }

    pub const fn nullable(name: &'static str) -> Self {
        Self { name, nullable: true }
    }
}

fn message_type(table: &str, columns: &[TextColumn]) -> String {
    let mut schema = format!("message {} {{\n", table);
    for col in columns {
        let repetition = if col.nullable { "OPTIONAL" } else { "REQUIRED" };
        schema.push_str(&format!("    {} BINARY {} (UTF8);\n", repetition, col.name));
    }
    schema.push('}');
    schema
}

/// Streams rows of text into a ZSTD-compressed Parquet file, one row group
/// per `group_rows` rows.
pub struct TextTableWriter {
    inner: SerializedFileWriter<File>,
    columns: Vec<TextColumn>,
    buffered: Vec<Vec<Option<String>>>, // Column-major
    group_rows: usize,
    rows_written: u64,
}

impl TextTableWriter {
    pub fn create(path: &Path, table: &str, columns: &[TextColumn], group_rows: usize) -> Result<Self> {
        let schema = parse_message_type(&message_type(table, columns))
            .map_err(|e| PipelineError::columnar("schema", e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build();
        let file = File::create(path)?;
        let inner = SerializedFileWriter::new(file, Arc::new(schema), Arc::new(props))
            .map_err(|e| PipelineError::columnar("open", e))?;
        Ok(Self {
            inner,
            columns: columns.to_vec(),
            buffered: vec![Vec::new(); columns.len()],
            group_rows: group_rows.max(1),
            rows_written: 0,
        })
    }

    /// Buffer one row, flushing a row group when the buffer is full.
    pub fn push_row<I>(&mut self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let mut width = 0;
        for (idx, value) in row.into_iter().enumerate() {
            let Some(col) = self.columns.get(idx) else {
                return Err(PipelineError::Config(format!(
                    "row has more than {} columns",
                    self.columns.len()
                )));
            };
            if value.is_none() && !col.nullable {
                return Err(PipelineError::Config(format!("column '{}' cannot be null", col.name)));
            }
            self.buffered[idx].push(value);
            width += 1;
        }
        if width != self.columns.len() {
            return Err(PipelineError::Config(format!(
                "row has {} columns, expected {}",
                width,
                self.columns.len()
            )));
        }
        if self.buffered[0].len() >= self.group_rows {
            self.flush_group()?;
        }
        Ok(())
    }

    fn flush_group(&mut self) -> Result<()> {
        let rows = self.buffered.first().map_or(0, Vec::len);
        if rows == 0 {
            return Ok(());
        }
        let mut group = self
            .inner
            .next_row_group()
            .map_err(|e| PipelineError::columnar("row group", e))?;
        for (values, col) in self.buffered.iter_mut().zip(&self.columns) {
            let mut writer = group
                .next_column()
                .map_err(|e| PipelineError::columnar("column", e))?
                .ok_or_else(|| {
                    PipelineError::columnar("column", ParquetError::General(format!("missing column {}", col.name)))
                })?;
            let data: Vec<ByteArray> = values.iter().flatten().map(|v| ByteArray::from(v.as_str())).collect();
            let written = if col.nullable {
                let levels: Vec<i16> = values.iter().map(|v| i16::from(v.is_some())).collect();
                writer.typed::<ByteArrayType>().write_batch(&data, Some(&levels), None)
            } else {
                writer.typed::<ByteArrayType>().write_batch(&data, None, None)
            };
            written.map_err(|e| PipelineError::columnar("column", e))?;
            writer.close().map_err(|e| PipelineError::columnar("column", e))?;
            values.clear();
        }
        group.close().map_err(|e| PipelineError::columnar("row group", e))?;
        self.rows_written += rows as u64;
        Ok(())
    }

    /// Flush the last row group and write the footer. Returns rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.flush_group()?;
        self.inner.close().map_err(|e| PipelineError::columnar("footer", e))?;
        Ok(self.rows_written)
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Forward-only rows of one Parquet file, restricted to the requested columns.
pub struct TextRows {
    pub total_rows: u64,
    pub columns: Vec<String>, // Projected columns present in the file
    pub rows: RowIter<'static>,
}

/// Open `path` and project it onto `wanted` (file order is kept).
///
/// Columns in `required` must be present. A missing file, a bad footer or a
/// missing required column is an input-format error.
pub fn open_text_rows(path: &Path, wanted: &[&str], required: &[&str]) -> Result<TextRows> {
    let file = File::open(path).map_err(|e| PipelineError::InputFormat {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let reader = SerializedFileReader::new(file).map_err(|e| PipelineError::input(path, e))?;

    let file_meta = reader.metadata().file_metadata();
    let total_rows = u64::try_from(file_meta.num_rows()).unwrap_or(0);
    // A projection must carry the file's own root name
    let root = file_meta.schema().name().to_string();
    let selected: Vec<Arc<Type>> = file_meta
        .schema()
        .get_fields()
        .iter()
        .filter(|f| wanted.contains(&f.name()))
        .cloned()
        .collect();
    let columns: Vec<String> = selected.iter().map(|f| f.name().to_string()).collect();
    if let Some(missing) = required.iter().find(|r| !columns.iter().any(|c| c == *r)) {
        return Err(PipelineError::InputFormat {
            path: path.to_path_buf(),
            reason: format!("missing column '{}'", missing),
        });
    }

    let projection = Type::group_type_builder(&root)
        .with_fields(selected)
        .build()
        .map_err(|e| PipelineError::input(path, e))?;
    let rows = RowIter::from_file_into(Box::new(reader))
        .project(Some(projection))
        .map_err(|e| PipelineError::input(path, e))?;

    Ok(TextRows {
        total_rows,
        columns,
        rows,
    })
}

/// Leaf column names of a Parquet file, or `None` if it is not one.
pub fn column_names(path: &Path) -> Option<Vec<String>> {
    let reader = SerializedFileReader::new(File::open(path).ok()?).ok()?;
    let names = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    Some(names)
}

/// Text of a cell; non-text scalars are rendered, bytes must be UTF-8.
pub fn field_text(field: &Field) -> Option<String> {
    match field {
        Field::Null => None,
        Field::Str(s) => Some(s.clone()),
        Field::Bytes(b) => std::str::from_utf8(b.data()).ok().map(str::to_string),
        other => Some(other.to_string()),
    }
}

/// The named cell of `row`, as text.
pub fn row_text(row: &Row, name: &str) -> Option<String> {
    row.get_column_iter()
        .find(|(col, _)| col.as_str() == name)
        .and_then(|(_, field)| field_text(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COLUMNS: [TextColumn; 2] = [TextColumn::required("url"), TextColumn::nullable("title")];

    fn write(path: &Path, rows: &[(&str, Option<&str>)], group_rows: usize) -> u64 {
        let mut writer = TextTableWriter::create(path, "pages", &COLUMNS, group_rows).unwrap();
        for (url, title) in rows {
            writer
                .push_row([Some(url.to_string()), title.map(str::to_string)])
                .unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_message_type() {
        assert_eq!(
            message_type("pages", &COLUMNS),
            "message pages {\n    REQUIRED BINARY url (UTF8);\n    OPTIONAL BINARY title (UTF8);\n}"
        );
    }

    #[test]
    fn test_write_then_read_with_nulls_across_row_groups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.parquet");
        let rows = [("https://a.example/", Some("A")), ("https://b.example/", None), ("https://c.example/", Some(""))];
        assert_eq!(write(&path, &rows, 2), 3);

        let text = open_text_rows(&path, &["url", "title"], &["url"]).unwrap();
        assert_eq!(text.total_rows, 3);
        let read: Vec<(Option<String>, Option<String>)> = text
            .rows
            .map(|r| {
                let row = r.unwrap();
                (row_text(&row, "url"), row_text(&row, "title"))
            })
            .collect();
        assert_eq!(
            read,
            vec![
                (Some("https://a.example/".into()), Some("A".into())),
                (Some("https://b.example/".into()), None),
                (Some("https://c.example/".into()), Some("".into())),
            ]
        );
    }

    #[test]
    fn test_projection_drops_unwanted_columns() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.parquet");
        write(&path, &[("https://a.example/", Some("A"))], 10);

        let text = open_text_rows(&path, &["url", "description"], &["url"]).unwrap();
        assert_eq!(text.columns, vec!["url".to_string()]);
        let row = text.rows.into_iter().next().unwrap().unwrap();
        assert_eq!(row.get_column_iter().count(), 1);
    }

    #[test]
    fn test_missing_required_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.parquet");
        write(&path, &[("https://a.example/", None)], 10);
        let err = open_text_rows(&path, &["link"], &["link"]).err().unwrap();
        assert!(matches!(err, PipelineError::InputFormat { .. }));
    }

    #[test]
    fn test_not_parquet_is_input_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.parquet");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        let err = open_text_rows(&path, &["url"], &["url"]).err().unwrap();
        assert!(matches!(err, PipelineError::InputFormat { .. }));
        assert!(column_names(&path).is_none());
    }

    #[test]
    fn test_null_in_required_column_rejected() {
        let dir = TempDir::new().unwrap();
        let mut writer = TextTableWriter::create(&dir.path().join("p.parquet"), "pages", &COLUMNS, 10).unwrap();
        assert!(writer.push_row([None, Some("t".to_string())]).is_err());
        assert!(writer.push_row([Some("u".to_string())]).is_err());
    }

    #[test]
    fn test_file_is_zstd_compressed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pages.parquet");
        write(&path, &[("https://a.example/", Some("A"))], 10);

        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        let group = reader.metadata().row_group(0);
        assert!(matches!(group.column(0).compression(), Compression::ZSTD(_)));
    }
}
