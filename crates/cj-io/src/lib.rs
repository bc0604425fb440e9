#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use cj_table::{Row, Table, TableError};
use csv::{ReaderBuilder, WriterBuilder};
use tempfile::Builder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("input has no header row")]
    MissingHeaders,
    #[error("file not found error: {}", path.display())]
    FileNotFound { path: PathBuf },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    pub delimiter: u8,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub delimiter: u8,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

pub fn read_table_str(input: &str, key_column: &str) -> Result<Table, IoError> {
    read_table_with_options(input.as_bytes(), key_column, ReadOptions::default())
}

/// Reads a header row plus data rows from `source` and indexes them on
/// `key_column`. Cells are taken verbatim: no trimming, no type inference.
///
/// Blank lines are skipped by the reader and count as neither rows nor
/// malformed rows.
pub fn read_table_with_options<R: Read>(
    source: R,
    key_column: &str,
    options: ReadOptions,
) -> Result<Table, IoError> {
    // Flexible so width mismatches surface as `TableError::MalformedRow`
    // instead of a generic csv error.
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(options.delimiter)
        .from_reader(source);

    let header = reader
        .headers()?
        .iter()
        .map(str::to_owned)
        .collect::<Vec<_>>();

    if header.is_empty() {
        return Err(IoError::MissingHeaders);
    }

    let mut rows: Vec<Row> = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_owned).collect());
    }

    Ok(Table::new(header, rows, key_column)?)
}

pub fn load_table(
    path: impl AsRef<Path>,
    key_column: &str,
    options: ReadOptions,
) -> Result<Table, IoError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => IoError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => IoError::Io(err),
    })?;

    let table = read_table_with_options(BufReader::new(file), key_column, options)?;
    log::debug!(
        "loaded {}: columns={} rows={} distinct_keys={} key_column={}",
        path.display(),
        table.width(),
        table.len(),
        table.key_index().len(),
        table.key_column_name()
    );
    Ok(table)
}

pub fn write_csv<W: Write>(
    sink: W,
    header: &[String],
    rows: &[Row],
    options: WriteOptions,
) -> Result<(), IoError> {
    let mut writer = WriterBuilder::new()
        .delimiter(options.delimiter)
        .from_writer(sink);

    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv_string(header: &[String], rows: &[Row]) -> Result<String, IoError> {
    let mut buffer = Vec::new();
    write_csv(&mut buffer, header, rows, WriteOptions::default())?;
    Ok(String::from_utf8(buffer)?)
}

/// Writes to a temporary file next to `path` and renames it into place, so a
/// failed write never leaves a partial file at `path`.
///
/// A new file gets the mode a plain create would (`0o666` less the umask); an
/// overwritten file keeps its previous permissions.
pub fn write_csv_file(
    path: impl AsRef<Path>,
    header: &[String],
    rows: &[Row],
    options: WriteOptions,
) -> Result<(), IoError> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    #[cfg_attr(not(unix), allow(unused_mut))]
    let mut builder = Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Applied through open(2), so the umask still masks it.
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let staged = builder.tempfile_in(dir)?;
    if let Ok(existing) = fs::metadata(path) {
        staged.as_file().set_permissions(existing.permissions())?;
    }
    {
        let mut sink = BufWriter::new(staged.as_file());
        write_csv(&mut sink, header, rows, options)?;
        sink.flush()?;
    }
    staged.persist(path).map_err(|err| IoError::Io(err.error))?;

    log::debug!("wrote {}: rows={}", path.display(), rows.len());
    Ok(())
}
