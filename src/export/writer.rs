use crate::config::ExportSettings;
use crate::error::{Error, Result};
use std::io::Write;

/// Delimited-text row writer
///
/// Rows are written as they arrive and flushed per batch, so the output is
/// valid up to the last complete batch if the run stops early.
pub struct CsvRowWriter<W: Write> {
    writer: csv::Writer<W>,
    rows_written: u64,
}

impl<W: Write> CsvRowWriter<W> {
    /// Writer honoring the configured delimiter and quote character
    pub fn new(inner: W, settings: &ExportSettings) -> Result<Self> {
        let writer = csv::WriterBuilder::new()
            .delimiter(settings.delimiter_byte()?)
            .quote(settings.quote_byte()?)
            .from_writer(inner);
        Ok(CsvRowWriter {
            writer,
            rows_written: 0,
        })
    }

    pub fn write_header(&mut self, headers: &[String]) -> Result<()> {
        self.writer.write_record(headers)?;
        Ok(())
    }

    pub fn write_rows(&mut self, rows: &[Vec<String>]) -> Result<()> {
        for row in rows {
            self.writer.write_record(row)?;
            self.rows_written += 1;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Data rows written so far, excluding the header
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and return the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|err| Error::Io(err.into_error()))
    }
}
