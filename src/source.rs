//! Row source: turns a byte stream into an ordered, lazy sequence of rows.
//!
//! Schema inference needs a prefix of rows while batching needs the entire
//! stream including that prefix, and the underlying stream may not be
//! seekable (a pipe). [`RowSource`] therefore buffers exactly the first
//! `sample_size` rows in memory and replays them before resuming live reads:
//! single-pass I/O, with buffered memory bounded by the sample size no matter
//! how large the input is.

use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};

use crate::error::{LoaderError, LoaderResult};
use crate::types::{Field, Row};

/// Configuration for a [`RowSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOptions {
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Whether the first row is a header supplying column names.
    pub header_present: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header_present: true,
        }
    }
}

impl SourceOptions {
    /// Parse a delimiter from its usual command-line spellings.
    ///
    /// Accepts `","`, `"\t"` or `"tab"`, `"|"`, `";"`, or any single byte.
    pub fn delimiter_from_str(s: &str) -> LoaderResult<u8> {
        match s {
            "," => Ok(b','),
            "\\t" | "tab" => Ok(b'\t'),
            "|" => Ok(b'|'),
            ";" => Ok(b';'),
            s if s.len() == 1 => Ok(s.as_bytes()[0]),
            _ => Err(LoaderError::Config {
                message: format!("invalid delimiter: {s}"),
            }),
        }
    }
}

/// A lazy, finite, forward-only sequence of [`Row`]s over a byte stream.
#[derive(Debug)]
pub struct RowSource<R: Read> {
    reader: csv::Reader<R>,
    header_present: bool,
    column_names: Vec<String>,
    header_read: bool,
    buffered: Vec<Row>,
    next_position: u64,
}

impl RowSource<std::fs::File> {
    /// Open a file as a row source.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::File`] if the file cannot be opened.
    pub fn open_path(path: impl AsRef<Path>, options: &SourceOptions) -> LoaderResult<Self> {
        let file = std::fs::File::open(path)?;
        Ok(Self::new(file, options))
    }
}

impl<R: Read> RowSource<R> {
    /// Create a row source over any byte stream.
    pub fn new(input: R, options: &SourceOptions) -> Self {
        // Width enforcement is done here (not by the csv crate) so shape
        // violations surface as ParseError with a 1-based line number.
        let reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(input);

        Self {
            reader,
            header_present: options.header_present,
            column_names: Vec::new(),
            header_read: false,
            buffered: Vec::new(),
            next_position: 1,
        }
    }

    /// Column names, from the header or synthesized as `column_1..column_N`.
    ///
    /// Empty until [`RowSource::sample`] (or [`RowSource::rows`]) has
    /// consumed the start of the stream.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Read the header (if configured) and buffer up to `n` data rows.
    ///
    /// The buffered rows are replayed, in order, ahead of the live stream by
    /// [`RowSource::rows`], so sampling does not consume data.
    pub fn sample(&mut self, n: usize) -> LoaderResult<&[Row]> {
        self.ensure_header()?;
        while self.buffered.len() < n {
            match self.read_data_row()? {
                Some(row) => self.buffered.push(row),
                None => break,
            }
        }
        Ok(&self.buffered)
    }

    /// The rows buffered by [`RowSource::sample`], in source order.
    pub fn sampled_rows(&self) -> &[Row] {
        &self.buffered
    }

    /// Consume the source, yielding all rows: the buffered sample first,
    /// then the remainder of the stream.
    pub fn rows(mut self) -> LoaderResult<RowIter<R>> {
        self.ensure_header()?;
        Ok(RowIter {
            buffered: self.buffered.into_iter(),
            reader: self.reader,
            expected_fields: self.column_names.len(),
            header_present: self.header_present,
            next_position: self.next_position,
            done: false,
        })
    }

    fn ensure_header(&mut self) -> LoaderResult<()> {
        if self.header_read {
            return Ok(());
        }
        self.header_read = true;

        let mut record = StringRecord::new();
        if self.header_present {
            if read_record(&mut self.reader, &mut record)? {
                self.column_names = record.iter().map(String::from).collect();
            }
        } else if read_record(&mut self.reader, &mut record)? {
            // No header: synthesize names from the first data row's width and
            // keep that row as data.
            self.column_names = (1..=record.len()).map(|i| format!("column_{i}")).collect();
            let row = row_from_record(&record, 1, self.column_names.len(), false)?;
            self.buffered.push(row);
            self.next_position = 2;
        }
        Ok(())
    }

    fn read_data_row(&mut self) -> LoaderResult<Option<Row>> {
        let mut record = StringRecord::new();
        if !read_record(&mut self.reader, &mut record)? {
            return Ok(None);
        }
        let row = row_from_record(
            &record,
            self.next_position,
            self.column_names.len(),
            self.header_present,
        )?;
        self.next_position += 1;
        Ok(Some(row))
    }
}

/// Iterator over all rows of a consumed [`RowSource`].
///
/// Yields the buffered sample first, then live reads. A fatal error ends the
/// iteration; width mismatches are never skipped.
pub struct RowIter<R: Read> {
    buffered: std::vec::IntoIter<Row>,
    reader: csv::Reader<R>,
    expected_fields: usize,
    header_present: bool,
    next_position: u64,
    done: bool,
}

impl<R: Read> Iterator for RowIter<R> {
    type Item = LoaderResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(row) = self.buffered.next() {
            return Some(Ok(row));
        }
        if self.done {
            return None;
        }

        let mut record = StringRecord::new();
        let item = match read_record(&mut self.reader, &mut record) {
            Ok(false) => None,
            Ok(true) => {
                let row = row_from_record(
                    &record,
                    self.next_position,
                    self.expected_fields,
                    self.header_present,
                );
                self.next_position += 1;
                Some(row)
            }
            Err(e) => Some(Err(e)),
        };

        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

fn read_record<R: Read>(
    reader: &mut csv::Reader<R>,
    record: &mut StringRecord,
) -> LoaderResult<bool> {
    reader.read_record(record).map_err(csv_error)
}

fn row_from_record(
    record: &StringRecord,
    position: u64,
    expected_fields: usize,
    header_present: bool,
) -> LoaderResult<Row> {
    if record.len() != expected_fields {
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(position + u64::from(header_present));
        return Err(LoaderError::Parse {
            line,
            message: format!(
                "row has {} fields, expected {}",
                record.len(),
                expected_fields
            ),
        });
    }
    Ok(Row::new(position, record.iter().map(Field::new).collect()))
}

fn csv_error(err: csv::Error) -> LoaderError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(io) => LoaderError::File(io),
        _ => LoaderError::Parse { line, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source<'a>(input: &'a str, options: &SourceOptions) -> RowSource<&'a [u8]> {
        RowSource::new(input.as_bytes(), options)
    }

    #[test]
    fn header_supplies_column_names() {
        let mut src = source("name,age\nAda,36\n", &SourceOptions::default());
        src.sample(10).unwrap();
        assert_eq!(src.column_names(), ["name", "age"]);
    }

    #[test]
    fn missing_header_synthesizes_names_and_keeps_first_row() {
        let opts = SourceOptions {
            header_present: false,
            ..SourceOptions::default()
        };
        let mut src = source("Ada,36\nGrace,41\n", &opts);
        let sample = src.sample(10).unwrap().to_vec();

        assert_eq!(src.column_names(), ["column_1", "column_2"]);
        assert_eq!(sample.len(), 2);
        assert_eq!(sample[0].fields()[0].raw(), "Ada");
        assert_eq!(sample[0].position(), 1);
    }

    #[test]
    fn sample_is_replayed_before_live_rows() {
        let mut src = source("id\n1\n2\n3\n4\n", &SourceOptions::default());
        let sample = src.sample(2).unwrap();
        assert_eq!(sample.len(), 2);

        let rows: Vec<Row> = src.rows().unwrap().map(Result::unwrap).collect();
        let raws: Vec<&str> = rows.iter().map(|r| r.fields()[0].raw()).collect();
        assert_eq!(raws, ["1", "2", "3", "4"]);
        let positions: Vec<u64> = rows.iter().map(Row::position).collect();
        assert_eq!(positions, [1, 2, 3, 4]);
    }

    #[test]
    fn width_mismatch_is_fatal_with_line_number() {
        let mut src = source("a,b\n1,2\n1,2,3\n9,9\n", &SourceOptions::default());
        src.sample(1).unwrap();

        let mut rows = src.rows().unwrap();
        assert!(rows.next().unwrap().is_ok());
        let err = rows.next().unwrap().unwrap_err();
        match err {
            LoaderError::Parse { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("3 fields, expected 2"));
            }
            other => panic!("expected Parse error, got {other:?}"),
        }
        // Fail-fast: iteration ends after a shape violation.
        assert!(rows.next().is_none());
    }

    #[test]
    fn custom_delimiter() {
        let opts = SourceOptions {
            delimiter: b'|',
            ..SourceOptions::default()
        };
        let mut src = source("a|b\n1|2\n", &opts);
        let sample = src.sample(10).unwrap();
        assert_eq!(sample[0].fields()[1].raw(), "2");
    }

    #[test]
    fn delimiter_from_str_spellings() {
        assert_eq!(SourceOptions::delimiter_from_str(",").unwrap(), b',');
        assert_eq!(SourceOptions::delimiter_from_str("\\t").unwrap(), b'\t');
        assert_eq!(SourceOptions::delimiter_from_str("tab").unwrap(), b'\t');
        assert_eq!(SourceOptions::delimiter_from_str("|").unwrap(), b'|');
        assert_eq!(SourceOptions::delimiter_from_str(";").unwrap(), b';');
        assert!(SourceOptions::delimiter_from_str("ab").is_err());
    }

    #[test]
    fn empty_input_yields_no_rows() {
        let mut src = source("", &SourceOptions::default());
        assert!(src.sample(10).unwrap().is_empty());
        let mut src = source("id,name\n", &SourceOptions::default());
        assert!(src.sample(10).unwrap().is_empty());
    }
}
