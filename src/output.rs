//! Result sinks.
//!
//! The master emits one header per slave and then one row of canonical
//! variable values per slave and emitted time. Sinks decide where the rows
//! go: [`CsvResultSink`] writes one `result<i>.csv` per slave,
//! [`MemorySink`] keeps them for inspection.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::{ScalarValue, SimTime, SlaveIndex};

/// Receiver of per-slave result rows.
pub trait ResultSink {
    /// Opens the stream of one slave and writes its header.
    fn open(&mut self, slave: SlaveIndex, name: &str, columns: &[String]) -> io::Result<()>;

    /// Writes one row of values for `time`.
    fn write_row(&mut self, slave: SlaveIndex, time: SimTime, values: &[ScalarValue]) -> io::Result<()>;

    /// Flushes and closes every stream.
    ///
    /// Returns one artifact description per opened slave, in index order.
    fn close(&mut self) -> io::Result<Vec<String>>;
}

/// Writes `result<i>.csv` files with a configurable field separator.
///
/// With `,` as separator numbers use a decimal point; with any other
/// separator reals are written with a decimal comma, which is what
/// spreadsheet tools expect for `;` or tab separated files. Fields holding
/// the separator, a quote or a line break are quoted.
#[derive(Debug)]
pub struct CsvResultSink {
    dir: PathBuf,
    separator: char,
    files: Vec<Option<(PathBuf, csv::Writer<File>)>>,
}

impl CsvResultSink {
    /// Creates a sink writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>, separator: char) -> Self {
        Self {
            dir: dir.into(),
            separator,
            files: Vec::new(),
        }
    }

    /// Returns the path of the result file of a slave.
    pub fn path_for(&self, slave: SlaveIndex) -> PathBuf {
        self.dir.join(format!("result{slave}.csv"))
    }

    fn delimiter(&self) -> io::Result<u8> {
        if self.separator.is_ascii() {
            Ok(self.separator as u8)
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("separator {:?} is not an ASCII character", self.separator),
            ))
        }
    }

    fn writer(&mut self, slave: SlaveIndex) -> io::Result<&mut csv::Writer<File>> {
        self.files
            .get_mut(slave)
            .and_then(Option::as_mut)
            .map(|(_, w)| w)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("result stream of slave {slave} is not open"),
                )
            })
    }

    fn format_real(&self, value: f64) -> String {
        let text = value.to_string();
        if self.separator == ',' {
            text
        } else {
            text.replace('.', ",")
        }
    }

    fn format_value(&self, value: &ScalarValue) -> String {
        match value {
            ScalarValue::Real(v) => self.format_real(*v),
            ScalarValue::Integer(v) | ScalarValue::Enumeration(v) => v.to_string(),
            ScalarValue::Boolean(v) => u8::from(*v).to_string(),
            ScalarValue::String(v) => v.clone(),
        }
    }
}

impl ResultSink for CsvResultSink {
    fn open(&mut self, slave: SlaveIndex, _name: &str, columns: &[String]) -> io::Result<()> {
        let path = self.path_for(slave);
        let file = File::create(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("could not write {}: {e}", path.display()))
        })?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter()?)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        writer.write_record(std::iter::once("time").chain(columns.iter().map(String::as_str)))?;

        if self.files.len() <= slave {
            self.files.resize_with(slave + 1, || None);
        }
        self.files[slave] = Some((path, writer));
        Ok(())
    }

    fn write_row(&mut self, slave: SlaveIndex, time: SimTime, values: &[ScalarValue]) -> io::Result<()> {
        let record: Vec<String> = std::iter::once(self.format_real(time))
            .chain(values.iter().map(|v| self.format_value(v)))
            .collect();
        self.writer(slave)?.write_record(&record)?;
        Ok(())
    }

    fn close(&mut self) -> io::Result<Vec<String>> {
        let mut artifacts = Vec::new();
        for (path, mut writer) in self.files.drain(..).flatten() {
            writer.flush()?;
            artifacts.push(path.display().to_string());
        }
        Ok(artifacts)
    }
}

/// One slave's rows held by a [`MemorySink`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<(SimTime, Vec<ScalarValue>)>,
}

impl MemoryTable {
    /// Returns the emitted times in order.
    pub fn times(&self) -> Vec<SimTime> {
        self.rows.iter().map(|(t, _)| *t).collect()
    }

    /// Returns the values of one column in row order.
    pub fn column(&self, name: &str) -> Option<Vec<ScalarValue>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|(_, values)| values[index].clone()).collect())
    }
}

/// Keeps all rows in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    tables: Vec<MemoryTable>,
    closed: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table of a slave.
    pub fn table(&self, slave: SlaveIndex) -> Option<&MemoryTable> {
        self.tables.get(slave)
    }

    /// Returns the number of opened tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ResultSink for MemorySink {
    fn open(&mut self, slave: SlaveIndex, name: &str, columns: &[String]) -> io::Result<()> {
        if self.tables.len() <= slave {
            self.tables.resize_with(slave + 1, MemoryTable::default);
        }
        self.tables[slave] = MemoryTable {
            name: name.to_string(),
            columns: columns.to_vec(),
            rows: Vec::new(),
        };
        Ok(())
    }

    fn write_row(&mut self, slave: SlaveIndex, time: SimTime, values: &[ScalarValue]) -> io::Result<()> {
        let table = self.tables.get_mut(slave).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("table of slave {slave} is not open"))
        })?;
        table.rows.push((time, values.to_vec()));
        Ok(())
    }

    fn close(&mut self) -> io::Result<Vec<String>> {
        self.closed = true;
        Ok(self.tables.iter().map(|t| format!("memory:{}", t.name)).collect())
    }
}

/// Reads back a CSV result file as lines, for diagnostics and tests.
pub fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    Ok(std::fs::read_to_string(path)?.lines().map(str::to_string).collect())
}
