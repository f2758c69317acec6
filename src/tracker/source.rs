use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use calamine::{DataType, Reader, Xlsx, open_workbook};
use tracing::{error, info, instrument};

use crate::tracker::client::SheetClient;
use crate::tracker::config::{ConnectorKind, Context, SourceConfig};
use crate::tracker::dispatch::Transport;
use crate::tracker::error::{Result, TrackerError};
use crate::tracker::model::{Record, SourceValue};

/// Read-only table of records that sheets are reconciled against.
pub trait TabularSource {
    fn id(&self) -> &str;

    fn records(&self) -> &[Record];

    /// Returns the first record, in table order, whose value at `column`
    /// normalises to `value`.
    fn lookup(&self, column: usize, value: &str) -> Option<&Record> {
        self.records()
            .iter()
            .find(|record| record.get(column).is_some_and(|cell| cell.key() == value))
    }
}

/// In-memory source table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    id: String,
    records: Vec<Record>,
}

impl Table {
    pub fn new(id: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            id: id.into(),
            records,
        }
    }

    /// Convenience constructor for string-only tables.
    pub fn from_rows(id: impl Into<String>, rows: &[&[&str]]) -> Self {
        let records = rows
            .iter()
            .map(|row| row.iter().map(|cell| SourceValue::from(*cell)).collect())
            .collect();
        Self::new(id, records)
    }
}

impl TabularSource for Table {
    fn id(&self) -> &str {
        &self.id
    }

    fn records(&self) -> &[Record] {
        &self.records
    }
}

/// Loads one configured source through its connector.
#[instrument(level = "info", skip_all, fields(source_id = %config.source_id, connector = ?config.connector))]
pub fn load_source<T: Transport + ?Sized>(
    config: &SourceConfig,
    context: &Context,
    client: &SheetClient<'_, T>,
) -> Result<Table> {
    let records = match config.connector {
        ConnectorKind::Csv => {
            let path = context.settings.resolve_path(&config.file_name);
            read_csv(open_file(&path)?, config.has_headers)?
        }
        ConnectorKind::Excel => {
            let path = context.settings.resolve_path(&config.file_name);
            if !path.exists() {
                return Err(TrackerError::MissingInput(path));
            }
            let mut workbook: Xlsx<_> = open_workbook(&path)?;
            read_workbook(&mut workbook, config.worksheet.as_deref(), config.has_headers)?
        }
        ConnectorKind::SheetAttachment => {
            let sheet_id = config.sheet_id.ok_or_else(|| {
                TrackerError::Config(format!("source '{}' needs a sheetId", config.source_id))
            })?;
            match client.latest_attachment(sheet_id, &config.file_name)? {
                Some(bytes) => read_attachment(config, bytes)?,
                None => {
                    info!(file_name = %config.file_name, "no attachment found, source is empty");
                    Vec::new()
                }
            }
        }
    };

    info!(record_count = records.len(), "source loaded");
    Ok(Table::new(config.source_id.clone(), records))
}

fn open_file(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(TrackerError::MissingInput(path.to_path_buf()));
    }
    Ok(File::open(path)?)
}

fn read_attachment(config: &SourceConfig, bytes: Vec<u8>) -> Result<Vec<Record>> {
    let name = config.file_name.to_ascii_lowercase();
    if name.ends_with(".xlsx") {
        let mut workbook = Xlsx::new(Cursor::new(bytes))?;
        read_workbook(&mut workbook, config.worksheet.as_deref(), config.has_headers)
    } else if name.ends_with(".csv") {
        read_csv(bytes.as_slice(), config.has_headers)
    } else {
        Err(TrackerError::Config(format!(
            "attachment '{}' of source '{}' is neither .csv nor .xlsx",
            config.file_name, config.source_id
        )))
    }
}

/// Reads CSV records. Rows may have differing lengths.
pub fn read_csv<R: Read>(reader: R, has_headers: bool) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        records.push(row.iter().map(SourceValue::from).collect());
    }
    Ok(records)
}

/// Reads records from the named worksheet, or the first one.
pub fn read_workbook<R: Read + Seek>(
    workbook: &mut Xlsx<R>,
    worksheet: Option<&str>,
    has_headers: bool,
) -> Result<Vec<Record>> {
    let range = match worksheet {
        Some(name) => workbook
            .worksheet_range(name)
            .ok_or_else(|| TrackerError::Config(format!("missing worksheet '{name}'")))?,
        None => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| TrackerError::Config("workbook has no worksheets".into()))?,
    };
    let range = range.map_err(TrackerError::from)?;

    let records = range
        .rows()
        .skip(usize::from(has_headers))
        .map(|row| row.iter().map(cell_to_value).collect::<Record>())
        .filter(|record| record.iter().any(|cell| *cell != SourceValue::Empty))
        .collect();
    Ok(records)
}

fn cell_to_value(cell: &DataType) -> SourceValue {
    match cell {
        DataType::String(value) => SourceValue::from(value.as_str()),
        DataType::Float(value) => SourceValue::Number(*value),
        DataType::Int(value) => SourceValue::Number(*value as f64),
        DataType::Bool(value) => SourceValue::Boolean(*value),
        DataType::Empty => SourceValue::Empty,
        other => SourceValue::String(other.to_string()),
    }
}

/// All sources of a run, loaded once and keyed by id.
#[derive(Debug, Default)]
pub struct SourceSet {
    tables: HashMap<String, Table>,
    failures: HashMap<String, String>,
}

impl SourceSet {
    /// Loads every configured source. Failures are logged and remembered so
    /// that only the mappings using a broken source are skipped.
    #[instrument(level = "info", skip_all)]
    pub fn load<T: Transport + ?Sized>(context: &Context, client: &SheetClient<'_, T>) -> Self {
        let mut set = Self::default();
        for config in &context.settings.sources {
            match load_source(config, context, client) {
                Ok(table) => set.insert(table),
                Err(err) => {
                    error!(source_id = %config.source_id, error = %err, "failed to load source");
                    set.failures
                        .insert(config.source_id.clone(), err.to_string());
                }
            }
        }
        set
    }

    pub fn insert(&mut self, table: Table) {
        self.failures.remove(table.id());
        self.tables.insert(table.id().to_string(), table);
    }

    pub fn get(&self, source_id: &str) -> Result<&Table> {
        if let Some(table) = self.tables.get(source_id) {
            return Ok(table);
        }
        match self.failures.get(source_id) {
            Some(reason) => Err(TrackerError::Config(format!(
                "source '{source_id}' could not be loaded: {reason}"
            ))),
            None => Err(TrackerError::UnknownSource(source_id.to_string())),
        }
    }
}

impl FromIterator<Table> for SourceSet {
    fn from_iter<I: IntoIterator<Item = Table>>(iter: I) -> Self {
        let mut set = Self::default();
        for table in iter {
            set.insert(table);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_takes_first_record_in_table_order() {
        let table = Table::from_rows("staff", &[&["E1", "Alice"], &["E1", "Alicia"], &["E2", "Bob"]]);

        let record = table.lookup(0, "E1").expect("record found");
        assert_eq!(record[1], SourceValue::from("Alice"));
        assert!(table.lookup(0, "E3").is_none());
        assert!(table.lookup(7, "E1").is_none());
    }

    #[test]
    fn csv_headers_are_skipped() {
        let data = "id,name\nE1,Alice\nE2,\n";
        let records = read_csv(data.as_bytes(), true).expect("csv parsed");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0][0], SourceValue::from("E1"));
        assert_eq!(records[1][1], SourceValue::Empty);
    }

    #[test]
    fn csv_without_headers_keeps_first_row() {
        let records = read_csv("E1,Alice\n".as_bytes(), false).expect("csv parsed");
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn unknown_and_failed_sources_are_distinguished() {
        let mut set: SourceSet = [Table::from_rows("staff", &[])].into_iter().collect();
        set.failures.insert("payroll".into(), "boom".into());

        assert!(set.get("staff").is_ok());
        assert!(matches!(set.get("payroll"), Err(TrackerError::Config(_))));
        assert!(matches!(set.get("other"), Err(TrackerError::UnknownSource(_))));
    }
}
