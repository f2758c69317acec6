use std::collections::HashMap;

use tracing::warn;

use crate::tracker::config::MappingSource;
use crate::tracker::error::{Result, TrackerError};
use crate::tracker::model::{ObjectId, Sheet};

/// Title to column id index for one fetched sheet. Titles are matched
/// exactly; on duplicates the leftmost column wins.
#[derive(Debug, Clone, Default)]
pub struct ColumnIndex {
    by_title: HashMap<String, ObjectId>,
}

impl ColumnIndex {
    /// Indexes the columns of a fetched sheet.
    pub fn build(sheet: &Sheet) -> Self {
        let mut by_title = HashMap::with_capacity(sheet.columns.len());
        for column in &sheet.columns {
            by_title.entry(column.title.clone()).or_insert(column.id);
        }
        Self { by_title }
    }

    /// Column id for an exact title.
    pub fn get(&self, title: &str) -> Option<ObjectId> {
        self.by_title.get(title).copied()
    }
}

/// How a sheet row is keyed against the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Value of the given sheet column.
    Column(ObjectId),
    /// The row's own identifier.
    RowId,
}

/// Output mapping bound to a sheet column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOutput {
    /// Sheet column written to.
    pub column_id: ObjectId,
    /// Record position read from.
    pub source_key: usize,
}

/// A mapping source whose column titles have been bound to column ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub source_id: String,
    pub lookup: Lookup,
    pub source_key: usize,
    pub outputs: Vec<ResolvedOutput>,
}

/// Binds a mapping source to the sheet's columns. A missing lookup column is
/// an error; missing output columns are skipped with a warning.
pub fn resolve(
    mapping_source: &MappingSource,
    index: &ColumnIndex,
    sheet_name: &str,
) -> Result<ResolvedSource> {
    let lookup_mapping = &mapping_source.lookup_mapping;
    let lookup = match (&lookup_mapping.sheet_column, lookup_mapping.lookup_by_row_id) {
        (Some(title), true) => {
            return Err(TrackerError::Config(format!(
                "source '{}' sets both sheetColumn '{title}' and lookupByRowId",
                mapping_source.source_id
            )));
        }
        (None, true) => Lookup::RowId,
        (Some(title), false) => match index.get(title) {
            Some(column_id) => Lookup::Column(column_id),
            None => {
                return Err(TrackerError::LookupColumnNotFound {
                    column: title.clone(),
                    sheet: sheet_name.to_string(),
                });
            }
        },
        (None, false) => {
            return Err(TrackerError::Config(format!(
                "source '{}' has no lookup column",
                mapping_source.source_id
            )));
        }
    };

    let outputs = mapping_source
        .output_mappings
        .iter()
        .filter_map(|output| match index.get(&output.sheet_column) {
            Some(column_id) => Some(ResolvedOutput {
                column_id,
                source_key: output.source_key,
            }),
            None => {
                warn!(
                    column = %output.sheet_column,
                    sheet = %sheet_name,
                    source_id = %mapping_source.source_id,
                    "output column not found in sheet, skipping"
                );
                None
            }
        })
        .collect();

    Ok(ResolvedSource {
        source_id: mapping_source.source_id.clone(),
        lookup,
        source_key: lookup_mapping.source_key,
        outputs,
    })
}
