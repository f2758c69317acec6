use std::collections::HashSet;

use tracing::{debug, warn};

use crate::tracker::columns::{Lookup, ResolvedSource};
use crate::tracker::model::{Cell, CellMutation, ObjectId, Record, RowCreate, Sheet, SourceValue};
use crate::tracker::source::TabularSource;

/// Returns a create payload for every source key absent from the sheet's
/// lookup column, in source order.
///
/// Keys compare by their normalised text. Blank keys are ignored. A key
/// repeated in the source is proposed once from its first record and the
/// repeats are logged. Row id lookups never propose
/// creates since the store assigns row ids.
pub fn find_all_missing<S: TabularSource + ?Sized>(
    sheet: &Sheet,
    source: &S,
    resolved: &ResolvedSource,
) -> Vec<RowCreate> {
    let Lookup::Column(lookup_column) = resolved.lookup else {
        return Vec::new();
    };

    let present: HashSet<String> = sheet
        .rows
        .iter()
        .filter_map(|row| row.cell(lookup_column))
        .filter_map(Cell::text)
        .collect();

    let mut proposed = HashSet::new();
    let creates: Vec<RowCreate> = source
        .records()
        .iter()
        .filter_map(|record| {
            let key = record.get(resolved.source_key)?;
            if key.is_blank() {
                return None;
            }
            let text = key.key();
            if present.contains(&text) {
                return None;
            }
            if !proposed.insert(text.clone()) {
                warn!(
                    source_id = source.id(),
                    key = %text,
                    "repeated source key, keeping the first record"
                );
                return None;
            }
            Some(create_payload(lookup_column, key, record, resolved))
        })
        .collect();

    debug!(
        sheet = %sheet.name,
        source_id = source.id(),
        missing = creates.len(),
        "computed missing rows"
    );
    creates
}

fn create_payload(
    lookup_column: ObjectId,
    key: &SourceValue,
    record: &Record,
    resolved: &ResolvedSource,
) -> RowCreate {
    let mut cells = vec![CellMutation::new(lookup_column, key)];
    for output in &resolved.outputs {
        if output.column_id == lookup_column {
            continue;
        }
        let value = record.get(output.source_key).unwrap_or(&SourceValue::Empty);
        cells.push(CellMutation::new(output.column_id, value));
    }
    RowCreate { cells }
}
