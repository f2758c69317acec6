use tracing::debug;

use crate::tracker::columns::ResolvedSource;
use crate::tracker::model::{CellMutation, SourceValue};
use crate::tracker::source::TabularSource;

/// Result of matching one sheet row against one source.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The key exists; these cells should be written to the row.
    Mutations(Vec<CellMutation>),
    /// The key is gone from the source and the row is stale.
    Delete,
}

/// Looks `lookup_value` up in `source` and maps the matching record onto the
/// resolved output columns. An empty source never matches.
pub fn find_match<S: TabularSource + ?Sized>(
    lookup_value: &str,
    sheet_name: &str,
    source: &S,
    resolved: &ResolvedSource,
) -> MatchOutcome {
    let Some(record) = source.lookup(resolved.source_key, lookup_value) else {
        debug!(
            lookup_value,
            sheet = sheet_name,
            source_id = source.id(),
            "no source record for lookup value"
        );
        return MatchOutcome::Delete;
    };

    let mutations = resolved
        .outputs
        .iter()
        .map(|output| {
            let value = record.get(output.source_key).unwrap_or(&SourceValue::Empty);
            CellMutation::new(output.column_id, value)
        })
        .collect();
    MatchOutcome::Mutations(mutations)
}
