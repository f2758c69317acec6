use tracing::debug;

use crate::tracker::columns::{Lookup, ResolvedSource};
use crate::tracker::matcher::{MatchOutcome, find_match};
use crate::tracker::missing::find_all_missing;
use crate::tracker::model::{Cell, CellMutation, Payloads, Row, RowUpdate, Sheet, json_text};
use crate::tracker::source::TabularSource;

/// A resolved mapping source paired with the table it reads from.
pub struct Binding<'a> {
    pub resolved: ResolvedSource,
    pub source: &'a dyn TabularSource,
}

/// Builds the update, delete, and create batches for one sheet.
///
/// Each row is matched against every binding in order. A delete signal from
/// any binding marks the whole row stale and discards its updates. Cells
/// that already hold the target value are left out, so a sheet in sync
/// produces empty batches.
pub fn build_payloads(sheet: &Sheet, bindings: &[Binding<'_>]) -> Payloads {
    let mut payloads = Payloads::default();

    for row in &sheet.rows {
        let mut cells: Vec<CellMutation> = Vec::new();
        let mut stale = false;

        for binding in bindings {
            let Some(lookup_value) = lookup_value(row, &binding.resolved) else {
                continue;
            };
            match find_match(&lookup_value, &sheet.name, binding.source, &binding.resolved) {
                MatchOutcome::Mutations(found) => merge(&mut cells, found),
                MatchOutcome::Delete => {
                    debug!(
                        row_id = row.id,
                        lookup_value = %lookup_value,
                        source_id = %binding.resolved.source_id,
                        "row no longer backed by source"
                    );
                    stale = true;
                    break;
                }
            }
        }

        if stale {
            payloads.deletes.push(row.id);
            continue;
        }

        cells.retain(|mutation| !is_current(row, mutation));
        if !cells.is_empty() {
            payloads.updates.push(RowUpdate { id: row.id, cells });
        }
    }

    for binding in bindings {
        payloads
            .creates
            .extend(find_all_missing(sheet, binding.source, &binding.resolved));
    }

    debug!(
        sheet = %sheet.name,
        updates = payloads.updates.len(),
        deletes = payloads.deletes.len(),
        creates = payloads.creates.len(),
        "payloads built"
    );
    payloads
}

/// Key a row is matched on. Blank or missing lookup cells leave the row
/// untouched by that binding.
fn lookup_value(row: &Row, resolved: &ResolvedSource) -> Option<String> {
    match resolved.lookup {
        Lookup::RowId => Some(row.id.to_string()),
        Lookup::Column(column_id) => row
            .cell(column_id)
            .and_then(Cell::text)
            .filter(|text| !text.trim().is_empty()),
    }
}

/// Later bindings override earlier ones writing the same column.
fn merge(cells: &mut Vec<CellMutation>, found: Vec<CellMutation>) {
    for mutation in found {
        match cells
            .iter_mut()
            .find(|existing| existing.column_id == mutation.column_id)
        {
            Some(existing) => *existing = mutation,
            None => cells.push(mutation),
        }
    }
}

fn is_current(row: &Row, mutation: &CellMutation) -> bool {
    let target = json_text(&mutation.value).unwrap_or_default();
    match row.cell(mutation.column_id) {
        Some(cell) => {
            let raw = cell.value.as_ref().and_then(json_text);
            cell.display_value.as_deref() == Some(target.as_str())
                || raw.as_deref() == Some(target.as_str())
                || (target.is_empty() && cell.text().is_none())
        }
        None => target.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::columns::ResolvedOutput;
    use crate::tracker::model::{Column, RowCreate};
    use crate::tracker::source::Table;
    use serde_json::json;

    const LOOKUP: i64 = 1;
    const NAME: i64 = 2;

    fn cell(column_id: i64, text: &str) -> Cell {
        Cell {
            column_id,
            value: Some(json!(text)),
            display_value: Some(text.to_string()),
        }
    }

    fn row(id: i64, cells: Vec<Cell>) -> Row {
        Row { id, cells }
    }

    fn sheet(rows: Vec<Row>) -> Sheet {
        Sheet {
            id: 9,
            name: "Staff".into(),
            columns: vec![
                Column { id: LOOKUP, title: "Employee".into() },
                Column { id: NAME, title: "Name".into() },
            ],
            rows,
        }
    }

    fn by_column(source_id: &str) -> ResolvedSource {
        ResolvedSource {
            source_id: source_id.into(),
            lookup: Lookup::Column(LOOKUP),
            source_key: 0,
            outputs: vec![ResolvedOutput { column_id: NAME, source_key: 1 }],
        }
    }

    #[test]
    fn updates_matched_rows_and_creates_missing_ones() {
        let table = Table::from_rows("staff", &[&["E1", "Alice"], &["E2", "Bob"]]);
        let sheet = sheet(vec![row(100, vec![cell(LOOKUP, "E1")])]);
        let bindings = [Binding { resolved: by_column("staff"), source: &table }];

        let payloads = build_payloads(&sheet, &bindings);

        assert_eq!(
            payloads.updates,
            vec![RowUpdate {
                id: 100,
                cells: vec![CellMutation { column_id: NAME, value: json!("Alice") }],
            }]
        );
        assert!(payloads.deletes.is_empty());
        assert_eq!(
            payloads.creates,
            vec![RowCreate {
                cells: vec![
                    CellMutation { column_id: LOOKUP, value: json!("E2") },
                    CellMutation { column_id: NAME, value: json!("Bob") },
                ]
            }]
        );
    }

    #[test]
    fn stale_rows_are_deleted_not_updated() {
        let table = Table::from_rows("staff", &[&["E1", "Alice"]]);
        let sheet = sheet(vec![
            row(100, vec![cell(LOOKUP, "E1"), cell(NAME, "Alice")]),
            row(101, vec![cell(LOOKUP, "E9"), cell(NAME, "Ghost")]),
        ]);
        let bindings = [Binding { resolved: by_column("staff"), source: &table }];

        let payloads = build_payloads(&sheet, &bindings);

        assert_eq!(payloads.deletes, vec![101]);
        assert!(payloads.updates.iter().all(|update| update.id != 101));
    }

    #[test]
    fn one_stale_link_deletes_the_row_once() {
        let staff = Table::from_rows("staff", &[&["E1", "Alice"]]);
        let payroll = Table::from_rows("payroll", &[&["E2", "x"]]);
        let other = Table::from_rows("other", &[&["E3", "y"]]);
        let sheet = sheet(vec![row(100, vec![cell(LOOKUP, "E1")])]);
        let bindings = [
            Binding { resolved: by_column("staff"), source: &staff },
            Binding { resolved: by_column("payroll"), source: &payroll },
            Binding { resolved: by_column("other"), source: &other },
        ];

        let payloads = build_payloads(&sheet, &bindings);

        assert_eq!(payloads.deletes, vec![100]);
        assert!(payloads.updates.is_empty());
    }

    #[test]
    fn blank_lookup_rows_are_untouched() {
        let table = Table::from_rows("staff", &[&["E1", "Alice"]]);
        let sheet = sheet(vec![
            row(100, vec![cell(NAME, "Someone")]),
            row(101, vec![cell(LOOKUP, "  ")]),
        ]);
        let bindings = [Binding { resolved: by_column("staff"), source: &table }];

        let payloads = build_payloads(&sheet, &bindings);

        assert!(payloads.updates.is_empty());
        assert!(payloads.deletes.is_empty());
        assert_eq!(payloads.creates.len(), 1);
    }

    #[test]
    fn synced_sheet_yields_empty_payloads() {
        let table = Table::from_rows("staff", &[&["E1", "Alice"], &["E2", "Bob"]]);
        let sheet = sheet(vec![
            row(100, vec![cell(LOOKUP, "E1"), cell(NAME, "Alice")]),
            row(101, vec![cell(LOOKUP, "E2"), cell(NAME, "Bob")]),
        ]);
        let bindings = [Binding { resolved: by_column("staff"), source: &table }];

        assert!(build_payloads(&sheet, &bindings).is_empty());
    }

    #[test]
    fn row_id_lookup_matches_row_identifier() {
        let table = Table::from_rows("tickets", &[&["100", "Open"]]);
        let resolved = ResolvedSource {
            source_id: "tickets".into(),
            lookup: Lookup::RowId,
            source_key: 0,
            outputs: vec![ResolvedOutput { column_id: NAME, source_key: 1 }],
        };
        let sheet = sheet(vec![row(100, Vec::new()), row(200, Vec::new())]);
        let bindings = [Binding { resolved, source: &table }];

        let payloads = build_payloads(&sheet, &bindings);

        assert_eq!(payloads.updates.len(), 1);
        assert_eq!(payloads.updates[0].id, 100);
        assert_eq!(payloads.deletes, vec![200]);
        assert!(payloads.creates.is_empty());
    }

    #[test]
    fn two_sources_may_propose_the_same_create() {
        let staff = Table::from_rows("staff", &[&["E1", "Alice"]]);
        let contractors = Table::from_rows("contractors", &[&["E1", "Alice"]]);
        let sheet = sheet(Vec::new());
        let bindings = [
            Binding { resolved: by_column("staff"), source: &staff },
            Binding { resolved: by_column("contractors"), source: &contractors },
        ];

        assert_eq!(build_payloads(&sheet, &bindings).creates.len(), 2);
    }
}
