use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::tracker::client::SheetClient;
use crate::tracker::columns::{ColumnIndex, resolve};
use crate::tracker::config::{Context, MappingConfig};
use crate::tracker::dispatch::{Batch, DispatchOutcome, Dispatcher, Transport};
use crate::tracker::error::{Result, TrackerError};
use crate::tracker::model::{ObjectId, Payloads, Sheet};
use crate::tracker::payload::{Binding, build_payloads};
use crate::tracker::source::{SourceSet, TabularSource};

/// Counts for one reconciled mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub updates: usize,
    pub deletes: usize,
    pub creates: usize,
    /// Physical requests sent, deletes counting once per chunk.
    pub requests: usize,
    /// Requests rejected by the store or never delivered.
    pub failed_requests: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingStatus {
    Applied(ApplyStats),
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingReport {
    pub mapping: String,
    pub sheet_id: ObjectId,
    pub status: MappingStatus,
}

/// Outcome of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mappings: Vec<MappingReport>,
}

impl RunSummary {
    pub fn skipped(&self) -> usize {
        self.mappings
            .iter()
            .filter(|report| matches!(report.status, MappingStatus::Skipped(_)))
            .count()
    }

    pub fn failed_requests(&self) -> usize {
        self.mappings
            .iter()
            .map(|report| match &report.status {
                MappingStatus::Applied(stats) => stats.failed_requests,
                MappingStatus::Skipped(_) => 0,
            })
            .sum()
    }
}

/// Resolves a mapping against a fetched sheet and computes its batches.
pub fn plan_mapping(sheet: &Sheet, mapping: &MappingConfig, sources: &SourceSet) -> Result<Payloads> {
    if mapping.sources.is_empty() {
        return Err(TrackerError::Config(format!(
            "mapping '{}' has no sources",
            mapping.label()
        )));
    }
    let index = ColumnIndex::build(sheet);
    let bindings = mapping
        .sources
        .iter()
        .map(|mapping_source| {
            let resolved = resolve(mapping_source, &index, &sheet.name)?;
            let source: &dyn TabularSource = sources.get(&mapping_source.source_id)?;
            Ok(Binding { resolved, source })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(build_payloads(sheet, &bindings))
}

/// Runs every configured mapping against the remote store.
pub struct Tracker<'a, T: Transport + ?Sized> {
    context: &'a Context,
    transport: &'a T,
    dry_run: bool,
}

impl<'a, T: Transport + ?Sized> Tracker<'a, T> {
    pub fn new(context: &'a Context, transport: &'a T) -> Self {
        Self {
            context,
            transport,
            dry_run: false,
        }
    }

    /// Computes and logs payloads without sending any mutation.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn client(&self) -> SheetClient<'a, T> {
        let app = self.context.app();
        SheetClient::new(self.transport, &app.api_url, app.retry_policy())
    }

    /// Loads every source, then reconciles the mappings in order.
    #[instrument(level = "info", skip_all, fields(run_id = %self.context.run_id))]
    pub fn run(&self) -> RunSummary {
        let sources = SourceSet::load(self.context, &self.client());
        self.run_with_sources(&sources)
    }

    /// Reconciles the mappings against already loaded sources. A failing
    /// mapping is logged and skipped; the others still run.
    pub fn run_with_sources(&self, sources: &SourceSet) -> RunSummary {
        info!(dry_run = self.dry_run, "data tracker started");
        let mut reports = Vec::with_capacity(self.context.settings.mappings.len());

        for mapping in &self.context.settings.mappings {
            let label = mapping.label();
            let status = match self.process_mapping(mapping, sources) {
                Ok(stats) => MappingStatus::Applied(stats),
                Err(err) => {
                    error!(mapping = %label, sheet_id = mapping.sheet_id, error = %err, "mapping skipped");
                    MappingStatus::Skipped(err.to_string())
                }
            };
            reports.push(MappingReport {
                mapping: label,
                sheet_id: mapping.sheet_id,
                status,
            });
        }

        let summary = RunSummary {
            run_id: self.context.run_id,
            mappings: reports,
        };
        info!(
            mappings = summary.mappings.len(),
            skipped = summary.skipped(),
            failed_requests = summary.failed_requests(),
            "data tracker completed"
        );
        summary
    }

    #[instrument(level = "info", skip_all, fields(mapping = %mapping.label(), sheet_id = mapping.sheet_id))]
    fn process_mapping(&self, mapping: &MappingConfig, sources: &SourceSet) -> Result<ApplyStats> {
        let client = self.client();
        let sheet = client.get_sheet(mapping.sheet_id)?;
        info!(sheet = %sheet.name, rows = sheet.rows.len(), "updating sheet");

        let payloads = plan_mapping(&sheet, mapping, sources)?;
        let mut stats = ApplyStats {
            updates: payloads.updates.len(),
            deletes: payloads.deletes.len(),
            creates: payloads.creates.len(),
            ..ApplyStats::default()
        };

        if self.dry_run {
            info!(
                sheet = %sheet.name,
                updates = %serde_json::to_string(&payloads.updates)?,
                deletes = ?payloads.deletes,
                creates = %serde_json::to_string(&payloads.creates)?,
                "dry run, nothing sent"
            );
            return Ok(stats);
        }

        let app = self.context.app();
        let dispatcher = Dispatcher::new(self.transport, app.retry_policy(), app.max_uri_length);
        let rows_url = client.rows_url(sheet.id);
        let batches = [
            Batch::Update(&payloads.updates),
            Batch::Delete(&payloads.deletes),
            Batch::Create(&payloads.creates),
        ];

        for batch in batches {
            let method = batch.method();
            for outcome in dispatcher.dispatch(batch, &rows_url)? {
                stats.requests += 1;
                match &outcome {
                    DispatchOutcome::Delivered { response, .. } if response.is_success() => {
                        info!(sheet = %sheet.name, %method, "sheet updated");
                    }
                    DispatchOutcome::Delivered { response, .. } => {
                        stats.failed_requests += 1;
                        warn!(
                            sheet = %sheet.name,
                            %method,
                            status = response.status,
                            body = %response.text(),
                            "store rejected request"
                        );
                    }
                    DispatchOutcome::Failed { error, attempts } => {
                        stats.failed_requests += 1;
                        error!(
                            sheet = %sheet.name,
                            %method,
                            attempts,
                            %error,
                            "request not delivered"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }
}
