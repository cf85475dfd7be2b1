//! Sync orchestrator.
//!
//! Drives one pipeline per configured object type. Records within a
//! pipeline are processed one at a time: fetch attributes, resolve,
//! normalize, reconcile the schema, upsert.
//!
//! Pipelines writing to different destination objects run concurrently.
//! Pipelines that share a destination object run one after the other, so a
//! find-then-create for a unique value never races another pipeline.
//!
//! A record failure is confined to that record and becomes a failed
//! outcome. Authentication failures abort the whole run.

use futures::future::try_join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crmsync_common::{Error, Result, SourceRecord};
use crmsync_connector::{DestinationProvider, SourceProvider};

use crate::config::{ObjectConfig, SyncConfig};
use crate::deadline::bounded;
use crate::normalizer::Normalizer;
use crate::outcome::{ObjectReport, RecordOutcome, SyncOutcome, SyncReport};
use crate::resolver::resolve_record;
use crate::schema::SchemaReconciler;
use crate::upsert::{unique_value, UpsertEngine};

/// Main sync engine.
pub struct SyncEngine<S: SourceProvider + ?Sized, D: DestinationProvider + ?Sized> {
    /// Source collaborator.
    source: Arc<S>,
    /// Destination collaborator.
    destination: Arc<D>,
    /// Schema cache shared by every pipeline of the run.
    schema: SchemaReconciler<D>,
    /// Record writer.
    upsert: UpsertEngine<D>,
    /// Configuration.
    config: SyncConfig,
}

impl<S: SourceProvider + ?Sized, D: DestinationProvider + ?Sized> SyncEngine<S, D> {
    /// Create a new sync engine.
    ///
    /// # Errors
    /// - The configuration is invalid
    pub fn new(source: Arc<S>, destination: Arc<D>, config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let schema = SchemaReconciler::new(
            destination.clone(),
            config.call_timeout(),
            config.creation_pause(),
        );
        let upsert = UpsertEngine::new(destination.clone(), config.call_timeout());

        Ok(Self {
            source,
            destination,
            schema,
            upsert,
            config,
        })
    }

    fn call_timeout(&self) -> Duration {
        self.config.call_timeout()
    }

    /// Sync every configured object type.
    ///
    /// Returns one outcome per source record, grouped by object type in
    /// configuration order.
    ///
    /// # Errors
    /// - The access check fails
    /// - The destination rejects the credentials at any point
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let started = Instant::now();
        info!(
            "Starting sync of {} object types from {} to {}",
            self.config.objects.len(),
            self.source.name(),
            self.destination.name()
        );

        if self.config.verify_access {
            bounded(
                self.call_timeout(),
                "Access check",
                self.destination.verify_access(),
            )
            .await
            .map_err(|e| {
                error!("Destination access check failed: {}", e);
                e
            })?;
            debug!("Destination access verified");
        }

        let lanes = self.lanes().into_iter().map(|lane| async move {
            let mut reports = Vec::with_capacity(lane.len());
            for (position, object) in lane {
                reports.push((position, self.sync_object(object).await?));
            }
            Ok::<_, Error>(reports)
        });
        let mut reports: Vec<(usize, ObjectReport)> = try_join_all(lanes)
            .await
            .map_err(|e| {
                error!("Sync aborted: {}", e);
                e
            })?
            .into_iter()
            .flatten()
            .collect();
        reports.sort_by_key(|(position, _)| *position);
        let objects = reports.into_iter().map(|(_, report)| report).collect();

        let report = SyncReport {
            objects,
            duration: started.elapsed(),
        };
        info!("Sync completed in {:?}: {}", report.duration, report.counts());
        Ok(report)
    }

    /// Group object types by destination object, keeping configuration
    /// positions so the report can be put back in order.
    fn lanes(&self) -> Vec<Vec<(usize, &ObjectConfig)>> {
        let mut lanes: Vec<Vec<(usize, &ObjectConfig)>> = Vec::new();
        for (position, object) in self.config.objects.iter().enumerate() {
            let shared = lanes.iter().position(|lane| {
                lane.first().is_some_and(|(_, first)| {
                    first.destination_object == object.destination_object
                })
            });
            match shared {
                Some(index) => lanes[index].push((position, object)),
                None => lanes.push(vec![(position, object)]),
            }
        }
        lanes
    }

    /// Sync one object type.
    ///
    /// A failed listing yields a single failed outcome for the object type.
    /// The listing is not bounded as a whole: it may span many pages, and
    /// the source bounds each page request itself.
    ///
    /// # Errors
    /// - Authentication failure
    pub async fn sync_object(&self, object: &ObjectConfig) -> Result<ObjectReport> {
        let started = Instant::now();
        let mut report = ObjectReport::new(&object.name, &object.destination_object);

        let listed = self.source.list_records(&object.name).await;

        let records = match listed {
            Ok(records) => records,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                error!("Failed to list {} records: {}", object.name, e);
                report.records.push(RecordOutcome {
                    record_id: None,
                    unique_value: None,
                    outcome: SyncOutcome::FailedFetch {
                        error: e.to_string(),
                    },
                });
                report.duration = started.elapsed();
                return Ok(report);
            }
        };

        info!(
            "Syncing {} {} records to {}",
            records.len(),
            object.name,
            object.destination_object
        );

        for record in &records {
            let outcome = self.sync_record(object, record).await?;
            report.records.push(outcome);
        }

        report.duration = started.elapsed();
        info!("Finished {}: {}", object.name, report.counts());
        Ok(report)
    }

    /// Sync one record.
    ///
    /// # Errors
    /// - Authentication failure. Every other failure is reported as an outcome.
    pub async fn sync_record(
        &self,
        object: &ObjectConfig,
        record: &SourceRecord,
    ) -> Result<RecordOutcome> {
        let mut unique = None;
        let outcome = match self.process_record(object, record, &mut unique).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => {
                error!("{} {}: {}", object.name, record.id, e);
                return Err(e);
            }
            Err(e) => SyncOutcome::FailedFetch {
                error: e.to_string(),
            },
        };

        let key = unique.as_deref().unwrap_or("-");
        match &outcome {
            SyncOutcome::FailedCreate { status, body }
            | SyncOutcome::FailedUpdate { status, body, .. } => warn!(
                "{} {} [{}]: {} ({}): {}",
                object.name,
                record.id,
                key,
                outcome.kind(),
                status,
                body
            ),
            SyncOutcome::FailedFetch { error } => warn!(
                "{} {} [{}]: {}: {}",
                object.name,
                record.id,
                key,
                outcome.kind(),
                error
            ),
            _ => info!("{} {} [{}]: {}", object.name, record.id, key, outcome.kind()),
        }

        Ok(RecordOutcome {
            record_id: Some(record.id.clone()),
            unique_value: unique,
            outcome,
        })
    }

    async fn process_record(
        &self,
        object: &ObjectConfig,
        record: &SourceRecord,
        unique: &mut Option<String>,
    ) -> Result<SyncOutcome> {
        let attributes = if object.include_attributes {
            bounded(
                self.call_timeout(),
                "Attribute listing",
                self.source.list_attributes(&object.name, &record.id),
            )
            .await?
        } else {
            Vec::new()
        };

        let resolved = resolve_record(record, &object.field_mapping, attributes);
        let normalized = Normalizer::for_object(object).normalize(resolved.into_map());
        let properties = normalized.properties;

        let Some(value) = unique_value(&properties, &object.unique_field) else {
            debug!(
                "No value for '{}' on {} {}",
                object.unique_field, object.name, record.id
            );
            return Ok(SyncOutcome::SkippedNoUniqueValue);
        };
        *unique = Some(value.clone());

        let changes = self
            .schema
            .ensure_properties(
                &object.destination_object,
                properties.keys().map(String::as_str),
                &object.property_group,
            )
            .await?;
        if !changes.is_empty() {
            debug!(
                "Schema of {} changed for {} {}: {:?}",
                object.destination_object, object.name, record.id, changes
            );
        }

        self.upsert
            .upsert(
                &object.destination_object,
                &object.unique_field,
                &value,
                &properties,
            )
            .await
    }
}
