//! Create-or-update of destination records.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crmsync_common::{is_blank, value_text, PropertyMap, Result};
use crmsync_connector::{DestinationProvider, WriteResponse};

use crate::deadline::bounded;
use crate::outcome::SyncOutcome;

/// Text of the unique field, if the record has a usable one.
pub fn unique_value(properties: &PropertyMap, unique_field: &str) -> Option<String> {
    let value = properties.get(unique_field);
    if is_blank(value) {
        return None;
    }
    value.and_then(value_text)
}

/// Writes records to the destination, keyed by a unique field.
pub struct UpsertEngine<D: DestinationProvider + ?Sized> {
    destination: Arc<D>,
    call_timeout: Duration,
}

impl<D: DestinationProvider + ?Sized> UpsertEngine<D> {
    /// Create a new upsert engine.
    pub fn new(destination: Arc<D>, call_timeout: Duration) -> Self {
        Self {
            destination,
            call_timeout,
        }
    }

    /// Update the record whose `unique_field` equals `unique_value`, or
    /// create one if there is none.
    ///
    /// The full property map is sent either way. A write the destination
    /// refuses becomes a failed outcome carrying its status and body.
    ///
    /// # Errors
    /// - The lookup fails or times out
    /// - The write fails in transport or authentication
    pub async fn upsert(
        &self,
        object: &str,
        unique_field: &str,
        unique_value: &str,
        properties: &PropertyMap,
    ) -> Result<SyncOutcome> {
        let existing = bounded(
            self.call_timeout,
            "Record lookup",
            self.destination
                .find_by_unique_field(object, unique_field, unique_value),
        )
        .await?;

        match existing {
            Some(id) => {
                debug!("{} {}={} exists as {}", object, unique_field, unique_value, id);
                let response = bounded(
                    self.call_timeout,
                    "Record update",
                    self.destination.update_record(object, &id, properties),
                )
                .await?;

                Ok(match response {
                    WriteResponse::Accepted { id } => SyncOutcome::Updated { id },
                    WriteResponse::Rejected { status, body } => {
                        SyncOutcome::FailedUpdate { id, status, body }
                    }
                })
            }
            None => {
                debug!("No {} with {}={}, creating", object, unique_field, unique_value);
                let response = bounded(
                    self.call_timeout,
                    "Record creation",
                    self.destination.create_record(object, properties),
                )
                .await?;

                Ok(match response {
                    WriteResponse::Accepted { id } => SyncOutcome::Created { id },
                    WriteResponse::Rejected { status, body } => {
                        SyncOutcome::FailedCreate { status, body }
                    }
                })
            }
        }
    }
}
