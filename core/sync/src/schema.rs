//! Destination schema reconciliation.
//!
//! Makes sure every property a record is about to write exists on the
//! destination object, creating the missing ones as text properties.
//!
//! The known property names of each destination object are cached. The
//! cache is only ever filled from a listing: after every creation attempt
//! the entry is invalidated and listed again, so the reconciler never acts
//! on a view older than its last write. Callers may also drop an entry
//! with [`SchemaReconciler::invalidate`].
//!
//! Concurrent calls for the same destination object are serialized on a
//! per-object lock, so a property is created at most once per run even
//! when several pipelines need it at the same time.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crmsync_common::{Error, Result};
use crmsync_connector::{DestinationProvider, PropertyCreation, PropertyDefinition};

use crate::deadline::bounded;

/// Properties that could not be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedProperty {
    pub name: String,
    pub status: u16,
    pub body: String,
}

/// What one `ensure_properties` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaChanges {
    /// Properties created by this call.
    pub created: Vec<String>,
    /// Properties another writer created first (conflict on creation).
    pub already_existed: Vec<String>,
    /// Properties the destination refused to create.
    pub rejected: Vec<RejectedProperty>,
}

impl SchemaChanges {
    /// Whether no creation was attempted.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.already_existed.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Default)]
struct ObjectSchema {
    /// `None` until listed, and again after invalidation.
    known: Option<BTreeSet<String>>,
}

/// Per-run schema reconciler.
pub struct SchemaReconciler<D: DestinationProvider + ?Sized> {
    destination: Arc<D>,
    objects: std::sync::Mutex<HashMap<String, Arc<Mutex<ObjectSchema>>>>,
    call_timeout: Duration,
    creation_pause: Duration,
}

impl<D: DestinationProvider + ?Sized> SchemaReconciler<D> {
    /// Create a reconciler with an empty cache.
    pub fn new(destination: Arc<D>, call_timeout: Duration, creation_pause: Duration) -> Self {
        Self {
            destination,
            objects: std::sync::Mutex::new(HashMap::new()),
            call_timeout,
            creation_pause,
        }
    }

    fn entry(&self, object: &str) -> Arc<Mutex<ObjectSchema>> {
        let mut objects = self
            .objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        objects.entry(object.to_string()).or_default().clone()
    }

    /// Drop the cached property names of an object.
    ///
    /// The next call for the object lists its properties again.
    pub async fn invalidate(&self, object: &str) {
        let entry = self.entry(object);
        entry.lock().await.known = None;
        debug!("Invalidated cached schema of {}", object);
    }

    /// Property names of an object, listing them if not cached.
    pub async fn known_properties(&self, object: &str) -> Result<BTreeSet<String>> {
        let entry = self.entry(object);
        let mut schema = entry.lock().await;
        Ok(self.current(object, &mut schema).await?.clone())
    }

    async fn current<'s>(
        &self,
        object: &str,
        schema: &'s mut ObjectSchema,
    ) -> Result<&'s mut BTreeSet<String>> {
        if schema.known.is_none() {
            let listed = self.list(object).await?;
            debug!("Listed {} properties of {}", listed.len(), object);
            schema.known = Some(listed);
        }
        Ok(schema.known.get_or_insert_with(BTreeSet::new))
    }

    async fn list(&self, object: &str) -> Result<BTreeSet<String>> {
        bounded(
            self.call_timeout,
            "Property listing",
            self.destination.list_properties(object),
        )
        .await
        .map_err(|e| schema_error(e, || format!("Listing properties of {}", object)))
    }

    /// Make sure every name in `names` exists on `object`.
    ///
    /// Missing properties are created as text properties in `group`. A
    /// creation that conflicts with an existing property counts as success.
    /// A creation the destination refuses is logged and reported; the
    /// following write will surface the problem for the record.
    ///
    /// # Errors
    /// - `Auth` when the destination rejects the credentials
    /// - `SchemaSync` when listing or creating fails for any other reason
    pub async fn ensure_properties<'n, I>(
        &self,
        object: &str,
        names: I,
        group: &str,
    ) -> Result<SchemaChanges>
    where
        I: IntoIterator<Item = &'n str>,
    {
        let entry = self.entry(object);
        let mut schema = entry.lock().await;
        let mut changes = SchemaChanges::default();

        let mut pending: Vec<&str> = Vec::new();
        for name in names {
            if !pending.contains(&name) {
                pending.push(name);
            }
        }

        for name in pending {
            if self.current(object, &mut schema).await?.contains(name) {
                continue;
            }

            let definition = PropertyDefinition::text(name, group);
            info!("Creating property '{}' on {}", name, object);
            let created = bounded(
                self.call_timeout,
                "Property creation",
                self.destination.create_property(object, &definition),
            )
            .await;

            // Whatever happened, the cached view may now be stale.
            schema.known = None;
            let created = created.map_err(|e| {
                schema_error(e, || format!("Creating property '{}' on {}", name, object))
            })?;

            if !self.creation_pause.is_zero() {
                tokio::time::sleep(self.creation_pause).await;
            }
            let known = self.current(object, &mut schema).await?;

            match created {
                PropertyCreation::Created => {
                    known.insert(name.to_string());
                    changes.created.push(name.to_string());
                }
                PropertyCreation::AlreadyExists => {
                    debug!("Property '{}' on {} already existed", name, object);
                    known.insert(name.to_string());
                    changes.already_existed.push(name.to_string());
                }
                PropertyCreation::Rejected { status, body } => {
                    warn!(
                        "Destination refused property '{}' on {} ({}): {}",
                        name, object, status, body
                    );
                    changes.rejected.push(RejectedProperty {
                        name: name.to_string(),
                        status,
                        body,
                    });
                }
            }
        }

        Ok(changes)
    }
}

/// Wrap a collaborator failure as a schema error. Auth passes through.
fn schema_error(err: Error, context: impl FnOnce() -> String) -> Error {
    if err.is_fatal() {
        err
    } else {
        Error::SchemaSync(format!("{}: {}", context(), err))
    }
}
