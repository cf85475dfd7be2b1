//! End-to-end pipeline tests against the in-memory collaborators.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crmsync_common::{AttributeEntry, Error, PropertyMap, RecordId, Result, SourceRecord};
use crmsync_connector::{DestinationProvider, MemoryDestination, MemorySource, SourceProvider};
use crmsync_sync::{
    AllowedValuesRule, FieldMapping, ObjectConfig, OutcomeKind, SyncConfig, SyncEngine,
    SyncOutcome,
};

fn record(value: Value) -> SourceRecord {
    SourceRecord::from_value(value).unwrap()
}

fn id(value: &str) -> RecordId {
    RecordId::new(value).unwrap()
}

fn props(value: Value) -> PropertyMap {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn customer_config() -> ObjectConfig {
    ObjectConfig::new("customer", "contacts", "email")
        .with_property_group("contactinformation")
        .with_mapping(FieldMapping::new().with("email", "email"))
}

fn run_config(objects: Vec<ObjectConfig>) -> SyncConfig {
    let mut config = SyncConfig::new(objects);
    config.creation_pause_ms = 0;
    config.call_timeout_secs = 5;
    config
}

fn scenario_a_source() -> MemorySource {
    MemorySource::new()
        .with_records(
            "customer",
            vec![record(json!({"id": 1, "email": "a@x.com", "custom": {"vip": true}}))],
        )
        .with_attributes("customer", &id("1"), vec![AttributeEntry::new("vip", "true")])
}

#[tokio::test]
async fn test_new_record_is_created_with_attributes() {
    let source = Arc::new(scenario_a_source());
    let destination = Arc::new(MemoryDestination::new().with_properties("contacts", ["email"]));
    let engine =
        SyncEngine::new(source, destination.clone(), run_config(vec![customer_config()])).unwrap();

    let report = engine.sync_all().await.unwrap();

    let outcomes: Vec<_> = report.outcomes().collect();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, "customer");
    assert_eq!(outcomes[0].1.outcome.kind(), OutcomeKind::Created);
    assert_eq!(outcomes[0].1.unique_value.as_deref(), Some("a@x.com"));

    let stored = destination.records("contacts");
    assert_eq!(stored.len(), 1);
    assert_eq!(
        Value::Object(stored[0].properties.clone()),
        json!({"email": "a@x.com", "vip": "true"})
    );

    let created = destination.created_definitions("contacts");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "vip");
    assert_eq!(created[0].group_name, "contactinformation");
}

#[tokio::test]
async fn test_second_run_updates_instead_of_duplicating() {
    let source = Arc::new(scenario_a_source());
    let destination = Arc::new(MemoryDestination::new().with_properties("contacts", ["email"]));
    let config = run_config(vec![customer_config()]);

    let first = SyncEngine::new(source.clone(), destination.clone(), config.clone())
        .unwrap()
        .sync_all()
        .await
        .unwrap();
    let second = SyncEngine::new(source, destination.clone(), config)
        .unwrap()
        .sync_all()
        .await
        .unwrap();

    assert_eq!(first.counts().created, 1);
    assert_eq!(second.counts().updated, 1);
    assert_eq!(second.counts().created, 0);
    assert_eq!(destination.records("contacts").len(), 1);
    assert_eq!(destination.calls().create_property, 1);
}

#[tokio::test]
async fn test_disallowed_value_substituted_before_write() {
    let source = Arc::new(MemorySource::new().with_records(
        "customer",
        vec![record(json!({"id": 7, "email": "b@x.com", "state": "archived"}))],
    ));
    let destination = Arc::new(MemoryDestination::new().lenient_schema());
    let object = ObjectConfig::new("customer", "contacts", "email")
        .with_mapping(FieldMapping::new().with("email", "email").with("state", "status"))
        .with_rule("status", AllowedValuesRule::new(["open", "closed"], Some("open")))
        .with_attributes(false);

    let engine = SyncEngine::new(source, destination.clone(), run_config(vec![object])).unwrap();
    let report = engine.sync_all().await.unwrap();

    assert_eq!(report.counts().created, 1);
    assert_eq!(destination.records("contacts")[0].properties["status"], json!("open"));
}

#[tokio::test]
async fn test_missing_unique_value_skips_without_destination_calls() {
    let source = Arc::new(MemorySource::new().with_records(
        "customer",
        vec![record(json!({"id": 3, "email": "", "first_name": "Ann"}))],
    ));
    let destination = Arc::new(MemoryDestination::new());
    let object = customer_config()
        .with_mapping(FieldMapping::new().with("email", "email").with("first_name", "firstname"))
        .with_attributes(false);
    let mut config = run_config(vec![object]);
    config.verify_access = false;

    let engine = SyncEngine::new(source.clone(), destination.clone(), config).unwrap();
    let report = engine.sync_all().await.unwrap();

    let (_, outcome) = report.outcomes().next().unwrap();
    assert_eq!(outcome.outcome, SyncOutcome::SkippedNoUniqueValue);
    assert_eq!(outcome.record_id, Some(id("3")));
    assert_eq!(destination.calls().total(), 0);
    assert_eq!(source.attribute_calls(), 0);
}

#[tokio::test]
async fn test_default_fills_unique_field() {
    let source = Arc::new(MemorySource::new().with_records(
        "customer",
        vec![record(json!({"id": 4, "email": null}))],
    ));
    let destination = Arc::new(MemoryDestination::new().lenient_schema());
    let object = customer_config()
        .with_default("email", "unknown@example.com")
        .with_attributes(false);

    let engine = SyncEngine::new(source, destination, run_config(vec![object])).unwrap();
    let report = engine.sync_all().await.unwrap();

    let (_, outcome) = report.outcomes().next().unwrap();
    assert_eq!(outcome.unique_value.as_deref(), Some("unknown@example.com"));
    assert!(outcome.outcome.is_success());
}

#[tokio::test]
async fn test_one_bad_record_does_not_abort_batch() {
    let source = Arc::new(
        MemorySource::new()
            .with_records(
                "customer",
                vec![
                    record(json!({"id": 1, "email": "a@x.com"})),
                    record(json!({"id": 2, "email": "b@x.com"})),
                    record(json!({"id": 3, "email": "c@x.com"})),
                ],
            )
            .fail_attributes("customer", &id("2")),
    );
    let destination = Arc::new(MemoryDestination::new().lenient_schema());
    let engine =
        SyncEngine::new(source, destination.clone(), run_config(vec![customer_config()])).unwrap();

    let report = engine.sync_all().await.unwrap();
    let kinds: Vec<OutcomeKind> = report.outcomes().map(|(_, r)| r.outcome.kind()).collect();

    assert_eq!(
        kinds,
        vec![OutcomeKind::Created, OutcomeKind::FailedFetch, OutcomeKind::Created]
    );
    assert_eq!(destination.records("contacts").len(), 2);
}

#[tokio::test]
async fn test_rejected_write_reports_status_and_body() {
    let source = Arc::new(scenario_a_source());
    let destination = Arc::new(MemoryDestination::new().reject_writes(400, "INVALID_EMAIL"));
    let engine =
        SyncEngine::new(source, destination, run_config(vec![customer_config()])).unwrap();

    let report = engine.sync_all().await.unwrap();
    let (_, outcome) = report.outcomes().next().unwrap();

    assert_eq!(
        outcome.outcome,
        SyncOutcome::FailedCreate {
            status: 400,
            body: "INVALID_EMAIL".to_string()
        }
    );
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_failed_listing_yields_single_failure() {
    let source = Arc::new(
        scenario_a_source()
            .with_records("order", vec![record(json!({"id": 9, "name": "#1001"}))])
            .fail_listing("order"),
    );
    let destination = Arc::new(MemoryDestination::new().lenient_schema());
    let orders = ObjectConfig::new("order", "deals", "dealname")
        .with_mapping(FieldMapping::new().with("name", "dealname"));

    let engine = SyncEngine::new(
        source,
        destination,
        run_config(vec![customer_config(), orders]),
    )
    .unwrap();
    let report = engine.sync_all().await.unwrap();

    let order = report.object("order").unwrap();
    assert_eq!(order.records.len(), 1);
    assert_eq!(order.records[0].record_id, None);
    assert_eq!(order.records[0].outcome.kind(), OutcomeKind::FailedFetch);
    assert_eq!(report.object("customer").unwrap().counts().created, 1);
}

#[tokio::test]
async fn test_auth_failure_aborts_run() {
    let source = Arc::new(scenario_a_source());
    let destination = Arc::new(MemoryDestination::new().deny_access());
    let engine = SyncEngine::new(
        source.clone(),
        destination.clone(),
        run_config(vec![customer_config()]),
    )
    .unwrap();

    let err = engine.sync_all().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(destination.calls().total(), 1);
    assert_eq!(source.attribute_calls(), 0);
}

#[tokio::test]
async fn test_auth_failure_mid_run_stops_pipeline() {
    let source = Arc::new(MemorySource::new().with_records(
        "customer",
        vec![
            record(json!({"id": 1, "email": "a@x.com"})),
            record(json!({"id": 2, "email": "b@x.com"})),
        ],
    ));
    let destination = Arc::new(MemoryDestination::new().deny_access());
    let mut config = run_config(vec![customer_config()]);
    config.verify_access = false;

    let engine = SyncEngine::new(source.clone(), destination.clone(), config).unwrap();
    let err = engine.sync_all().await.unwrap_err();

    assert!(err.is_fatal());
    // The first record's property listing is the only destination call.
    assert_eq!(destination.calls().total(), 1);
    assert_eq!(source.attribute_calls(), 1);
}

#[tokio::test]
async fn test_slow_calls_within_bound_succeed() {
    let source = Arc::new(scenario_a_source());
    let destination = Arc::new(
        MemoryDestination::new()
            .lenient_schema()
            .with_latency(Duration::from_millis(50)),
    );
    let mut config = run_config(vec![customer_config()]);
    config.verify_access = false;
    config.call_timeout_secs = 1;

    let engine = SyncEngine::new(source, destination, config).unwrap();
    let report = engine.sync_all().await.unwrap();
    assert_eq!(report.counts().created, 1);
}

/// Source whose attribute listing never answers for one record.
struct StallingSource {
    inner: MemorySource,
    stalled: RecordId,
}

#[async_trait]
impl SourceProvider for StallingSource {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn list_records(&self, object_type: &str) -> Result<Vec<SourceRecord>> {
        self.inner.list_records(object_type).await
    }

    async fn list_attributes(
        &self,
        object_type: &str,
        record_id: &RecordId,
    ) -> Result<Vec<AttributeEntry>> {
        if *record_id == self.stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.list_attributes(object_type, record_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_confined_to_record() {
    let source = Arc::new(StallingSource {
        inner: MemorySource::new().with_records(
            "customer",
            vec![
                record(json!({"id": 1, "email": "a@x.com"})),
                record(json!({"id": 2, "email": "b@x.com"})),
            ],
        ),
        stalled: id("1"),
    });
    let destination = Arc::new(MemoryDestination::new().lenient_schema());

    let engine =
        SyncEngine::new(source, destination.clone(), run_config(vec![customer_config()])).unwrap();
    let report = engine.sync_all().await.unwrap();

    let records = &report.object("customer").unwrap().records;
    match &records[0].outcome {
        SyncOutcome::FailedFetch { error } => assert!(error.contains("timed out")),
        other => panic!("expected failed fetch, got {:?}", other),
    }
    assert_eq!(records[1].outcome.kind(), OutcomeKind::Created);
    assert_eq!(destination.records("contacts").len(), 1);
}

#[tokio::test]
async fn test_pipelines_sharing_destination_converge_on_schema() {
    let customers: Vec<SourceRecord> = (1..=5)
        .map(|i| record(json!({"id": i, "email": format!("c{}@x.com", i), "tier": "gold"})))
        .collect();
    let guests: Vec<SourceRecord> = (1..=5)
        .map(|i| record(json!({"id": i, "email": format!("g{}@x.com", i), "tier": "none"})))
        .collect();
    let source = Arc::new(
        MemorySource::new()
            .with_records("customer", customers)
            .with_records("guest", guests),
    );
    let destination = Arc::new(MemoryDestination::new().with_latency(Duration::from_millis(2)));

    let mapping = FieldMapping::new().with("email", "email").with("tier", "tier");
    let customer = ObjectConfig::new("customer", "contacts", "email")
        .with_mapping(mapping.clone())
        .with_attributes(false);
    let guest = ObjectConfig::new("guest", "contacts", "email")
        .with_mapping(mapping)
        .with_attributes(false);

    let engine = SyncEngine::new(
        source,
        destination.clone(),
        run_config(vec![customer, guest]),
    )
    .unwrap();
    let report = engine.sync_all().await.unwrap();

    assert_eq!(report.counts().created, 10);
    assert_eq!(destination.calls().create_property, 2);

    let listed = destination.list_properties("contacts").await.unwrap();
    assert!(listed.contains("email"));
    assert!(listed.contains("tier"));
}

#[tokio::test]
async fn test_shared_destination_never_duplicates_unique_value() {
    let source = Arc::new(
        MemorySource::new()
            .with_records(
                "customer",
                vec![record(json!({"id": 1, "email": "shared@x.com", "tier": "gold"}))],
            )
            .with_records("order", vec![record(json!({"id": 7, "order_number": "1001"}))])
            .with_records(
                "subscriber",
                vec![record(json!({"id": 9, "email": "shared@x.com", "tier": "news"}))],
            ),
    );
    let destination = Arc::new(MemoryDestination::new().with_latency(Duration::from_millis(20)));

    let mapping = FieldMapping::new().with("email", "email").with("tier", "tier");
    let customer = ObjectConfig::new("customer", "contacts", "email")
        .with_mapping(mapping.clone())
        .with_attributes(false);
    let order = ObjectConfig::new("order", "deals", "order_number")
        .with_mapping(FieldMapping::new().with("order_number", "order_number"))
        .with_attributes(false);
    let subscriber = ObjectConfig::new("subscriber", "contacts", "email")
        .with_mapping(mapping)
        .with_attributes(false);

    let engine = SyncEngine::new(
        source,
        destination.clone(),
        run_config(vec![customer, order, subscriber]),
    )
    .unwrap();
    let report = engine.sync_all().await.unwrap();

    let contacts = destination.records("contacts");
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].properties["tier"], json!("news"));
    assert_eq!(destination.records("deals").len(), 1);

    let order_of_objects: Vec<&str> = report
        .objects
        .iter()
        .map(|object| object.object_type.as_str())
        .collect();
    assert_eq!(order_of_objects, vec!["customer", "order", "subscriber"]);
    assert_eq!(
        report.object("customer").unwrap().records[0].outcome.kind(),
        OutcomeKind::Created
    );
    assert_eq!(
        report.object("subscriber").unwrap().records[0].outcome.kind(),
        OutcomeKind::Updated
    );
}

/// Source whose record listing walks several slow pages.
struct PagedSource {
    inner: MemorySource,
    pages: u32,
    page_delay: Duration,
}

#[async_trait]
impl SourceProvider for PagedSource {
    fn name(&self) -> &str {
        "paged"
    }

    async fn list_records(&self, object_type: &str) -> Result<Vec<SourceRecord>> {
        for _ in 0..self.pages {
            tokio::time::sleep(self.page_delay).await;
        }
        self.inner.list_records(object_type).await
    }

    async fn list_attributes(
        &self,
        object_type: &str,
        record_id: &RecordId,
    ) -> Result<Vec<AttributeEntry>> {
        self.inner.list_attributes(object_type, record_id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_long_paginated_listing_is_not_cut_short() {
    let records: Vec<SourceRecord> = (1..=3)
        .map(|i| record(json!({"id": i, "email": format!("p{}@x.com", i)})))
        .collect();
    let source = Arc::new(PagedSource {
        inner: MemorySource::new().with_records("customer", records),
        pages: 6,
        page_delay: Duration::from_secs(2),
    });
    let destination = Arc::new(MemoryDestination::new().lenient_schema());

    // Six pages take 12s in total, well past the 5s per-call bound.
    let engine =
        SyncEngine::new(source, destination.clone(), run_config(vec![customer_config()])).unwrap();
    let report = engine.sync_all().await.unwrap();

    assert_eq!(report.counts().created, 3);
    assert!(!report.has_failures());
    assert_eq!(destination.records("contacts").len(), 3);
}

#[tokio::test]
async fn test_invalid_config_rejected_at_construction() {
    let source = Arc::new(MemorySource::new());
    let destination = Arc::new(MemoryDestination::new());
    let object = ObjectConfig::new("customer", "contacts", "email")
        .with_mapping(FieldMapping::new().with("email", "email").with("mail", "email"));

    let result = SyncEngine::new(source, destination, run_config(vec![object]));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_structured_values_flattened_in_payload() {
    let source = Arc::new(MemorySource::new().with_records(
        "customer",
        vec![record(json!({
            "id": 5,
            "email": "d@x.com",
            "default_address": {"zip": "10115", "city": "Berlin"},
            "addresses": [{"city": "Paris"}]
        }))],
    ));
    let destination = Arc::new(MemoryDestination::new().lenient_schema());
    let object = customer_config()
        .with_mapping(
            FieldMapping::new()
                .with("email", "email")
                .with("default_address", "address")
                .with("addresses.0.city", "first_city")
                .with("addresses.4.city", "fifth_city"),
        )
        .with_attributes(false);

    let engine = SyncEngine::new(source, destination.clone(), run_config(vec![object])).unwrap();
    engine.sync_all().await.unwrap();

    let stored = &destination.records("contacts")[0].properties;
    assert_eq!(stored["address"], json!(r#"{"city":"Berlin","zip":"10115"}"#));
    assert_eq!(stored["first_city"], json!("Paris"));
    assert_eq!(stored["fifth_city"], Value::Null);
}

#[tokio::test]
async fn test_existing_record_matched_by_unique_value() {
    let source = Arc::new(scenario_a_source());
    let destination = Arc::new(
        MemoryDestination::new()
            .lenient_schema()
            .with_record("contacts", props(json!({"email": "a@x.com", "firstname": "Ann"}))),
    );
    let engine =
        SyncEngine::new(source, destination.clone(), run_config(vec![customer_config()])).unwrap();

    let report = engine.sync_all().await.unwrap();
    let (_, outcome) = report.outcomes().next().unwrap();

    assert_eq!(outcome.outcome, SyncOutcome::Updated { id: "1".to_string() });
    let stored = destination.records("contacts");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].properties["firstname"], json!("Ann"));
    assert_eq!(stored[0].properties["vip"], json!("true"));
}
