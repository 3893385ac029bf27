//! Edge case tests for cradle-engine
//!
//! These tests cover documents written by older clients, boundary values and
//! merge properties.

use cradle_engine::{
    normalize, normalize_with_report, BreastSide, Drift, Elimination, Feed, FeedSource,
    Measurement, Medication, MergePolicy, Mutation, Record, RecordKind, Reconciler, Snapshot,
    Timestamp,
};
use proptest::prelude::*;
use serde_json::json;

fn at(text: &str) -> Timestamp {
    text.parse().unwrap()
}

// ============================================================================
// Schema Drift
// ============================================================================

#[test]
fn empty_document_normalizes_to_empty_collections() {
    let snapshot = normalize(&json!({}));

    for kind in RecordKind::ALL {
        assert_eq!(snapshot.len(kind), 0);
    }
    assert!(snapshot.records(RecordKind::Measurement).is_empty());
}

#[test]
fn document_without_newer_collections() {
    // Written before medications and measurements existed.
    let raw = json!({
        "feeds": [{
            "id": "1704096000000",
            "dateISO": "2024-01-01T08:00:00.000Z",
            "source": "bottle",
            "amountMl": 90
        }],
        "elims": [{
            "id": "1704099600000",
            "dateISO": "2024-01-01T09:00:00.000Z",
            "pee": 1,
            "poop": 2,
            "vomit": 0
        }]
    });

    let (snapshot, drift) = normalize_with_report(&raw);

    assert_eq!(snapshot.len(RecordKind::Feed), 1);
    assert_eq!(snapshot.len(RecordKind::Elimination), 1);
    assert!(snapshot.measurements.is_empty());
    assert!(snapshot.medications.is_empty());
    assert_eq!(
        drift,
        vec![
            Drift::MissingCollection(RecordKind::Medication),
            Drift::MissingCollection(RecordKind::Measurement),
        ]
    );
}

#[test]
fn envelope_with_non_object_snapshot_falls_back_to_top_level() {
    let raw = json!({
        "snapshot": "corrupted",
        "feeds": [],
        "elims": [],
        "meds": [],
        "measurements": []
    });

    let (snapshot, drift) = normalize_with_report(&raw);
    assert!(snapshot.is_empty());
    assert!(drift.is_empty());
}

#[test]
fn duplicate_ids_in_one_list_keep_last() {
    let raw = json!({
        "feeds": [
            {"id": "f1", "occurredAt": "2024-01-01T08:00:00Z", "source": "bottle", "amountMl": 60},
            {"id": "f1", "occurredAt": "2024-01-01T08:00:00Z", "source": "bottle", "amountMl": 90}
        ]
    });

    let snapshot = normalize(&raw);
    assert_eq!(snapshot.len(RecordKind::Feed), 1);
    assert_eq!(
        snapshot.feeds.get("f1").map(|f| f.source.clone()),
        Some(FeedSource::Bottle { amount_ml: 90.0 })
    );
}

#[test]
fn unknown_feed_source_is_skipped() {
    let raw = json!({
        "feeds": [
            {"id": "f1", "occurredAt": "2024-01-01T08:00:00Z", "source": "spoon"},
            {"id": "f2", "occurredAt": "2024-01-01T08:00:00Z", "source": "breast", "side": "left"}
        ]
    });

    let (snapshot, drift) = normalize_with_report(&raw);
    assert_eq!(snapshot.feeds.len(), 1);
    assert_eq!(
        snapshot.feeds.get("f2").map(|f| f.source.clone()),
        Some(FeedSource::Breast {
            side: BreastSide::Left,
            duration_seconds: 0
        })
    );
    assert!(drift
        .iter()
        .any(|d| matches!(d, Drift::MalformedEntry { index: 0, .. })));
}

#[test]
fn measurement_with_nulls_reads() {
    let raw = json!({
        "measurements": [{
            "id": "m1",
            "occurredAt": "2024-01-01T08:00:00Z",
            "temperatureC": null,
            "weightKg": 4.2,
            "heightCm": null
        }]
    });

    let snapshot = normalize(&raw);
    let measurement = snapshot.measurements.get("m1").unwrap();
    assert_eq!(measurement.weight_kg, Some(4.2));
    assert!(measurement.temperature_c.is_none());
}

// ============================================================================
// Unicode and Boundaries
// ============================================================================

#[test]
fn unicode_notes_and_names() {
    let mut snapshot = Snapshot::new();
    let when = at("2024-01-01T08:00:00Z");
    let notes = ["Bébé a bien mangé", "日本語テスト", "🍼🍼", "Line\nbreak"];

    for (i, note) in notes.iter().enumerate() {
        let feed = Feed::bottle(format!("f{i}"), when, 50.0).with_notes(*note);
        Mutation::save(feed).apply(&mut snapshot);
    }
    Mutation::save(Medication::other("d1", when, "Sirop à l'érable")).apply(&mut snapshot);

    let restored = normalize(&snapshot.to_document().unwrap());
    assert!(restored.same_records(&snapshot));
}

#[test]
fn zero_amount_bottle_is_valid() {
    let feed = Feed::bottle("f1", at("2024-01-01T08:00:00Z"), 0.0);
    assert!(Mutation::save(feed).validate().is_ok());
}

#[test]
fn measurement_with_single_value_is_valid() {
    let measurement = Measurement::new("m1", at("2024-01-01T08:00:00Z")).with_height(52.5);
    assert!(Mutation::save(measurement).validate().is_ok());
}

#[test]
fn three_feeds_sort_newest_first() {
    let mut snapshot = Snapshot::new();
    for (id, when) in [
        ("t1", "2024-01-01T01:00:00Z"),
        ("t3", "2024-01-01T03:00:00Z"),
        ("t2", "2024-01-01T02:00:00Z"),
    ] {
        snapshot.upsert(Feed::bottle(id, at(when), 80.0).into());
    }

    let ids: Vec<String> = snapshot
        .records(RecordKind::Feed)
        .iter()
        .map(|r| r.id().to_string())
        .collect();
    assert_eq!(ids, vec!["t3", "t2", "t1"]);

    let document = snapshot.to_document().unwrap();
    let listed: Vec<&str> = document["snapshot"]["feeds"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_str().unwrap())
        .collect();
    assert_eq!(listed, vec!["t3", "t2", "t1"]);
}

// ============================================================================
// Merge Properties
// ============================================================================

fn arb_feed() -> impl Strategy<Value = Feed> {
    (0u8..12, 0i64..1_000_000, 0u32..500, "[a-z]{0,6}").prop_map(
        |(id, offset, amount, notes)| {
            let when = at("2024-01-01T00:00:00Z") + chrono::Duration::seconds(offset);
            Feed::bottle(format!("f{id}"), when, f64::from(amount)).with_notes(notes)
        },
    )
}

fn arb_elimination() -> impl Strategy<Value = Elimination> {
    (0u8..12, 0i64..1_000_000, 0i64..5, 0i64..5).prop_map(|(id, offset, pee, poop)| {
        let when = at("2024-01-01T00:00:00Z") + chrono::Duration::seconds(offset);
        Elimination::new(format!("e{id}"), when, pee, poop, 0)
    })
}

fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
    (
        prop::collection::vec(arb_feed(), 0..8),
        prop::collection::vec(arb_elimination(), 0..8),
    )
        .prop_map(|(feeds, elims)| {
            let mut snapshot = Snapshot::new();
            snapshot.feeds.extend(feeds);
            snapshot.eliminations.extend(elims);
            snapshot
        })
}

proptest! {
    #[test]
    fn merge_twice_equals_merge_once(remote in arb_snapshot(), incoming in arb_snapshot()) {
        for policy in [MergePolicy::RemoteWins, MergePolicy::IncomingWins] {
            let reconciler = Reconciler::new(policy);
            let (once, _) = reconciler.merge(&remote, &incoming);
            let (twice, _) = reconciler.merge(&once, &incoming);
            prop_assert!(once.same_records(&twice));
        }
    }

    #[test]
    fn remote_wins_never_changes_remote_records(remote in arb_snapshot(), incoming in arb_snapshot()) {
        let (merged, report) = Reconciler::new(MergePolicy::RemoteWins).merge(&remote, &incoming);

        for kind in RecordKind::ALL {
            for id in remote.ids(kind) {
                prop_assert_eq!(merged.get(kind, &id), remote.get(kind, &id));
            }
        }
        prop_assert_eq!(
            merged.record_count(),
            remote.record_count() + report.added.len()
        );
    }

    #[test]
    fn merged_ids_are_the_union(remote in arb_snapshot(), incoming in arb_snapshot()) {
        let (merged, _) = Reconciler::default().merge(&remote, &incoming);

        for kind in RecordKind::ALL {
            let mut expected = remote.ids(kind);
            expected.extend(incoming.ids(kind));
            expected.sort();
            expected.dedup();
            prop_assert_eq!(merged.ids(kind), expected);
        }
    }

    #[test]
    fn document_normalizes_back(snapshot in arb_snapshot()) {
        let restored = normalize(&snapshot.to_document().unwrap());
        prop_assert!(restored.same_records(&snapshot));
    }
}

#[test]
fn record_conversion_keeps_kind() {
    let record: Record = Elimination::new("e1", at("2024-01-01T08:00:00Z"), 1, 0, 0).into();
    assert_eq!(record.kind(), RecordKind::Elimination);
}
