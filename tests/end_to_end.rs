use chrono::{DateTime, TimeZone, Utc};
use kiln::config::{fields_file, supplemental_file, DiscoveryConfig, DiscoveryParameters};
use kiln::{DiscoveryEngine, ExportEngine, JsonlStore};
use serde_json::{json, Value};
use std::path::Path;

const ADA: &str = "64b7f0c2a1b2c3d4e5f60001";
const GRACE: &str = "64b7f0c2a1b2c3d4e5f60002";
const DANGLING: &str = "64b7f0c2a1b2c3d4e5f60099";

fn write_collection(dir: &Path, name: &str, documents: &[Value]) {
    let lines: Vec<String> = documents.iter().map(Value::to_string).collect();
    std::fs::write(dir.join(format!("{}.jsonl", name)), lines.join("\n") + "\n").unwrap();
}

fn listing_id(n: u32) -> String {
    format!("64b7f0c2a1b2c3d4e5f6{:04}", 1000 + n)
}

fn fixture(dir: &Path) {
    write_collection(
        dir,
        "listings",
        &[
            json!({"_id": {"$oid": listing_id(1)}, "agentId": {"$oid": ADA}}),
            json!({"_id": {"$oid": listing_id(2)}, "agentId": {"$oid": GRACE}}),
            json!({"_id": {"$oid": listing_id(3)}, "agentId": {"$oid": DANGLING}}),
        ],
    );
    write_collection(
        dir,
        "agents",
        &[
            json!({"_id": {"$oid": ADA}, "fullName": "Ada Lovelace", "email": "ada@example.com"}),
            json!({"_id": {"$oid": GRACE}, "fullName": "Grace Hopper", "email": "grace@example.com"}),
        ],
    );
    write_collection(
        dir,
        "showings",
        &[
            json!({"_id": "s1", "listingId": {"$oid": listing_id(1)}, "at": {"$date": "2024-05-02T10:00:00Z"}}),
            json!({"_id": "s2", "listingId": {"$oid": listing_id(1)}, "at": {"$date": "2024-05-20T10:00:00Z"}}),
            json!({"_id": "s3", "listingId": {"$oid": listing_id(1)}, "at": {"$date": "2023-12-24T10:00:00Z"}}),
        ],
    );
}

fn discovered_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn discover(store: &JsonlStore) -> DiscoveryConfig {
    DiscoveryEngine::new(store, DiscoveryParameters::default())
        .discover_at("listings", discovered_at())
        .unwrap()
        .config
}

fn export(store: &JsonlStore, config: DiscoveryConfig) -> (String, kiln::ExportSummary) {
    let mut out = Vec::new();
    let summary = ExportEngine::new(store, config)
        .with_run_time(discovered_at())
        .export(&mut out)
        .unwrap();
    (String::from_utf8(out).unwrap(), summary)
}

#[test]
fn test_discover_then_export() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());
    let store = JsonlStore::open(dir.path()).unwrap();

    let config = discover(&store);
    let agent = config.fields.iter().find(|field| field.path == "agentId").unwrap();
    assert_eq!(agent.relationship_target.as_deref(), Some("agents"));

    let (csv, summary) = export(&store, config);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Agent ID,Agent ID Email,Agent ID Full Name",
            "64b7f0c2a1b2c3d4e5f60001,ada@example.com,Ada Lovelace",
            "64b7f0c2a1b2c3d4e5f60002,grace@example.com,Grace Hopper",
            "64b7f0c2a1b2c3d4e5f60099,,",
        ]
    );
    assert_eq!(summary.rows_written, 3);
    assert_eq!(summary.columns, 3);
    assert_eq!(summary.unresolved_references, 2);
}

#[test]
fn test_repeated_runs_are_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());
    let store = JsonlStore::open(dir.path()).unwrap();

    let first = discover(&store);
    let second = discover(&store);
    assert_eq!(first.to_json_string().unwrap(), second.to_json_string().unwrap());

    let (csv_a, _) = export(&store, first);
    let (csv_b, _) = export(&store, second);
    assert_eq!(csv_a, csv_b);
}

#[test]
fn test_supplemental_reverse_relationships() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());
    let config_dir = dir.path().join("config");
    let store = JsonlStore::open(dir.path()).unwrap();

    discover(&store).save(&fields_file(&config_dir, "listings")).unwrap();
    let overlay = json!({
        "collection": "listings",
        "fields": [
            {
                "path": "showingCount",
                "dataType": "number",
                "extractionMode": "count",
                "reverseRelationship": {"collection": "showings", "foreignField": "listingId"}
            },
            {
                "path": "recentShowings",
                "dataType": "number",
                "extractionMode": "statistics",
                "statisticsSpec": {
                    "targetCollection": "showings",
                    "aggregation": "count",
                    "matchField": "listingId",
                    "dateFilter": {"field": "at", "range": "last_30_days"}
                }
            }
        ]
    });
    std::fs::write(
        supplemental_file(&config_dir, "listings"),
        serde_json::to_string_pretty(&overlay).unwrap(),
    )
    .unwrap();

    let config = DiscoveryConfig::load_with_overlay(&config_dir, "listings").unwrap();
    assert!(config.required_collections.contains("showings"));

    let (csv, _) = export(&store, config);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Agent ID,Agent ID Email,Agent ID Full Name,Showing Count,Recent Showings");
    assert!(lines[1].ends_with(",3,2"), "two of three showings fall in the last 30 days");
    assert!(lines[2].ends_with(",0,0"));
    assert!(lines[3].ends_with(",0,0"));
}

#[test]
fn test_unreadable_required_collection_aborts_before_output() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path());
    let store = JsonlStore::open(dir.path()).unwrap();
    let config = discover(&store);

    std::fs::remove_file(dir.path().join("agents.jsonl")).unwrap();
    let output = dir.path().join("listings_export.csv");
    let err = ExportEngine::new(&store, config).export_to_path(&output).unwrap_err();

    assert!(matches!(err, kiln::Error::CacheBuild { ref collection, .. } if collection == "agents"));
    assert!(!output.exists());
}
