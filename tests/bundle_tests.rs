//! Reproducibility bundle tests
//!
//! Bundles written to disk, read back, verified and replayed.

use serde_json::json;
use statcore::bundle::{ReproducibilityBundle, BUNDLE_FORMAT_VERSION};
use statcore::engine::{Sample, TestData, TestEngine, TestRequest, TestType};
use statcore::registry::{CorrectionMethod, ExportIntent};
use statcore::StatisticsService;
use std::fs;
use tempfile::TempDir;

fn requests() -> Vec<TestRequest> {
    vec![
        TestRequest::new(
            TestType::TwoSampleT,
            TestData::Samples {
                groups: vec![
                    Sample::new("a", vec![1.0, 2.0, 3.0, 4.0, 5.0]),
                    Sample::new("b", vec![2.0, 3.0, 4.0, 5.0, 6.0]),
                ],
            },
        )
        .with_precision(10),
        TestRequest::new(
            TestType::ChiSquareIndependence,
            TestData::Contingency {
                table: vec![vec![20, 15], vec![10, 25]],
            },
        )
        .with_precision(25),
        TestRequest::new(TestType::BinomialExact, TestData::Binomial { successes: 7, trials: 10 }),
    ]
}

fn corrected_bundle(service: &StatisticsService) -> ReproducibilityBundle {
    let session = service.open_session("analyst").unwrap();
    let mut evaluations = Vec::new();
    for request in requests() {
        let (envelope, _) = service.evaluate_in_session(&session, &request).unwrap();
        evaluations.push((request, envelope.high_precision_result));
    }
    service.correct(&session, CorrectionMethod::Holm, 0.05).unwrap();
    service
        .bundle(Some((&session, &ExportIntent::default())), &evaluations)
        .unwrap()
}

#[test]
fn test_bundle_file_roundtrip_verifies() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("analysis.bundle.json");

    let bundle = corrected_bundle(&StatisticsService::default());
    assert_eq!(bundle.bundle_version, BUNDLE_FORMAT_VERSION);
    assert!(bundle.checksum.starts_with("sha256:"));
    assert_eq!(bundle.entries.len(), 3);
    bundle.write_to(&path).unwrap();

    let loaded = ReproducibilityBundle::read_from(&path).unwrap();
    assert!(loaded.verify().unwrap());
    assert_eq!(loaded.checksum, bundle.checksum);
    assert_eq!(loaded.entries, bundle.entries);
    assert_eq!(loaded.session.as_ref().unwrap().hypotheses.len(), 3);
}

#[test]
fn test_edited_file_fails_verification() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("analysis.bundle.json");
    corrected_bundle(&StatisticsService::default()).write_to(&path).unwrap();

    let mut document: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    document["entries"][0]["result"]["p_value"] = json!("0.01");
    fs::write(&path, serde_json::to_string_pretty(&document).unwrap()).unwrap();

    let tampered = ReproducibilityBundle::read_from(&path).unwrap();
    assert!(!tampered.verify().unwrap());
}

#[test]
fn test_replaying_bundle_entries_reproduces_results() {
    let bundle = corrected_bundle(&StatisticsService::default());
    let engine = TestEngine::default();
    for entry in &bundle.entries {
        let replayed = engine.execute(entry.result.test_type, &entry.request).unwrap();
        assert_eq!(replayed.p_value.to_string(), entry.result.p_value.to_string());
        assert_eq!(replayed.statistic.to_string(), entry.result.statistic.to_string());
    }
}

#[test]
fn test_read_from_missing_file_is_an_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    assert!(ReproducibilityBundle::read_from(&temp_dir.path().join("absent.json")).is_err());
}
