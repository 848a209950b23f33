//! Uploaded crop statistics: two-row headers stacked into long form,
//! states standardised against a synonym table, production derived from
//! area and yield, and the file moved once per outcome.

mod common;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::{ENV, Harness};
use etl_jobs::config::{LookupTableConfig, ReferenceConfig, StagingTarget};
use etl_jobs::load::{LoadMode, TableStagingLoader};
use etl_jobs::pipeline::{FailureKind, UnitPlan};
use etl_jobs::sources::{FileConfig, FileExtractor, Source};
use etl_jobs::transform::{StepTransformer, TransformStep};
use etl_jobs::uploads::{UploadDirs, run_upload, scan_source};
use etl_jobs::validate::{RuleValidator, ValidationRule};

const SCHEMA: &str = r#"
CREATE TABLE crop_stats (state TEXT, season TEXT, area REAL, yield REAL, production REAL, request_date TEXT);
CREATE TABLE state_synonyms (state_name TEXT, synonyms TEXT);
INSERT INTO state_synonyms VALUES ('Odisha', 'Orissa, ODISHA'), ('Goa', NULL);
"#;

const STEPS: &str = r#"
steps = [
    { op = "stack_header_level", level_column = "Season" },
    { op = "standardize", column = "State", lookup = "states" },
    { op = "normalize_column_names" },
    { op = "arithmetic", column = "production", left = "area", operator = "*", right = "yield" },
    { op = "arithmetic", column = "production", left = "production", operator = "/", right = 1000.0 },
    { op = "request_date", column = "request_date" },
]
"#;

#[derive(serde::Deserialize)]
struct Steps {
    steps: Vec<TransformStep>,
}

fn reference() -> ReferenceConfig {
    let mut lookups = BTreeMap::new();
    lookups.insert(
        "states".to_string(),
        LookupTableConfig {
            table: "state_synonyms".to_string(),
            canonical_column: "state_name".to_string(),
            synonyms_column: "synonyms".to_string(),
            filter_column: None,
            filter_value: None,
        },
    );
    ReferenceConfig {
        lookups,
        exchange_rates: None,
    }
}

fn crops_source(uploads: &Path) -> Source {
    let steps = toml::from_str::<Steps>(STEPS).unwrap().steps;
    Source::builder("crops")
        .display_name("Crop Statistics")
        .units(UnitPlan::File)
        .uploads(uploads.to_path_buf())
        .extractor(FileExtractor::new(FileConfig {
            header_rows: 2,
            ..FileConfig::default()
        }))
        .validator(RuleValidator::new(vec![
            ValidationRule::RequiredHeaders {
                level: 1,
                titles: vec!["Area".to_string(), "Yield".to_string()],
                allow_only: false,
            },
            ValidationRule::NonEmpty,
        ]))
        .transformer(StepTransformer::new(steps))
        .staging_loader(TableStagingLoader::new(
            StagingTarget {
                table: "crop_stats".to_string(),
                mode: LoadMode::Append,
                key: Vec::new(),
            },
            30_000,
        ))
        .build()
}

fn write_pending(dirs: &UploadDirs, name: &str, contents: &str) -> PathBuf {
    std::fs::create_dir_all(dirs.pending()).unwrap();
    let path = dirs.pending().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn moved_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_two_row_header_upload_round_trip() {
    let harness = Harness::new(SCHEMA).await;
    let runner = harness.runner(reference());
    let uploads = harness.dir.path().join("uploads");
    let dirs = UploadDirs::new(&uploads, chrono_tz::Asia::Kolkata);
    let source = crops_source(&uploads);

    let file = write_pending(
        &dirs,
        "crops_2023.csv",
        "State,Kharif,Unnamed: 2,Rabi,Unnamed: 4\n\
         ,Area,Yield,Area,Yield\n\
         Orissa,10,2500,4,1500\n\
         Goa,2,1000,1,500\n\
         ,,,,\n",
    );

    let run = run_upload(&runner, &source, &[ENV.to_string()], &dirs, &file).await;
    assert!(run.success(), "{:?}", run.outcomes);
    assert!(!file.exists());
    let moved = run.moved_to.expect("file moved");
    assert_eq!(moved.parent(), Some(dirs.processed().as_path()));
    assert!(moved_names(&dirs.processed())[0].ends_with("_crops_2023.csv"));

    assert_eq!(
        harness
            .column(
                "SELECT state || '/' || season || '/' || CAST(production AS TEXT) AS v \
                 FROM crop_stats ORDER BY state, season"
            )
            .await,
        vec![
            "Goa/Kharif/2.0",
            "Goa/Rabi/0.5",
            "Odisha/Kharif/25.0",
            "Odisha/Rabi/6.0",
        ]
    );
    assert_eq!(
        harness.column("SELECT DISTINCT request_date AS v FROM crop_stats").await,
        vec!["2024-01-06"]
    );
    assert_eq!(harness.column("SELECT status AS v FROM etl_logs").await, vec!["Success"]);
    assert_eq!(
        harness.outbox.subjects(),
        vec!["INFO : Staging Crop Statistics ETL job status"]
    );
}

#[tokio::test]
async fn test_unknown_state_fails_whole_file() {
    let harness = Harness::new(SCHEMA).await;
    let runner = harness.runner(reference());
    let uploads = harness.dir.path().join("uploads");
    let dirs = UploadDirs::new(&uploads, chrono_tz::Asia::Kolkata);
    let source = crops_source(&uploads);

    write_pending(
        &dirs,
        "a_crops.csv",
        "State,Kharif,\n,Area,Yield\nOdisha,10,2500\nAtlantis,1,100\n",
    );
    write_pending(&dirs, "b_crops.csv", "State,Kharif,\n,Area,Yield\nGoa,2,1000\n");

    let runs = scan_source(&runner, &source, &[ENV.to_string()], chrono_tz::Asia::Kolkata)
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);

    let failed = &runs[0].outcomes[0].1;
    assert!(!failed.success);
    assert_eq!(failed.failure_kind(), Some(FailureKind::Transform));
    assert!(failed.message.contains("Atlantis"), "{}", failed.message);
    assert!(failed.message.contains("standardize"), "{}", failed.message);
    assert!(runs[1].success());

    // Nothing from the rejected file reached staging
    assert_eq!(
        harness.column("SELECT DISTINCT state AS v FROM crop_stats").await,
        vec!["Goa"]
    );
    assert_eq!(
        harness.column("SELECT status AS v FROM etl_logs").await,
        vec!["Fail", "Success"]
    );
    assert!(moved_names(&dirs.failed())[0].ends_with("_a_crops.csv"));
    assert!(moved_names(&dirs.processed())[0].ends_with("_b_crops.csv"));
    assert!(moved_names(&dirs.pending()).is_empty());
}

#[tokio::test]
async fn test_missing_header_title_is_validation_failure() {
    let harness = Harness::new(SCHEMA).await;
    let runner = harness.runner(reference());
    let uploads = harness.dir.path().join("uploads");
    let dirs = UploadDirs::new(&uploads, chrono_tz::Asia::Kolkata);
    let source = crops_source(&uploads);

    let file = write_pending(&dirs, "crops.csv", "State,Kharif\n,Area\nGoa,2\n");
    let run = run_upload(&runner, &source, &[ENV.to_string()], &dirs, &file).await;

    assert!(!run.success());
    assert_eq!(run.outcomes[0].1.failure_kind(), Some(FailureKind::Validation));
    let message = &run.outcomes[0].1.message;
    assert!(message.contains("header row 2 is missing: Yield"), "{message}");
    assert_eq!(harness.count("crop_stats").await, 0);
    assert_eq!(run.moved_to.unwrap().parent(), Some(dirs.failed().as_path()));
}
