mod common;

use common::{closed_port, test_config, Route, StubServer};
use dataprov::{
    plan, provision, ArtifactTemplate, ColumnDef, ColumnType, ExecutionStage, FetchStatus,
    FixedVersion, ManifestError, ManifestTemplate, ProvisionConfig, ProvisionError, RowStoreConfig,
    TableTemplate, ValidationFailureKind, VersionProvider,
};
use semver::Version;

struct BrokenEngine;

impl VersionProvider for BrokenEngine {
    fn engine_version(&self) -> Result<Version, ManifestError> {
        Err(ManifestError::VersionUnavailable("engine not installed".to_string()))
    }
}

fn ratings_template(base_url: &str) -> ManifestTemplate {
    ManifestTemplate {
        base_url: base_url.to_string(),
        artifacts: vec![
            ArtifactTemplate::new("penguins", "penguins/{engine_tag}/palmer_penguins.ddb"),
            ArtifactTemplate::new("ratings", "imdb/2024-03-22/imdb_title_ratings.parquet"),
        ],
        tables: vec![TableTemplate {
            source: "ratings".to_string(),
            table: "imdb_title_ratings".to_string(),
            columns: vec![
                ColumnDef::new("tconst", ColumnType::Text),
                ColumnDef::new("averageRating", ColumnType::Double),
                ColumnDef::new("numVotes", ColumnType::Integer),
            ],
        }],
    }
}

fn unreachable_row_store(config: ProvisionConfig) -> ProvisionConfig {
    ProvisionConfig {
        row_store: RowStoreConfig {
            host: "127.0.0.1".to_string(),
            port: closed_port(),
            ..RowStoreConfig::default()
        },
        ..config
    }
}

#[test]
fn plan_resolves_engine_tag() {
    let manifest = plan(
        &ratings_template("https://example.invalid"),
        FixedVersion(Version::new(0, 10, 2)),
    )
    .unwrap();

    assert_eq!(
        manifest.artifacts[0].remote_path,
        "penguins/0.10/palmer_penguins.ddb"
    );
    assert_eq!(
        manifest.artifacts[0].local_relative_path,
        std::path::PathBuf::from("penguins").join("palmer_penguins.ddb")
    );
    assert_eq!(manifest.tables[0].target_table_name, "imdb_title_ratings");
}

#[tokio::test]
async fn version_failure_aborts_before_any_io() {
    let server = StubServer::start(vec![]).await;
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    let config = test_config(&data_dir);

    let err = provision(
        &config,
        &ratings_template(&server.base_url),
        BrokenEngine,
        ExecutionStage::All,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ProvisionError::Manifest(ManifestError::VersionUnavailable(_))
    ));
    assert!(!data_dir.exists());
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn fetch_only_reports_incomplete_cache() {
    let server = StubServer::start(vec![(
        "imdb/2024-03-22/imdb_title_ratings.parquet",
        Route::Body(b"ratings".to_vec()),
    )])
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    let err = provision(
        &config,
        &ratings_template(&server.base_url),
        FixedVersion(Version::new(1, 1, 3)),
        ExecutionStage::FetchOnly,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ProvisionError::FetchIncomplete(1)));
    assert!(tmp.path().join("penguins").is_dir());
    assert!(tmp
        .path()
        .join("imdb")
        .join("imdb_title_ratings.parquet")
        .exists());
}

#[tokio::test]
async fn fetch_only_succeeds_when_everything_is_cached() {
    let server = StubServer::start(vec![
        (
            "penguins/1.1/palmer_penguins.ddb",
            Route::Body(b"ddb".to_vec()),
        ),
        (
            "imdb/2024-03-22/imdb_title_ratings.parquet",
            Route::Body(b"ratings".to_vec()),
        ),
    ])
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    let report = provision(
        &config,
        &ratings_template(&server.base_url),
        FixedVersion(Version::new(1, 1, 3)),
        ExecutionStage::FetchOnly,
    )
    .await
    .unwrap();

    assert_eq!(report.fetch.count(FetchStatus::Downloaded), 2);
    assert!(report.loaded_tables.is_empty());
    assert!(report.validation.is_empty());
}

#[tokio::test]
async fn unavailable_sources_skip_loading_and_fail_validation() {
    // Nothing is served and the row store is unreachable: the run must still
    // reach validation without ever opening a database connection.
    let server = StubServer::start(vec![]).await;
    let tmp = tempfile::tempdir().unwrap();
    let config = unreachable_row_store(test_config(tmp.path()));

    let err = provision(
        &config,
        &ratings_template(&server.base_url),
        FixedVersion(Version::new(1, 1, 3)),
        ExecutionStage::All,
    )
    .await
    .unwrap_err();

    match err {
        ProvisionError::Validation(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].table, "imdb_title_ratings");
            assert_eq!(failures[0].kind, ValidationFailureKind::Skipped);
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
    // 404 is permanent: one request per artifact
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn unreachable_row_store_fails_after_fetching() {
    let server = StubServer::start(vec![
        (
            "penguins/1.1/palmer_penguins.ddb",
            Route::Body(b"ddb".to_vec()),
        ),
        (
            "imdb/2024-03-22/imdb_title_ratings.parquet",
            Route::Body(b"ratings".to_vec()),
        ),
    ])
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let config = unreachable_row_store(test_config(tmp.path()));

    let err = provision(
        &config,
        &ratings_template(&server.base_url),
        FixedVersion(Version::new(1, 1, 3)),
        ExecutionStage::All,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ProvisionError::Connection(_)));
    // The fetched artifacts stay in the cache for the next run.
    assert_eq!(
        std::fs::read(tmp.path().join("imdb").join("imdb_title_ratings.parquet")).unwrap(),
        b"ratings"
    );
    assert_eq!(
        std::fs::read(tmp.path().join("penguins").join("palmer_penguins.ddb")).unwrap(),
        b"ddb"
    );
}

#[tokio::test]
async fn load_only_never_touches_the_network() {
    let server = StubServer::start(vec![(
        "imdb/2024-03-22/imdb_title_ratings.parquet",
        Route::Body(b"ratings".to_vec()),
    )])
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let config = unreachable_row_store(test_config(tmp.path()));

    let err = provision(
        &config,
        &ratings_template(&server.base_url),
        FixedVersion(Version::new(1, 1, 3)),
        ExecutionStage::LoadOnly,
    )
    .await
    .unwrap_err();

    assert_eq!(server.hits(), 0);
    assert!(matches!(err, ProvisionError::Validation(_)));
}
