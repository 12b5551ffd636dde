//! Integration tests for the harvest orchestration against mock OAI-PMH
//! and file-listing servers.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvester_core::store::{
    FileHarvestStatus, MetadataStore, NewDataset, NewFileMetadata, NewRepository,
    RepoHarvestStatus, Repository, Store,
};
use harvester_core::{
    Database, DatasetHarvester, FileListClient, FileMetadataHarvester, HarvestError, LogNotifier,
    Outbox, PidProtocol,
};

// ==================== fixtures ====================

fn oai_record(identifier: &str, datestamp: &str, date: Option<&str>, deleted: bool) -> String {
    let status = if deleted { r#" status="deleted""# } else { "" };
    let metadata = date.map_or_else(String::new, |d| {
        format!(
            "<metadata><oai_dc:dc xmlns:oai_dc=\"http://www.openarchives.org/OAI/2.0/oai_dc/\" \
             xmlns:dc=\"http://purl.org/dc/elements/1.1/\"><dc:date>{d}</dc:date></oai_dc:dc></metadata>"
        )
    });
    format!(
        "<record><header{status}><identifier>{identifier}</identifier>\
         <datestamp>{datestamp}</datestamp></header>{metadata}</record>"
    )
}

fn oai_page(records: &[String], token: Option<&str>) -> String {
    let token_element = token.map_or_else(String::new, |t| {
        format!("<resumptionToken>{t}</resumptionToken>")
    });
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <OAI-PMH xmlns=\"http://www.openarchives.org/OAI/2.0/\">\
         <responseDate>2024-01-01T00:00:00Z</responseDate>\
         <ListRecords>{}{token_element}</ListRecords></OAI-PMH>",
        records.concat()
    )
}

async fn store_with_repo(oai_url: &str) -> (Arc<Store>, Repository) {
    let db = Database::new_in_memory().await.unwrap();
    let store = Arc::new(Store::new(db));
    let repo_id = store
        .insert_repository(&NewRepository {
            name: "demo".to_string(),
            url: oai_url.to_string(),
            metadata_prefix: "oai_dc".to_string(),
        })
        .await
        .unwrap();
    let repo = store.get_repository(repo_id).await.unwrap().unwrap();
    (store, repo)
}

fn dataset_harvester(store: &Arc<Store>) -> DatasetHarvester {
    let boundary: Arc<dyn MetadataStore> = store.clone();
    let (outbox, _handle) = Outbox::spawn(Arc::new(LogNotifier));
    DatasetHarvester::new(boundary, outbox)
}

fn file_harvester(store: &Arc<Store>, client: FileListClient) -> FileMetadataHarvester {
    let boundary: Arc<dyn MetadataStore> = store.clone();
    let (outbox, _handle) = Outbox::spawn(Arc::new(LogNotifier));
    FileMetadataHarvester::new(boundary, client, outbox)
}

async fn complete_repo(store: &Store, repo_id: i64) -> Repository {
    assert!(store.claim_dataset_harvest(repo_id).await.unwrap());
    store.complete_dataset_harvest(repo_id).await.unwrap();
    store.get_repository(repo_id).await.unwrap().unwrap()
}

fn listing_json(names_and_sizes: &[(&str, i64)]) -> serde_json::Value {
    serde_json::json!({
        "files": names_and_sizes
            .iter()
            .map(|(name, size)| serde_json::json!({
                "name": name,
                "link": format!("https://files.example.org/{name}"),
                "size": size,
                "raw_metadata": {
                    "contentType": "text/plain",
                    "checksum": {"value": "abc", "type": "md5"},
                    "fileAccessRequest": false,
                    "publicationDate": "2023-06-01"
                }
            }))
            .collect::<Vec<_>>()
    })
}

// ==================== dataset harvest ====================

#[tokio::test]
async fn test_dataset_harvest_streams_all_pages() {
    let server = MockServer::start().await;

    let page_one = oai_page(
        &[
            oai_record("doi:10.1234/ds1", "2023-06-01T12:00:00Z", Some("2023-05-01"), false),
            oai_record("hdl:11304/ds2", "2023-06-02", None, false),
        ],
        Some("page-2"),
    );
    let page_two = oai_page(
        &[oai_record("10.1234/ds3", "2023-06-03", Some("2023-01-01"), false)],
        None,
    );

    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("metadataPrefix", "oai_dc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_one))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("resumptionToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_two))
        .mount(&server)
        .await;

    let (store, repo) = store_with_repo(&format!("{}/oai", server.uri())).await;
    let counts = dataset_harvester(&store)
        .harvest_identifiers(&repo)
        .await
        .unwrap();

    assert_eq!(counts.processed, 3);
    assert_eq!(counts.inserted, 3);
    assert_eq!(counts.skipped, 0);

    let repo = store.get_repository(repo.id).await.unwrap().unwrap();
    assert_eq!(repo.harvest_status(), RepoHarvestStatus::Completed);

    let datasets = store.datasets_for_repository(repo.id).await.unwrap();
    assert_eq!(datasets.len(), 3);
    // Prefixes stripped, protocols tagged.
    assert_eq!(datasets[0].pid, "10.1234/ds1");
    assert_eq!(datasets[0].pid_protocol(), PidProtocol::Doi);
    assert!(datasets[0].publication_date.is_some());
    assert_eq!(datasets[1].pid, "11304/ds2");
    assert_eq!(datasets[1].pid_protocol(), PidProtocol::Hdl);
    assert_eq!(datasets[2].pid, "10.1234/ds3");
    // Every new dataset starts with its file harvest unset.
    assert!(
        datasets
            .iter()
            .all(|d| d.file_harvest_status() == FileHarvestStatus::Unset)
    );
}

#[tokio::test]
async fn test_dataset_harvest_is_idempotent_across_runs() {
    let server = MockServer::start().await;
    let page = oai_page(
        &[
            oai_record("doi:10.1234/ds1", "2023-06-01", None, false),
            oai_record("doi:10.1234/ds2", "2023-06-02", None, false),
        ],
        None,
    );
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("metadataPrefix", "oai_dc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;

    let (store, repo) = store_with_repo(&format!("{}/oai", server.uri())).await;
    let harvester = dataset_harvester(&store);

    let first = harvester.harvest_identifiers(&repo).await.unwrap();
    assert_eq!(first.inserted, 2);

    let repo = store.get_repository(repo.id).await.unwrap().unwrap();
    let second = harvester.harvest_identifiers(&repo).await.unwrap();
    assert_eq!(second.processed, 2);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 2);

    assert_eq!(store.dataset_count(repo.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_dataset_harvest_skips_deleted_and_empty_identifiers() {
    let server = MockServer::start().await;
    let page = oai_page(
        &[
            oai_record("doi:10.1234/gone", "2023-06-01", None, true),
            oai_record("", "2023-06-01", None, false),
            oai_record("doi:10.1234/kept", "2023-06-01", None, false),
        ],
        None,
    );
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("metadataPrefix", "oai_dc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;

    let (store, repo) = store_with_repo(&format!("{}/oai", server.uri())).await;
    let counts = dataset_harvester(&store)
        .harvest_identifiers(&repo)
        .await
        .unwrap();

    assert_eq!(counts.processed, 3);
    assert_eq!(counts.inserted, 1);
    // Deleted records are counted as skips; empty identifiers are logged
    // but do not abort the run.
    assert_eq!(counts.skipped, 1);
    assert_eq!(store.dataset_count(repo.id).await.unwrap(), 1);

    let repo = store.get_repository(repo.id).await.unwrap().unwrap();
    assert_eq!(repo.harvest_status(), RepoHarvestStatus::Completed);
}

#[tokio::test]
async fn test_unrecognized_publication_date_aborts_run() {
    let server = MockServer::start().await;
    let page = oai_page(
        &[
            oai_record("doi:10.1234/good", "2023-06-01", Some("2023-05-01"), false),
            oai_record("doi:10.1234/bad", "2023-06-01", Some("June 2023"), false),
        ],
        None,
    );
    Mock::given(method("GET"))
        .and(path("/oai"))
        .and(query_param("metadataPrefix", "oai_dc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;

    let (store, repo) = store_with_repo(&format!("{}/oai", server.uri())).await;
    let error = dataset_harvester(&store)
        .harvest_identifiers(&repo)
        .await
        .unwrap_err();

    assert!(matches!(error, HarvestError::Datestamp { .. }));
    let repo = store.get_repository(repo.id).await.unwrap().unwrap();
    assert_eq!(repo.harvest_status(), RepoHarvestStatus::Failed);
}

#[tokio::test]
async fn test_oai_protocol_error_marks_repository_failed() {
    let server = MockServer::start().await;
    let body = "<?xml version=\"1.0\"?><OAI-PMH>\
                <error code=\"badArgument\">metadataPrefix missing</error></OAI-PMH>";
    Mock::given(method("GET"))
        .and(path("/oai"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let (store, repo) = store_with_repo(&format!("{}/oai", server.uri())).await;
    let error = dataset_harvester(&store)
        .harvest_identifiers(&repo)
        .await
        .unwrap_err();

    assert!(matches!(error, HarvestError::Oai(_)));
    let repo = store.get_repository(repo.id).await.unwrap().unwrap();
    assert_eq!(repo.harvest_status(), RepoHarvestStatus::Failed);
    // A failed repository is claimable again for a fresh run.
    assert!(store.claim_dataset_harvest(repo.id).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_harvest_of_same_repository_is_rejected() {
    let server = MockServer::start().await;
    let (store, repo) = store_with_repo(&format!("{}/oai", server.uri())).await;

    // Simulate a run that already owns the repository.
    assert!(store.claim_dataset_harvest(repo.id).await.unwrap());
    let repo = store.get_repository(repo.id).await.unwrap().unwrap();

    let error = dataset_harvester(&store)
        .harvest_identifiers(&repo)
        .await
        .unwrap_err();
    assert!(matches!(error, HarvestError::AlreadyInProgress { .. }));
}

// ==================== file-metadata harvest ====================

#[tokio::test]
async fn test_file_harvest_requires_completed_dataset_harvest() {
    let server = MockServer::start().await;
    let (store, repo) = store_with_repo(&format!("{}/oai", server.uri())).await;

    let client = FileListClient::new(server.uri()).unwrap();
    let error = file_harvester(&store, client)
        .harvest_file_metadata(&repo)
        .await
        .unwrap_err();

    assert!(matches!(error, HarvestError::PreconditionFailed { .. }));
}

#[tokio::test]
async fn test_file_harvest_fetches_all_eligible_datasets() {
    let server = MockServer::start().await;
    let (store, repo) = store_with_repo("https://repo.example.org/oai").await;
    let repo = complete_repo(&store, repo.id).await;

    for pid in ["10.1234/ds1", "10.1234/ds2"] {
        store
            .insert_dataset(&NewDataset {
                repo_id: repo.id,
                pid: pid.to_string(),
                pid_protocol: PidProtocol::Doi,
                record_timestamp: None,
                publication_date: None,
            })
            .await
            .unwrap();
    }

    Mock::given(method("GET"))
        .and(path_regex(r"ds1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing_json(&[("a.txt", 10), ("b.txt", 20)])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"ds2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_json(&[("c.txt", 30)])))
        .mount(&server)
        .await;

    let client = FileListClient::new(server.uri()).unwrap();
    file_harvester(&store, client)
        .harvest_file_metadata(&repo)
        .await
        .unwrap();

    let ds1_files = store.file_metadata_for_dataset("10.1234/ds1").await.unwrap();
    assert_eq!(ds1_files.len(), 2);
    assert_eq!(ds1_files[0].name, "a.txt");
    assert_eq!(ds1_files[0].size, 10);
    assert_eq!(ds1_files[0].mime_type, "text/plain");
    assert_eq!(ds1_files[0].checksum_value.as_deref(), Some("abc"));

    assert_eq!(
        store
            .file_metadata_for_dataset("10.1234/ds2")
            .await
            .unwrap()
            .len(),
        1
    );

    for pid in ["10.1234/ds1", "10.1234/ds2"] {
        let ds = store.get_dataset(pid).await.unwrap().unwrap();
        assert_eq!(ds.file_harvest_status(), FileHarvestStatus::Completed);
        assert!(ds.file_harvest_ended_at.is_some());
    }
}

#[tokio::test]
async fn test_interrupted_file_harvest_is_cleaned_up_and_refetched() {
    let server = MockServer::start().await;
    let (store, repo) = store_with_repo("https://repo.example.org/oai").await;
    let repo = complete_repo(&store, repo.id).await;

    store
        .insert_dataset(&NewDataset {
            repo_id: repo.id,
            pid: "10.1234/ds1".to_string(),
            pid_protocol: PidProtocol::Doi,
            record_timestamp: None,
            publication_date: None,
        })
        .await
        .unwrap();

    // Simulated crash: dataset left in_progress with a partial file row.
    assert!(store.claim_file_harvest("10.1234/ds1").await.unwrap());
    store
        .insert_file_metadata(&NewFileMetadata {
            name: "stale.bin".to_string(),
            link: "https://files.example.org/stale.bin".to_string(),
            size: 999,
            mime_type: "application/octet-stream".to_string(),
            checksum_value: None,
            checksum_type: "md5".to_string(),
            access_request: false,
            publication_date: None,
            embargo_date: None,
            dataset_pid: "10.1234/ds1".to_string(),
        })
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path_regex(r"ds1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing_json(&[("a.txt", 10), ("b.txt", 20)])),
        )
        .mount(&server)
        .await;

    let client = FileListClient::new(server.uri()).unwrap();
    file_harvester(&store, client)
        .harvest_file_metadata(&repo)
        .await
        .unwrap();

    // Exactly one complete, non-duplicated file set: the stale row is gone.
    let files = store.file_metadata_for_dataset("10.1234/ds1").await.unwrap();
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt"]);

    let ds = store.get_dataset("10.1234/ds1").await.unwrap().unwrap();
    assert_eq!(ds.file_harvest_status(), FileHarvestStatus::Completed);
}

#[tokio::test]
async fn test_completed_datasets_are_not_refetched() {
    let server = MockServer::start().await;
    let (store, repo) = store_with_repo("https://repo.example.org/oai").await;
    let repo = complete_repo(&store, repo.id).await;

    store
        .insert_dataset(&NewDataset {
            repo_id: repo.id,
            pid: "10.1234/done".to_string(),
            pid_protocol: PidProtocol::Doi,
            record_timestamp: None,
            publication_date: None,
        })
        .await
        .unwrap();
    assert!(store.claim_file_harvest("10.1234/done").await.unwrap());
    store.complete_file_harvest("10.1234/done").await.unwrap();

    // No mock mounted: any request to the boundary would return 404 and
    // leave traces; expect zero requests instead.
    let client = FileListClient::new(server.uri()).unwrap();
    file_harvester(&store, client)
        .harvest_file_metadata(&repo)
        .await
        .unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_file_listing_timeout_leaves_dataset_in_progress() {
    let server = MockServer::start().await;
    let (store, repo) = store_with_repo("https://repo.example.org/oai").await;
    let repo = complete_repo(&store, repo.id).await;

    store
        .insert_dataset(&NewDataset {
            repo_id: repo.id,
            pid: "10.1234/slow".to_string(),
            pid_protocol: PidProtocol::Doi,
            record_timestamp: None,
            publication_date: None,
        })
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path_regex(r"slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listing_json(&[("a.txt", 10)]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = FileListClient::with_timeout(server.uri(), Duration::from_millis(200)).unwrap();
    file_harvester(&store, client)
        .harvest_file_metadata(&repo)
        .await
        .unwrap();

    // Timed-out dataset stays in_progress for the next run's cleanup.
    let ds = store.get_dataset("10.1234/slow").await.unwrap().unwrap();
    assert_eq!(ds.file_harvest_status(), FileHarvestStatus::InProgress);
    assert!(
        store
            .file_metadata_for_dataset("10.1234/slow")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_file_listing_error_status_leaves_dataset_in_progress() {
    let server = MockServer::start().await;
    let (store, repo) = store_with_repo("https://repo.example.org/oai").await;
    let repo = complete_repo(&store, repo.id).await;

    store
        .insert_dataset(&NewDataset {
            repo_id: repo.id,
            pid: "10.1234/broken".to_string(),
            pid_protocol: PidProtocol::Doi,
            record_timestamp: None,
            publication_date: None,
        })
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path_regex(r"broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = FileListClient::new(server.uri()).unwrap();
    file_harvester(&store, client)
        .harvest_file_metadata(&repo)
        .await
        .unwrap();

    let ds = store.get_dataset("10.1234/broken").await.unwrap().unwrap();
    assert_eq!(ds.file_harvest_status(), FileHarvestStatus::InProgress);
}
