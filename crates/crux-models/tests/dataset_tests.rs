use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;

use crux_core::ClientConfig;
use crux_models::{Crux, Dataset, LabelPredicate, TransferPolicy, TypedResource, UploadOptions};
use httpmock::Method::{GET, POST, PUT};
use httpmock::MockServer;
use serde_json::json;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn dataset(server: &MockServer) -> Dataset {
    server.mock(|when, then| {
        when.method(GET).path("/plat-api/datasets/d1");
        then.status(200)
            .json_body(json!({"datasetId": "d1", "name": "prices", "tags": null}));
    });
    let config = ClientConfig::new("secret-key").with_api_host(server.base_url());
    Crux::new(config).unwrap().get_dataset("d1").unwrap()
}

#[test]
fn download_files_mirrors_the_folder_tree() -> anyhow::Result<()> {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return Ok(());
    }

    let server = MockServer::start();
    let dataset = dataset(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path("/plat-api/resources")
            .query_param("datasetId", "d1")
            .query_param("folder", "/")
            .query_param("includeFolders", "true");
        then.status(200).json_body(json!({
            "results": [
                {"resourceId": "f1", "datasetId": "d1", "name": "sub", "type": "folder"},
                {"resourceId": "r1", "datasetId": "d1", "name": "a.csv", "type": "file", "size": 5}
            ],
            "cursor": null
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path("/plat-api/resources")
            .query_param("folder", "/sub");
        then.status(200).json_body(json!({
            "results": [
                {"resourceId": "r2", "datasetId": "d1", "name": "b.csv", "type": "file", "size": "3"}
            ],
            "cursor": null
        }));
    });
    for (id, body) in [("r1", "hello"), ("r2", "abc")] {
        server.mock(|when, then| {
            when.method(POST)
                .path(format!("/plat-api/resources/{id}/content-url"));
            then.status(200)
                .json_body(json!({"url": server.url(format!("/storage/{id}"))}));
        });
        server.mock(|when, then| {
            when.method(GET).path(format!("/storage/{id}"));
            then.status(200).body(body);
        });
    }

    let dir = tempfile::tempdir()?;
    let written = dataset.download_files("/", dir.path(), &TransferPolicy::default())?;

    let expected: Vec<PathBuf> = vec![dir.path().join("sub").join("b.csv"), dir.path().join("a.csv")];
    assert_eq!(written, expected);
    assert_eq!(fs::read_to_string(dir.path().join("a.csv"))?, "hello");
    assert_eq!(fs::read_to_string(dir.path().join("sub/b.csv"))?, "abc");
    Ok(())
}

#[test]
fn download_files_requires_an_existing_directory() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let dataset = dataset(&server);
    let listing = server.mock(|when, then| {
        when.method(GET).path("/plat-api/resources");
        then.status(200).json_body(json!({"results": [], "cursor": null}));
    });

    let dir = tempfile::tempdir().unwrap();
    let err = dataset
        .download_files("/", dir.path().join("missing"), &TransferPolicy::default())
        .unwrap_err();

    assert!(matches!(err, crux_core::Error::InvalidRequest { .. }));
    listing.assert_hits(0);
}

#[test]
fn upload_files_recreates_local_tree() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.csv"), "x,y\n1,2\n").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub").join("b.json"), r#"{"k": 1}"#).unwrap();

    let server = MockServer::start();
    let dataset = dataset(&server);

    let create_a = server.mock(|when, then| {
        when.method(POST)
            .path("/plat-api/datasets/d1/resources")
            .json_body_partial(r#"{"name": "a.csv", "folder": "/", "type": "file"}"#);
        then.status(201)
            .json_body(json!({"resourceId": "r1", "datasetId": "d1", "name": "a.csv", "type": "file"}));
    });
    let create_sub = server.mock(|when, then| {
        when.method(POST)
            .path("/plat-api/datasets/d1/resources")
            .json_body_partial(r#"{"name": "sub", "folder": "/", "type": "folder"}"#);
        then.status(201)
            .json_body(json!({"resourceId": "f1", "datasetId": "d1", "name": "sub", "type": "folder"}));
    });
    let create_b = server.mock(|when, then| {
        when.method(POST)
            .path("/plat-api/datasets/d1/resources")
            .json_body_partial(r#"{"name": "b.json", "folder": "/sub", "type": "file"}"#);
        then.status(201)
            .json_body(json!({"resourceId": "r2", "datasetId": "d1", "name": "b.json", "type": "file"}));
    });
    let put_a = server.mock(|when, then| {
        when.method(PUT)
            .path("/plat-api/resources/r1/content")
            .header("content-type", "text/csv")
            .body("x,y\n1,2\n");
        then.status(200).json_body(json!(true));
    });
    let put_b = server.mock(|when, then| {
        when.method(PUT)
            .path("/plat-api/resources/r2/content")
            .header("content-type", "application/json");
        then.status(200).json_body(json!(true));
    });
    for (id, name, size) in [("r1", "a.csv", 8), ("r2", "b.json", 8)] {
        server.mock(|when, then| {
            when.method(GET).path(format!("/plat-api/resources/{id}"));
            then.status(200).json_body(json!({
                "resourceId": id, "datasetId": "d1", "name": name, "type": "file", "size": size
            }));
        });
    }

    let uploaded = dataset
        .upload_files(dir.path(), "/", &UploadOptions::default())
        .unwrap();

    let ids: Vec<&str> = uploaded.iter().map(|file| file.id()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
    assert_eq!(uploaded[0].size(), Some(8));
    create_a.assert_hits(1);
    create_sub.assert_hits(1);
    create_b.assert_hits(1);
    put_a.assert_hits(1);
    put_b.assert_hits(1);
}

#[test]
fn label_search_yields_typed_resources() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let dataset = dataset(&server);

    let mut search = server.mock(|when, then| {
        when.method(POST)
            .path("/plat-api/datasets/d1/labels/search")
            .query_param("limit", "10")
            .json_body(json!({"basic_query": [
                {"op": "or", "in": [
                    {"op": "eq", "key": "source", "val": "a"},
                    {"op": "eq", "key": "source", "val": "b"}
                ]}
            ]}));
        then.status(200).json_body(json!({"results": [
            {"resourceId": "r1", "datasetId": "d1", "name": "a.csv", "type": "file"},
            {"resourceId": "f1", "datasetId": "d1", "name": "raw", "type": "folder"}
        ]}));
    });
    let predicate = LabelPredicate::any(vec![
        LabelPredicate::eq("source", "a"),
        LabelPredicate::eq("source", "b"),
    ]);
    let mut results = dataset.find_resources_by_label(vec![predicate], 10);

    // Pages are fetched lazily, so the first page can be retired before the
    // iterator asks for the next one.
    let first = results.next().unwrap().unwrap();
    assert!(matches!(first, TypedResource::File(_)));
    search.assert_hits(1);
    search.delete();

    let last_page = server.mock(|when, then| {
        when.method(POST)
            .path("/plat-api/datasets/d1/labels/search")
            .query_param("limit", "10")
            .query_param("after", "f1");
        then.status(200).json_body(json!({"results": []}));
    });

    let rest: Vec<TypedResource> = results.collect::<crux_core::Result<_>>().unwrap();

    assert_eq!(rest.len(), 1);
    assert!(matches!(rest[0], TypedResource::Folder(_)));
    last_page.assert_hits(1);
}
