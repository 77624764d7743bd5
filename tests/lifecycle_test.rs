//! End-to-end `put`/`get`/`verify`/`delete` behavior against the in-memory
//! object store, exercising the full `DeltaService` surface the way a real
//! caller (the CLI, or an embedding application) would.

mod common;

use common::{generate_binary, mutate_binary, test_service};
use deltaglider::types::{DeltaSpace, ObjectKey, PutOperation};

#[tokio::test]
async fn first_version_becomes_reference_later_versions_become_deltas() {
    let service = test_service();
    let dir = tempfile::tempdir().unwrap();
    let space = DeltaSpace::new("releases", "myapp");

    let v1 = generate_binary(200_000, 1);
    let v1_path = dir.path().join("myapp-1.0.0.zip");
    tokio::fs::write(&v1_path, &v1).await.unwrap();
    let summary1 = service.put(&v1_path, &space, None, None).await.unwrap();
    assert_eq!(summary1.operation, PutOperation::CreateReference);

    let v2 = mutate_binary(&v1, 0.01);
    let v2_path = dir.path().join("myapp-1.0.1.zip");
    tokio::fs::write(&v2_path, &v2).await.unwrap();
    let summary2 = service.put(&v2_path, &space, None, None).await.unwrap();
    assert_eq!(summary2.operation, PutOperation::CreateDelta);
    assert!(summary2.ref_key.is_some());
}

#[tokio::test]
async fn roundtrip_preserves_content_for_reference_and_delta() {
    let service = test_service();
    let dir = tempfile::tempdir().unwrap();
    let space = DeltaSpace::new("releases", "myapp");

    let v1 = generate_binary(150_000, 7);
    let v1_path = dir.path().join("myapp-1.0.0.zip");
    tokio::fs::write(&v1_path, &v1).await.unwrap();
    service.put(&v1_path, &space, None, None).await.unwrap();

    let v2 = mutate_binary(&v1, 0.02);
    let v2_path = dir.path().join("myapp-1.0.1.zip");
    tokio::fs::write(&v2_path, &v2).await.unwrap();
    service.put(&v2_path, &space, None, None).await.unwrap();

    for (name, expected) in [("myapp-1.0.0.zip", &v1), ("myapp-1.0.1.zip", &v2)] {
        let out_path = dir.path().join(format!("out-{name}"));
        let key = ObjectKey::new("releases", format!("myapp/{name}"));
        service.get(&key, &out_path).await.unwrap();
        let fetched = tokio::fs::read(&out_path).await.unwrap();
        assert_eq!(&fetched, expected, "roundtrip mismatch for {name}");
    }
}

#[tokio::test]
async fn verify_reports_valid_for_an_untampered_delta() {
    let service = test_service();
    let dir = tempfile::tempdir().unwrap();
    let space = DeltaSpace::new("releases", "myapp");

    let v1 = generate_binary(100_000, 3);
    let v1_path = dir.path().join("a.zip");
    tokio::fs::write(&v1_path, &v1).await.unwrap();
    service.put(&v1_path, &space, None, None).await.unwrap();

    let v2 = mutate_binary(&v1, 0.05);
    let v2_path = dir.path().join("b.zip");
    tokio::fs::write(&v2_path, &v2).await.unwrap();
    service.put(&v2_path, &space, None, None).await.unwrap();

    let delta_key = ObjectKey::new("releases", "myapp/b.zip.delta");
    let result = service.verify(&delta_key).await.unwrap();
    assert!(result.valid);
    assert_eq!(result.expected_sha256, result.actual_sha256);
}

#[tokio::test]
async fn non_delta_extensions_pass_through_unmodified() {
    let service = test_service();
    let dir = tempfile::tempdir().unwrap();
    let space = DeltaSpace::new("docs", "");

    let data = b"# Release notes\n\nNothing to see here.".to_vec();
    let path = dir.path().join("README.md");
    tokio::fs::write(&path, &data).await.unwrap();
    let summary = service.put(&path, &space, None, None).await.unwrap();
    assert_eq!(summary.operation, PutOperation::UploadDirect);

    let out_path = dir.path().join("out-README.md");
    let key = ObjectKey::new("docs", "README.md");
    service.get(&key, &out_path).await.unwrap();
    assert_eq!(tokio::fs::read(&out_path).await.unwrap(), data);
}

#[tokio::test]
async fn deleting_every_delta_in_a_deltaspace_cleans_up_the_reference() {
    let service = test_service();
    let dir = tempfile::tempdir().unwrap();
    let space = DeltaSpace::new("releases", "solo");

    let v1 = generate_binary(50_000, 9);
    let v1_path = dir.path().join("only.zip");
    tokio::fs::write(&v1_path, &v1).await.unwrap();
    let summary = service.put(&v1_path, &space, None, None).await.unwrap();
    assert_eq!(summary.operation, PutOperation::CreateReference);

    let delta_key = ObjectKey::new("releases", "solo/only.zip.delta");
    let delete_result = service.delete(&delta_key).await.unwrap();
    assert!(delete_result.deleted);
    assert_eq!(delete_result.cleaned_reference.as_deref(), Some("solo/reference.bin"));

    let ref_key = ObjectKey::new("releases", "solo/reference.bin");
    assert!(service.head(&ref_key.bucket, &ref_key.key).await.unwrap().is_none());
}

#[tokio::test]
async fn recursive_delete_removes_every_object_under_a_prefix() {
    let service = test_service();
    let dir = tempfile::tempdir().unwrap();
    let space = DeltaSpace::new("releases", "bulk");

    let v1 = generate_binary(40_000, 13);
    let v1_path = dir.path().join("app-1.zip");
    tokio::fs::write(&v1_path, &v1).await.unwrap();
    service.put(&v1_path, &space, None, None).await.unwrap();

    let v2 = mutate_binary(&v1, 0.03);
    let v2_path = dir.path().join("app-2.zip");
    tokio::fs::write(&v2_path, &v2).await.unwrap();
    service.put(&v2_path, &space, None, None).await.unwrap();

    let result = service.delete_recursive("releases", "bulk").await.unwrap();
    assert_eq!(result.deltas_deleted, 2);
    assert_eq!(result.references_deleted, 1);
    assert_eq!(result.failed_count, 0);

    assert!(service.head("releases", "bulk/reference.bin").await.unwrap().is_none());
}
