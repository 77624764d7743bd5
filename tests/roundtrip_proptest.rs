//! Property: for any file content routed through `put` then `get`, the
//! retrieved bytes are identical to the original, whether the object lands
//! as a reference, a delta, or a direct upload.

mod common;

use common::test_service;
use deltaglider::types::{DeltaSpace, ObjectKey};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn put_then_get_returns_original_bytes(
        first in prop::collection::vec(any::<u8>(), 0..4096),
        second in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let service = test_service();
            let dir = tempfile::tempdir().unwrap();
            let space = DeltaSpace::new("bucket", "space");

            let first_path = dir.path().join("a.zip");
            tokio::fs::write(&first_path, &first).await.unwrap();
            service.put(&first_path, &space, None, None).await.unwrap();

            let second_path = dir.path().join("b.zip");
            tokio::fs::write(&second_path, &second).await.unwrap();
            service.put(&second_path, &space, None, None).await.unwrap();

            for (name, expected) in [("a.zip", &first), ("b.zip", &second)] {
                let out_path = dir.path().join(format!("out-{name}"));
                let key = ObjectKey::new("bucket", format!("space/{name}"));
                service.get(&key, &out_path).await.unwrap();
                let actual = tokio::fs::read(&out_path).await.unwrap();
                prop_assert_eq!(&actual, expected);
            }

            Ok(())
        })?;
    }
}
