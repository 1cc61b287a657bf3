//! Property tests for the descriptor wire format and staleness
//! classification.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use packvault_lock::{load_lock, LockDescriptor};
use packvault_store::{MemoryStore, ObjectKind};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use tokio_util::sync::CancellationToken;

const WIRE_FIELDS: [&str; 7] = [
    "time",
    "exclusive",
    "hostname",
    "username",
    "pid",
    "uid",
    "gid",
];

fn arb_descriptor() -> impl Strategy<Value = LockDescriptor> {
    (
        // Whole seconds between 2000-01-01 and 2100-01-01.
        946_684_800i64..4_102_444_800i64,
        any::<bool>(),
        "[a-z0-9.-]{0,24}",
        "[a-z0-9_-]{0,16}",
        any::<u32>(),
        any::<u32>(),
        any::<u32>(),
    )
        .prop_map(
            |(secs, exclusive, hostname, username, pid, uid, gid)| LockDescriptor {
                time: Utc
                    .timestamp_opt(secs, 0)
                    .single()
                    .expect("timestamp range is valid"),
                exclusive,
                hostname,
                username,
                pid,
                uid,
                gid,
            },
        )
}

/// Staleness of a reader lock of the given age held on a different host.
async fn stale_at_age(minutes: i64) -> bool {
    let store = Arc::new(MemoryStore::new());
    let descriptor = LockDescriptor {
        time: Utc::now() - chrono::Duration::minutes(minutes),
        exclusive: false,
        hostname: "elsewhere.example".to_string(),
        username: "someone".to_string(),
        pid: 1,
        uid: 0,
        gid: 0,
    };
    let id = store.insert_raw(
        ObjectKind::Lock,
        &serde_json::to_vec(&descriptor).expect("descriptor serializes"),
    );
    let cancel = CancellationToken::new();
    load_lock(&cancel, store, id)
        .await
        .expect("stored descriptor loads")
        .is_stale()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_descriptor_roundtrips(descriptor in arb_descriptor()) {
        let bytes = serde_json::to_vec(&descriptor).expect("encode");
        let decoded: LockDescriptor = serde_json::from_slice(&bytes).expect("decode");
        prop_assert_eq!(decoded, descriptor);
    }

    #[test]
    fn prop_unknown_fields_do_not_reject(
        descriptor in arb_descriptor(),
        extra_key in "[a-z]{1,12}",
    ) {
        prop_assume!(!WIRE_FIELDS.contains(&extra_key.as_str()));
        let mut value = serde_json::to_value(&descriptor).expect("encode");
        value
            .as_object_mut()
            .expect("descriptors encode as objects")
            .insert(extra_key, serde_json::json!("from a newer client"));
        let decoded: LockDescriptor =
            serde_json::from_value(value).expect("unknown fields must be tolerated");
        prop_assert_eq!(decoded, descriptor);
    }

    #[test]
    fn prop_staleness_is_monotonic_in_age(
        base_minutes in 0i64..120,
        extra_minutes in 0i64..720,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        let outcome: Result<(), TestCaseError> = runtime.block_on(async {
            let newer = stale_at_age(base_minutes).await;
            let older = stale_at_age(base_minutes + extra_minutes).await;
            if newer {
                prop_assert!(older, "a lock must not become fresh again by aging");
            }
            Ok(())
        });
        outcome?;
    }
}
