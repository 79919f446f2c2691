use super::*;
use crate::ratelimit::{ErrorCode, QuotaState, RateScope, ScopeId, TokenBucket};
use crate::snapshot::LimiterSnapshot;

fn checker() -> AdmissionChecker {
    AdmissionChecker::new(Arc::new(LimiterTree::new()), Arc::new(AtomicBool::new(true)))
}

fn single_collection(id: i64) -> HashMap<i64, Vec<i64>> {
    HashMap::from([(id, vec![])])
}

/// DDL buckets at 5/s burst 1 on the root, Data buckets at 1000/s burst 1 on collection 1.
fn seed_collection_one(checker: &AdmissionChecker) {
    let root = Arc::clone(checker.tree().root());
    checker.tree().get_or_create_collection(0, 1, &|_, collection| {
        for rt in RateType::ALL {
            if rt.is_ddl() {
                root.insert_bucket(rt, TokenBucket::new(5.0, 1.0));
            } else {
                collection.insert_bucket(rt, TokenBucket::new(1000.0, 1.0));
            }
        }
    });
}

#[test]
fn test_ddl_checked_at_cluster() {
    let checker = checker();
    seed_collection_one(&checker);
    let collections = single_collection(1);

    for rt in RateType::ALL.into_iter().filter(|rt| rt.is_ddl()) {
        assert_eq!(checker.check(0, &collections, rt, 1), Ok(()));
        assert_eq!(checker.check(0, &collections, rt, 5), Ok(()));
        let err = checker.check(0, &collections, rt, 5).unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(err.code(), ErrorCode::RateLimit);
    }
}

#[test]
fn test_data_checked_at_collection() {
    let checker = checker();
    seed_collection_one(&checker);
    let collections = single_collection(1);
    let max = i64::MAX as u64;

    for rt in RateType::data_types() {
        assert_eq!(checker.check(0, &collections, rt, 1), Ok(()));
        assert_eq!(checker.check(0, &collections, rt, max), Ok(()));
        let err = checker.check(0, &collections, rt, max).unwrap_err();
        assert_eq!(
            err,
            AdmissionError::RateLimitExceeded {
                scope: ScopeId {
                    scope: RateScope::Collection,
                    id: Some(1)
                },
                rate_type: rt,
                rate: 1000.0,
            }
        );
    }
}

#[test]
fn test_global_limit_applies_across_collections() {
    let checker = checker();
    let root = Arc::clone(checker.tree().root());
    for id in 1..=3 {
        checker.tree().get_or_create_collection(0, id, &|_, collection| {
            for rt in RateType::ALL {
                if rt.is_ddl() {
                    root.insert_bucket(rt, TokenBucket::new(5.0, 1.0));
                } else {
                    root.insert_bucket(rt, TokenBucket::new(2.0, 1.0));
                    collection.insert_bucket(rt, TokenBucket::new(2.0, 1.0));
                }
            }
        });
    }
    let collections: HashMap<i64, Vec<i64>> =
        HashMap::from([(1, vec![]), (2, vec![]), (3, vec![])]);

    for rt in RateType::data_types() {
        assert_eq!(checker.check(0, &collections, rt, 1), Ok(()));
        assert_eq!(checker.check(0, &collections, rt, 1), Ok(()));
        let err = checker.check(0, &collections, rt, 1).unwrap_err();
        // The shared cluster bucket denies first
        assert!(err.is_rate_limit());
        if let AdmissionError::RateLimitExceeded { scope, .. } = err {
            assert_eq!(scope.scope, RateScope::Cluster);
        }
    }
}

#[test]
fn test_disabled_enforcement_admits_everything() {
    let checker = checker();
    seed_collection_one(&checker);
    checker
        .tree()
        .replace_from_snapshot(
            &LimiterSnapshot::root()
                .rates(RateType::ALL, 0.0)
                .state(QuotaState::DenyToWrite, ErrorCode::ForceDeny),
        )
        .unwrap();
    checker.set_enabled(false);

    for rt in RateType::ALL {
        assert_eq!(checker.check(0, &HashMap::new(), rt, 1), Ok(()));
        assert_eq!(checker.check(0, &single_collection(9), rt, u64::MAX), Ok(()));
    }
    // Nothing was created or charged while disabled
    assert!(checker.tree().get_collection(0, 9).is_none());

    checker.set_enabled(true);
    assert!(checker.check(0, &HashMap::new(), RateType::DqlSearch, 1).is_err());
}

#[test]
fn test_zero_rate_snapshot_denies_all_data_requests() {
    let checker = checker();
    checker
        .tree()
        .replace_from_snapshot(&LimiterSnapshot::root().child(
            LimiterSnapshot::scope(0).child(
                LimiterSnapshot::scope(1).rates(RateType::data_types(), 0.0),
            ),
        ))
        .unwrap();

    for rt in RateType::data_types() {
        for _ in 0..10 {
            assert!(checker.check(0, &single_collection(1), rt, 1).is_err());
        }
        // Other collections are unaffected
        assert_eq!(checker.check(0, &single_collection(2), rt, 1), Ok(()));
    }
}

#[test]
fn test_quota_state_denies_matching_access_kind() {
    let checker = checker();
    checker
        .tree()
        .replace_from_snapshot(&LimiterSnapshot::root().child(
            LimiterSnapshot::scope(0).child(
                LimiterSnapshot::scope(1)
                    .state(QuotaState::DenyToWrite, ErrorCode::DiskQuotaExhausted),
            ),
        ))
        .unwrap();

    let err = checker
        .check(0, &single_collection(1), RateType::DmlInsert, 1)
        .unwrap_err();
    assert!(err.is_quota_exceeded());
    assert_eq!(err.code(), ErrorCode::DiskQuotaExhausted);
    assert_eq!(err.wire_code(), 54);

    assert_eq!(
        checker.check(0, &single_collection(1), RateType::DqlSearch, 1),
        Ok(())
    );
}

#[test]
fn test_ddl_denied_by_root_write_state() {
    let checker = checker();
    checker
        .tree()
        .replace_from_snapshot(
            &LimiterSnapshot::root().state(QuotaState::DenyToWrite, ErrorCode::ForceDeny),
        )
        .unwrap();

    let err = checker
        .check(0, &HashMap::new(), RateType::DdlCollection, 1)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ForceDeny);
    assert_eq!(
        checker.check(0, &HashMap::new(), RateType::DqlQuery, 1),
        Ok(())
    );
}

#[test]
fn test_empty_collections_only_checks_root() {
    let checker = checker();
    checker
        .tree()
        .replace_from_snapshot(&LimiterSnapshot::root().child(
            LimiterSnapshot::scope(0).rates(RateType::data_types(), 0.0),
        ))
        .unwrap();

    assert_eq!(
        checker.check(0, &HashMap::new(), RateType::DmlInsert, 1),
        Ok(())
    );
    assert!(checker
        .check(0, &single_collection(1), RateType::DmlInsert, 1)
        .is_err());
}

#[test]
fn test_database_limit_applies() {
    let checker = checker();
    checker
        .tree()
        .replace_from_snapshot(&LimiterSnapshot::root().child(
            LimiterSnapshot::scope(0).state(QuotaState::DenyToRead, ErrorCode::TimeTickLongDelay),
        ))
        .unwrap();

    let err = checker
        .check(0, &single_collection(5), RateType::DqlQuery, 1)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TimeTickLongDelay);
    // A different database is not affected
    assert_eq!(
        checker.check(1, &single_collection(5), RateType::DqlQuery, 1),
        Ok(())
    );
}

#[test]
fn test_partition_checked_only_when_configured() {
    let checker = checker();
    checker
        .tree()
        .replace_from_snapshot(&LimiterSnapshot::root().child(
            LimiterSnapshot::scope(0).child(
                LimiterSnapshot::scope(1)
                    .child(LimiterSnapshot::scope(10).rate(RateType::DmlInsert, 0.0)),
            ),
        ))
        .unwrap();

    let to_configured = HashMap::from([(1, vec![10])]);
    let err = checker
        .check(0, &to_configured, RateType::DmlInsert, 1)
        .unwrap_err();
    if let AdmissionError::RateLimitExceeded { scope, .. } = err {
        assert_eq!(scope.scope, RateScope::Partition);
        assert_eq!(scope.id, Some(10));
    } else {
        panic!("expected rate limit error, got {err:?}");
    }

    let to_unknown = HashMap::from([(1, vec![11])]);
    assert_eq!(checker.check(0, &to_unknown, RateType::DmlInsert, 1), Ok(()));
    // Checks never create partition nodes
    assert_eq!(
        checker.tree().get_collection(0, 1).unwrap().children_ids(),
        vec![10]
    );
}

#[test]
fn test_lazy_collection_seeded_from_database() {
    let checker = checker();
    checker
        .tree()
        .replace_from_snapshot(&LimiterSnapshot::root().child(
            LimiterSnapshot::scope(0).rate(RateType::DmlInsert, 1.0),
        ))
        .unwrap();

    assert_eq!(
        checker.check(0, &single_collection(3), RateType::DmlInsert, 1),
        Ok(())
    );
    let collection = checker.tree().get_collection(0, 3).unwrap();
    assert_eq!(collection.bucket(RateType::DmlInsert).unwrap().rate(), 1.0);
}

#[test]
fn test_custom_seed() {
    let checker = checker().with_seed(|_, collection| {
        collection.insert_bucket(RateType::DqlSearch, TokenBucket::new(0.0, 0.0));
    });
    assert!(checker
        .check(0, &single_collection(1), RateType::DqlSearch, 1)
        .is_err());
    assert_eq!(
        checker.check(0, &single_collection(1), RateType::DqlQuery, 1),
        Ok(())
    );
}

/// Tokens charged at the cluster are not refunded when a collection denies.
/// Accepted imprecision, kept for throughput.
#[test]
fn test_partial_admission_is_not_rolled_back() {
    let checker = checker();
    checker.tree().root().insert_bucket(RateType::DmlInsert, TokenBucket::new(1.0, 10.0));
    checker
        .tree()
        .replace_from_snapshot(&LimiterSnapshot::root().child(
            LimiterSnapshot::scope(0)
                .child(LimiterSnapshot::scope(1).rate(RateType::DmlInsert, 0.0)),
        ))
        .unwrap();

    assert!(checker
        .check(0, &single_collection(1), RateType::DmlInsert, 4)
        .is_err());
    let root_bucket = checker.tree().root().bucket(RateType::DmlInsert).unwrap();
    assert!(root_bucket.tokens() <= 6.0 + 0.01);
}

/// Collection `deny` has every Data rate at 0, collection `allow` is unlimited.
fn split_snapshot(deny: i64, allow: i64) -> LimiterSnapshot {
    LimiterSnapshot::root().child(
        LimiterSnapshot::scope(0)
            .child(LimiterSnapshot::scope(deny).rates(RateType::data_types(), 0.0))
            .child(LimiterSnapshot::scope(allow).rates(RateType::data_types(), f64::INFINITY)),
    )
}

/// Two snapshots each deny exactly one of collections 1 and 2. A check that
/// saw half of one and half of the other could admit.
#[test]
fn test_checks_never_observe_partial_snapshot() {
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    let checker = checker();
    let tree = Arc::clone(checker.tree());
    tree.replace_from_snapshot(&split_snapshot(1, 2)).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let admitted = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let checker = checker.clone();
            let stop = Arc::clone(&stop);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                // Collection 3 is created lazily and pruned by every snapshot
                let collections: HashMap<i64, Vec<i64>> = if t % 2 == 0 {
                    HashMap::from([(1, vec![]), (2, vec![])])
                } else {
                    HashMap::from([(2, vec![]), (3, vec![]), (1, vec![])])
                };
                while !stop.load(Ordering::Relaxed) {
                    match checker.check(0, &collections, RateType::DmlInsert, 1) {
                        Ok(()) => {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            let AdmissionError::RateLimitExceeded { scope, .. } = &err else {
                                panic!("unexpected denial {err:?}");
                            };
                            assert_eq!(scope.scope, RateScope::Collection);
                            assert!(matches!(scope.id, Some(1) | Some(2)));
                        }
                    }
                }
            })
        })
        .collect();

    for round in 0..500 {
        let snapshot = if round % 2 == 0 {
            split_snapshot(2, 1)
        } else {
            split_snapshot(1, 2)
        };
        tree.replace_from_snapshot(&snapshot).unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::Relaxed), 0);

    // The last snapshot applied was split_snapshot(1, 2)
    tree.replace_from_snapshot(&split_snapshot(1, 2)).unwrap();
    assert_eq!(tree.collection_keys(), vec![(0, 1), (0, 2)]);
    assert!(checker
        .check(0, &single_collection(2), RateType::DmlInsert, 1)
        .is_ok());
    assert!(checker
        .check(0, &single_collection(1), RateType::DmlInsert, 1)
        .is_err());
}
