use pretty_assertions::assert_eq;
use regsync_kernel::prelude::*;
use regsync_test_utils::*;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const K: &str = r"HKLM\Software\Vendor\K";

fn faulty(registry: Arc<MemoryRegistry>) -> Arc<FaultyRegistry> {
    Arc::new(FaultyRegistry::new(registry))
}

fn position(calls: &[Call], op: Op, raw_key: &str) -> usize {
    let target = key(raw_key);
    calls
        .iter()
        .position(|call| call.op == op && call.key == target)
        .unwrap_or_else(|| panic!("no {op:?} call for {raw_key} in {calls:#?}"))
}

#[tokio::test]
async fn test_children_are_deleted_before_their_parent() {
    let inner = Arc::new(MemoryRegistry::new(HostArch::X64));
    inner.create(&key(&format!(r"{K}\C1\Deep"))).unwrap();
    inner.create(&key(&format!(r"{K}\C2"))).unwrap();
    let registry = faulty(inner);

    let report = reconcile(
        registry.clone(),
        RunConfig::default(),
        vec![
            key_absent(K),
            key_absent(&format!(r"{K}\C1")),
            key_absent(&format!(r"{K}\C2")),
        ],
    )
    .await
    .unwrap();

    assert_eq!(report.summary().changed, 3);
    let mutations = registry.mutations();
    assert_eq!(mutations.len(), 3);
    let parent = position(&mutations, Op::Delete, K);
    assert!(position(&mutations, Op::Delete, &format!(r"{K}\C1")) < parent);
    assert!(position(&mutations, Op::Delete, &format!(r"{K}\C2")) < parent);
    assert!(!registry.inner().exists(&key(K)).unwrap());
}

#[tokio::test]
async fn test_parents_are_created_before_children_and_values() {
    let registry = faulty(Arc::new(MemoryRegistry::new(HostArch::X64)));
    let sub = format!(r"{K}\Sub");

    // Declared bottom-up to show the order comes from the paths
    let report = reconcile(
        registry.clone(),
        RunConfig::default(),
        vec![
            value_present(&sub, "V", ValueData::Dword(1)),
            key_present(&sub),
            key_present(K),
        ],
    )
    .await
    .unwrap();

    assert!(report.is_success());
    let ops: Vec<(Op, String)> = registry
        .mutations()
        .into_iter()
        .map(|call| (call.op, call.key.to_string()))
        .collect();
    assert_eq!(
        ops,
        [
            (Op::Create, K.to_string()),
            (Op::Create, sub.clone()),
            (Op::SetValue, sub),
        ]
    );
}

#[tokio::test]
async fn test_explicit_requirements_order_unrelated_keys() {
    let registry = faulty(Arc::new(MemoryRegistry::new(HostArch::X64)));
    let first = r"HKLM\Software\Zeta";
    let second = r"HKLM\Software\Alpha";

    let report = reconcile(
        registry.clone(),
        RunConfig::default().with_max_workers(4),
        vec![
            KeyResource::present(key(second)).requires(key_id(first)).into(),
            key_present(first),
        ],
    )
    .await
    .unwrap();

    assert!(report.is_success());
    let mutations = registry.mutations();
    assert!(position(&mutations, Op::Create, first) < position(&mutations, Op::Create, second));
}

#[tokio::test]
async fn test_failure_skips_only_dependents() {
    let a = r"HKLM\Software\A";
    let a_sub = r"HKLM\Software\A\Sub";
    let b = r"HKLM\Software\B";
    let registry = Arc::new(
        FaultyRegistry::new(Arc::new(MemoryRegistry::new(HostArch::X64)))
            .inject(Op::Create, key(a), Fault::Deny),
    );

    let report = reconcile(
        registry.clone(),
        RunConfig::default(),
        vec![
            key_present(a),
            key_present(a_sub),
            value_present(a_sub, "V", string("x")),
            key_present(b),
        ],
    )
    .await
    .unwrap();

    assert_eq!(report.exit_code(), 1);
    let failed = report.outcome(&key_id(a)).unwrap();
    assert_eq!(failed.status, OutcomeStatus::Failed);
    assert!(matches!(
        failed.error,
        Some(ActionError::Access(AccessError::Os { code: 5, .. }))
    ));

    for id in [key_id(a_sub), value_id(a_sub, "V")] {
        let skipped = report.outcome(&id).unwrap();
        assert_eq!(skipped.status, OutcomeStatus::Skipped);
        // Transitive dependents report the root cause, not their direct parent
        assert_eq!(skipped.error, Some(ActionError::DependencyFailed(key_id(a))));
    }

    assert_eq!(report.outcome(&key_id(b)).unwrap().status, OutcomeStatus::Changed);
    assert!(registry.inner().exists(&key(b)).unwrap());
    assert!(!registry.inner().exists(&key(a_sub)).unwrap());

    let text = report.render_text(false);
    let skipped_line = r"err: Registry_key[HKLM\Software\A\Sub]: not executed: dependency failed";
    assert!(text.contains(skipped_line));
    assert!(text.contains("1 changed, 0 unchanged, 1 failed, 2 skipped"));
}

#[tokio::test]
async fn test_read_failure_while_planning_fails_that_resource() {
    let registry = Arc::new(
        FaultyRegistry::new(seeded_registry(HostArch::X64, K, &[]))
            .inject(Op::GetValue, key(K), Fault::Deny),
    );
    let other = r"HKLM\Software\Other";

    let report = reconcile(
        registry.clone(),
        RunConfig::default(),
        vec![
            value_present(K, "V", string("x")),
            KeyResource::present(key(other))
                .requires(value_id(K, "V"))
                .into(),
            key_present(r"HKLM\Software\Independent"),
        ],
    )
    .await
    .unwrap();

    let failed = report.outcome(&value_id(K, "V")).unwrap();
    assert_eq!(failed.status, OutcomeStatus::Failed);
    assert_eq!(failed.kind, None);
    assert_eq!(
        report.outcome(&key_id(other)).unwrap().error,
        Some(ActionError::DependencyFailed(value_id(K, "V")))
    );
    assert_eq!(report.summary().changed, 1);
    assert!(registry.mutations().iter().all(|call| call.key != key(K)));
}

#[tokio::test]
async fn test_purge_listing_failure_fails_the_key() {
    let registry = Arc::new(
        FaultyRegistry::new(seeded_registry(HostArch::X64, K, &[("Stray", string("x"))]))
            .inject(Op::ListValues, key(K), Fault::Deny),
    );

    let report = reconcile(
        registry.clone(),
        RunConfig::default(),
        vec![purged_key(K), value_present(K, "Kept", string("y"))],
    )
    .await
    .unwrap();

    assert_eq!(report.outcome(&key_id(K)).unwrap().status, OutcomeStatus::Failed);
    assert_eq!(
        report.outcome(&value_id(K, "Kept")).unwrap().status,
        OutcomeStatus::Skipped
    );
    assert!(registry.mutations().is_empty());
    assert!(registry
        .inner()
        .get_value(&key(K), &ValueName::new("Stray"))
        .is_ok());
}

#[tokio::test]
async fn test_slow_calls_time_out_without_blocking_the_run() {
    let slow = r"HKLM\Software\Slow";
    let registry = Arc::new(
        FaultyRegistry::new(Arc::new(MemoryRegistry::new(HostArch::X64))).inject(
            Op::Create,
            key(slow),
            Fault::Delay(Duration::from_millis(400)),
        ),
    );
    let timeout = Duration::from_millis(50);

    let report = reconcile(
        registry.clone(),
        RunConfig::default().with_action_timeout(timeout),
        vec![
            key_present(slow),
            key_present(&format!(r"{slow}\Child")),
            key_present(r"HKLM\Software\Fast"),
        ],
    )
    .await
    .unwrap();

    let timed_out = report.outcome(&key_id(slow)).unwrap();
    assert_eq!(timed_out.status, OutcomeStatus::Failed);
    assert_eq!(timed_out.error, Some(ActionError::Timeout(timeout)));
    assert_eq!(
        report.outcome(&key_id(&format!(r"{slow}\Child"))).unwrap().status,
        OutcomeStatus::Skipped
    );
    assert_eq!(
        report.outcome(&key_id(r"HKLM\Software\Fast")).unwrap().status,
        OutcomeStatus::Changed
    );
}

#[tokio::test]
async fn test_slow_reads_while_planning_time_out() {
    let slow = r"HKLM\Software\Slow";
    let child = format!(r"{slow}\Child");
    let registry = Arc::new(
        FaultyRegistry::new(Arc::new(MemoryRegistry::new(HostArch::X64))).inject(
            Op::Exists,
            key(slow),
            Fault::Delay(Duration::from_millis(400)),
        ),
    );
    let timeout = Duration::from_millis(50);

    let report = reconcile(
        registry.clone(),
        RunConfig::default().with_action_timeout(timeout),
        vec![
            key_present(slow),
            key_present(&child),
            key_present(r"HKLM\Software\Fast"),
        ],
    )
    .await
    .unwrap();

    let timed_out = report.outcome(&key_id(slow)).unwrap();
    assert_eq!(timed_out.status, OutcomeStatus::Failed);
    assert_eq!(timed_out.error, Some(ActionError::Timeout(timeout)));
    let skipped = report.outcome(&key_id(&child)).unwrap();
    assert_eq!(skipped.status, OutcomeStatus::Skipped);
    assert_eq!(skipped.error, Some(ActionError::DependencyFailed(key_id(slow))));
    assert_eq!(
        report.outcome(&key_id(r"HKLM\Software\Fast")).unwrap().status,
        OutcomeStatus::Changed
    );
    assert!(registry.mutations().iter().all(|call| call.key != key(slow)));
}

#[tokio::test]
async fn test_cancelled_runs_apply_nothing() {
    let registry = faulty(Arc::new(MemoryRegistry::new(HostArch::X64)));
    let token = CancellationToken::new();
    token.cancel();

    let report = Reconciler::new(registry.clone(), RunConfig::default())
        .apply_with_cancellation(
            vec![key_present(K), value_present(K, "V", ValueData::Dword(1))],
            token,
        )
        .await
        .unwrap();

    assert!(registry.mutations().is_empty());
    assert_eq!(report.summary().skipped, 2);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.error == Some(ActionError::Cancelled)));
}

#[tokio::test]
async fn test_dependency_cycles_abort_before_any_mutation() {
    let registry = faulty(Arc::new(MemoryRegistry::new(HostArch::X64)));
    let a = r"HKLM\Software\A";
    let b = r"HKLM\Software\B";

    let err = reconcile(
        registry.clone(),
        RunConfig::default(),
        vec![
            KeyResource::present(key(a)).requires(key_id(b)).into(),
            KeyResource::present(key(b)).requires(key_id(a)).into(),
            key_present(r"HKLM\Software\Unrelated"),
        ],
    )
    .await
    .unwrap_err();

    let PlanError::Cycle { cycles } = &err else {
        panic!("expected a cycle, got {err}");
    };
    assert_eq!(cycles.len(), 1);
    let mut members = cycles[0].clone();
    members.sort();
    assert_eq!(members, [key_id(a), key_id(b)]);
    assert!(registry.mutations().is_empty());
}

#[tokio::test]
async fn test_requirement_against_deletion_order_is_a_cycle() {
    let registry = faulty(Arc::new(MemoryRegistry::new(HostArch::X64)));
    let child = format!(r"{K}\C");

    // The child must go before K, but also requires K first
    let err = reconcile(
        registry.clone(),
        RunConfig::default(),
        vec![
            key_absent(K),
            KeyResource::absent(key(&child)).requires(key_id(K)).into(),
        ],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PlanError::Cycle { .. }));
    assert!(registry.mutations().is_empty());
}

#[tokio::test]
async fn test_present_beneath_absent_is_rejected() {
    let registry = faulty(Arc::new(MemoryRegistry::new(HostArch::X64)));

    let err = reconcile(
        registry.clone(),
        RunConfig::default(),
        vec![key_absent(K), value_present(K, "V", string("x"))],
    )
    .await
    .unwrap_err();

    assert!(err.is_cycle());
    assert!(matches!(err, PlanError::AmbiguousOrder { .. }));
    assert!(registry.mutations().is_empty());
}
