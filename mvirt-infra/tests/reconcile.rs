//! Reconcile against the in-memory control plane.

mod common;

use common::{CREATED_PER_CLUSTER, Fixture};
use mvirt_infra::context::EnsurerContext;
use mvirt_infra::remote::memory::Operation;
use mvirt_infra::remote::{INFRA, ManagerApi, ManagerKind, PolicyApi, PolicyKind, RemoteObject};
use mvirt_infra::state::Slot;
use mvirt_infra::tasks::{Action, Task};
use mvirt_infra::{ApiError, EnsureError, InfraState};

#[tokio::test]
async fn test_reconcile_creates_everything() {
    let fx = Fixture::new();
    let mut state = InfraState::default();

    fx.ensurer()
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();

    for slot in Slot::ALL {
        assert!(state.reference(slot).is_some(), "{} not set", slot);
    }
    assert_eq!(fx.plane.created_count(), CREATED_PER_CLUSTER);

    let rule = PolicyApi::get(
        fx.plane.as_ref(),
        state.snat_rule_ref.as_ref().unwrap().path.as_deref().unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(rule.property_str("source_network"), Some("10.250.0.0/24"));
    assert_eq!(
        rule.property_str("translated_network"),
        Some(state.snat_ip_address_ref.as_ref().unwrap().id.as_str())
    );

    let pool_path = state.advanced_dhcp.ip_pool_ref.as_ref().unwrap().path.clone().unwrap();
    let pool = ManagerApi::get(fx.plane.as_ref(), &pool_path).await.unwrap();
    assert_eq!(pool.properties["allocation_ranges"][0]["start"], "10.250.0.10");
    assert_eq!(pool.properties["allocation_ranges"][0]["end"], "10.250.0.254");
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let fx = Fixture::new();
    let ensurer = fx.ensurer();
    let mut state = InfraState::default();

    ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();
    let first = state.clone();

    ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();

    assert_eq!(state, first);
    assert_eq!(fx.plane.created_count(), CREATED_PER_CLUSTER);

    let ctx = EnsurerContext::new(fx.plane.as_ref(), fx.plane.as_ref(), true);
    for task in ensurer.tasks() {
        let action = task.ensure(&ctx, &fx.spec, &mut state).await.unwrap();
        assert_eq!(action, Action::Unchanged, "{}", task.label());
    }
    assert_eq!(state, first);
}

#[tokio::test]
async fn test_reconcile_survives_state_file_round_trip() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let mut state = InfraState::load(&path).unwrap();
    fx.ensurer()
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();
    state.save(&path).unwrap();

    let mut reloaded = InfraState::load(&path).unwrap();
    fx.ensurer()
        .ensure_infrastructure(&fx.spec, &mut reloaded)
        .await
        .unwrap();

    assert_eq!(reloaded, state);
    assert_eq!(fx.plane.created_count(), CREATED_PER_CLUSTER);
}

#[tokio::test]
async fn test_lost_references_are_recovered() {
    let fx = Fixture::new();
    let ensurer = fx.ensurer();
    let mut state = InfraState::default();
    ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();
    let complete = state.clone();

    state.clear(Slot::Segment);
    state.clear(Slot::SnatRule);
    state.clear(Slot::DhcpServer);
    state.clear(Slot::DhcpIpPool);
    ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();

    assert_eq!(state, complete);
    assert_eq!(fx.plane.created_count(), CREATED_PER_CLUSTER);
}

#[tokio::test]
async fn test_recovery_disabled_creates_duplicates() {
    let fx = Fixture::new();
    let mut state = InfraState::default();
    fx.ensurer()
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();

    state.clear(Slot::DhcpProfile);
    fx.ensurer()
        .try_recover(false)
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();

    assert_eq!(fx.plane.count(ManagerKind::DhcpProfile), 2);
}

#[tokio::test]
async fn test_ambiguous_recovery_creates_new_object() {
    let fx = Fixture::new();
    for id in ["dup-a", "dup-b"] {
        let object = RemoteObject::new(id, "dev--shoot-a").with_tags(fx.spec.create_tags());
        fx.plane
            .patch(PolicyKind::Tier1Gateway, INFRA, &object)
            .await
            .unwrap();
    }
    let before = fx.plane.created_count();
    let mut state = InfraState::default();

    fx.ensurer()
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();

    let tier1 = state.tier1_gateway_ref.as_ref().unwrap();
    assert!(tier1.id != "dup-a" && tier1.id != "dup-b");
    assert_eq!(fx.plane.count(PolicyKind::Tier1Gateway), 3);
    assert_eq!(fx.plane.created_count(), before + CREATED_PER_CLUSTER);
}

#[tokio::test]
async fn test_failure_aborts_and_resumes() {
    let fx = Fixture::new();
    let ensurer = fx.ensurer();
    let mut state = InfraState::default();
    fx.plane.fail(Operation::Create, PolicyKind::Segment);

    let err = ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap_err();

    assert_eq!(err.label(), Some("segment"));
    assert!(matches!(
        err.root(),
        EnsureError::Remote(ApiError::Injected(_))
    ));
    assert!(state.tier1_gateway_ref.is_some());
    assert!(state.locale_service_ref.is_some());
    assert!(state.segment_ref.is_none());
    assert!(state.snat_ip_allocation_ref.is_none());
    assert_eq!(fx.plane.created_count(), 2);

    fx.plane.clear_failures();
    ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();
    assert_eq!(fx.plane.created_count(), CREATED_PER_CLUSTER);
}

#[tokio::test]
async fn test_missing_lookup_object_fails_first_task() {
    let fx = Fixture::new();
    let mut spec = fx.spec.clone();
    spec.tier0_gateway_name = "unknown".to_string();
    let mut state = InfraState::default();

    let err = fx
        .ensurer()
        .ensure_infrastructure(&spec, &mut state)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "tier-0 gateway lookup failed");
    assert!(matches!(err.root(), EnsureError::NotFound { .. }));
    assert!(state.is_empty());
}

#[tokio::test]
async fn test_stale_reference_is_cleared_then_recreated() {
    let fx = Fixture::new();
    let ensurer = fx.ensurer();
    let mut state = InfraState::default();
    ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();

    let port = state.advanced_dhcp.port_ref.clone().unwrap();
    fx.plane.remove(port.path.as_deref().unwrap()).unwrap();

    let err = ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap_err();
    assert_eq!(err.label(), Some("DHCP port"));
    assert!(matches!(err.root(), EnsureError::Consistency { slot: Slot::DhcpPort, .. }));
    assert!(state.advanced_dhcp.port_ref.is_none());

    ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();
    let recreated = state.advanced_dhcp.port_ref.clone().unwrap();
    assert_ne!(recreated.id, port.id);
    assert_eq!(fx.plane.created_count(), CREATED_PER_CLUSTER + 1);
}

#[tokio::test]
async fn test_drift_is_corrected() {
    let fx = Fixture::new();
    let ensurer = fx.ensurer();
    let mut state = InfraState::default();
    ensurer
        .ensure_infrastructure(&fx.spec, &mut state)
        .await
        .unwrap();

    let mut spec = fx.spec.clone();
    spec.dhcp_lease_time = 600;
    ensurer.ensure_infrastructure(&spec, &mut state).await.unwrap();

    let server_path = state.advanced_dhcp.server_ref.as_ref().unwrap().path.clone().unwrap();
    let server = ManagerApi::get(fx.plane.as_ref(), &server_path).await.unwrap();
    assert_eq!(server.properties["ipv4_dhcp_server"]["lease_time"], 600);
    assert_eq!(fx.plane.created_count(), CREATED_PER_CLUSTER);
}
