//! Assignment lifecycle and query behaviour.

mod common;

use assert_matches::assert_matches;
use chrono::Duration;

use common::{harness, seed_active_flow, Harness};
use ramp_core::error::CoreError;
use ramp_core::progress::AssignmentStatus;
use ramp_core::types::{new_entity_id, EntityId};
use ramp_engine::AssignRequest;
use ramp_events::bus::EVENT_ASSIGNMENT_CREATED;

fn request(flow_id: EntityId) -> AssignRequest {
    AssignRequest {
        user_id: new_entity_id(),
        flow_id,
        assigned_by: new_entity_id(),
        buddy_id: None,
        mentor_id: None,
        due_at: None,
    }
}

async fn assigned(h: &Harness) -> ramp_core::progress::Assignment {
    let (flow_id, _) = seed_active_flow(h, &[1]).await;
    h.assignments.assign_user(request(flow_id)).await.unwrap()
}

#[tokio::test]
async fn assign_pins_the_active_version() {
    let h = harness();
    let (flow_id, v1) = seed_active_flow(&h, &[2]).await;
    let v2 = h.versioning.create_new_version(v1.id).await.unwrap();

    // v2 exists but is inactive; the assignment must pin v1.
    let assignment = h.assignments.assign_user(request(flow_id)).await.unwrap();
    assert_eq!(assignment.flow_version_id, v1.id);
    assert_ne!(assignment.flow_version_id, v2.id);
    assert_eq!(assignment.status, AssignmentStatus::Assigned);
}

#[tokio::test]
async fn assign_without_active_version_is_invalid_state() {
    let h = harness();
    let result = h.assignments.assign_user(request(new_entity_id())).await;
    assert_matches!(result, Err(CoreError::InvalidState(_)));
}

#[tokio::test]
async fn assign_computes_deadline_from_version_allowance() {
    let h = harness();
    let (flow_id, _) = seed_active_flow(&h, &[1]).await;
    // The fixture grants 30 days.
    let assignment = h.assignments.assign_user(request(flow_id)).await.unwrap();
    let now = assignment.assigned_at;
    assert_eq!(assignment.due_at, Some(now + Duration::days(30)));
}

#[tokio::test]
async fn explicit_deadline_overrides_the_allowance() {
    let h = harness();
    let (flow_id, _) = seed_active_flow(&h, &[1]).await;
    let mut req = request(flow_id);
    let explicit = chrono::Utc::now() + Duration::days(7);
    req.due_at = Some(explicit);
    let assignment = h.assignments.assign_user(req).await.unwrap();
    assert_eq!(assignment.due_at, Some(explicit));
}

#[tokio::test]
async fn lifecycle_happy_path() {
    let h = harness();
    let assignment = assigned(&h).await;

    let started = h.assignments.start(assignment.id).await.unwrap();
    assert_eq!(started.status, AssignmentStatus::InProgress);
    assert!(started.started_at.is_some());

    let paused = h.assignments.pause(assignment.id).await.unwrap();
    assert_eq!(paused.status, AssignmentStatus::Paused);

    let resumed = h.assignments.resume(assignment.id).await.unwrap();
    assert_eq!(resumed.status, AssignmentStatus::InProgress);

    let completed = h.assignments.complete(assignment.id).await.unwrap();
    assert_eq!(completed.status, AssignmentStatus::Completed);
    assert!(completed.completed_at.is_some());
}

#[tokio::test]
async fn transitions_from_wrong_state_are_rejected() {
    let h = harness();
    let assignment = assigned(&h).await;

    assert_matches!(
        h.assignments.pause(assignment.id).await,
        Err(CoreError::InvalidState(_))
    );
    assert_matches!(
        h.assignments.resume(assignment.id).await,
        Err(CoreError::InvalidState(_))
    );
    assert_matches!(
        h.assignments.complete(assignment.id).await,
        Err(CoreError::InvalidState(_))
    );

    h.assignments.start(assignment.id).await.unwrap();
    assert_matches!(
        h.assignments.start(assignment.id).await,
        Err(CoreError::InvalidState(_))
    );
}

#[tokio::test]
async fn cancel_reaches_any_open_state_but_not_completed() {
    let h = harness();

    let a = assigned(&h).await;
    let cancelled = h.assignments.cancel(a.id).await.unwrap();
    assert_eq!(cancelled.status, AssignmentStatus::Cancelled);
    assert_matches!(
        h.assignments.cancel(a.id).await,
        Err(CoreError::InvalidState(_))
    );

    let b = assigned(&h).await;
    h.assignments.start(b.id).await.unwrap();
    h.assignments.pause(b.id).await.unwrap();
    assert_eq!(
        h.assignments.cancel(b.id).await.unwrap().status,
        AssignmentStatus::Cancelled
    );

    let c = assigned(&h).await;
    h.assignments.start(c.id).await.unwrap();
    h.assignments.complete(c.id).await.unwrap();
    assert_matches!(
        h.assignments.cancel(c.id).await,
        Err(CoreError::InvalidState(_))
    );
}

#[tokio::test]
async fn unknown_assignment_is_not_found() {
    let h = harness();
    assert_matches!(
        h.assignments.start(new_entity_id()).await,
        Err(CoreError::NotFound { entity: "Assignment", .. })
    );
}

#[tokio::test]
async fn overdue_lists_only_open_past_due_assignments() {
    let h = harness();
    let (flow_id, _) = seed_active_flow(&h, &[1]).await;

    let open_overdue = h.assignments.assign_user(request(flow_id)).await.unwrap();
    let completed_overdue = h.assignments.assign_user(request(flow_id)).await.unwrap();
    h.assignments.start(completed_overdue.id).await.unwrap();
    h.assignments.complete(completed_overdue.id).await.unwrap();

    // Past the 30-day allowance for both; a third assignment made now is
    // still within its window.
    h.clock.advance(Duration::days(40));
    let fresh = h.assignments.assign_user(request(flow_id)).await.unwrap();

    let overdue = h.assignments.list_overdue().await.unwrap();
    let ids: Vec<EntityId> = overdue.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![open_overdue.id]);
    assert!(!ids.contains(&fresh.id));
}

#[tokio::test]
async fn queries_filter_by_user_and_flow() {
    let h = harness();
    let (flow_id, _) = seed_active_flow(&h, &[1]).await;
    let (other_flow, _) = seed_active_flow(&h, &[1]).await;

    let mine = h.assignments.assign_user(request(flow_id)).await.unwrap();
    h.assignments.assign_user(request(flow_id)).await.unwrap();
    h.assignments.assign_user(request(other_flow)).await.unwrap();

    let by_user = h.assignments.list_for_user(mine.user_id).await.unwrap();
    assert_eq!(by_user.len(), 1);
    assert_eq!(by_user[0].id, mine.id);

    let by_flow = h.assignments.list_for_flow(flow_id).await.unwrap();
    assert_eq!(by_flow.len(), 2);
}

#[tokio::test]
async fn assignment_creation_publishes_an_event() {
    let h = harness();
    let (flow_id, _) = seed_active_flow(&h, &[1]).await;
    let mut rx = h.bus.subscribe();

    let assignment = h.assignments.assign_user(request(flow_id)).await.unwrap();
    let event = rx.try_recv().unwrap();
    assert_eq!(event.event_type, EVENT_ASSIGNMENT_CREATED);
    assert_eq!(event.user_id, Some(assignment.user_id));
    assert_eq!(event.source_entity_id, Some(assignment.id));
}
