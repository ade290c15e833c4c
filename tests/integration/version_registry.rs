//! PutWorkflow versioning tests.

use conductor::core::{StepDefinition, VersionSelector, WorkflowDraft};
use conductor::orchestration::RunRequest;
use conductor::{AdminApi, Error};

use crate::fixtures::{ctx, linear_draft, wf, Harness};

/// Test: First publish
/// Given an unknown workflow
/// When PutWorkflow is called
/// Then version 1 is created and becomes the trigger target
#[tokio::test]
async fn test_first_publish_creates_version_one() {
    let harness = Harness::new();

    let response = harness
        .plane
        .put_workflow(&ctx(), linear_draft("etl"))
        .await
        .unwrap();

    assert_eq!(response.version, 1);
    assert!(!response.unchanged);
    assert_eq!(response.content_hash.len(), 64);
    assert_eq!(harness.store.version_count(&wf("etl")).await, 1);
}

/// Test: Identical resubmission
/// Given a published workflow
/// When the same content is submitted again
/// Then the existing version is returned and nothing new is stored
#[tokio::test]
async fn test_identical_publish_is_idempotent() {
    let harness = Harness::new();
    let first = harness
        .plane
        .put_workflow(&ctx(), linear_draft("etl"))
        .await
        .unwrap();
    let second = harness
        .plane
        .put_workflow(&ctx(), linear_draft("etl"))
        .await
        .unwrap();

    assert_eq!(second.version, first.version);
    assert_eq!(second.content_hash, first.content_hash);
    assert!(second.unchanged);
    assert_eq!(harness.store.version_count(&wf("etl")).await, 1);
}

/// Test: Changed content
/// Given a published workflow
/// When a different step graph is submitted
/// Then a new version is appended and old versions stay triggerable
#[tokio::test]
async fn test_changed_publish_appends_version() {
    let harness = Harness::new();
    assert_eq!(harness.publish(linear_draft("etl")).await, 1);

    let changed = WorkflowDraft::new(
        wf("etl"),
        vec![
            StepDefinition::new("a", "extract"),
            StepDefinition::new("b", "transform").after(&["a"]),
        ],
    );
    assert_eq!(harness.publish(changed).await, 2);

    let latest = harness.trigger("etl").await;
    assert_eq!(harness.snapshot(latest).await.tasks.len(), 2);

    let pinned = harness
        .trigger_with(RunRequest::new(wf("etl")).version(VersionSelector::Exact(1)))
        .await;
    let snapshot = harness.snapshot(pinned).await;
    assert_eq!(snapshot.run.version, 1);
    assert_eq!(snapshot.tasks.len(), 3);
}

/// Test: Republishing an older definition
/// Given versions 1 and 2
/// When the content of version 1 is submitted again
/// Then version 1 is returned rather than a third version
#[tokio::test]
async fn test_republishing_old_content_returns_old_version() {
    let harness = Harness::new();
    harness.publish(linear_draft("etl")).await;
    let mut slower = linear_draft("etl");
    slower.steps[2] = slower.steps[2].clone().with_timeout(600);
    assert_eq!(harness.publish(slower).await, 2);

    let again = harness
        .plane
        .put_workflow(&ctx(), linear_draft("etl"))
        .await
        .unwrap();
    assert_eq!(again.version, 1);
    assert!(again.unchanged);
    assert_eq!(harness.store.version_count(&wf("etl")).await, 2);
}

/// Test: Invalid graphs are rejected
/// Given drafts with a cycle, an unknown dependency, or duplicate names
/// When PutWorkflow is called
/// Then each fails validation and no version is stored
#[tokio::test]
async fn test_invalid_graphs_rejected() {
    let harness = Harness::new();
    let drafts = vec![
        WorkflowDraft::new(
            wf("etl"),
            vec![
                StepDefinition::new("a", "noop").after(&["b"]),
                StepDefinition::new("b", "noop").after(&["a"]),
            ],
        ),
        WorkflowDraft::new(
            wf("etl"),
            vec![StepDefinition::new("a", "noop").after(&["missing"])],
        ),
        WorkflowDraft::new(
            wf("etl"),
            vec![
                StepDefinition::new("a", "noop"),
                StepDefinition::new("a", "noop"),
            ],
        ),
        WorkflowDraft::new(wf("etl"), vec![]),
    ];

    for draft in drafts {
        let result = harness.plane.put_workflow(&ctx(), draft).await;
        assert!(matches!(result, Err(Error::Validation(_))), "{:?}", result);
    }
    assert_eq!(harness.store.version_count(&wf("etl")).await, 0);
}

/// Test: Step order and description do not change identity
/// Given the same steps listed in a different order with a new description
/// When both are published
/// Then they hash identically
#[tokio::test]
async fn test_step_order_does_not_create_version() {
    let harness = Harness::new();
    let forward = linear_draft("etl");
    let mut reversed = forward.clone().with_description("reordered");
    reversed.steps.reverse();

    let first = harness.plane.put_workflow(&ctx(), forward).await.unwrap();
    let second = harness.plane.put_workflow(&ctx(), reversed).await.unwrap();
    assert_eq!(first.content_hash, second.content_hash);
    assert!(second.unchanged);
}
