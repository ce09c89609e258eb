//! Integration tests for cross-zone distribution and alias reconciliation
//!
//! Runs the whole pipeline against the in-memory cloud.

mod common;

use std::sync::Arc;

use common::{pipeline, pipeline_with, zone, IMAGE_SIZE, STABLE, VERSIONED};
use imgrelay::core::reconcile::ReconcileOptions;
use imgrelay::error::{DistributionError, ZoneStage};
use imgrelay::infra::memory::MemoryCloud;

/// Test: origin A distributed to B and C ends with one stable image per zone
#[tokio::test]
async fn test_three_zone_scenario() {
    let cloud = Arc::new(MemoryCloud::new());
    let (a, b, c) = (zone("fr-par-1"), zone("nl-ams-1"), zone("pl-waw-1"));
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);
    let old_b = cloud.seed_image(&b, STABLE, IMAGE_SIZE);
    let old_c = cloud.seed_image(&c, STABLE, IMAGE_SIZE);

    let summary = pipeline(&cloud)
        .run(
            origin.clone(),
            "relay-bucket",
            &[a.clone(), b.clone(), c.clone()],
        )
        .await;

    assert!(summary.is_success(), "failures: {:?}", summary.failed);
    assert_eq!(summary.stable_name, STABLE);
    assert_eq!(summary.succeeded.len(), 3);

    // Origin keeps its versioned build record next to the alias
    assert_eq!(cloud.images_named(&a, STABLE).len(), 1);
    assert_eq!(cloud.images_named(&a, VERSIONED).len(), 1);
    assert_eq!(
        cloud.images_named(&a, STABLE)[0].snapshot_id,
        origin.snapshot_id
    );

    for (target, old) in [(&b, &old_b), (&c, &old_c)] {
        let stable = cloud.images_named(target, STABLE);
        assert_eq!(stable.len(), 1, "zone {target}");
        assert_ne!(stable[0].image_id, old.image_id);
        assert!(
            cloud.images_named(target, VERSIONED).is_empty(),
            "zone {target}"
        );
        assert_eq!(cloud.images(target).len(), 1, "zone {target}");
        assert!(
            cloud.snapshots(target).iter().all(|s| s.id != old.snapshot_id),
            "superseded snapshot pruned in {target}"
        );
    }
}

/// Test: every requested zone is processed with a bounded worker pool
#[tokio::test]
async fn test_fan_out_covers_every_zone() {
    let cloud = Arc::new(MemoryCloud::new());
    let origin_zone = zone("fr-par-1");
    let origin = cloud.seed_image(&origin_zone, VERSIONED, IMAGE_SIZE);
    let targets: Vec<_> = ["fr-par-2", "fr-par-3", "nl-ams-1", "nl-ams-2", "pl-waw-1", "pl-waw-2"]
        .into_iter()
        .map(zone)
        .collect();

    let summary = pipeline_with(&cloud, ReconcileOptions::default(), 2)
        .run(origin, "relay-bucket", &targets)
        .await;

    assert!(summary.is_success(), "failures: {:?}", summary.failed);
    assert_eq!(summary.succeeded.len(), targets.len() + 1);
    for target in &targets {
        assert_eq!(cloud.images_named(target, STABLE).len(), 1, "zone {target}");
    }
}

/// Test: imported snapshots take the source snapshot's size, not the relay object's
#[tokio::test]
async fn test_imported_size_matches_source() {
    let cloud = Arc::new(MemoryCloud::new());
    let (a, b) = (zone("fr-par-1"), zone("nl-ams-1"));
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);

    let summary = pipeline(&cloud).run(origin, "relay-bucket", &[b.clone()]).await;
    assert!(summary.is_success());

    let relay = cloud.relay_objects();
    assert_eq!(relay.len(), 1);
    assert_ne!(relay[0].size_bytes, IMAGE_SIZE);

    let stable = &cloud.images_named(&b, STABLE)[0];
    let snapshot = cloud
        .snapshots(&b)
        .into_iter()
        .find(|s| s.id == stable.snapshot_id)
        .expect("alias snapshot exists");
    assert_eq!(snapshot.size_bytes, IMAGE_SIZE);
}

/// Test: a failing zone does not affect the others or its own current alias
#[tokio::test]
async fn test_partial_failure_is_isolated() {
    let cloud = Arc::new(MemoryCloud::new());
    let (a, b, c) = (zone("fr-par-1"), zone("nl-ams-1"), zone("pl-waw-1"));
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);
    let old_c = cloud.seed_image(&c, STABLE, IMAGE_SIZE);
    cloud.fail_import_in(&c);

    let summary = pipeline(&cloud)
        .run(origin, "relay-bucket", &[b.clone(), c.clone()])
        .await;

    assert!(!summary.is_success());
    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].zone, c);
    assert_eq!(summary.failed[0].stage, ZoneStage::Import);

    assert_eq!(cloud.images_named(&b, STABLE).len(), 1);
    assert_eq!(cloud.images_named(&c, STABLE), vec![old_c]);

    match summary.error() {
        Some(DistributionError::Zones { failures }) => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].to_string().contains("pl-waw-1"));
        }
        other => panic!("expected zone failures, got {other:?}"),
    }
}

/// Test: alias creation failure keeps the previous stable image
#[tokio::test]
async fn test_alias_failure_deletes_nothing() {
    let cloud = Arc::new(MemoryCloud::new());
    let (a, b) = (zone("fr-par-1"), zone("nl-ams-1"));
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);
    let old_b = cloud.seed_image(&b, STABLE, IMAGE_SIZE);
    cloud.fail_image_create(&b, STABLE);

    let summary = pipeline(&cloud).run(origin, "relay-bucket", &[b.clone()]).await;

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].zone, b);
    assert_eq!(summary.failed[0].stage, ZoneStage::Reconcile);
    assert_eq!(cloud.images_named(&b, STABLE), vec![old_b]);
}

/// Test: the stable name never disappears while it is being replaced
#[tokio::test]
async fn test_no_premature_deletion() {
    let cloud = Arc::new(MemoryCloud::new());
    let (a, b) = (zone("fr-par-1"), zone("nl-ams-1"));
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);
    cloud.seed_image(&a, STABLE, IMAGE_SIZE);
    cloud.seed_image(&b, STABLE, IMAGE_SIZE);

    let summary = pipeline(&cloud)
        .run(origin, "relay-bucket", &[b.clone()])
        .await;
    assert!(summary.is_success());

    for z in [&a, &b] {
        let census = cloud.census(z, STABLE);
        assert_eq!(census, vec![2, 1], "zone {z}");
        assert!(census.iter().all(|&count| count >= 1));
    }
}

/// Test: running twice converges to the same end state and reuses the origin alias
#[tokio::test]
async fn test_rerun_is_idempotent() {
    let cloud = Arc::new(MemoryCloud::new());
    let (a, b) = (zone("fr-par-1"), zone("nl-ams-1"));
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);
    let pipeline = pipeline(&cloud);

    let first = pipeline.run(origin.clone(), "relay-bucket", &[b.clone()]).await;
    let second = pipeline.run(origin, "relay-bucket", &[b.clone()]).await;

    assert!(first.is_success());
    assert!(second.is_success());

    let origin_outcome = second
        .succeeded
        .iter()
        .find(|o| o.zone == a)
        .expect("origin zone reconciled");
    assert!(origin_outcome.reused);
    assert_eq!(cloud.images_named(&a, STABLE).len(), 1);
    assert_eq!(cloud.images_named(&b, STABLE).len(), 1);
    assert!(cloud.images_named(&b, VERSIONED).is_empty());

    // Deterministic key: the second export overwrote the first
    let relay = cloud.relay_objects();
    assert_eq!(relay.len(), 1);
    assert_eq!(relay[0].key, format!("{VERSIONED}.qcow2"));
}

/// Test: target zones may keep the versioned image when configured to
#[tokio::test]
async fn test_keep_versioned_in_targets() {
    let cloud = Arc::new(MemoryCloud::new());
    let (a, b) = (zone("fr-par-1"), zone("nl-ams-1"));
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);
    let options = ReconcileOptions {
        keep_versioned_in_targets: true,
        prune_snapshots: true,
    };

    let summary = pipeline_with(&cloud, options, 4)
        .run(origin, "relay-bucket", &[b.clone()])
        .await;

    assert!(summary.is_success());
    assert_eq!(cloud.images_named(&b, STABLE).len(), 1);
    assert_eq!(cloud.images_named(&b, VERSIONED).len(), 1);
}

/// Test: failed deletions are warnings, not zone failures
#[tokio::test]
async fn test_cleanup_failure_is_warning() {
    let cloud = Arc::new(MemoryCloud::new());
    let (a, b) = (zone("fr-par-1"), zone("nl-ams-1"));
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);
    cloud.seed_image(&b, STABLE, IMAGE_SIZE);
    cloud.fail_image_deletes();

    let summary = pipeline(&cloud).run(origin, "relay-bucket", &[b.clone()]).await;

    assert!(summary.is_success());
    let target = summary
        .succeeded
        .iter()
        .find(|o| o.zone == b)
        .expect("target zone reconciled");
    assert!(!target.warnings.is_empty());
    assert!(target.removed_images.is_empty());
}

/// Test: the origin zone is never treated as a target, even when listed
#[tokio::test]
async fn test_origin_not_imported_into_itself() {
    let cloud = Arc::new(MemoryCloud::new());
    let a = zone("fr-par-1");
    let origin = cloud.seed_image(&a, VERSIONED, IMAGE_SIZE);

    let summary = pipeline(&cloud)
        .run(origin, "relay-bucket", &[a.clone(), a.clone()])
        .await;

    assert!(summary.is_success());
    assert_eq!(summary.succeeded.len(), 1);
    assert!(cloud.relay_objects().is_empty());
    assert_eq!(cloud.snapshots(&a).len(), 1);
}
