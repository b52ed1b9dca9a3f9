//! Integration tests for formation reconciliation.
//!
//! Uses the in-memory cluster as both scheduler and host runtime.

mod harness;

use std::collections::BTreeMap;
use std::sync::Arc;

use harness::{formation_template, host};
use shoal_controller::cluster::{
    HostRuntime, InMemoryCluster, Job, JobConfig, Scheduler, SchedulerError, HOST_ID_ATTRIBUTE,
};
use shoal_controller::scheduler::{Formation, FormationReconciler, ReconcileError};
use shoal_id::{AppId, FormationType, JobId, JobKind};
use shoal_reconcile::{LeastLoaded, PlacementError, PlacementPolicy, RoundRobin};

fn app(name: &str) -> AppId {
    AppId::new(name).unwrap()
}

fn formation(ty: &str, quantity: u32) -> Formation {
    Formation {
        formation_type: FormationType::new(ty).unwrap(),
        quantity,
    }
}

fn reconciler_with(
    cluster: Arc<InMemoryCluster>,
    runtime: Arc<dyn HostRuntime>,
    placement: Arc<dyn PlacementPolicy>,
) -> FormationReconciler {
    let scheduler: Arc<dyn Scheduler> = cluster;
    FormationReconciler::new(scheduler, runtime, placement, formation_template())
}

fn reconciler(cluster: &Arc<InMemoryCluster>) -> FormationReconciler {
    reconciler_with(cluster.clone(), cluster.clone(), Arc::new(RoundRobin))
}

fn two_hosts() -> Arc<InMemoryCluster> {
    Arc::new(InMemoryCluster::with_hosts([host("h1"), host("h2")]))
}

/// Count of `app`'s `ty` jobs per host.
async fn counts(cluster: &InMemoryCluster, app_name: &str, ty: &str) -> BTreeMap<String, usize> {
    let kind = JobKind::Formation(FormationType::new(ty).unwrap());
    let mut counts = BTreeMap::new();
    for (host, _) in cluster.snapshot().await.matching_jobs(&app(app_name), &kind) {
        *counts.entry(host.to_string()).or_insert(0) += 1;
    }
    counts
}

async fn seed(cluster: &InMemoryCluster, host_name: &str, id: &str) {
    cluster
        .insert_job(host(host_name), Job::new(JobId::parse(id).unwrap(), JobConfig::default()))
        .await;
}

#[tokio::test]
async fn test_scale_up_round_robin() {
    let cluster = two_hosts();
    let outcome = reconciler(&cluster)
        .reconcile(&app("blog"), &formation("web", 3))
        .await
        .unwrap();

    assert_eq!(outcome.scheduled.len(), 3);
    assert!(outcome.stopped.is_empty());
    assert_eq!(
        counts(&cluster, "blog", "web").await,
        BTreeMap::from([("h1".to_string(), 2), ("h2".to_string(), 1)])
    );

    // One request carrying every new job.
    let requests = cluster.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].job_count(), 3);

    let mut ids: Vec<String> = outcome.scheduled.iter().map(ToString::to_string).collect();
    assert!(ids.iter().all(|id| id.starts_with("blog-web.")));
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_new_jobs_use_formation_template() {
    let cluster = two_hosts();
    reconciler(&cluster)
        .reconcile(&app("blog"), &formation("web", 1))
        .await
        .unwrap();

    let requests = cluster.requests().await;
    let job = requests[0].host_jobs.values().flatten().next().unwrap();
    assert_eq!(job.config, formation_template());
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let cluster = two_hosts();
    let reconciler = reconciler(&cluster);

    reconciler.reconcile(&app("blog"), &formation("web", 2)).await.unwrap();
    let outcome = reconciler.reconcile(&app("blog"), &formation("web", 2)).await.unwrap();

    assert!(outcome.is_noop());
    assert_eq!(cluster.requests().await.len(), 1);
    assert_eq!(cluster.stop_calls(), 0);
}

#[tokio::test]
async fn test_scale_down_stops_lowest_ids_first() {
    let cluster = two_hosts();
    seed(&cluster, "h1", "blog-web.c").await;
    seed(&cluster, "h2", "blog-web.a").await;
    seed(&cluster, "h1", "blog-web.b").await;

    let outcome = reconciler(&cluster)
        .reconcile(&app("blog"), &formation("web", 1))
        .await
        .unwrap();

    let stopped: Vec<String> = outcome.stopped.iter().map(ToString::to_string).collect();
    assert_eq!(stopped, vec!["blog-web.a", "blog-web.b"]);
    assert!(cluster.requests().await.is_empty());
    assert_eq!(
        counts(&cluster, "blog", "web").await,
        BTreeMap::from([("h1".to_string(), 1)])
    );
}

#[tokio::test]
async fn test_scale_to_zero() {
    let cluster = two_hosts();
    let reconciler = reconciler(&cluster);
    reconciler.reconcile(&app("blog"), &formation("web", 3)).await.unwrap();

    let outcome = reconciler.reconcile(&app("blog"), &formation("web", 0)).await.unwrap();
    assert_eq!(outcome.stopped.len(), 3);
    assert!(counts(&cluster, "blog", "web").await.is_empty());
}

#[tokio::test]
async fn test_prefix_isolation() {
    let cluster = two_hosts();
    seed(&cluster, "h1", "app10-web.x").await;
    seed(&cluster, "h1", "app1-worker.y").await;
    seed(&cluster, "h2", "app1-web.z").await;

    let outcome = reconciler(&cluster)
        .reconcile(&app("app1"), &formation("web", 2))
        .await
        .unwrap();

    // Only app1-web.z counts towards app1/web.
    assert_eq!(outcome.scheduled.len(), 1);
    assert_eq!(counts(&cluster, "app10", "web").await.values().sum::<usize>(), 1);
    assert_eq!(counts(&cluster, "app1", "worker").await.values().sum::<usize>(), 1);
}

#[tokio::test]
async fn test_jobs_with_unusual_suffixes_count_towards_formation() {
    let cluster = two_hosts();
    seed(&cluster, "h1", "blog-web.abc=").await;

    let reconciler = reconciler(&cluster);
    let outcome = reconciler.reconcile(&app("blog"), &formation("web", 1)).await.unwrap();
    assert!(outcome.is_noop());
    assert!(cluster.requests().await.is_empty());

    seed(&cluster, "h2", "blog-web.v1.abc").await;
    let outcome = reconciler.reconcile(&app("blog"), &formation("web", 1)).await.unwrap();
    let stopped: Vec<String> = outcome.stopped.iter().map(ToString::to_string).collect();
    assert_eq!(stopped, vec!["blog-web.abc="]);
    assert_eq!(
        counts(&cluster, "blog", "web").await,
        BTreeMap::from([("h2".to_string(), 1)])
    );
}

#[tokio::test]
async fn test_quantity_limit() {
    let cluster = two_hosts();
    let reconciler = reconciler(&cluster).with_max_quantity(2);

    let err = reconciler
        .reconcile(&app("blog"), &formation("web", 3))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::QuantityTooLarge { requested: 3, max: 2 }
    ));
    assert_eq!(cluster.state_calls(), 0);

    reconciler.reconcile(&app("blog"), &formation("web", 2)).await.unwrap();
    assert_eq!(counts(&cluster, "blog", "web").await.values().sum::<usize>(), 2);
}

#[tokio::test]
async fn test_matched_jobs_are_annotated_with_host() {
    let cluster = two_hosts();
    seed(&cluster, "h2", "blog-web.a").await;

    let kind = JobKind::Formation(FormationType::new("web").unwrap());
    let matched = cluster.snapshot().await.matching_jobs(&app("blog"), &kind);
    assert_eq!(matched[0].1.attributes[HOST_ID_ATTRIBUTE], "h2");
}

#[tokio::test]
async fn test_already_gone_is_not_fatal() {
    let cluster = two_hosts();
    seed(&cluster, "h1", "blog-web.a").await;
    seed(&cluster, "h2", "blog-web.b").await;

    // A runtime that knows none of the jobs reports them as already gone.
    let runtime = Arc::new(InMemoryCluster::with_hosts([host("h1"), host("h2")]));
    let reconciler = reconciler_with(cluster.clone(), runtime, Arc::new(RoundRobin));

    let outcome = reconciler.reconcile(&app("blog"), &formation("web", 0)).await.unwrap();
    assert!(outcome.stopped.is_empty());
    assert_eq!(outcome.already_gone.len(), 2);
}

#[tokio::test]
async fn test_stop_failure_aborts() {
    let cluster = two_hosts();
    seed(&cluster, "h1", "blog-web.a").await;
    seed(&cluster, "h2", "blog-web.b").await;
    cluster.set_fail_stops(true);

    let err = reconciler(&cluster)
        .reconcile(&app("blog"), &formation("web", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Stop { ref job_id, .. } if job_id.to_string() == "blog-web.a"));
    assert_eq!(cluster.stop_calls(), 1);
}

#[tokio::test]
async fn test_schedule_rejection_fails() {
    let cluster = two_hosts();
    cluster.set_reject_schedules(true);

    let err = reconciler(&cluster)
        .reconcile(&app("blog"), &formation("web", 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Schedule(SchedulerError::Rejected)));
    assert!(counts(&cluster, "blog", "web").await.is_empty());
}

#[tokio::test]
async fn test_state_failure_fails() {
    let cluster = two_hosts();
    cluster.set_fail_state(true);

    let err = reconciler(&cluster)
        .reconcile(&app("blog"), &formation("web", 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::State(_)));
    assert!(cluster.requests().await.is_empty());
}

#[tokio::test]
async fn test_no_hosts() {
    let cluster = Arc::new(InMemoryCluster::default());
    let err = reconciler(&cluster)
        .reconcile(&app("blog"), &formation("web", 2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Placement(PlacementError::NoHosts { requested: 2 })
    ));

    // Nothing to do needs no hosts.
    let outcome = reconciler(&cluster)
        .reconcile(&app("blog"), &formation("web", 0))
        .await
        .unwrap();
    assert!(outcome.is_noop());
}

#[tokio::test]
async fn test_least_loaded_placement() {
    let cluster = two_hosts();
    seed(&cluster, "h1", "other-web.a").await;
    seed(&cluster, "h1", "other-web.b").await;

    let reconciler = reconciler_with(cluster.clone(), cluster.clone(), Arc::new(LeastLoaded));
    reconciler.reconcile(&app("blog"), &formation("web", 3)).await.unwrap();

    // Loads [2, 0] -> h2, h2, then a tie broken towards h1.
    assert_eq!(
        counts(&cluster, "blog", "web").await,
        BTreeMap::from([("h1".to_string(), 1), ("h2".to_string(), 2)])
    );
}

#[tokio::test]
async fn test_concurrent_reconciles_of_one_formation_do_not_overshoot() {
    let cluster = two_hosts();
    let reconciler = Arc::new(reconciler(&cluster));

    let a = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.reconcile(&app("blog"), &formation("web", 3)).await }
    });
    let b = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.reconcile(&app("blog"), &formation("web", 3)).await }
    });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(counts(&cluster, "blog", "web").await.values().sum::<usize>(), 3);
}
