mod common;

use std::time::Duration;

use wharf_core::models::{DeploymentEvent, DeploymentRequest, Project, ProjectFilter, ProjectStatus};
use wharf_core::services::registry::{FileRegistry, ProjectRegistry};
use wharf_core::WharfError;

use common::{request, request_on_port, Harness};

async fn find_by_name(h: &Harness, name: &str) -> Project {
    let filter = ProjectFilter {
        name: Some(name.to_string()),
        ..Default::default()
    };
    let mut found = h.orchestrator.list_projects(&filter).await.unwrap();
    assert_eq!(found.len(), 1, "expected exactly one project named {name}");
    found.remove(0)
}

#[tokio::test]
async fn deploy_runs_project_on_preferred_port() {
    let h = Harness::new().await;
    let project = h
        .orchestrator
        .deploy_project(request_on_port("shop", 3005))
        .await
        .unwrap();

    assert_eq!(project.status, ProjectStatus::Running);
    assert_eq!(project.port, 3005);
    assert_eq!(project.branch, "main");
    assert!(project.last_error.is_none());
    assert!(project.id.starts_with("shop-"));

    let spec = h.runtime.last_spec(&project.id).unwrap();
    assert_eq!(spec.ports.host, 3005);
    assert_eq!(spec.environment.get("PORT").map(String::as_str), Some("3005"));

    let calls = h.fetcher.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, "main");
    assert!(calls[0]
        .2
        .ends_with(format!("workspaces/{}/source", project.id)));

    let stored = h.orchestrator.get_project_by_id(&project.id).await.unwrap();
    assert_eq!(stored, Some(project));
}

#[tokio::test]
async fn deploy_without_preference_takes_lowest_free_port() {
    let h = Harness::new().await;
    let first = h.orchestrator.deploy_project(request("one")).await.unwrap();
    let second = h.orchestrator.deploy_project(request("two")).await.unwrap();
    assert_eq!(first.port, 3000);
    assert_eq!(second.port, 3001);
}

#[tokio::test]
async fn taken_preferred_port_falls_back_to_scan() {
    let h = Harness::new().await;
    h.orchestrator
        .deploy_project(request_on_port("one", 3000))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .deploy_project(request_on_port("two", 3000))
        .await
        .unwrap();
    assert_eq!(second.port, 3001);
}

#[tokio::test]
async fn concurrent_deploys_never_share_a_port() {
    let h = Harness::new().await;
    let (a, b) = tokio::join!(
        h.orchestrator.deploy_project(request_on_port("alpha", 3000)),
        h.orchestrator.deploy_project(request_on_port("beta", 3000)),
    );
    let mut ports = vec![a.unwrap().port, b.unwrap().port];
    ports.sort();
    assert_eq!(ports, vec![3000, 3001]);
}

#[tokio::test]
async fn build_runs_only_with_build_command() {
    let h = Harness::new().await;
    h.orchestrator.deploy_project(request("plain")).await.unwrap();
    assert_eq!(h.runtime.build_count(), 0);

    let with_build = DeploymentRequest {
        build_command: Some("npm run build".into()),
        ..request("built")
    };
    h.orchestrator.deploy_project(with_build).await.unwrap();
    assert_eq!(h.runtime.build_count(), 1);
}

#[tokio::test]
async fn fetch_failure_leaves_error_record_and_frees_port() {
    let h = Harness::new().await;
    h.fetcher.fail_for("bad-url");
    let bad = DeploymentRequest {
        repository: "bad-url".into(),
        ..request_on_port("broken", 3000)
    };

    let err = h.orchestrator.deploy_project(bad).await.unwrap_err();
    assert!(matches!(err, WharfError::Fetch(_)));

    let project = find_by_name(&h, "broken").await;
    assert_eq!(project.status, ProjectStatus::Error);
    assert!(project.last_error.unwrap().contains("bad-url"));
    assert!(h.orchestrator.check_port_availability(3000).await.unwrap());
    assert_eq!(h.runtime.start_count(), 0);

    // The freed port goes to the next project.
    let next = h.orchestrator.deploy_project(request("next")).await.unwrap();
    assert_eq!(next.port, 3000);
}

#[tokio::test]
async fn build_failure_records_error() {
    let h = Harness::new().await;
    *h.runtime.fail_build.lock().unwrap() = true;
    let req = DeploymentRequest {
        build_command: Some("npm run build".into()),
        ..request("site")
    };

    let err = h.orchestrator.deploy_project(req).await.unwrap_err();
    assert!(matches!(err, WharfError::Build(_)));
    let project = find_by_name(&h, "site").await;
    assert_eq!(project.status, ProjectStatus::Error);
    assert_eq!(h.runtime.start_count(), 0);
    assert_eq!(h.orchestrator.get_port_statistics().await.unwrap().in_use, 0);
}

#[tokio::test]
async fn start_failure_tears_down_partial_group() {
    let h = Harness::new().await;
    *h.runtime.fail_start.lock().unwrap() = true;

    let err = h.orchestrator.deploy_project(request("api")).await.unwrap_err();
    assert!(matches!(err, WharfError::Runtime(_)));
    assert_eq!(h.runtime.stop_count(), 1);

    let project = find_by_name(&h, "api").await;
    assert_eq!(project.status, ProjectStatus::Error);
    assert!(h.orchestrator.check_port_availability(project.port).await.unwrap());
}

#[tokio::test]
async fn fetch_timeout_counts_as_fetch_failure() {
    let h = Harness::with_config(|config| config.timeouts.fetch_secs = 1).await;
    h.fetcher.set_delay(Duration::from_secs(3));

    let err = h.orchestrator.deploy_project(request("slow")).await.unwrap_err();
    match err {
        WharfError::Fetch(message) => assert!(message.contains("timed out")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(find_by_name(&h, "slow").await.status, ProjectStatus::Error);
}

#[tokio::test]
async fn duplicate_name_is_rejected_before_any_write() {
    let h = Harness::new().await;
    h.orchestrator.deploy_project(request("shop")).await.unwrap();

    let dup = DeploymentRequest {
        domain: "other.test".into(),
        ..request("shop")
    };
    let err = h.orchestrator.deploy_project(dup).await.unwrap_err();
    assert!(matches!(err, WharfError::Conflict(_)));
    assert_eq!(h.orchestrator.list_projects(&ProjectFilter::all()).await.unwrap().len(), 1);
    assert_eq!(h.fetcher.call_count(), 1);
}

#[tokio::test]
async fn duplicate_domain_is_rejected_case_insensitively() {
    let h = Harness::new().await;
    h.orchestrator.deploy_project(request("shop")).await.unwrap();

    let dup = DeploymentRequest {
        domain: "SHOP.test".into(),
        ..request("store")
    };
    let err = h.orchestrator.deploy_project(dup).await.unwrap_err();
    assert!(matches!(err, WharfError::Conflict(_)));
}

#[tokio::test]
async fn failed_project_still_blocks_its_name() {
    let h = Harness::new().await;
    h.fetcher.fail_for("bad-url");
    let bad = DeploymentRequest {
        repository: "bad-url".into(),
        ..request("shop")
    };
    h.orchestrator.deploy_project(bad).await.unwrap_err();

    let err = h.orchestrator.deploy_project(request("shop")).await.unwrap_err();
    assert!(matches!(err, WharfError::Conflict(_)));
}

#[tokio::test]
async fn port_exhaustion_writes_nothing() {
    let h = Harness::with_range(3000, 3000).await;
    h.orchestrator.deploy_project(request("only")).await.unwrap();

    let err = h.orchestrator.deploy_project(request("extra")).await.unwrap_err();
    assert!(matches!(
        err,
        WharfError::PortExhaustion {
            start: 3000,
            end: 3000
        }
    ));
    let all = h.orchestrator.list_projects(&ProjectFilter::all()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(h.fetcher.call_count(), 1);
}

#[tokio::test]
async fn invalid_request_is_rejected() {
    let h = Harness::new().await;
    let cases = [
        DeploymentRequest {
            name: String::new(),
            ..request("x")
        },
        DeploymentRequest {
            domain: "not a domain".into(),
            ..request("y")
        },
        DeploymentRequest {
            repository: "  ".into(),
            ..request("z")
        },
        request_on_port("w", 0),
    ];
    for case in cases {
        let err = h.orchestrator.deploy_project(case).await.unwrap_err();
        assert!(matches!(err, WharfError::Validation(_)), "got {err:?}");
    }
    assert!(h.orchestrator.list_projects(&ProjectFilter::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn deploy_emits_status_and_progress_events() {
    let h = Harness::new().await;
    let project = h.orchestrator.deploy_project(request("shop")).await.unwrap();

    let kinds = h.notifier.kinds_for(&project.id);
    assert!(kinds.contains(&"progress"));
    let changes: Vec<_> = h
        .notifier
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DeploymentEvent::StatusChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![(ProjectStatus::Deploying, ProjectStatus::Running)]);
}

#[tokio::test]
async fn registry_survives_reopen() {
    let h = Harness::new().await;
    let project = h.orchestrator.deploy_project(request("shop")).await.unwrap();

    let reopened = FileRegistry::open(&h.orchestrator.config().registry_path())
        .await
        .unwrap();
    assert_eq!(reopened.get(&project.id).await.unwrap(), Some(project));
}
