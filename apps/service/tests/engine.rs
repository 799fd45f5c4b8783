mod common;

use std::time::{Duration, Instant};

use uppe_sentinel::database::models::{Resource, ResourceType};
use uppe_sentinel::monitoring::{CheckStatus, TransitionKind};
use uppe_sentinel::notify::AlertKind;

use common::{closed_port, engine, http_server};

#[tokio::test]
async fn healthy_http_endpoint_is_recorded_up() {
    let engine = engine().await;
    let addr = http_server(200).await;
    let resource = Resource::new("homepage", format!("http://{addr}/"), ResourceType::Http);
    engine.database.save_resource(&resource).await.unwrap();

    let report = engine.orchestrator.run_once().await.unwrap();

    assert_eq!(report.up, 1);
    let checks = engine.database.get_recent_checks(resource.id, 5).await.unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].status, CheckStatus::Up);
    assert!(checks[0].response_time_ms.unwrap() > 0.0);
    assert!(checks[0].error_message.is_none());
}

#[tokio::test]
async fn closed_tcp_port_is_down_within_timeout() {
    let engine = engine().await;
    let port = closed_port().await;
    let resource = Resource::new("postgres", format!("tcp://127.0.0.1:{port}"), ResourceType::Tcp)
        .with_timeout_ms(1_000);
    engine.database.save_resource(&resource).await.unwrap();

    let start = Instant::now();
    let report = engine.orchestrator.run_once().await.unwrap();

    assert!(start.elapsed() < Duration::from_millis(1_500));
    assert_eq!(report.down, 1);
    let checks = engine.database.get_recent_checks(resource.id, 5).await.unwrap();
    assert!(checks[0].error_message.is_some());
}

#[tokio::test]
async fn three_failures_open_one_incident_with_one_alert() {
    let engine = engine().await;
    let mut events = engine.orchestrator.subscribe();
    let port = closed_port().await;
    let mut resource = Resource::new("cache", format!("127.0.0.1:{port}"), ResourceType::Tcp).with_timeout_ms(1_000);
    resource.consecutive_failures_threshold = 3;
    engine.database.save_resource(&resource).await.unwrap();

    for _ in 0..5 {
        engine.orchestrator.run_once().await.unwrap();
    }

    let open = engine.database.get_open_incident(resource.id).await.unwrap();
    assert!(open.is_some());

    let sent = engine.transport.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, AlertKind::IncidentStarted);
    assert_eq!(sent[0].incident_id, open.map(|incident| incident.id));

    let event = events.try_recv().unwrap();
    assert_eq!(event.transition, TransitionKind::Started);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn one_check_per_enabled_resource_per_tick() {
    let engine = engine().await;
    let addr = http_server(200).await;
    let port = closed_port().await;

    let resources = vec![
        Resource::new("a", format!("http://{addr}/a"), ResourceType::Http),
        Resource::new("b", format!("http://{addr}/b"), ResourceType::Health),
        Resource::new("c", format!("127.0.0.1:{port}"), ResourceType::Tcp).with_timeout_ms(1_000),
    ];
    for resource in &resources {
        engine.database.save_resource(resource).await.unwrap();
    }

    for tick in 1..=2 {
        let report = engine.orchestrator.run_once().await.unwrap();
        assert_eq!(report.checked, 3);
        for resource in &resources {
            let checks = engine.database.get_recent_checks(resource.id, 10).await.unwrap();
            assert_eq!(checks.len(), tick);
        }
    }
}

#[tokio::test]
async fn stats_reflect_recorded_checks() {
    let engine = engine().await;
    let addr = http_server(200).await;
    let resource = Resource::new("api", format!("http://{addr}/health"), ResourceType::Health);
    engine.database.save_resource(&resource).await.unwrap();

    for _ in 0..4 {
        engine.orchestrator.run_once().await.unwrap();
    }

    let stats = engine.orchestrator.get_resource_stats(resource.id, 24).await.unwrap();
    assert_eq!(stats.total_checks, 4);
    assert_eq!(stats.uptime_percentage, 100.0);
    assert!(stats.p95_response_time_ms.is_some());
    assert_eq!(stats.incident_count, 0);

    let sla = engine.orchestrator.get_sla_report(resource.id, 30).await.unwrap();
    assert!(sla.sla_met);

    let history = engine.orchestrator.get_resource_history(resource.id, 24).await.unwrap();
    assert_eq!(history.iter().map(|bucket| bucket.total_checks).sum::<u64>(), 4);
}
