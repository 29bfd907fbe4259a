//! ---
//! tether_section: "15-testing-qa-runbook"
//! tether_subsection: "integration-tests"
//! tether_type: "source"
//! tether_scope: "code"
//! tether_description: "Integration and validation tests for the Tether client stack."
//! tether_version: "v0.0.0-prealpha"
//! tether_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tether_common::ClientConfig;
use tether_core::{App, Client, ObjectSpec, Reference};
use tether_proto::mock::MockBackend;
use tether_proto::{ImageDefinition, LogEntry, Namespace, SecretDefinition};

fn mock_client() -> (Arc<MockBackend>, Client) {
    let backend = Arc::new(MockBackend::new());
    let client = Client::new(backend.clone());
    (backend, client)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cross_app_reference_layers_over_placeholder_and_resolves() {
    let (_backend, client) = mock_client();

    let producer = App::named("producer");
    producer.queue("jobs").expect("register queue");
    producer
        .deploy(Some("job-source"), Namespace::Account, &client)
        .await
        .expect("deploy producer");

    let consumer = App::named("consumer");
    // A placeholder queue, later layered over with a cross-app reference
    // pointing at the producer's published object.
    consumer.queue("jobs").expect("register placeholder");
    consumer
        .insert(
            "jobs",
            ObjectSpec::Reference(Reference::deployed(
                "job-source",
                Some("jobs".to_owned()),
                Namespace::Account,
            )),
        )
        .expect("layer cross-app reference");

    consumer
        .run(&client, |running| async move {
            let handle = running.object("jobs").expect("resolved alias");
            assert_eq!(handle.object_id().as_str(), "qu-1");
            Ok(())
        })
        .await
        .expect("run consumer");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn growing_a_deployment_keeps_existing_identities() {
    let (backend, client) = mock_client();

    let v1 = App::named("pipeline");
    v1.queue("ingest").expect("register");
    v1.deploy(Some("pipeline"), Namespace::Account, &client)
        .await
        .expect("deploy v1");
    let app_id = v1.app_id().expect("app id");
    let before = backend.published_objects(&app_id).expect("published");
    let ingest_id = before.get("ingest").cloned().expect("ingest id");

    // Same deployment with one more tag: unchanged tags keep their
    // identities, the new tag gets a fresh one.
    let v2 = App::named("pipeline");
    v2.queue("ingest").expect("register");
    v2.queue("results").expect("register");
    v2.deploy(Some("pipeline"), Namespace::Account, &client)
        .await
        .expect("deploy v2");

    let after = backend.published_objects(&app_id).expect("published");
    assert_eq!(after.get("ingest"), Some(&ingest_id));
    let results_id = after.get("results").expect("new tag created");
    assert_ne!(results_id, &ingest_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_graph_run_with_log_stream() {
    let (backend, client) = mock_client();
    backend.push_log(LogEntry {
        entry_id: "le-1".to_owned(),
        task_id: Some("ta-1".to_owned()),
        line: "hello from the worker\n".to_owned(),
    });

    let config = ClientConfig {
        sync_entrypoint: true,
        ..ClientConfig::default()
    };
    let app = App::with_config(Some("graph".to_owned()), config);
    let image = app
        .image("base", ImageDefinition::debian_slim())
        .expect("register image");
    let secret = app
        .secret("api-key", SecretDefinition::default())
        .expect("register secret");
    app.function(
        "handler",
        "worker.handler",
        tether_core::FunctionConfig::new()
            .image(image)
            .secret(secret),
    )
    .expect("register function");

    app.run(&client, |running| async move {
        for tag in ["base", "api-key", "handler"] {
            assert!(running.object(tag).is_some(), "{tag} must be live");
        }
        Ok(())
    })
    .await
    .expect("run");

    let app_id = app.app_id().expect("app id");
    let published = backend.published_objects(&app_id).expect("published");
    // The three explicit tags plus the client support mount; the explicit
    // image suppresses the shared default.
    assert_eq!(published.len(), 4);
    assert!(published.contains_key("handler"));
    assert!(published.contains_key("_client_mount"));
    assert!(!published.contains_key("_image"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_forever_honours_the_configured_timeout() {
    let (_backend, client) = mock_client();
    let config = ClientConfig {
        run_forever_timeout: Some(Duration::from_millis(0)),
        ..ClientConfig::default()
    };
    let app = App::with_config(Some("headless".to_owned()), config);
    app.queue("beat").expect("register");

    tokio::time::timeout(Duration::from_secs(30), app.run_forever(&client))
        .await
        .expect("run_forever returns once the timeout elapses")
        .expect("run succeeds");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reused_app_value_runs_multiple_cycles() {
    let (backend, client) = mock_client();
    let app = App::named("cycler");
    app.queue("q").expect("register");

    for _ in 0..2 {
        app.run(&client, |running| async move {
            assert!(running.object("q").is_some());
            Ok(())
        })
        .await
        .expect("run cycle");
        assert_eq!(app.state(), tether_core::AppState::None);
    }

    // Two plain runs acquire two distinct application identities.
    let creates = backend
        .requests()
        .iter()
        .filter(|req| matches!(req, tether_proto::mock::RecordedRequest::AppCreate(_)))
        .count();
    assert_eq!(creates, 2);
    assert_eq!(app.app_id(), Some(tether_proto::AppId::new("ap-2")));
}
