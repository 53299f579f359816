//! End-to-end API tests over the in-memory store.
//!
//! Drives a batch from creation to completion the way an operator and a
//! worker would: through HTTP only, with the progress pass run by hand.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ferry_id::InstanceId;
use ferry_orchestrator::{
    api,
    db::MemoryStore,
    engine::{BatchDefaults, Engine, MockProvisioner},
    state::AppState,
};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

struct Harness {
    base_url: String,
    client: reqwest::Client,
    engine: Engine,
    provisioner: Arc<MockProvisioner>,
}

impl Harness {
    async fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,ferry_orchestrator=debug".into()),
            )
            .with_test_writer()
            .try_init();

        let provisioner = Arc::new(MockProvisioner::new());
        let engine = Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(BatchDefaults),
            provisioner.clone(),
        );
        let app = api::create_router(AppState::new(engine.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            engine,
            provisioner,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, req: reqwest::RequestBuilder, expected: StatusCode) -> Value {
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        assert_eq!(status, expected, "unexpected status, body: {text}");
        if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap()
        }
    }

    async fn post(&self, path: &str, body: Value, expected: StatusCode) -> Value {
        self.send(self.client.post(self.url(path)).json(&body), expected)
            .await
    }

    async fn put(&self, path: &str, body: Value, expected: StatusCode) -> Value {
        self.send(self.client.put(self.url(path)).json(&body), expected)
            .await
    }

    async fn get(&self, path: &str, expected: StatusCode) -> Value {
        self.send(self.client.get(self.url(path)), expected).await
    }

    async fn seed(&self, vms: &[(&str, bool)]) -> Vec<InstanceId> {
        self.post(
            "/v1/sources",
            json!({
                "name": "vcenter01",
                "source_type": "vmware",
                "connection": { "endpoint": "https://vcenter01.example", "insecure": true }
            }),
            StatusCode::CREATED,
        )
        .await;

        let mut ids = Vec::new();
        for (name, background_import) in vms {
            let body = self
                .post(
                    "/v1/instances",
                    json!({
                        "source": "vcenter01",
                        "properties": {
                            "name": name,
                            "location": format!("/dc1/vm/web/{name}"),
                            "os": "Ubuntu",
                            "os_version": "22.04",
                            "cpus": 2,
                            "memory": 4096,
                            "background_import": background_import
                        }
                    }),
                    StatusCode::CREATED,
                )
                .await;
            ids.push(InstanceId::parse(body["uuid"].as_str().unwrap()).unwrap());
        }
        ids
    }

    async fn command(&self, id: InstanceId) -> String {
        let secret = self.provisioner.secret_for(id).unwrap();
        let body = self
            .get(
                &format!("/v1/queue/{id}/worker/command?secret={secret}"),
                StatusCode::OK,
            )
            .await;
        body["command"].as_str().unwrap().to_string()
    }

    async fn report(&self, id: InstanceId, status: &str) -> Value {
        let secret = self.provisioner.secret_for(id).unwrap();
        self.put(
            &format!("/v1/queue/{id}/worker/status?secret={secret}"),
            json!({ "status": status, "status_message": format!("worker says {status}") }),
            StatusCode::OK,
        )
        .await
    }
}

#[tokio::test]
async fn test_full_migration_flow() {
    let h = Harness::new().await;
    let ids = h.seed(&[("web01", true), ("db01", true)]).await;

    let batch = h
        .post(
            "/v1/batches",
            json!({
                "name": "web",
                "target": "incus01",
                "include_expression": r#"path_base(location) startsWith "web""#
            }),
            StatusCode::CREATED,
        )
        .await;
    assert_eq!(batch["status"], "defined");

    let members = h.get("/v1/batches/web/instances", StatusCode::OK).await;
    assert_eq!(members.as_array().unwrap().len(), 1);
    assert_eq!(members[0]["uuid"], ids[0].to_string());

    let now = Utc::now();
    h.put(
        "/v1/batches/web/windows",
        json!([{
            "name": "w1",
            "start": (now + Duration::hours(1)).to_rfc3339(),
            "end": (now + Duration::hours(2)).to_rfc3339()
        }]),
        StatusCode::OK,
    )
    .await;

    let started = h
        .post("/v1/batches/web/start", json!({}), StatusCode::OK)
        .await;
    assert_eq!(started["status"], "running");

    h.engine.advance().await.unwrap();
    let queue = h.get("/v1/queue?batch=web", StatusCode::OK).await;
    assert_eq!(queue[0]["status"], "idle");
    assert!(queue[0].get("secret").is_none());

    assert_eq!(h.command(ids[0]).await, "import_disks");
    let entry = h.report(ids[0], "success").await;
    assert_eq!(entry["status"], "idle");
    assert_eq!(entry["needs_disk_import"], false);

    // Window has not started yet
    assert_eq!(h.command(ids[0]).await, "idle");
    let queue = h.get(&format!("/v1/queue/{}", ids[0]), StatusCode::OK).await;
    assert!(queue["last_worker_contact"].is_string());

    // Open the window: start may move earlier, end later
    h.put(
        "/v1/batches/web/windows",
        json!([{
            "name": "w1",
            "start": (now - Duration::minutes(5)).to_rfc3339(),
            "end": (now + Duration::hours(3)).to_rfc3339()
        }]),
        StatusCode::OK,
    )
    .await;

    assert_eq!(h.command(ids[0]).await, "finalize_import");
    let entry = h.report(ids[0], "running").await;
    assert_eq!(entry["status"], "final_import");
    assert_eq!(entry["window"], "w1");

    let entry = h.report(ids[0], "success").await;
    assert_eq!(entry["status"], "import_complete");

    h.engine.advance().await.unwrap();
    let batch = h.get("/v1/batches/web", StatusCode::OK).await;
    assert_eq!(batch["status"], "finished");

    let vm = h.get(&format!("/v1/instances/{}", ids[0]), StatusCode::OK).await;
    assert_eq!(vm["status"], "import_complete");
    assert_eq!(vm["status_message"], "Migration finished");

    let db = h.get(&format!("/v1/instances/{}", ids[1]), StatusCode::OK).await;
    assert_eq!(db["status"], "not_assigned");
}

#[tokio::test]
async fn test_in_use_window_cannot_shrink() {
    let h = Harness::new().await;
    let ids = h.seed(&[("web01", false)]).await;
    h.post(
        "/v1/batches",
        json!({ "name": "web", "target": "incus01", "include_expression": "true" }),
        StatusCode::CREATED,
    )
    .await;

    let now = Utc::now();
    let start = (now - Duration::minutes(5)).to_rfc3339();
    let end = (now + Duration::hours(2)).to_rfc3339();
    h.put(
        "/v1/batches/web/windows",
        json!([{ "name": "w1", "start": start, "end": end, "capacity": 2 }]),
        StatusCode::OK,
    )
    .await;
    h.post("/v1/batches/web/start", json!({}), StatusCode::OK)
        .await;
    h.engine.advance().await.unwrap();
    assert_eq!(h.command(ids[0]).await, "finalize_import");

    let shorter = (now + Duration::hours(1)).to_rfc3339();
    let problem = h
        .put(
            "/v1/batches/web/windows",
            json!([{ "name": "w1", "start": start, "end": shorter, "capacity": 2 }]),
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(problem["code"], "not_permitted");

    h.put(
        "/v1/batches/web/windows",
        json!([{ "name": "w1", "start": start, "end": end, "capacity": 1 }]),
        StatusCode::CONFLICT,
    )
    .await;
    h.put("/v1/batches/web/windows", json!([]), StatusCode::CONFLICT)
        .await;

    let later = (now + Duration::hours(4)).to_rfc3339();
    h.put(
        "/v1/batches/web/windows",
        json!([{ "name": "w1", "start": start, "end": later, "capacity": 0 }]),
        StatusCode::OK,
    )
    .await;
}

#[tokio::test]
async fn test_error_responses() {
    let h = Harness::new().await;
    let ids = h.seed(&[("web01", true)]).await;

    let problem = h
        .post(
            "/v1/batches",
            json!({ "name": "bad", "target": "incus01", "include_expression": "cpus + 1" }),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(problem["code"], "validation_failed");
    assert_eq!(problem["status"], 400);

    h.get("/v1/instances/not-a-uuid", StatusCode::BAD_REQUEST)
        .await;
    h.get(
        &format!("/v1/instances/{}", InstanceId::new()),
        StatusCode::NOT_FOUND,
    )
    .await;

    h.post(
        "/v1/batches",
        json!({ "name": "web", "target": "incus01", "include_expression": "true" }),
        StatusCode::CREATED,
    )
    .await;
    h.post(
        "/v1/batches",
        json!({ "name": "web", "target": "incus01", "include_expression": "true" }),
        StatusCode::CONFLICT,
    )
    .await;
    h.post("/v1/batches/web/stop", json!({}), StatusCode::CONFLICT)
        .await;

    h.post("/v1/batches/web/start", json!({}), StatusCode::OK)
        .await;
    h.engine.advance().await.unwrap();

    let wrong = InstanceId::new();
    let problem = h
        .get(
            &format!("/v1/queue/{}/worker/command?secret={wrong}", ids[0]),
            StatusCode::FORBIDDEN,
        )
        .await;
    assert_eq!(problem["code"], "invalid_secret");

    h.send(
        h.client.delete(h.url(&format!("/v1/instances/{}", ids[0]))),
        StatusCode::CONFLICT,
    )
    .await;
    h.send(h.client.delete(h.url("/v1/batches/web")), StatusCode::CONFLICT)
        .await;
}

#[tokio::test]
async fn test_instance_overrides_and_disable() {
    let h = Harness::new().await;
    let ids = h.seed(&[("web01", true)]).await;
    h.post(
        "/v1/batches",
        json!({ "name": "debian", "target": "incus01", "include_expression": r#"os == "Debian""# }),
        StatusCode::CREATED,
    )
    .await;

    let unassigned = h.get("/v1/instances?unassigned=true", StatusCode::OK).await;
    assert_eq!(unassigned.as_array().unwrap().len(), 1);

    let vm = h
        .put(
            &format!("/v1/instances/{}/overrides", ids[0]),
            json!({ "os": "Debian" }),
            StatusCode::OK,
        )
        .await;
    assert_eq!(vm["batch"], "debian");
    assert_eq!(vm["status"], "assigned_to_batch");

    let vm = h
        .post(
            &format!("/v1/instances/{}/disable", ids[0]),
            json!({}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(vm["status"], "user_disabled");
    assert!(vm["batch"].is_null());

    let vm = h
        .post(
            &format!("/v1/instances/{}/enable", ids[0]),
            json!({}),
            StatusCode::OK,
        )
        .await;
    assert_eq!(vm["batch"], "debian");

    let listed = h
        .get("/v1/instances?status=assigned_to_batch", StatusCode::OK)
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
