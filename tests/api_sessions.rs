//! HTTP control surface driven over a real socket.

use std::io::{BufRead, BufReader};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use sitewatch::api::{ApiConfig, ApiServer};
use sitewatch::monitor::MonitorConfig;
use sitewatch::recognize::{
    HazardRecognizer, Observation, RegulationMapper, ScriptedRecognizer, StaticMapper, Severity,
};
use sitewatch::ticket::SimulatedTicketFiler;
use sitewatch::{BroadcastRegistry, CollaboratorFactory, InMemorySessionStore, MonitorManager};

struct ScriptedFactory {
    severity: Severity,
}

impl CollaboratorFactory for ScriptedFactory {
    fn recognizer(&self) -> Box<dyn HazardRecognizer> {
        Box::new(ScriptedRecognizer::new(vec![vec![Observation {
            observation: "Worker without a hard hat".to_string(),
            location: "scaffolding".to_string(),
            hazard_type: "PPE".to_string(),
            danger_description: "Worker exposed to head injury".to_string(),
        }]]))
    }

    fn mapper(&self) -> Box<dyn RegulationMapper> {
        Box::new(StaticMapper::new(self.severity))
    }
}

struct TestApi {
    base: String,
    handle: Option<sitewatch::api::ApiHandle>,
    _data_dir: tempfile::TempDir,
}

impl TestApi {
    fn spawn(severity: Severity, pacing: Duration) -> Self {
        let data_dir = tempfile::tempdir().expect("temp data dir");
        let manager = Arc::new(MonitorManager::new(
            MonitorConfig {
                pacing,
                data_dir: data_dir.path().to_path_buf(),
                ..MonitorConfig::default()
            },
            Arc::new(Mutex::new(InMemorySessionStore::new())),
            Arc::new(BroadcastRegistry::new()),
            Arc::new(ScriptedFactory { severity }),
            Arc::new(Mutex::new(SimulatedTicketFiler)),
        ));
        let handle = ApiServer::new(
            ApiConfig {
                addr: "127.0.0.1:0".to_string(),
            },
            manager,
        )
        .spawn()
        .expect("spawn api");
        Self {
            base: format!("http://{}", handle.addr),
            handle: Some(handle),
            _data_dir: data_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn poll_session_state(&self, id: &str, wanted: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let session: Value = ureq::get(&self.url(&format!("/sessions/{id}")))
                .call()
                .expect("get session")
                .into_json()
                .expect("session json");
            if session["state"] == wanted {
                return session;
            }
            assert!(
                Instant::now() < deadline,
                "session {id} never reached state {wanted}, last: {session}"
            );
            std::thread::sleep(Duration::from_millis(25));
        }
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop().expect("stop api");
        }
    }
}

#[test]
fn session_lifecycle_over_http() {
    let api = TestApi::spawn(Severity::Critical, Duration::ZERO);

    let health: Value = ureq::get(&api.url("/health"))
        .call()
        .expect("health")
        .into_json()
        .expect("health json");
    assert_eq!(health["status"], "ok");

    let created = ureq::post(&api.url("/sessions"))
        .send_json(serde_json::json!({
            "source_path": "stub://yard?fps=30&frames=900",
            "analysis_interval_seconds": 5.0,
            "auto_ticket": true
        }))
        .expect("create session");
    assert_eq!(created.status(), 201);
    let session: Value = created.into_json().expect("session json");
    let id = session["id"].as_str().expect("session id").to_string();
    assert_eq!(session["state"], "pending");

    let completed = api.poll_session_state(&id, "completed");
    assert_eq!(completed["violation_count"], 1);

    // The auto-filed ticket is attached out-of-band; give it a moment.
    let deadline = Instant::now() + Duration::from_secs(5);
    let violations = loop {
        let violations: Value = ureq::get(&api.url(&format!("/sessions/{id}/violations")))
            .call()
            .expect("violations")
            .into_json()
            .expect("violations json");
        if violations[0]["ticket_id"].is_string() {
            break violations;
        }
        assert!(Instant::now() < deadline, "ticket never attached: {violations}");
        std::thread::sleep(Duration::from_millis(25));
    };
    assert_eq!(violations.as_array().map(Vec::len), Some(1));
    assert_eq!(violations[0]["severity"], "CRITICAL");
    assert_eq!(violations[0]["alert_id"], format!("{id}_1"));
    assert!(violations[0]["ticket_id"]
        .as_str()
        .unwrap()
        .starts_with("SAFETY-"));

    let listing: Value = ureq::get(&api.url("/sessions"))
        .call()
        .expect("list sessions")
        .into_json()
        .expect("listing json");
    assert!(listing
        .as_array()
        .unwrap()
        .iter()
        .any(|s| s["id"] == id.as_str()));

    // The session already retired, so its controls are gone.
    let paused = ureq::post(&api.url(&format!("/sessions/{id}/pause")))
        .send_string("")
        .expect_err("pause after completion");
    match paused {
        ureq::Error::Status(status, _) => assert_eq!(status, 404),
        other => panic!("unexpected error: {other}"),
    }

    let missing = ureq::get(&api.url("/sessions/does-not-exist"))
        .call()
        .expect_err("unknown session");
    match missing {
        ureq::Error::Status(status, _) => assert_eq!(status, 404),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn bad_session_requests_are_rejected() {
    let api = TestApi::spawn(Severity::Medium, Duration::ZERO);

    let err = ureq::post(&api.url("/sessions"))
        .send_json(serde_json::json!({ "source_path": "" }))
        .expect_err("empty source path");
    match err {
        ureq::Error::Status(status, _) => assert_eq!(status, 400),
        other => panic!("unexpected error: {other}"),
    }

    let err = ureq::post(&api.url("/sessions"))
        .send_string("not json")
        .expect_err("malformed body");
    match err {
        ureq::Error::Status(status, _) => assert_eq!(status, 400),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn event_stream_delivers_the_terminal_message() {
    // Slow the walk down enough to subscribe before the session ends.
    let api = TestApi::spawn(Severity::High, Duration::from_millis(2));

    let session: Value = ureq::post(&api.url("/sessions"))
        .send_json(serde_json::json!({
            "source_path": "stub://yard?fps=30&frames=450",
            "analysis_interval_seconds": 5.0
        }))
        .expect("create session")
        .into_json()
        .expect("session json");
    let id = session["id"].as_str().expect("session id").to_string();

    let stream = ureq::get(&api.url(&format!("/sessions/{id}/events")))
        .call()
        .expect("open event stream");
    assert_eq!(stream.header("Content-Type"), Some("application/x-ndjson"));

    let mut reader = BufReader::new(stream.into_reader());
    let mut saw_completed = false;
    let mut line = String::new();
    while reader.read_line(&mut line).expect("read event line") > 0 {
        let event: Value = serde_json::from_str(line.trim()).expect("event json");
        assert!(event["type"].is_string());
        if event["type"] == "completed" {
            assert_eq!(event["data"]["session_id"], id.as_str());
            saw_completed = true;
            break;
        }
        line.clear();
    }
    assert!(saw_completed, "stream closed without a terminal message");
}
