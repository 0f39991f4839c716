//! Integration tests for MACC
//!
//! CLI behaviour through the built binary, plus full session lifecycles
//! through the public library API and a live HTTP listener.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a macc Command with no ambient overrides
fn macc() -> Command {
    let mut cmd = cargo_bin_cmd!("macc");
    for var in ["PORT", "MACC_MODEL", "MACC_STORAGE_BACKEND", "MACC_LOG_FORMAT"] {
        cmd.env_remove(var);
    }
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_macc_help() {
        macc()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn test_macc_version() {
        macc()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        macc().arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Config Command Tests
// =============================================================================

mod config_commands {
    use super::*;

    #[test]
    fn test_config_init_writes_defaults() {
        let dir = TempDir::new().unwrap();

        macc()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created macc.toml"));

        let content = fs::read_to_string(dir.path().join("macc.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("port = 8000"));
        assert!(content.contains("[pipeline]"));
    }

    #[test]
    fn test_config_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("macc.toml"), "[server]\nport = 9000\n").unwrap();

        macc()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));

        macc()
            .current_dir(dir.path())
            .args(["config", "init", "--force"])
            .assert()
            .success();
        let content = fs::read_to_string(dir.path().join("macc.toml")).unwrap();
        assert!(content.contains("port = 8000"));
    }

    #[test]
    fn test_config_show_reads_file_and_env() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("macc.toml"),
            "[server]\nport = 9000\n\n[generation]\nmodel = \"from-file\"\n",
        )
        .unwrap();

        macc()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9000"))
            .stdout(predicate::str::contains("from-file"));

        macc()
            .current_dir(dir.path())
            .env("PORT", "9100")
            .env("MACC_MODEL", "from-env")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9100"))
            .stdout(predicate::str::contains("from-env"));
    }

    #[test]
    fn test_config_show_without_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        macc()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("port = 8000"));
    }

    #[test]
    fn test_config_custom_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        macc()
            .args(["--config", path.to_str().unwrap(), "config", "init"])
            .assert()
            .success();
        assert!(path.exists());
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("macc.toml"),
            "[pipeline]\nworker_pool_size = 0\n",
        )
        .unwrap();
        macc()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("worker_pool_size"));
    }

    #[test]
    fn test_config_rejects_bad_env_override() {
        let dir = TempDir::new().unwrap();
        macc()
            .current_dir(dir.path())
            .env("MACC_STORAGE_BACKEND", "floppy")
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid storage backend"));
    }

    #[test]
    fn test_serve_without_api_key_fails_fast() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("macc.toml"),
            "[generation]\napi_key_env = \"MACC_TEST_MISSING_KEY\"\n",
        )
        .unwrap();
        macc()
            .current_dir(dir.path())
            .env_remove("MACC_TEST_MISSING_KEY")
            .args(["serve", "--storage", "memory"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("MACC_TEST_MISSING_KEY"));
    }
}

// =============================================================================
// Session Lifecycle Tests
// =============================================================================

mod lifecycle {
    use async_trait::async_trait;
    use macc::config::PipelineConfig;
    use macc::errors::{ServiceError, SessionError};
    use macc::orchestrator::Orchestrator;
    use macc::server::{AppState, build_router};
    use macc::service::GenerationService;
    use macc::session::{EventKind, Stage};
    use macc::storage::MemoryStorage;
    use std::sync::Arc;
    use std::time::Duration;

    /// Service whose coder output depends on the instructions it is given.
    struct Calculator;

    #[async_trait]
    impl GenerationService for Calculator {
        async fn plan(&self, _spec: &str) -> Result<Vec<String>, ServiceError> {
            Ok(vec!["add".into(), "subtract".into()])
        }

        async fn generate(&self, _spec: &str) -> Result<String, ServiceError> {
            Ok("def add(a, b):\n    return a + b\n".into())
        }

        async fn review(&self, artifact: &str, instructions: &str) -> Result<String, ServiceError> {
            if instructions.contains("subtract") {
                Ok(format!("{}\n\ndef sub(a, b):\n    return a - b\n", artifact.trim_end()))
            } else {
                Ok(artifact.to_string())
            }
        }
    }

    /// Service that never produces any code.
    struct Silent;

    #[async_trait]
    impl GenerationService for Silent {
        async fn plan(&self, _spec: &str) -> Result<Vec<String>, ServiceError> {
            Err(ServiceError::Request("planner offline".into()))
        }

        async fn generate(&self, _spec: &str) -> Result<String, ServiceError> {
            Ok(String::new())
        }

        async fn review(&self, _artifact: &str, _instructions: &str) -> Result<String, ServiceError> {
            Err(ServiceError::EmptyOutput)
        }
    }

    fn orchestrator(service: impl GenerationService + 'static, storage: Arc<MemoryStorage>) -> Orchestrator {
        Orchestrator::new(&PipelineConfig::default(), Arc::new(service), storage)
    }

    async fn settle(orch: &Orchestrator, id: &str) {
        for _ in 0..400 {
            if !orch.session(id).unwrap().is_locked() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session {} never settled", id);
    }

    #[tokio::test]
    async fn test_generate_refine_commit_roundtrip() {
        let storage = Arc::new(MemoryStorage::new());
        let orch = orchestrator(Calculator, storage.clone());

        let id = orch.generate("Build a calculator", None).unwrap();
        settle(&orch, &id).await;
        let poll = orch.poll(&id).unwrap();
        assert!(poll.done);
        assert_eq!(poll.messages.last().unwrap().kind, EventKind::Done);
        assert_eq!(
            poll.messages.iter().filter(|e| e.kind == EventKind::Done).count(),
            1
        );
        let session = orch.session(&id).unwrap();
        assert_eq!(session.stage(), Stage::Ready);
        assert_eq!(session.tasks, vec!["add", "subtract"]);
        assert!(session.repo.starts_with("build-a-calculator-"));

        orch.refine(&id, "also subtract").unwrap();
        settle(&orch, &id).await;
        assert!(orch.session(&id).unwrap().artifact.contains("def sub"));

        let url = orch.commit(&id).await.unwrap();
        let again = orch.commit(&id).await.unwrap();
        assert_eq!(url, again);
        assert_eq!(storage.revision_count(&session.repo, "main.py"), 1);

        assert!(matches!(
            orch.refine(&id, "more"),
            Err(SessionError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_silent_service_still_yields_committable_placeholder() {
        let storage = Arc::new(MemoryStorage::new());
        let orch = orchestrator(Silent, storage.clone());

        let id = orch.generate("Write a todo app", Some("todo")).unwrap();
        settle(&orch, &id).await;
        let session = orch.session(&id).unwrap();
        assert_eq!(session.stage(), Stage::Ready);
        assert!(macc::orchestrator::templates::is_fallback_stub(&session.artifact));
        assert!(session.tasks.is_empty());

        let url = orch.commit(&id).await.unwrap();
        assert_eq!(url, "memory://todo/main.py");
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let storage = Arc::new(MemoryStorage::new());
        let orch = orchestrator(Calculator, storage);

        let ids: Vec<_> = (0..5)
            .map(|i| orch.generate(&format!("Project number {}", i), None).unwrap())
            .collect();
        for id in &ids {
            settle(&orch, id).await;
            assert_eq!(orch.session(id).unwrap().stage(), Stage::Ready);
            let events = orch.poll(id).unwrap().messages;
            assert!(events.iter().all(|e| &e.session_id == id));
            let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    async fn test_http_api_over_tcp() {
        let orch = orchestrator(Calculator, Arc::new(MemoryStorage::new()));
        let app = build_router(Arc::new(AppState { orchestrator: orch }), false);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let created: serde_json::Value = client
            .post(format!("{}/generate-project", base))
            .json(&serde_json::json!({"spec": "Build a calculator"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["session_id"].as_str().unwrap().to_string();

        let mut done = false;
        for _ in 0..400 {
            let update: serde_json::Value = client
                .get(format!("{}/updates/{}", base, id))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if update["done"] == true {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(done);

        let resp = client
            .post(format!("{}/commit", base))
            .json(&serde_json::json!({"session_id": id}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        let url = body["url"].as_str().unwrap();
        assert!(url.starts_with("memory://build-a-calculator-"));
        assert!(url.ends_with("/main.py"));

        let resp = client
            .post(format!("{}/commit", base))
            .json(&serde_json::json!({"session_id": "missing"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }
}
