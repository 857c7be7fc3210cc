//! Tests for settings loading and per-turn settings resolution.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tempfile::TempDir;

use agent_thread::config::{AgentSettings, ApiFlavor, CONFIG_PATH_ENV};
use agent_thread::thread::{AgentClient, ThreadOptions, TurnOptions};

use common::*;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 7] = [
    CONFIG_PATH_ENV,
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_BASE_URL",
    "AGENT_THREAD_MODEL",
    "AGENT_THREAD_REASONING_MODEL",
    "AGENT_THREAD_MAX_TOKENS",
    "AGENT_THREAD_API_FLAVOR",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        for key in keys {
            std::env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

#[test]
fn load_reads_the_configured_file_then_the_environment() {
    let _lock = env_lock();
    let _guard = EnvGuard::capture(&CONFIG_ENV_VARS);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(
        &path,
        r#"
api_key = "file-key"
task_model = "claude-file"
max_retries = 4

[[subagents]]
id = "research"
name = "Researcher"
task_model = "claude-small"
"#,
    )
    .unwrap();

    std::env::set_var(CONFIG_PATH_ENV, &path);
    std::env::set_var("AGENT_THREAD_MODEL", "claude-env");
    std::env::set_var("AGENT_THREAD_API_FLAVOR", "responses");

    let settings = AgentSettings::load().unwrap();

    assert_eq!(settings.api_key.as_deref(), Some("file-key"));
    assert_eq!(settings.task_model, "claude-env");
    assert_eq!(settings.api_flavor, ApiFlavor::Responses);
    assert_eq!(settings.max_retries, 4);
    let research = settings.resolve_subagent(None, Some("researcher")).unwrap();
    assert_eq!(settings.model_for(Some(research), false), "claude-small");
}

#[test]
fn load_without_a_file_uses_defaults() {
    let _lock = env_lock();
    let _guard = EnvGuard::capture(&CONFIG_ENV_VARS);

    let dir = TempDir::new().unwrap();
    std::env::set_var(CONFIG_PATH_ENV, dir.path().join("missing.toml"));
    std::env::set_var("ANTHROPIC_API_KEY", "env-key");

    let settings = AgentSettings::load().unwrap();

    assert_eq!(settings.api_key.as_deref(), Some("env-key"));
    assert_eq!(settings.max_tokens, 1024);
}

#[tokio::test]
async fn settings_are_read_again_for_every_turn() {
    let transport = ScriptedTransport::new();
    transport.push_stream(vec![text("one")]);
    transport.push_stream(vec![text("two")]);

    let turns = Arc::new(AtomicUsize::new(0));
    let client = {
        let turns = turns.clone();
        AgentClient::from_provider(move || {
            let n = turns.fetch_add(1, Ordering::SeqCst);
            AgentSettings {
                task_model: format!("model-{n}"),
                max_tokens: 0,
                ..test_settings()
            }
        })
    }
    .with_transport(transport.clone())
    .with_retry(fast_retry());
    let thread = client.start_thread(ThreadOptions::default());

    thread.run("a", TurnOptions::default()).await.unwrap();
    thread.run("b", TurnOptions::default()).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].model, "model-0");
    assert_eq!(requests[1].model, "model-1");
    assert_eq!(requests[1].max_tokens, 1024);
}

#[tokio::test]
async fn per_turn_options_override_the_thread() {
    let transport = ScriptedTransport::new();
    transport.push_stream(vec![text("ok")]);
    let client = test_client(transport.clone());
    let thread = client.start_thread(ThreadOptions {
        model: Some("thread-model".into()),
        system_prompt: Some("thread prompt".into()),
        ..Default::default()
    });

    let turn = TurnOptions {
        options: ThreadOptions {
            model: Some("turn-model".into()),
            ..Default::default()
        },
        on_update: None,
    };
    thread.run("x", turn).await.unwrap();

    let request = &transport.requests()[0];
    assert_eq!(request.model, "turn-model");
    assert_eq!(request.system, "thread prompt");
}
