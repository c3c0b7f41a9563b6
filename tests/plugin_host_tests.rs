// ABOUTME: Integration tests for the plugin host against a real worker process (the stub_worker bin).
// ABOUTME: Covers handshake, tool routing, timeouts, crash repair, and the single-running restriction.

use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use switchyard::plugin::{PluginHost, PluginState};
use switchyard_core::config::PluginsConfig;
use switchyard_core::{Event, EventBus, EventKind, ToolRegistry, Topic};

fn stub_bin() -> String {
    env!("CARGO_BIN_EXE_stub_worker").to_string()
}

fn write_stub_bundle(root: &Path, name: &str, entry: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("plugin.toml"),
        format!(
            "name = \"{name}\"\nversion = \"0.1.0\"\ncommand = \"{}\"\nentry = \"{entry}\"\n",
            stub_bin()
        ),
    )
    .unwrap();
    fs::write(dir.join(entry), "stub entry").unwrap();
}

struct Fixture {
    _tmp: tempfile::TempDir,
    bus: Arc<EventBus>,
    registry: Arc<ToolRegistry>,
    host: Arc<PluginHost>,
    events: Arc<Mutex<Vec<Event>>>,
}

fn fixture_with(config: PluginsConfig, bundles: &[(&str, &str)]) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    for (name, entry) in bundles {
        write_stub_bundle(tmp.path(), name, entry);
    }
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(ToolRegistry::new());
    let host = Arc::new(PluginHost::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        tmp.path().to_path_buf(),
        &config,
    ));
    host.discover();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe(Topic::All, move |event| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(event);
            Ok(())
        }
    });

    Fixture {
        _tmp: tmp,
        bus,
        registry,
        host,
        events,
    }
}

fn fixture(bundles: &[(&str, &str)]) -> Fixture {
    fixture_with(PluginsConfig::default(), bundles)
}

fn event_kinds(events: &Arc<Mutex<Vec<Event>>>) -> Vec<EventKind> {
    events.lock().unwrap().iter().map(|e| e.kind).collect()
}

async fn invoke(registry: &ToolRegistry, tool: &str, args: Value) -> anyhow::Result<Value> {
    let entry = registry
        .get(tool)
        .ok_or_else(|| anyhow::anyhow!("tool '{}' not registered", tool))?;
    entry.handler.invoke(args, CancellationToken::new()).await
}

#[tokio::test]
async fn test_start_registers_announced_tools() {
    let f = fixture(&[("stub", "normal.txt")]);

    let tools = f.host.start("stub").await.unwrap();
    assert!(tools.contains(&"stub_echo".to_string()));
    assert!(f.registry.get("stub_echo").is_some());
    assert_eq!(f.host.info("stub").unwrap().state, PluginState::Running);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let kinds = event_kinds(&f.events);
    assert!(kinds.contains(&EventKind::PluginStarted));
    assert!(kinds.contains(&EventKind::PluginToolRegistered));

    f.host.stop("stub").await.unwrap();
}

#[tokio::test]
async fn test_echo_call_roundtrip() {
    let f = fixture(&[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();

    let out = invoke(&f.registry, "stub_echo", json!({"city": "Oslo"}))
        .await
        .unwrap();
    assert_eq!(out["echoed"]["city"], "Oslo");

    f.host.stop("stub").await.unwrap();
}

#[tokio::test]
async fn test_worker_error_result_becomes_handler_error() {
    let f = fixture(&[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();

    let error = invoke(&f.registry, "stub_fail", json!({})).await.unwrap_err();
    assert!(error.to_string().contains("stub failure"));

    f.host.stop("stub").await.unwrap();
}

#[tokio::test]
async fn test_call_timeout() {
    let config = PluginsConfig {
        call_timeout_secs: 1,
        ..PluginsConfig::default()
    };
    let f = fixture_with(config, &[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();

    let started = Instant::now();
    let error = invoke(&f.registry, "stub_sleep", json!({"millis": 5000}))
        .await
        .unwrap_err();
    assert!(error.to_string().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(3));

    f.host.stop("stub").await.unwrap();
}

// A plugin registers tools, serves a call, then its process dies: the tools
// must vanish from the registry and a later call must fail cleanly.
#[tokio::test]
async fn test_crash_isolation_end_to_end() {
    let f = fixture(&[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();

    let out = invoke(&f.registry, "stub_echo", json!({"n": 1})).await.unwrap();
    assert_eq!(out["echoed"]["n"], 1);

    // Kills the worker without answering.
    let error = invoke(&f.registry, "stub_exit", json!({"code": 3}))
        .await
        .unwrap_err();
    assert!(error.to_string().contains("crashed") || error.to_string().contains("went away"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.host.info("stub").unwrap().state, PluginState::Crashed);
    assert!(f.registry.get("stub_echo").is_none());
    assert!(invoke(&f.registry, "stub_echo", json!({})).await.is_err());

    let crashed: Vec<Event> = f
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind == EventKind::PluginCrashed)
        .cloned()
        .collect();
    assert_eq!(crashed.len(), 1);
    assert_eq!(crashed[0].payload["plugin"], "stub");

    // The bus itself keeps working.
    f.bus.publish(Event::new(EventKind::SystemStartup, json!({}), "test"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(event_kinds(&f.events).contains(&EventKind::SystemStartup));
}

#[tokio::test]
async fn test_crash_fails_pending_calls_promptly() {
    let config = PluginsConfig {
        call_timeout_secs: 30,
        ..PluginsConfig::default()
    };
    let f = fixture_with(config, &[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();

    let registry = Arc::clone(&f.registry);
    let slow = tokio::spawn(async move {
        let started = Instant::now();
        let result = invoke(&registry, "stub_sleep", json!({"millis": 20000})).await;
        (result, started.elapsed())
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let _ = invoke(&f.registry, "stub_exit", json!({})).await;
    let (result, elapsed) = slow.await.unwrap();

    // Resolved by crash repair, not by waiting out the 30s timeout.
    assert!(result.is_err());
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn test_crashed_plugin_stays_down_until_restarted() {
    let f = fixture(&[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();
    let _ = invoke(&f.registry, "stub_exit", json!({})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.host.info("stub").unwrap().state, PluginState::Crashed);

    // No silent comeback.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(f.host.info("stub").unwrap().state, PluginState::Crashed);
    assert!(f.registry.get("stub_echo").is_none());

    // An explicit restart brings it back.
    let tools = f.host.restart("stub").await.unwrap();
    assert!(tools.contains(&"stub_echo".to_string()));
    assert_eq!(f.host.info("stub").unwrap().state, PluginState::Running);
    f.host.stop("stub").await.unwrap();
}

#[tokio::test]
async fn test_ready_timeout_marks_crashed() {
    let config = PluginsConfig {
        ready_timeout_secs: 1,
        ..PluginsConfig::default()
    };
    let f = fixture_with(config, &[("stub", "silent.txt")]);

    let started = Instant::now();
    let error = f.host.start("stub").await.unwrap_err();
    assert!(error.to_string().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(5));

    let info = f.host.info("stub").unwrap();
    assert_eq!(info.state, PluginState::Crashed);
    assert!(info.last_error.unwrap().contains("no ready"));
}

#[tokio::test]
async fn test_fatal_handshake_marks_crashed() {
    let f = fixture(&[("stub", "fatal.txt")]);

    let error = f.host.start("stub").await.unwrap_err();
    assert!(error.to_string().contains("failed to load"));

    let info = f.host.info("stub").unwrap();
    assert_eq!(info.state, PluginState::Crashed);
    assert!(info.last_error.unwrap().contains("stub failed to load"));
}

#[tokio::test]
async fn test_only_one_plugin_runs_at_a_time() {
    let f = fixture(&[("alpha", "normal.txt"), ("beta", "normal.txt")]);

    f.host.start("alpha").await.unwrap();
    let error = f.host.start("beta").await.unwrap_err();
    assert!(error.to_string().contains("'alpha'"));
    assert!(error.to_string().contains("stop"));

    f.host.stop("alpha").await.unwrap();
    f.host.start("beta").await.unwrap();
    assert_eq!(f.host.info("beta").unwrap().state, PluginState::Running);
    f.host.stop("beta").await.unwrap();
}

#[tokio::test]
async fn test_stop_unregisters_and_preserves_files() {
    let f = fixture(&[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();
    assert!(f.registry.get("stub_echo").is_some());

    f.host.stop("stub").await.unwrap();
    assert_eq!(f.host.info("stub").unwrap().state, PluginState::Stopped);
    assert!(f.registry.get("stub_echo").is_none());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(event_kinds(&f.events).contains(&EventKind::PluginStopped));

    // On-disk state survives a stop; a restart finds it again.
    let tools = f.host.start("stub").await.unwrap();
    assert!(tools.contains(&"stub_echo".to_string()));
    f.host.stop("stub").await.unwrap();
}

#[tokio::test]
async fn test_dynamic_tool_registration_after_ready() {
    let f = fixture(&[("stub", "late_tool.txt")]);
    f.host.start("stub").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(f.registry.get("stub_late").is_some());
    let out = invoke(&f.registry, "stub_late", json!({"ok": true})).await.unwrap();
    assert_eq!(out["echoed"]["ok"], true);
    assert!(f.host.info("stub").unwrap().tools.contains(&"stub_late".to_string()));

    f.host.stop("stub").await.unwrap();
}

#[tokio::test]
async fn test_worker_emitted_event_republished_with_plugin_source() {
    let f = fixture(&[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();

    invoke(
        &f.registry,
        "stub_emit",
        json!({"event": "channel:connected", "payload": {"audit": "hello"}}),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let emitted: Vec<Event> = f
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind == EventKind::ChannelConnected)
        .cloned()
        .collect();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].source, "plugin:stub");
    assert_eq!(emitted[0].payload["audit"], "hello");

    f.host.stop("stub").await.unwrap();
}

#[tokio::test]
async fn test_worker_event_with_unknown_kind_rejected() {
    let f = fixture(&[("stub", "normal.txt")]);
    f.host.start("stub").await.unwrap();

    invoke(
        &f.registry,
        "stub_emit",
        json!({"event": "totally:bogus", "payload": {}}),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    // Only lifecycle events from the host itself; nothing republished.
    let sources: Vec<String> = f
        .events
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.source.clone())
        .collect();
    assert!(!sources.contains(&"plugin:stub".to_string()));

    f.host.stop("stub").await.unwrap();
}

#[tokio::test]
async fn test_install_step_runs_before_first_start() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("deps");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("plugin.toml"),
        format!(
            concat!(
                "name = \"deps\"\nversion = \"0.1.0\"\ncommand = \"{}\"\nentry = \"normal.txt\"\n",
                "[install]\ncommand = \"touch\"\nargs = [\"deps_done\"]\nmarker = \"deps_done\"\n",
            ),
            stub_bin()
        ),
    )
    .unwrap();
    fs::write(dir.join("normal.txt"), "stub entry").unwrap();

    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(ToolRegistry::new());
    let host = Arc::new(PluginHost::new(
        Arc::clone(&bus),
        Arc::clone(&registry),
        tmp.path().to_path_buf(),
        &PluginsConfig::default(),
    ));
    host.discover();

    host.start("deps").await.unwrap();
    assert!(dir.join("deps_done").exists());
    assert_eq!(host.info("deps").unwrap().state, PluginState::Running);
    host.stop("deps").await.unwrap();

    // Uninstall drops the marker so the next start reinstalls.
    host.uninstall("deps").await.unwrap();
    assert!(!dir.join("deps_done").exists());
}

#[tokio::test]
async fn test_failed_install_leaves_plugin_crashed() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("broken");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("plugin.toml"),
        format!(
            concat!(
                "name = \"broken\"\nversion = \"0.1.0\"\ncommand = \"{}\"\nentry = \"normal.txt\"\n",
                "[install]\ncommand = \"false\"\nmarker = \"never_created\"\n",
            ),
            stub_bin()
        ),
    )
    .unwrap();
    fs::write(dir.join("normal.txt"), "stub entry").unwrap();

    let host = Arc::new(PluginHost::new(
        Arc::new(EventBus::new()),
        Arc::new(ToolRegistry::new()),
        tmp.path().to_path_buf(),
        &PluginsConfig::default(),
    ));
    host.discover();

    assert!(host.start("broken").await.is_err());
    let info = host.info("broken").unwrap();
    assert_eq!(info.state, PluginState::Crashed);
    assert!(info.last_error.unwrap().contains("install failed"));
}
