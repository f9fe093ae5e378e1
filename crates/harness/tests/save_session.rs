use std::cell::{Cell, RefCell};
use std::io::Write;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use savesync_core::{ManualClock, SaveDocument};
use savesync_engine::{ConflictDecision, SaveConfig, SaveOutcome, SaveSession, SyncConfig};
use savesync_harness::{SharedCloud, TestRig, at, sample_defaults, sample_pipeline, save_json};
use savesync_storage::{FsStore, Store};
use serde_json::json;
use tracing::{Dispatch, Level};
use tracing_subscriber::fmt::MakeWriter;

struct TestWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

struct TestWriterGuard {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<'a> MakeWriter<'a> for TestWriter {
    type Writer = TestWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        TestWriterGuard {
            buffer: self.buffer.clone(),
        }
    }
}

impl Write for TestWriterGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().expect("log buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with WARN-and-above log lines captured.
fn capture_warnings(f: impl FnOnce()) -> String {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(TestWriter {
            buffer: buffer.clone(),
        })
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .finish();

    let dispatch = Dispatch::new(subscriber);
    tracing::dispatcher::with_default(&dispatch, f);

    String::from_utf8(buffer.lock().expect("log buffer").clone()).expect("utf8 logs")
}

fn counting_listener(rig: &mut TestRig) -> Rc<Cell<u32>> {
    let hits = Rc::new(Cell::new(0));
    let h = hits.clone();
    rig.session.on_change(move |_| h.set(h.get() + 1));
    hits
}

// ============================================================================
// Throttle
// ============================================================================

#[test]
fn burst_of_saves_coalesces_into_one_deferred_write() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();
    let hits = counting_listener(&mut rig);

    for coins in 1..=5 {
        rig.session.current_mut().set("coins", coins)?;
        assert_eq!(rig.session.save(false), SaveOutcome::Deferred);
        rig.advance(0.1);
    }
    assert_eq!(hits.get(), 0);
    assert_eq!(rig.session.tick(), None);

    rig.advance(0.5);
    assert_eq!(rig.session.tick(), Some(SaveOutcome::Persisted));
    assert_eq!(hits.get(), 1);
    assert!(rig.local_text().ok_or("no save")?.contains("\"coins\": 5"));

    assert_eq!(rig.session.tick(), None);
    Ok(())
}

#[test]
fn forced_save_bypasses_window_and_restarts_it() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();
    let hits = counting_listener(&mut rig);

    rig.advance(0.2);
    assert_eq!(rig.session.save(true), SaveOutcome::Persisted);
    rig.advance(0.9);
    assert_eq!(rig.session.save(false), SaveOutcome::Deferred);
    rig.advance(0.1);
    assert_eq!(rig.session.tick(), Some(SaveOutcome::Persisted));
    assert_eq!(hits.get(), 2);
    Ok(())
}

#[test]
fn zero_interval_disables_throttling() -> Result<(), Box<dyn std::error::Error>> {
    let config = SaveConfig {
        min_write_interval_secs: 0.0,
        ..SaveConfig::default()
    };
    let mut rig = TestRig::with_config(config)?;
    rig.session.start();
    let hits = counting_listener(&mut rig);

    for _ in 0..3 {
        assert_eq!(rig.session.save(false), SaveOutcome::Persisted);
    }
    assert_eq!(hits.get(), 3);
    Ok(())
}

#[test]
fn failed_local_write_is_retried_on_tick() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();
    let hits = counting_listener(&mut rig);

    rig.session.local_store_mut().set_fail_writes(true);
    rig.session.current_mut().set("coins", 77)?;
    let logs = capture_warnings(|| {
        assert_eq!(rig.session.save(true), SaveOutcome::Failed);
    });
    assert!(logs.contains("failed to persist save"));
    assert_eq!(hits.get(), 0);
    assert!(rig.session.has_pending_save());

    rig.session.local_store_mut().set_fail_writes(false);
    rig.advance(1.0);
    assert_eq!(rig.session.tick(), Some(SaveOutcome::Persisted));
    assert_eq!(hits.get(), 1);
    Ok(())
}

// ============================================================================
// Change notification
// ============================================================================

#[test]
fn listener_sees_the_persisted_snapshot() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();
    let seen: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    rig.session.on_change(move |doc: &SaveDocument| {
        if let Ok(Some(coins)) = doc.get::<i64>("coins") {
            s.borrow_mut().push(coins);
        }
    });

    rig.session.current_mut().set("coins", 10)?;
    rig.session.save(true);
    rig.session.current_mut().set("coins", 20)?;
    rig.session.save(true);

    assert_eq!(*seen.borrow(), vec![10, 20]);
    Ok(())
}

#[test]
fn panicking_listener_is_logged_and_isolated() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();
    rig.session.on_change(|_| panic!("economy listener exploded"));
    let hits = counting_listener(&mut rig);

    let logs = capture_warnings(|| {
        assert_eq!(rig.session.save(true), SaveOutcome::Persisted);
    });
    assert!(logs.contains("save change listener panicked"));
    assert!(logs.contains("economy listener exploded"));
    assert_eq!(hits.get(), 1);
    Ok(())
}

#[test]
fn removed_listener_is_not_called() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();
    let hits = Rc::new(Cell::new(0));
    let h = hits.clone();
    let id = rig.session.on_change(move |_| h.set(h.get() + 1));

    rig.session.save(true);
    assert!(rig.session.off(id));
    rig.session.save(true);
    assert_eq!(hits.get(), 1);
    Ok(())
}

// ============================================================================
// Upload gating
// ============================================================================

#[test]
fn persisted_changes_are_uploaded_after_startup() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();

    rig.session.current_mut().set("coins", 123)?;
    rig.session.save(true);
    assert_eq!(rig.remote_text(), rig.local_text());
    let manifest = rig.remote_manifest().ok_or("manifest missing")?;
    assert_eq!(manifest.saved_at(), Some(at(0)));
    Ok(())
}

#[test]
fn auto_sync_off_leaves_remote_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let config = SaveConfig {
        sync: SyncConfig {
            auto_sync_on_save: false,
            ..SyncConfig::default()
        },
        ..SaveConfig::default()
    };
    let mut rig = TestRig::with_config(config)?;
    rig.session.start();
    rig.session.save(true);

    assert!(rig.session.startup_sync_completed());
    assert!(rig.remote_text().is_none());
    Ok(())
}

#[test]
fn offline_remote_skips_upload_silently() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();
    rig.session.remote_store_mut().set_available(false);
    rig.session.current_mut().set("coins", 9)?;

    let logs = capture_warnings(|| {
        assert_eq!(rig.session.save(true), SaveOutcome::Persisted);
    });
    assert!(logs.is_empty(), "unexpected warnings: {logs}");

    rig.session.remote_store_mut().set_available(true);
    assert_ne!(rig.remote_text(), rig.local_text());
    Ok(())
}

#[test]
fn upload_failure_is_a_warning_only() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.session.start();
    rig.session.remote_store_mut().set_fail_writes(true);
    rig.session.current_mut().set("coins", 9)?;

    let logs = capture_warnings(|| {
        assert_eq!(rig.session.save(true), SaveOutcome::Persisted);
    });
    assert!(logs.contains("WARN"));
    assert!(logs.contains("failed to upload save to cloud"));
    assert_eq!(rig.coins(), Some(9));
    assert!(rig.local_text().ok_or("no save")?.contains("\"coins\": 9"));
    Ok(())
}

// ============================================================================
// Load fallbacks
// ============================================================================

#[test]
fn corrupt_local_save_is_quarantined() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.seed_local("{ this is not json", at(-5));
    let logs = capture_warnings(|| rig.session.load_or_create());

    assert!(logs.contains("local save unusable"));
    let failure = rig.session.last_load_failure().ok_or("no failure recorded")?;
    assert!(failure.contains("unreadable"), "{failure}");

    let quarantined = rig.local_backups("corrupt_");
    assert_eq!(quarantined.len(), 1);
    assert_eq!(
        rig.session.local_store().read(&quarantined[0])?,
        "{ this is not json"
    );

    assert_eq!(rig.session.current().schema_version(), 2);
    assert_eq!(rig.coins(), Some(0));
    let on_disk: serde_json::Value = serde_json::from_str(&rig.local_text().ok_or("no save")?)?;
    assert_eq!(on_disk["saveVersion"], 2);
    Ok(())
}

#[test]
fn future_version_falls_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.seed_local(&save_json(Some(9), json!({ "coins": 1_000_000 })), at(-5));
    rig.session.load_or_create();

    let report = rig.session.last_migration_report();
    assert_eq!(report.source_version, 9);
    assert!(report.failure_reason.contains("newer than supported"));
    assert_eq!(rig.coins(), Some(0));
    assert_eq!(rig.local_backups("corrupt_").len(), 1);
    Ok(())
}

#[test]
fn config_loads_from_json() -> Result<(), Box<dyn std::error::Error>> {
    let config = SaveConfig::from_json(
        r#"{ "save_file_name": "slot2.json", "sync": { "cloud_save_file_name": "slot2.json", "cloud_manifest_file_name": "slot2.meta.json" } }"#,
    )?;
    let mut rig = TestRig::with_config(config)?;
    rig.session.start();

    assert!(rig.session.local_store().exists("slot2.json"));
    assert!(rig.session.remote_store().exists("slot2.meta.json"));
    assert!(!rig.session.local_store().exists("save_v1.json"));
    Ok(())
}

#[test]
fn filesystem_session_survives_a_restart() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let cloud = SharedCloud::new()?;
    let clock = Arc::new(ManualClock::new(at(0)));

    let open = |clock: &Arc<ManualClock>| -> Result<_, Box<dyn std::error::Error>> {
        Ok(SaveSession::new(
            SaveConfig::default(),
            FsStore::open(dir.path().join("profile"))?,
            cloud.open(clock.clone())?,
            sample_pipeline()?,
            sample_defaults(),
            clock.clone(),
        )?)
    };

    let mut first = open(&clock)?;
    first.start();
    first.current_mut().set("coins", 321)?;
    assert_eq!(first.save(true), SaveOutcome::Persisted);
    drop(first);

    assert!(dir.path().join("profile/save_v1.json").is_file());
    assert!(!dir.path().join("profile/save_v1.json.tmp").exists());
    assert!(!dir.path().join("profile/save_v1.json.bak").exists());

    let mut second = open(&clock)?;
    second.start();
    assert_eq!(second.last_decision(), Some(ConflictDecision::AlreadyInSync));
    assert_eq!(second.current().get::<i64>("coins")?, Some(321));
    Ok(())
}
