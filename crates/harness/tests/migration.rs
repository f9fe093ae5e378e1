use savesync_harness::{TestRig, at, save_json};
use serde_json::{Value, json};

fn on_disk(rig: &TestRig) -> Result<Value, Box<dyn std::error::Error>> {
    Ok(serde_json::from_str(&rig.local_text().ok_or("no local save")?)?)
}

#[test]
fn legacy_save_walks_the_whole_chain() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.seed_local(&save_json(None, json!({ "coins": 55, "trips": 3 })), at(-100));
    rig.session.start();

    let report = rig.session.last_migration_report();
    assert!(report.was_migrated);
    assert_eq!(report.source_version, 0);
    assert_eq!(report.final_version, 2);
    assert_eq!(report.applied_steps, vec!["v0->v1", "v1->v2"]);
    assert!(report.failure_reason.is_empty());

    assert_eq!(rig.coins(), Some(55));
    let disk = on_disk(&rig)?;
    assert_eq!(disk["saveVersion"], 2);
    assert_eq!(disk["stats"]["totalTrips"], 3);
    assert_eq!(disk["tutorialSeen"], false);
    Ok(())
}

#[test]
fn intermediate_version_runs_remaining_steps_only() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let v1 = save_json(Some(1), json!({ "coins": 2, "trips": 9, "tutorialSeen": true }));
    rig.seed_local(&v1, at(-100));
    rig.session.load_or_create();

    let report = rig.session.last_migration_report();
    assert_eq!(report.source_version, 1);
    assert_eq!(report.applied_steps, vec!["v1->v2"]);
    assert_eq!(on_disk(&rig)?["stats"]["totalTrips"], 9);
    assert_eq!(rig.session.current().get::<bool>("tutorialSeen")?, Some(true));
    Ok(())
}

#[test]
fn current_version_is_loaded_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let v2 = save_json(
        Some(2),
        json!({ "coins": 4, "stats": { "totalTrips": 1 }, "tutorialSeen": false }),
    );
    rig.seed_local(&v2, at(-100));
    rig.session.load_or_create();

    let report = rig.session.last_migration_report();
    assert!(!report.was_migrated);
    assert!(report.applied_steps.is_empty());
    assert_eq!(rig.local_text(), Some(v2));
    assert_eq!(rig.session.local_store().write_count(), 0);
    Ok(())
}

#[test]
fn failing_step_falls_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    let broken = save_json(Some(1), json!({ "coins": 2, "trips": "lots" }));
    rig.seed_local(&broken, at(-100));
    rig.session.load_or_create();

    let report = rig.session.last_migration_report();
    assert_eq!(report.source_version, 1);
    assert_eq!(report.final_version, 1);
    assert!(report.failure_reason.contains("v1->v2"));
    assert!(report.failure_reason.contains("trips is not a number"));

    assert_eq!(rig.coins(), Some(0));
    assert_eq!(on_disk(&rig)?["saveVersion"], 2);
    let quarantined = rig.local_backups("corrupt_");
    assert_eq!(quarantined.len(), 1);
    Ok(())
}

#[test]
fn empty_local_file_falls_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let mut rig = TestRig::new()?;
    rig.seed_local("", at(-100));
    rig.session.load_or_create();

    assert_eq!(rig.session.last_load_failure(), Some("save payload is empty"));
    assert_eq!(rig.session.current().schema_version(), 2);
    Ok(())
}
