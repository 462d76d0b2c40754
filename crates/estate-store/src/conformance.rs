//! Backend-agnostic contract checks.
//!
//! Each function takes a fresh, empty store and panics on the first
//! violation. Backend crates enable the `test-suite` feature in their
//! dev-dependencies and call [`run_all`] from a unit test.

use std::collections::BTreeSet;

use estate_codec::StateCodec;
use estate_types::{EntityReference, EntityState};
use serde_json::json;

use crate::changes::{ChangeBatch, MapChange};
use crate::error::StoreError;
use crate::traits::{BackupRestore, MapEntityStore};

fn r(s: &str) -> EntityReference {
    EntityReference::new(s).expect("valid test reference")
}

fn user(id: &str, name: &str) -> EntityState {
    EntityState::new(r(id), "User").with_property("name", name)
}

fn create(store: &dyn MapEntityStore, state: &EntityState) -> Result<(), StoreError> {
    let mut batch = ChangeBatch::new();
    batch.create_state(state)?;
    store.apply_changes(&batch)
}

fn update(store: &dyn MapEntityStore, state: &EntityState) -> Result<(), StoreError> {
    let mut batch = ChangeBatch::new();
    batch.update_state(state)?;
    store.apply_changes(&batch)
}

fn remove(store: &dyn MapEntityStore, reference: &EntityReference) -> Result<(), StoreError> {
    let mut batch = ChangeBatch::new();
    batch.remove_entity(reference.clone());
    store.apply_changes(&batch)
}

fn load(store: &dyn MapEntityStore, reference: &EntityReference) -> EntityState {
    let record = store.get(reference).expect("entity readable");
    StateCodec::decode(&record).expect("stored record decodes")
}

/// Decoded contents of a store, as a set of canonical records.
fn contents(store: &dyn MapEntityStore) -> BTreeSet<String> {
    store
        .entity_states()
        .expect("enumeration starts")
        .map(|record| {
            let state = StateCodec::decode(&record.expect("record readable")).expect("record decodes");
            StateCodec::encode(&state).expect("record re-encodes")
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Point operations
// ---------------------------------------------------------------------------

pub fn create_then_read<S: MapEntityStore>(store: &S) {
    let state = user("create-1", "Alice")
        .with_property("address", json!({"city": "Oslo"}))
        .with_association("manager", Some(r("create-0")))
        .with_many_association("groups", [r("g-1"), r("g-2")])
        .with_named_association("devices", "phone", r("dev-1"));
    create(store, &state).expect("create succeeds");
    assert!(store.contains(&state.identity).expect("contains"));
    assert_eq!(load(store, &state.identity), state);
}

pub fn duplicate_create_rejected<S: MapEntityStore>(store: &S) {
    let first = user("dup-1", "first");
    create(store, &first).expect("first create succeeds");
    let err = create(store, &user("dup-1", "second")).expect_err("second create fails");
    assert!(err.is_already_exists(), "expected EntityAlreadyExists, got {err:?}");
    assert_eq!(load(store, &first.identity), first);
}

pub fn update_requires_existence<S: MapEntityStore>(store: &S) {
    let ghost = user("ghost-1", "nobody");
    let err = update(store, &ghost).expect_err("update of absent entity fails");
    assert!(err.is_not_found(), "expected EntityNotFound, got {err:?}");
    assert!(!store.contains(&ghost.identity).expect("contains"));
    assert!(store.get(&ghost.identity).expect_err("still absent").is_not_found());
}

pub fn remove_is_idempotent<S: MapEntityStore>(store: &S) {
    let reference = r("never-created");
    remove(store, &reference).expect("first remove of absent entity");
    remove(store, &reference).expect("second remove of absent entity");
}

/// Create, update, remove, and remove again one entity.
pub fn user_lifecycle<S: MapEntityStore>(store: &S) {
    let reference = r("user-1");
    create(store, &user("user-1", "Alice")).expect("create");
    assert_eq!(load(store, &reference).property("name"), Some(&json!("Alice")));

    update(store, &user("user-1", "Alicia")).expect("update");
    assert_eq!(load(store, &reference).property("name"), Some(&json!("Alicia")));

    remove(store, &reference).expect("remove");
    assert!(store.get(&reference).expect_err("removed").is_not_found());
    remove(store, &reference).expect("second remove is a no-op");
}

/// A failing change stops its batch without undoing earlier changes.
pub fn batch_is_atomic_per_change_only<S: MapEntityStore>(store: &S) {
    create(store, &user("batch-b", "existing")).expect("seed");

    let mut batch = ChangeBatch::new();
    batch.create_state(&user("batch-a", "a")).expect("stage a");
    batch.create_state(&user("batch-b", "clash")).expect("stage b");
    batch.create_state(&user("batch-c", "c")).expect("stage c");
    let err = store.apply_changes(&batch).expect_err("clash fails the batch");
    assert!(err.is_already_exists());

    assert!(store.contains(&r("batch-a")).expect("contains"));
    assert_eq!(load(store, &r("batch-b")).property("name"), Some(&json!("existing")));
    assert!(!store.contains(&r("batch-c")).expect("contains"));
}

/// Floating-point properties come back bit for bit.
pub fn float_properties_round_trip<S: MapEntityStore>(store: &S) {
    let state = user("float-1", "Flo")
        .with_property("ratio", 1.0715660391465826e-75)
        .with_property("weight", 0.1 + 0.2)
        .with_property("limits", json!([f64::MAX, f64::MIN_POSITIVE, -2.5e-308, 1e300]))
        .with_property("whole", 3.0);
    create(store, &state).expect("create");
    assert_eq!(load(store, &state.identity), state);

    let mut records = store.entity_states().expect("enumeration starts");
    let record = records.next().expect("one record").expect("record readable");
    assert_eq!(StateCodec::decode(&record).expect("record decodes"), state);
}

/// Raw staged writes go through the same existence checks.
pub fn staged_writes_apply<S: MapEntityStore>(store: &S) {
    use std::io::Write;

    let state = user("staged-1", "Stan");
    let mut batch = ChangeBatch::new();
    let mut sink = batch.new_entity(state.identity.clone());
    StateCodec::encode_to_writer(&state, &mut sink).expect("encode");
    sink.flush().expect("flush");
    sink.commit().expect("commit");
    batch.push(MapChange::Remove {
        reference: r("staged-absent"),
    });
    store.apply_changes(&batch).expect("apply");
    assert_eq!(load(store, &state.identity), state);
}

// ---------------------------------------------------------------------------
// Backup / restore
// ---------------------------------------------------------------------------

fn populate<S: MapEntityStore>(store: &S, ids: &[&str]) {
    let mut batch = ChangeBatch::new();
    for id in ids {
        batch
            .create_state(&user(id, &format!("name of {id}")).with_property("tags", json!([id, "x"])))
            .expect("stage");
    }
    store.apply_changes(&batch).expect("populate");
}

/// `restore(backup())` into an empty store reproduces the same set of
/// states.
pub fn backup_restore_fixed_point<S, F>(make: &F)
where
    S: MapEntityStore + BackupRestore,
    F: Fn() -> S,
{
    let source = make();
    populate(&source, &["fp-1", "fp-2", "fp-3", "fp-4", "fp-5"]);
    let target = make();
    let mut records = source.backup().expect("backup starts");
    let restored = target.restore(&mut records).expect("restore");
    assert_eq!(restored, 5);
    assert_eq!(contents(&target), contents(&source));

    // Backing up the restored store yields the same records again.
    let again = make();
    let mut records = target.backup().expect("second backup");
    again.restore(&mut records).expect("second restore");
    assert_eq!(contents(&again), contents(&source));
}

/// Three entities backed up from one store land intact in another.
pub fn restore_isolation<S, F>(make: &F)
where
    S: MapEntityStore + BackupRestore,
    F: Fn() -> S,
{
    let a = make();
    populate(&a, &["iso-1", "iso-2", "iso-3"]);
    let b = make();
    let mut records = a.backup().expect("backup");
    b.restore(&mut records).expect("restore");

    let ids: BTreeSet<String> = b
        .entity_states()
        .expect("enumerate")
        .map(|rec| StateCodec::identity_of(&rec.expect("read")).expect("identity").into_string())
        .collect();
    assert_eq!(ids.len(), 3);
    for id in ["iso-1", "iso-2", "iso-3"] {
        assert!(ids.contains(id));
        assert_eq!(load(&b, &r(id)), load(&a, &r(id)));
    }
}

/// Restore replaces whatever was stored before.
pub fn restore_replaces_contents<S, F>(make: &F)
where
    S: MapEntityStore + BackupRestore,
    F: Fn() -> S,
{
    let store = make();
    populate(&store, &["old-1", "old-2"]);
    let mut incoming = vec![Ok(StateCodec::encode(&user("new-1", "n")).expect("encode"))].into_iter();
    assert_eq!(store.restore(&mut incoming).expect("restore"), 1);
    assert!(!store.contains(&r("old-1")).expect("contains"));
    assert!(store.contains(&r("new-1")).expect("contains"));
}

/// A corrupt record fails the restore without leaving a half-restored
/// store: afterwards the store holds either nothing or exactly what it
/// held before.
pub fn failed_restore_is_not_partial<S, F>(make: &F)
where
    S: MapEntityStore + BackupRestore,
    F: Fn() -> S,
{
    let store = make();
    populate(&store, &["before-1"]);
    let before = contents(&store);

    let mut incoming = vec![
        Ok(StateCodec::encode(&user("incoming-1", "a")).expect("encode")),
        Ok("{\"identity\": broken".to_string()),
        Ok(StateCodec::encode(&user("incoming-2", "b")).expect("encode")),
    ]
    .into_iter();
    let err = store.restore(&mut incoming).expect_err("corrupt record fails restore");
    assert!(matches!(err, StoreError::Decoding { .. }), "expected Decoding, got {err:?}");

    let after = contents(&store);
    assert!(after.is_empty() || after == before, "store left half restored: {after:?}");
    assert!(!store.contains(&r("incoming-1")).expect("contains"));
}

/// A point write issued while a restore is running waits for the restore
/// to finish and is not wiped by it.
pub fn restore_excludes_point_writes<S, F>(make: &F)
where
    S: MapEntityStore + BackupRestore,
    F: Fn() -> S,
{
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    let store = make();
    populate(&store, &["stale-1"]);
    let finished = AtomicBool::new(false);
    let (started_tx, started_rx) = mpsc::channel();

    let store_ref = &store;
    let finished_ref = &finished;
    thread::scope(|scope| {
        let restorer = scope.spawn(move || {
            let mut pending = vec![user("restored-1", "a"), user("restored-2", "b")].into_iter();
            let mut incoming = std::iter::from_fn(|| {
                let _ = started_tx.send(());
                thread::sleep(Duration::from_millis(40));
                match pending.next() {
                    Some(state) => Some(StateCodec::encode(&state).map_err(StoreError::from)),
                    None => {
                        finished_ref.store(true, Ordering::SeqCst);
                        None
                    }
                }
            });
            store_ref.restore(&mut incoming)
        });

        started_rx.recv().expect("restore started");
        create(store_ref, &user("during-1", "late")).expect("create after restore");
        assert!(
            finished_ref.load(Ordering::SeqCst),
            "create was applied while the restore was still running"
        );
        assert_eq!(restorer.join().expect("restore thread").expect("restore"), 2);
    });

    let ids: BTreeSet<String> = store
        .entity_states()
        .expect("enumerate")
        .map(|rec| StateCodec::identity_of(&rec.expect("read")).expect("identity").into_string())
        .collect();
    let expected: BTreeSet<String> = ["during-1", "restored-1", "restored-2"].map(String::from).into();
    assert_eq!(ids, expected);
}

/// Run every check, each against a fresh store from `make`.
pub fn run_all<S, F>(make: F)
where
    S: MapEntityStore + BackupRestore,
    F: Fn() -> S,
{
    create_then_read(&make());
    duplicate_create_rejected(&make());
    update_requires_existence(&make());
    remove_is_idempotent(&make());
    user_lifecycle(&make());
    batch_is_atomic_per_change_only(&make());
    staged_writes_apply(&make());
    float_properties_round_trip(&make());
    backup_restore_fixed_point(&make);
    restore_isolation(&make);
    restore_replaces_contents(&make);
    failed_restore_is_not_partial(&make);
    restore_excludes_point_writes(&make);
}
