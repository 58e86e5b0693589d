//! Convergence of two replicas exchanging deltas through a third (the server).
//!
//! Every exchange goes through the wire codec, so these tests also cover the
//! encoded shape of the Sync Delta.

use tasksync_core::{
    decode_delta, encode_delta, reconcile, Collection, Item, ItemId, MergeReport, ReplicaState,
    SyncDelta,
};

/// Push `from`'s full state into `server`, the way a client push does.
fn push(from: &ReplicaState, server: &mut ReplicaState) -> MergeReport {
    let bytes = encode_delta(&from.to_delta()).unwrap();
    reconcile(server, &decode_delta(&bytes).unwrap())
}

/// Pull the server snapshot into `into`.
fn pull(server: &ReplicaState, into: &mut ReplicaState) -> MergeReport {
    let bytes = encode_delta(&server.to_delta()).unwrap();
    reconcile(into, &decode_delta(&bytes).unwrap())
}

fn live_titles(state: &ReplicaState) -> Vec<(String, bool)> {
    let mut titles: Vec<_> = state
        .items()
        .map(|i| (i.title.clone(), i.completed))
        .collect();
    titles.sort();
    titles
}

// ==================== Basic propagation ====================

#[test]
fn test_item_created_on_one_client_reaches_the_other() {
    let mut server = ReplicaState::new();
    let mut alice = ReplicaState::new();
    let mut bob = ReplicaState::new();

    alice.insert_item(Item::new("buy milk", None));
    push(&alice, &mut server);
    let report = pull(&server, &mut bob);

    assert_eq!(report.items_adopted.len(), 1);
    assert_eq!(live_titles(&bob), vec![("buy milk".to_string(), false)]);
}

#[test]
fn test_collection_with_items_propagates_ownership() {
    let mut server = ReplicaState::new();
    let mut alice = ReplicaState::new();
    let mut bob = ReplicaState::new();

    let list = Collection::new("Groceries");
    let list_id = list.id.clone();
    alice.insert_collection(list);
    alice.insert_item(Item::new("eggs", Some(list_id.clone())));

    push(&alice, &mut server);
    pull(&server, &mut bob);

    let names: Vec<_> = bob.collections().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Groceries"]);
    assert_eq!(bob.items_in(&list_id).count(), 1);
    assert_eq!(bob.unfiled().count(), 0);
}

// ==================== Conflicts ====================

#[test]
fn test_concurrent_edits_converge_to_latest() {
    let mut server = ReplicaState::new();
    let mut alice = ReplicaState::new();
    let mut bob = ReplicaState::new();

    let item = Item::new("write report", None);
    let id = item.id.clone();
    alice.insert_item(item);
    push(&alice, &mut server);
    pull(&server, &mut bob);

    // Both edit offline; bob's edit is later.
    alice.item_mut(&id).unwrap().set_title("write the report");
    std::thread::sleep(std::time::Duration::from_millis(5));
    bob.item_mut(&id).unwrap().set_completed(true);
    let bob_ts = bob.item(&id).unwrap().last_modified;
    assert!(bob_ts > alice.item(&id).unwrap().last_modified);

    push(&alice, &mut server);
    push(&bob, &mut server);
    pull(&server, &mut alice);
    pull(&server, &mut bob);

    assert_eq!(alice.item(&id), bob.item(&id));
    assert_eq!(server.item(&id).unwrap().last_modified, bob_ts);
    assert!(alice.item(&id).unwrap().completed);
}

#[test]
fn test_delete_beats_later_edit() {
    let mut server = ReplicaState::new();
    let mut alice = ReplicaState::new();
    let mut bob = ReplicaState::new();

    let item = Item::new("call mom", None);
    let id = item.id.clone();
    alice.insert_item(item);
    push(&alice, &mut server);
    pull(&server, &mut bob);

    alice.tombstone_item(&id);
    bob.item_mut(&id).unwrap().set_title("call mom tonight");

    push(&alice, &mut server);
    push(&bob, &mut server);
    pull(&server, &mut bob);

    assert!(server.item(&id).is_none());
    assert!(bob.item(&id).is_none());
    assert!(bob.is_tombstoned(&id));
}

#[test]
fn test_deleted_collection_removes_items_everywhere() {
    let mut server = ReplicaState::new();
    let mut alice = ReplicaState::new();
    let mut bob = ReplicaState::new();

    let list = Collection::new("Work");
    let list_id = list.id.clone();
    alice.insert_collection(list);
    alice.insert_item(Item::new("standup", Some(list_id.clone())));
    push(&alice, &mut server);
    pull(&server, &mut bob);
    assert_eq!(bob.items_in(&list_id).count(), 1);

    alice.tombstone_collection(&list_id);
    push(&alice, &mut server);
    pull(&server, &mut bob);

    assert!(server.collection(&list_id).is_none());
    assert!(bob.collection(&list_id).is_none());
    assert_eq!(bob.items().count(), 0);
}

fn live_collection_names(state: &ReplicaState) -> Vec<String> {
    let mut names: Vec<_> = state.collections().map(|c| c.name.clone()).collect();
    names.sort();
    names
}

/// Alice deletes a shared collection while Bob later renames it and files a
/// new item in it. Returns (server, alice, bob) after everyone has synced.
fn delete_versus_rename(alice_pushes_first: bool) -> (ReplicaState, ReplicaState, ReplicaState) {
    let mut server = ReplicaState::new();
    let mut alice = ReplicaState::new();
    let mut bob = ReplicaState::new();

    let list = Collection::new("Work");
    let list_id = list.id.clone();
    alice.insert_collection(list);
    push(&alice, &mut server);
    pull(&server, &mut bob);

    alice.tombstone_collection(&list_id);
    std::thread::sleep(std::time::Duration::from_millis(5));
    bob.collection_mut(&list_id).unwrap().rename("Work (renamed)");
    bob.insert_item(Item::new("late addition", Some(list_id.clone())));

    if alice_pushes_first {
        push(&alice, &mut server);
        push(&bob, &mut server);
    } else {
        push(&bob, &mut server);
        push(&alice, &mut server);
    }
    pull(&server, &mut alice);
    pull(&server, &mut bob);
    // Bob's next push must not bring anything back.
    push(&bob, &mut server);
    pull(&server, &mut alice);

    (server, alice, bob)
}

#[test]
fn test_collection_delete_converges_in_either_push_order() {
    for alice_pushes_first in [true, false] {
        let (server, alice, bob) = delete_versus_rename(alice_pushes_first);

        for (who, state) in [("server", &server), ("alice", &alice), ("bob", &bob)] {
            assert!(
                live_collection_names(state).is_empty(),
                "{} kept a collection (alice first: {})",
                who,
                alice_pushes_first
            );
            assert_eq!(state.items().count(), 0, "{} kept an item", who);
        }
    }
}

#[test]
fn test_round_trip_leaves_client_and_server_with_same_collections() {
    let mut server = ReplicaState::new();
    let mut client = ReplicaState::new();

    let keep = Collection::new("Keep");
    let dropped = Collection::new("Drop");
    let drop_id = dropped.id.clone();
    server.insert_collection(keep);
    server.insert_collection(dropped);
    server.tombstone_collection(&drop_id);

    client.insert_collection(Collection::new("Local"));
    pull(&server, &mut client);
    push(&client, &mut server);
    pull(&server, &mut client);

    assert_eq!(live_collection_names(&client), vec!["Keep", "Local"]);
    assert_eq!(live_collection_names(&server), live_collection_names(&client));
    assert!(client.is_collection_tombstoned(&drop_id));
}

// ==================== Stability ====================

#[test]
fn test_repeated_pulls_are_quiet() {
    let mut server = ReplicaState::new();
    server.insert_item(Item::with_fields(
        "x",
        "buy milk",
        false,
        tasksync_core::Timestamp::from_millis(100),
    ));
    let mut client = ReplicaState::new();

    assert!(!pull(&server, &mut client).is_empty());
    let settled = client.clone();
    assert!(pull(&server, &mut client).is_empty());
    assert_eq!(client, settled);
}

#[test]
fn test_tombstone_only_delta_is_applied() {
    let mut client = ReplicaState::new();
    client.insert_item(Item::with_fields(
        "y",
        "stale",
        false,
        tasksync_core::Timestamp::from_millis(999),
    ));

    let mut dead = Item::with_fields("y", "stale", false, tasksync_core::Timestamp::from_millis(50));
    dead.deleted = true;
    let delta = SyncDelta {
        deleted: vec![dead],
        ..SyncDelta::default()
    };

    reconcile(&mut client, &delta);
    assert!(client.item(&ItemId::from("y")).is_none());
}
