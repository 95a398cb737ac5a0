//! Change-log units replicated between runtimes over the in-memory hub.

use netsync_shared::{
    collections::{List, Map},
    identity::{Identity, ObjectId},
    packets::PacketKind,
    transport::Sent,
};
use netsync_tests::Session;

const A: Identity = Identity(1);
const B: Identity = Identity(2);

fn roster(s: &mut Session) -> ObjectId {
    s.server
        .objects_mut()
        .create("Roster", 0, 0, List::<u32>::new())
        .unwrap()
}

fn mirror_roster(s: &mut Session, client: Identity) {
    s.add_client(client)
        .objects_mut()
        .create("Roster", 0, 0, List::<u32>::new())
        .unwrap();
}

fn server_items(s: &Session, id: ObjectId) -> Vec<u32> {
    s.server.objects().get::<List<u32>>(id).unwrap().items().to_vec()
}

fn client_items(s: &Session, client: Identity, id: ObjectId) -> Vec<u32> {
    s.client(client)
        .objects()
        .get::<List<u32>>(id)
        .unwrap()
        .items()
        .to_vec()
}

fn push(s: &mut Session, id: ObjectId, v: u32) {
    s.server
        .objects_mut()
        .get_mut::<List<u32>>(id)
        .unwrap()
        .push(v)
        .unwrap();
}

fn finds_from(sent: &[Sent], client: Identity) -> usize {
    sent.iter()
        .filter(|s| s.from == client && s.payload[0] == PacketKind::Find as u8)
        .count()
}

/// Joins `client` with a mirrored roster and lets the first snapshot land.
fn synced(s: &mut Session, client: Identity) {
    mirror_roster(s, client);
    s.connect(client);
    s.ticks(3);
}

#[test]
fn replicas_converge_on_every_mutation() {
    let mut s = Session::new();
    let id = roster(&mut s);
    mirror_roster(&mut s, A);
    mirror_roster(&mut s, B);
    s.connect(A);
    s.connect(B);
    s.tick();

    for v in 0..10 {
        push(&mut s, id, v);
        s.tick();
    }
    s.ticks(2);

    let expected: Vec<u32> = (0..10).collect();
    assert_eq!(server_items(&s, id), expected);
    assert_eq!(client_items(&s, A, id), expected);
    assert_eq!(client_items(&s, B, id), expected);
}

#[test]
fn late_joiner_bootstraps_from_snapshot() {
    let mut s = Session::new();
    let id = roster(&mut s);
    let scores = s
        .server
        .objects_mut()
        .create("Scores", 0, 1, Map::<i32, String>::new())
        .unwrap();
    for v in 1..=5 {
        push(&mut s, id, v);
        s.tick();
    }
    s.server
        .objects_mut()
        .get_mut::<Map<i32, String>>(scores)
        .unwrap()
        .insert(7, "seven".to_string())
        .unwrap();

    s.add_client(A)
        .objects_mut()
        .create("Scores", 0, 1, Map::<i32, String>::new());
    synced(&mut s, A);

    assert_eq!(client_items(&s, A, id), vec![1, 2, 3, 4, 5]);
    let mirrored = s
        .client(A)
        .objects()
        .get::<Map<i32, String>>(scores)
        .unwrap();
    assert_eq!(mirrored.get(&7).map(String::as_str), Some("seven"));

    push(&mut s, id, 6);
    s.ticks(2);
    assert_eq!(client_items(&s, A, id), vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn lost_ranges_trigger_a_single_resync() {
    let mut s = Session::new();
    let id = roster(&mut s);
    synced(&mut s, A);

    // Six ranges never reach the client.
    for v in 0..6 {
        push(&mut s, id, v);
        s.tick_server();
        s.hub.take_inbox(A);
        s.tick_clients();
        s.now_ms += s.step_ms;
    }
    assert!(client_items(&s, A, id).is_empty());

    s.hub.clear_log();
    push(&mut s, id, 6);
    push(&mut s, id, 7);
    s.tick();
    push(&mut s, id, 8);
    s.ticks(3);

    assert_eq!(client_items(&s, A, id), server_items(&s, id));
    assert_eq!(finds_from(&s.hub.sent(), A), 1);
}

#[test]
fn reordered_ranges_inside_the_window_are_buffered() {
    let mut s = Session::new();
    let id = roster(&mut s);
    synced(&mut s, A);

    push(&mut s, id, 10);
    s.tick_server();
    push(&mut s, id, 11);
    s.tick_server();

    let mut inbox = s.hub.take_inbox(A);
    inbox.reverse();
    s.hub.deliver(A, inbox);
    s.hub.clear_log();
    s.tick_clients();

    assert_eq!(client_items(&s, A, id), vec![10, 11]);
    assert_eq!(finds_from(&s.hub.sent(), A), 0);
}

#[test]
fn replacing_changes_converge() {
    let mut s = Session::new();
    let id = roster(&mut s);
    synced(&mut s, A);

    push(&mut s, id, 1);
    push(&mut s, id, 2);
    s.tick();
    {
        let list = s.server.objects_mut().get_mut::<List<u32>>(id).unwrap();
        list.push(3).unwrap();
        list.clear().unwrap();
        list.push(4).unwrap();
        assert_eq!(list.steps() - list.marker(), list.queued() as u32);
    }
    s.ticks(2);

    assert_eq!(server_items(&s, id), vec![4]);
    assert_eq!(client_items(&s, A, id), vec![4]);
}

#[test]
fn reconnect_recovers_changes_missed_while_away() {
    let mut s = Session::new();
    let id = roster(&mut s);
    synced(&mut s, A);
    push(&mut s, id, 1);
    s.ticks(2);

    s.disconnect(A);
    s.tick();
    assert!(s
        .client(A)
        .objects()
        .get::<List<u32>>(id)
        .unwrap()
        .is_reconfiguring());

    push(&mut s, id, 2);
    push(&mut s, id, 3);
    s.tick();

    s.connect(A);
    s.ticks(3);
    let mirrored = s.client(A).objects().get::<List<u32>>(id).unwrap();
    assert!(!mirrored.is_reconfiguring());
    assert_eq!(mirrored.items(), [1, 2, 3]);
}

#[test]
fn replicas_refuse_local_mutation() {
    let mut s = Session::new();
    let id = roster(&mut s);
    synced(&mut s, A);
    let mirrored = s
        .client_mut(A)
        .objects_mut()
        .get_mut::<List<u32>>(id)
        .unwrap();
    assert!(mirrored.push(1).is_err());
    assert!(mirrored.items().is_empty());
}
