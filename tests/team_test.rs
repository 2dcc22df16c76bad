/*!
 * Team and Thread Tests
 * Spawn rendezvous, resume, kill/interrupt, mailboxes and team lifecycle
 */

use nexus_kit::core::limits::{KILLED_EXIT_CODE, NORMAL_PRIORITY};
use nexus_kit::{Broker, Status, ThreadState, WaitFlags};
use pretty_assertions::assert_eq;
use std::thread;
use std::time::Duration;

#[test]
fn test_spawn_stays_suspended_until_resumed() {
    let broker = Broker::default();
    let team = broker.attach("spawner").unwrap();

    let worker = team.spawn_thread("worker", NORMAL_PRIORITY, || 7).unwrap();
    let info = team.get_thread_info(worker).unwrap();
    assert_eq!(info.state, ThreadState::Suspended);
    assert_eq!(info.team, team.team());
    assert_eq!(info.name, "worker");

    team.resume_thread(worker).unwrap();
    assert_eq!(team.wait_for_thread(worker), Ok(7));
    assert_eq!(team.get_thread_info(worker).map(|_| ()), Err(Status::BadThreadId));
}

#[test]
fn test_wait_resumes_a_suspended_thread() {
    let broker = Broker::default();
    let team = broker.attach("impatient").unwrap();
    let worker = team.spawn_thread("lazy", NORMAL_PRIORITY, || 3).unwrap();
    assert_eq!(team.wait_for_thread(worker), Ok(3));
}

#[test]
fn test_resume_running_thread_is_bad_state() {
    let broker = Broker::default();
    let team = broker.attach("blocker").unwrap();

    let inner = team.clone();
    let worker = team
        .spawn_thread("sleeper", NORMAL_PRIORITY, move || {
            match inner.block_thread(WaitFlags::NONE, 0) {
                Ok(()) => 0,
                Err(_) => 1,
            }
        })
        .unwrap();

    team.resume_thread(worker).unwrap();
    assert_eq!(team.resume_thread(worker), Err(Status::BadThreadState));
    assert_eq!(team.suspend_thread(worker), Err(Status::NotSupported));

    team.unblock_thread(worker).unwrap();
    assert_eq!(team.wait_for_thread(worker), Ok(0));
}

#[test]
fn test_unblock_suspended_thread_is_bad_state() {
    let broker = Broker::default();
    let team = broker.attach("early").unwrap();
    let worker = team.spawn_thread("parked", NORMAL_PRIORITY, || 0).unwrap();
    assert_eq!(team.unblock_thread(worker), Err(Status::BadThreadState));
    team.resume_thread(worker).unwrap();
    team.wait_for_thread(worker).unwrap();
}

#[test]
fn test_kill_ends_uninterruptible_wait() {
    let broker = Broker::default();
    let team = broker.attach("victim").unwrap();

    let inner = team.clone();
    let worker = team
        .spawn_thread("stuck", NORMAL_PRIORITY, move || {
            let _ = inner.block_thread(WaitFlags::NONE, 0);
            0
        })
        .unwrap();
    team.resume_thread(worker).unwrap();
    thread::sleep(Duration::from_millis(20));

    team.kill_thread(worker).unwrap();
    assert_eq!(team.wait_for_thread(worker), Ok(KILLED_EXIT_CODE));
}

#[test]
fn test_interrupt_needs_can_interrupt() {
    let broker = Broker::default();
    let team = broker.attach("signals").unwrap();

    let inner = team.clone();
    let worker = team
        .spawn_thread("listener", NORMAL_PRIORITY, move || {
            // Plain timed wait: the interrupt stays pending through it
            let first = inner.block_thread(WaitFlags::RELATIVE_TIMEOUT, 30_000);
            let second = inner.block_thread(WaitFlags::CAN_INTERRUPT, 0);
            match (first, second) {
                (Err(Status::TimedOut), Err(Status::Interrupted)) => 1,
                _ => 0,
            }
        })
        .unwrap();
    team.resume_thread(worker).unwrap();
    thread::sleep(Duration::from_millis(5));

    team.interrupt_thread(worker).unwrap();
    assert_eq!(team.wait_for_thread(worker), Ok(1));
}

#[test]
fn test_mailbox_delivers_letters() {
    let broker = Broker::default();
    let team = broker.attach("post").unwrap();
    let me = team.find_thread(None).unwrap();

    let inner = team.clone();
    let worker = team
        .spawn_thread("reader", NORMAL_PRIORITY, move || {
            let letter = inner.receive_data().unwrap();
            assert_eq!(letter.data, b"hello".to_vec());
            assert_eq!(letter.sender, me);
            letter.code
        })
        .unwrap();
    team.resume_thread(worker).unwrap();

    team.send_data(worker, 42, b"hello").unwrap();
    assert_eq!(team.wait_for_thread(worker), Ok(42));
    assert_eq!(team.has_data(), Ok(false));
}

#[test]
fn test_thread_lookup_and_attributes() {
    let broker = Broker::default();
    let team = broker.attach("attrs").unwrap();
    let worker = team.spawn_thread("named", 15, || 0).unwrap();

    assert_eq!(team.find_thread(Some("named")), Ok(worker));
    assert_eq!(team.find_thread(Some("nobody")), Err(Status::BadThreadId));

    team.rename_thread(worker, "renamed").unwrap();
    assert_eq!(team.find_thread(Some("renamed")), Ok(worker));
    assert_eq!(team.set_thread_priority(worker, 20), Ok(15));
    assert_eq!(team.get_thread_info(worker).unwrap().priority, 20);

    assert_eq!(team.get_team_info().unwrap().thread_count, 2);
    let mut cookie = 0;
    let mut threads = Vec::new();
    while let Ok(info) = team.get_next_thread_info(&mut cookie) {
        threads.push(info.thread);
    }
    assert_eq!(threads.len(), 2);
    assert!(threads.contains(&worker));

    team.resume_thread(worker).unwrap();
    team.wait_for_thread(worker).unwrap();
    assert_eq!(team.get_team_info().unwrap().thread_count, 1);
}

#[test]
fn test_wait_for_self_is_rejected() {
    let broker = Broker::default();
    let team = broker.attach("selfish").unwrap();
    let me = team.find_thread(None).unwrap();
    assert_eq!(team.wait_for_thread(me), Err(Status::BadThreadId));
}

#[test]
fn test_wait_for_host_child_process() {
    let broker = Broker::default();
    let team = broker.attach("parent").unwrap();

    let child = std::process::Command::new("sh")
        .args(["-c", "exit 3"])
        .spawn()
        .unwrap();
    assert_eq!(team.wait_for_thread(child.id() as i32), Ok(3));
}

#[test]
fn test_wait_for_unknown_id() {
    let broker = Broker::default();
    let team = broker.attach("lost").unwrap();
    // Neither a broker thread nor a child of ours
    assert_eq!(team.wait_for_thread(i32::MAX - 1), Err(Status::BadThreadId));
}

#[test]
fn test_rebind_after_fork_gets_fresh_team() {
    let broker = Broker::default();
    let parent = broker.attach("forker").unwrap();
    let parent_thread = parent.find_thread(None).unwrap();

    let mut child = parent.clone();
    let team = child.rebind_after_fork().unwrap();
    assert_ne!(team, parent.team());
    assert_eq!(child.team(), team);
    assert_eq!(child.get_team_info().unwrap().name, "forker");

    let child_thread = child.find_thread(None).unwrap();
    assert_ne!(child_thread, parent_thread);
    assert_eq!(child.get_thread_info(child_thread).unwrap().team, team);

    // Inherited records are gone; the parent's team itself stays
    assert_eq!(broker.threads().threads_of(parent.team()), Vec::<i32>::new());
    assert_eq!(
        parent.get_thread_info(parent_thread).map(|_| ()),
        Err(Status::BadThreadId)
    );
    assert_eq!(parent.get_team_info().unwrap().name, "forker");
}

#[test]
fn test_rebind_after_fork_drops_inherited_workers() {
    let broker = Broker::default();
    let parent = broker.attach("busy forker").unwrap();
    let worker = parent.spawn_thread("inherited", NORMAL_PRIORITY, || 0).unwrap();
    assert_eq!(broker.threads().threads_of(parent.team()).len(), 2);

    let mut child = parent.clone();
    child.rebind_after_fork().unwrap();
    assert_eq!(broker.threads().threads_of(parent.team()), Vec::<i32>::new());
    assert_eq!(child.resume_thread(worker), Err(Status::BadThreadId));
    assert_eq!(broker.threads().threads_of(child.team()).len(), 1);
}
