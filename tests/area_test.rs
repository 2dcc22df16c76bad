/*!
 * Area Tests
 * Shared backing stores, clones, resize and protection through team handles
 */

use nexus_kit::area::page_size;
use nexus_kit::{AddressSpec, Broker, LockMode, Protection, Status};
use pretty_assertions::assert_eq;

#[test]
fn test_clone_shares_bytes_across_teams() {
    let broker = Broker::default();
    let producer = broker.attach("producer").unwrap();
    let consumer = broker.attach("consumer").unwrap();

    let (area, _) = producer
        .create_area("frame", AddressSpec::Any, 100, LockMode::NoLock, Protection::READ_WRITE)
        .unwrap();
    let info = producer.get_area_info(area).unwrap();
    assert_eq!(info.size, page_size());
    assert_eq!(info.team, producer.team());

    let source = consumer.find_area("frame").unwrap();
    let (clone, _) = consumer
        .clone_area("frame view", AddressSpec::ClonePreferred, Protection::READ_WRITE, source)
        .unwrap();
    assert_ne!(clone, area);

    producer.write_area(area, 16, b"pixels").unwrap();
    let mut seen = [0u8; 6];
    consumer.read_area(clone, 16, &mut seen).unwrap();
    assert_eq!(&seen, b"pixels");

    // And back the other way
    consumer.write_area(clone, 0, b"ack").unwrap();
    let mut ack = [0u8; 3];
    producer.read_area(area, 0, &mut ack).unwrap();
    assert_eq!(&ack, b"ack");

    assert_eq!(producer.get_area_info(area).unwrap().share_count, 2);
}

#[test]
fn test_deleting_source_keeps_clone_mapped() {
    let broker = Broker::default();
    let team = broker.attach("owner").unwrap();

    let (area, _) = team
        .create_area("source", AddressSpec::Any, 1, LockMode::NoLock, Protection::READ_WRITE)
        .unwrap();
    team.write_area(area, 0, b"kept").unwrap();
    let (clone, _) = team
        .clone_area("copy", AddressSpec::Any, Protection::READ, area)
        .unwrap();

    team.delete_area(area).unwrap();
    assert_eq!(team.get_area_info(area).map(|_| ()), Err(Status::BadValue));

    let mut buf = [0u8; 4];
    team.read_area(clone, 0, &mut buf).unwrap();
    assert_eq!(&buf, b"kept");
    assert_eq!(team.get_area_info(clone).unwrap().share_count, 1);
}

#[test]
fn test_resize_reaches_every_clone() {
    let broker = Broker::default();
    let team = broker.attach("resizer").unwrap();
    let page = page_size();

    let (area, _) = team
        .create_area("grow", AddressSpec::Any, page, LockMode::NoLock, Protection::READ_WRITE)
        .unwrap();
    let (clone, _) = team
        .clone_area("grow view", AddressSpec::Any, Protection::READ_WRITE, area)
        .unwrap();
    team.write_area(area, 0, b"head").unwrap();

    team.resize_area(area, 3 * page).unwrap();
    assert_eq!(team.get_area_info(area).unwrap().size, 3 * page);
    assert_eq!(team.get_area_info(clone).unwrap().size, 3 * page);

    // Contents survive the remap and the new tail is shared too
    let mut head = [0u8; 4];
    team.read_area(clone, 0, &mut head).unwrap();
    assert_eq!(&head, b"head");
    team.write_area(clone, 2 * page, b"tail").unwrap();
    let mut tail = [0u8; 4];
    team.read_area(area, 2 * page, &mut tail).unwrap();
    assert_eq!(&tail, b"tail");

    team.resize_area(clone, page).unwrap();
    assert_eq!(team.get_area_info(area).unwrap().size, page);
    assert_eq!(
        team.read_area(area, 2 * page, &mut tail),
        Err(Status::BadValue)
    );
}

#[test]
fn test_protection_gates_accessors() {
    let broker = Broker::default();
    let team = broker.attach("guarded").unwrap();
    let (area, _) = team
        .create_area("ro", AddressSpec::Any, 1, LockMode::FullLock, Protection::READ_WRITE)
        .unwrap();

    team.set_area_protection(area, Protection::READ).unwrap();
    assert_eq!(team.write_area(area, 0, b"x"), Err(Status::NotAllowed));
    let mut buf = [0u8; 1];
    assert_eq!(team.read_area(area, 0, &mut buf), Ok(()));
    assert_eq!(
        team.get_area_info(area).unwrap().protection,
        Protection::READ.bits()
    );
}

#[test]
fn test_area_for_resolves_addresses() {
    let broker = Broker::default();
    let team = broker.attach("lookup").unwrap();
    let (area, address) = team
        .create_area("lookup", AddressSpec::Any, 1, LockMode::NoLock, Protection::READ_WRITE)
        .unwrap();

    assert_eq!(team.area_for(address), Ok(area));
    assert_eq!(team.area_for(address + page_size() - 1), Ok(area));
    assert_eq!(team.area_for(address + page_size()), Err(Status::EntryNotFound));
}

#[test]
fn test_only_owner_deletes_area() {
    let broker = Broker::default();
    let owner = broker.attach("owner").unwrap();
    let other = broker.attach("other").unwrap();
    let (area, _) = owner
        .create_area("mine", AddressSpec::Any, 1, LockMode::NoLock, Protection::READ_WRITE)
        .unwrap();

    assert_eq!(other.delete_area(area), Err(Status::NotAllowed));
    assert_eq!(owner.delete_area(area), Ok(()));
}

#[test]
fn test_invalid_requests() {
    let broker = Broker::default();
    let team = broker.attach("invalid").unwrap();

    assert_eq!(
        team.create_area("empty", AddressSpec::Any, 0, LockMode::NoLock, Protection::READ)
            .map(|_| ()),
        Err(Status::BadValue)
    );
    assert_eq!(team.find_area("missing"), Err(Status::EntryNotFound));
    assert_eq!(team.resize_area(12345, page_size()), Err(Status::BadValue));
}
