//! Paged collections walked over the fixture's `/numbers` pages.

mod common;

use restobj_core::{Input, PagedCollection, RobjError};

use common::{connect, text};

fn value(item: &restobj_core::AttrValue) -> String {
    text(item.as_proxy().expect("numbers are resources"), "value")
}

/// WHY: Pages are fetched only when an index lands on them
/// WHAT: Reaching index 23 from page 0 fetches pages 1 and 2 once
#[test]
fn test_index_fetches_only_needed_pages() {
    let (fixture, client) = connect();

    let first = client.do_get("/numbers").expect("first page");
    assert!(PagedCollection::is_paged(&first));
    let numbers = PagedCollection::new(first).expect("paged");
    assert_eq!(numbers.id(), "/numbers");
    assert_eq!(numbers.len(), 25);
    assert_eq!(numbers.to_string(), "<restobj::PagedCollection(/numbers)>");

    fixture.server().clear_requests();
    assert_eq!(value(&numbers.get(23).expect("item 23")), "23");
    let targets: Vec<String> = fixture
        .server()
        .requests()
        .into_iter()
        .map(|request| request.target)
        .collect();
    assert_eq!(targets, vec!["/api/numbers?start=10", "/api/numbers?start=20"]);

    assert_eq!(value(&numbers.get(23).expect("item 23 again")), "23");
    assert_eq!(value(&numbers.get(4).expect("item 4")), "4");
    assert_eq!(fixture.server().request_count(), 2);
    assert_eq!(numbers.fetched_pages(), vec![0, 1, 2]);
}

#[test]
fn test_walks_backwards_from_a_later_page() {
    let (fixture, client) = connect();

    let last = client.do_get("/numbers?start=20").expect("last page");
    let numbers = PagedCollection::new(last).expect("paged");
    fixture.server().clear_requests();

    assert_eq!(value(&numbers.get(3).expect("item 3")), "3");
    assert_eq!(fixture.server().request_count(), 2);
    assert_eq!(numbers.page(0).expect("page 0").meta().start_index, 0);
}

#[test]
fn test_iterates_every_item_once() {
    let (_fixture, client) = connect();

    let numbers = PagedCollection::new(client.do_get("/numbers").expect("page")).expect("paged");
    let values: Vec<String> = numbers.iter().expect("iter").iter().map(value).collect();
    let expected: Vec<String> = (0..25).map(|i| i.to_string()).collect();
    assert_eq!(values, expected);
}

#[test]
fn test_out_of_range_indexes() {
    let (_fixture, client) = connect();

    let numbers = PagedCollection::new(client.do_get("/numbers").expect("page")).expect("paged");
    assert!(matches!(
        numbers.page(3),
        Err(RobjError::IndexOutOfRange { index: 3, len: 3 })
    ));
    assert!(matches!(
        numbers.get(25),
        Err(RobjError::IndexOutOfRange { .. })
    ));
}

#[test]
fn test_siblings_and_non_paged_resources() {
    let (_fixture, client) = connect();

    let first = client.do_get("/numbers").expect("first");
    let second = client.do_get("/numbers?start=10").expect("second");
    let employees = client.do_get("/employees").expect("employees");

    assert!(PagedCollection::is_sibling(&first, &second));
    assert!(!PagedCollection::is_sibling(&first, &employees));
    assert!(!PagedCollection::is_paged(&employees));
    assert!(matches!(
        PagedCollection::new(employees),
        Err(RobjError::NotACollection { .. })
    ));
}

/// WHY: New items go to the full collection, not to whichever page was loaded
/// WHAT: Local appends land on the write proxy and are remembered
#[test]
fn test_local_append_goes_through_writer() {
    let (fixture, client) = connect();

    let numbers = PagedCollection::new(client.do_get("/numbers").expect("page")).expect("paged");
    let appended = numbers
        .append(Input::map([("value", "25")]), false, None)
        .expect("local append");
    assert_eq!(text(appended.as_proxy().expect("item"), "value"), "25");
    assert_eq!(numbers.appended().len(), 1);
    assert_eq!(numbers.len(), 25);
    assert_eq!(fixture.server().request_count(), 1);
}
