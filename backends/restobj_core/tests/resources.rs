//! Proxies over a live API: lazy links, cached identified items, local
//! edits, persistence, deletion and raw content.

mod common;

use std::io::Cursor;

use restobj_core::wire::simple_http::SimpleMethod;
use restobj_core::{AttrValue, DeleteOutcome, Fetched, HttpData, Input, RobjError};

use common::{connect, text};

#[test]
fn test_root_links_resolve_lazily() {
    let (fixture, client) = connect();

    let root = client.root().expect("root");
    assert_eq!(root.to_string(), "<restobj(api)>");
    assert_eq!(text(&root, "name"), "fixture");
    assert_eq!(fixture.hits(SimpleMethod::GET, "/employees"), 0);

    let employees = root
        .get("employees")
        .expect("link")
        .into_proxy()
        .expect("document");
    assert_eq!(fixture.hits(SimpleMethod::GET, "/employees"), 1);
    assert!(employees.is_collection());
    assert_eq!(employees.child_tag().as_deref(), Some("employee"));
    assert_eq!(employees.len().expect("len"), 2);
}

/// WHY: Embedded items carrying an id are resources of their own
/// WHAT: They are cached from the collection document without another request
#[test]
fn test_identified_items_are_cached_without_fetching() {
    let (fixture, client) = connect();

    let employees = client.do_get("/employees").expect("employees");
    let joe = employees.item(0).expect("item").into_proxy().expect("proxy");
    assert_eq!(joe.uri(), "/employees/1");
    assert_eq!(text(&joe, "name"), "Joe");

    let again = client.do_get("/employees/1").expect("cached");
    assert!(again.ptr_eq(&joe));
    assert_eq!(fixture.hits(SimpleMethod::GET, "/employees/1"), 0);

    assert!(matches!(
        employees.set_item(0, "someone else"),
        Err(RobjError::RemoteInstanceOverwrite { .. })
    ));
}

#[test]
fn test_field_paths_cross_links() {
    let (_fixture, client) = connect();

    let root = client.root().expect("root");
    let zipcode = root.traverse("employees.1.address.zipcode").expect("path");
    assert_eq!(zipcode.as_text(), Some("94110"));

    let phone = root.traverse("employees.0.phones.1").expect("path");
    assert_eq!(phone.as_text(), Some("555-9876"));
}

/// WHY: DELETE is idempotent from the caller's point of view
/// WHAT: 200 then 404 both succeed and drop the cache entry; other statuses fail
#[test]
fn test_delete_outcomes() {
    let (fixture, client) = connect();

    let ann = client.do_get("/employees/2").expect("ann");
    assert!(client.cache().contains("/employees/2"));

    assert_eq!(ann.delete().expect("first delete"), DeleteOutcome::Deleted);
    assert!(!client.cache().contains("/employees/2"));
    assert_eq!(ann.delete().expect("second delete"), DeleteOutcome::AlreadyGone);
    assert_eq!(fixture.api().collection_len("employees"), 1);

    let err = client.do_delete("/teams").expect_err("405");
    assert!(matches!(err, RobjError::Delete(_)));
    assert_eq!(err.status(), Some(405));
}

#[test]
fn test_delete_item_removes_remote_resource() {
    let (fixture, client) = connect();

    let employees = client.do_get("/employees").expect("employees");
    employees.delete_item(1).expect("deletes /employees/2");
    assert_eq!(employees.len().expect("len"), 1);
    assert!(!employees.is_dirty());
    assert_eq!(fixture.hits(SimpleMethod::DELETE, "/employees/2"), 1);
    assert!(fixture.api().item("employees", 2).is_none());
}

/// WHY: persist without edits must not write anything
/// WHAT: It refreshes instead, picking up changes made by someone else
#[test]
fn test_persist_without_edits_refreshes() {
    let (fixture, client) = connect();
    let other = common::connect_with(&fixture, |settings| settings.with_threaded(false));

    let joe = client.do_get("/employees/1").expect("joe");
    let theirs = other.do_get("/employees/1").expect("joe for someone else");
    theirs.set("name", "Joseph").expect("local edit");
    theirs.persist(false).expect("put");
    assert_eq!(fixture.hits(SimpleMethod::PUT, "/employees/1"), 1);

    joe.persist(false).expect("refreshes");
    assert_eq!(text(&joe, "name"), "Joseph");
    assert_eq!(joe.generation(), 1);
    assert_eq!(fixture.hits(SimpleMethod::PUT, "/employees/1"), 1);
    assert_eq!(fixture.hits(SimpleMethod::GET, "/employees/1"), 3);
}

/// WHY: Nested structure belongs to the resource that embeds it
/// WHAT: Editing a nested field dirties both, persisting writes the whole
/// resource and the old nested proxy is invalidated
#[test]
fn test_nested_edit_persists_through_parent() {
    let (fixture, client) = connect();

    let employee = client.do_get("/employees/1").expect("employee");
    let address = employee
        .get("address")
        .expect("address")
        .into_proxy()
        .expect("nested proxy");
    address.set("zipcode", "90210").expect("edit");
    assert!(employee.is_dirty());
    assert!(address.is_dirty());

    address.persist(false).expect("persists");
    assert!(!employee.is_dirty());
    assert_eq!(fixture.hits(SimpleMethod::PUT, "/employees/1"), 1);
    let stored = fixture.api().item("employees", 1).expect("stored");
    assert_eq!(stored["address"]["zipcode"], "90210");

    let fresh = employee
        .get("address")
        .expect("address")
        .into_proxy()
        .expect("nested proxy");
    assert!(!fresh.ptr_eq(&address));
    assert_eq!(text(&fresh, "zipcode"), "90210");
    assert!(matches!(
        address.get("zipcode"),
        Err(RobjError::StaleProxy { .. })
    ));
}

#[test]
fn test_refresh_keeps_local_edits_unless_forced() {
    let (_fixture, client) = connect();

    let joe = client.do_get("/employees/1").expect("joe");
    joe.set("name", "Jo").expect("edit");
    joe.refresh(false).expect("keeps edits");
    assert_eq!(text(&joe, "name"), "Jo");

    joe.refresh(true).expect("discards edits");
    assert_eq!(text(&joe, "name"), "Joe");
    assert!(!joe.is_dirty());
}

/// WHY: Posting into an empty collection is how resources are created
/// WHAT: The collection becomes one of `team` items and the item reads back
#[test]
fn test_append_with_post_to_empty_collection() {
    let (fixture, client) = connect();

    let teams = client
        .root()
        .expect("root")
        .get("teams")
        .expect("teams")
        .into_proxy()
        .expect("document");
    assert!(!teams.is_collection());
    assert_eq!(teams.child_tag().as_deref(), Some("team"));

    let created = teams
        .append(Input::map([("name", "Blue")]), true, None)
        .expect("posts")
        .into_proxy()
        .expect("created resource");
    assert_eq!(created.uri(), "/teams/1");
    assert!(teams.is_collection());
    assert_eq!(teams.child_tag().as_deref(), Some("team"));
    assert_eq!(teams.len().expect("len"), 1);
    assert!(!teams.is_dirty());
    assert_eq!(fixture.hits(SimpleMethod::POST, "/teams"), 1);

    client.clear_cache(None).expect("clears");
    let fetched = client.do_get("/teams/1").expect("round trip");
    assert_eq!(text(&fetched, "name"), "Blue");
    let listed = client.do_get("/teams").expect("teams again");
    assert_eq!(listed.len().expect("len"), 1);
}

/// WHY: Servers often answer a create with 303 to the new resource
/// WHAT: The created item is returned and cached under its own URI while
/// the collection keeps its document and gains the item
#[test]
fn test_append_answered_with_see_other() {
    let (fixture, client) = connect();

    let projects = client.do_get("/projects").expect("projects");
    assert!(projects.is_collection());
    assert_eq!(projects.child_tag().as_deref(), Some("project"));
    assert_eq!(projects.len().expect("len"), 2);

    let created = projects
        .append(Input::map([("name", "gamma")]), true, None)
        .expect("posts")
        .into_proxy()
        .expect("created resource");
    assert_eq!(created.uri(), "/projects/3");
    assert_eq!(text(&created, "name"), "gamma");

    assert_eq!(projects.tag().as_deref(), Some("projects"));
    assert!(projects.is_collection());
    assert_eq!(projects.len().expect("len"), 3);
    assert_eq!(projects.generation(), 0);
    assert!(client.cache().contains("/projects/3"));

    let cached = client.do_get("/projects").expect("cached projects");
    assert_eq!(cached.tag().as_deref(), Some("projects"));
    assert_eq!(cached.len().expect("len"), 3);
    assert_eq!(fixture.hits(SimpleMethod::POST, "/projects"), 1);
    assert_eq!(fixture.hits(SimpleMethod::GET, "/projects"), 1);
}

#[test]
fn test_local_append_then_persist() {
    let (fixture, client) = connect();

    let employee = client.do_get("/employees/1").expect("employee");
    let phones = employee
        .get("phones")
        .expect("phones")
        .into_proxy()
        .expect("nested");
    phones.append("555-0000", false, None).expect("local append");
    assert!(employee.is_dirty());

    employee.persist(false).expect("put");
    let stored = fixture.api().item("employees", 1).expect("stored");
    assert_eq!(stored["phones"]["phone"][2], "555-0000");
}

/// WHY: Links may point at files rather than documents
/// WHAT: Writing raw data posts it to the link; reading returns the content
#[test]
fn test_raw_content_through_links() {
    let (fixture, client) = connect();

    let joe = client.do_get("/employees/1").expect("joe");
    joe.set("file", HttpData::bytes(b"hello".to_vec(), "text/plain"))
        .expect("upload");
    assert_eq!(
        fixture.api().file(1),
        Some(("text/plain".to_string(), b"hello".to_vec()))
    );
    assert!(!joe.is_dirty());

    match joe.get("file").expect("download") {
        AttrValue::Content(response) => assert_eq!(response.body, b"hello"),
        other => panic!("expected raw content, got {other:?}"),
    }

    assert!(matches!(
        client.fetch("/text", None, true).expect("text"),
        Fetched::Content(_)
    ));
    assert!(matches!(
        client.do_get("/text"),
        Err(RobjError::NotADocument { .. })
    ));
}

/// WHY: Streams of unknown size cannot carry a Content-Length
/// WHAT: They are sent with chunked coding and arrive intact
#[test]
fn test_chunked_upload() {
    let (fixture, client) = connect();

    let payload: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    let joe = client.do_get("/employees/1").expect("joe");
    joe.set(
        "file",
        HttpData::stream(Cursor::new(payload.clone()), None, "application/octet-stream"),
    )
    .expect("upload");

    let (content_type, stored) = fixture.api().file(1).expect("stored");
    assert_eq!(content_type, "application/octet-stream");
    assert_eq!(stored, payload);

    let upload = fixture
        .server()
        .requests()
        .into_iter()
        .find(|request| request.method == SimpleMethod::POST)
        .expect("upload request");
    assert!(upload.was_chunked());
    assert!(upload.header("content-length").is_none());
}

#[test]
fn test_proxies_outlive_the_client_as_data_only() {
    let (_fixture, client) = connect();

    let joe = client.do_get("/employees/1").expect("joe");
    drop(client);

    assert_eq!(text(&joe, "name"), "Joe");
    assert!(matches!(joe.get("file"), Err(RobjError::ClientClosed)));
    assert!(matches!(joe.refresh(true), Err(RobjError::ClientClosed)));
}
