//! An in-memory document API served under `/api`.
//!
//! Resources:
//!
//! * `/` links to `employees`, `teams`, `projects` and `numbers`;
//! * `/employees`, `/teams` and `/projects` are collections with create,
//!   read, update and delete on `/{collection}/{n}`; `employees` and
//!   `projects` start with two entries, `teams` starts empty; creating a
//!   project answers 303 to the new item instead of 201;
//! * `/employees/{n}/file` stores whatever bytes are posted to it;
//! * `/numbers` pages through 25 numbers, ten per page, with
//!   `?start=10` and `?start=20` as the later pages;
//! * redirect fixtures: `/moved` (301), `/found` (302), `/see-other`
//!   (303), `/temporary` (307), `/loop-a` and `/loop-b`, `/chain/{n}`,
//!   `/choices` (300), `/permanent-new` (308), `/not-modified` and
//!   `/stable` (304);
//! * `/text`, `/broken`, `/flaky`, `/slow?ms=N` and `/whoami` for
//!   content, error, dropped connection, latency and header checks.
//!
//! Every resource addresses others relative to the API base, the way the
//! client expects ids and links.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use restobj_core::wire::simple_http::{RawRequest, SimpleMethod};
use serde_json::{json, Map, Value as Json};

use crate::http::{HttpResponse, TestHttpServer};

pub const API_PREFIX: &str = "/api";
pub const NUMBERS_TOTAL: usize = 25;
pub const PAGE_SIZE: usize = 10;

#[derive(Debug, Default)]
struct Collection {
    items: BTreeMap<usize, Json>,
    next_id: usize,
}

impl Collection {
    fn insert(&mut self, name: &str, mut item: Json) -> (usize, Json) {
        self.next_id += 1;
        let id = self.next_id;
        if let Json::Object(fields) = &mut item {
            fields.insert("@id".into(), json!(format!("/{name}/{id}")));
        }
        self.items.insert(id, item.clone());
        (id, item)
    }
}

#[derive(Debug, Default)]
struct Store {
    collections: BTreeMap<String, Collection>,
    files: HashMap<String, (String, Vec<u8>)>,
    not_modified_requests: usize,
    stable_requests: usize,
    flaky_requests: usize,
}

/// The fixture's state and request handler.
#[derive(Debug)]
pub struct FixtureApi {
    store: Mutex<Store>,
}

impl Default for FixtureApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureApi {
    /// A fresh API holding Joe and Ann as employees, two projects and no
    /// teams.
    #[must_use]
    pub fn new() -> Self {
        let mut employees = Collection::default();
        for (name, age, zipcode) in [("Joe", "31", "10001"), ("Ann", "42", "94110")] {
            let id = employees.next_id + 1;
            employees.insert(
                "employees",
                json!({
                    "name": name,
                    "age": age,
                    "address": {"street": "1 Main St", "zipcode": zipcode},
                    "phones": {"phone": ["555-1234", "555-9876"]},
                    "file": {"@href": format!("/employees/{id}/file")},
                }),
            );
        }

        let mut projects = Collection::default();
        for name in ["alpha", "beta"] {
            projects.insert("projects", json!({"name": name}));
        }

        let mut store = Store::default();
        store.collections.insert("employees".into(), employees);
        store.collections.insert("projects".into(), projects);
        store.collections.insert("teams".into(), Collection::default());
        Self {
            store: Mutex::new(store),
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored body of `/{collection}/{id}`, without its root tag.
    #[must_use]
    pub fn item(&self, collection: &str, id: usize) -> Option<Json> {
        self.store()
            .collections
            .get(collection)
            .and_then(|items| items.items.get(&id))
            .cloned()
    }

    #[must_use]
    pub fn collection_len(&self, collection: &str) -> usize {
        self.store()
            .collections
            .get(collection)
            .map_or(0, |items| items.items.len())
    }

    /// Content type and bytes last posted to `/employees/{id}/file`.
    #[must_use]
    pub fn file(&self, id: usize) -> Option<(String, Vec<u8>)> {
        self.store().files.get(&format!("/employees/{id}/file")).cloned()
    }

    /// Answers one request.
    #[must_use]
    pub fn handle(&self, request: &RawRequest) -> HttpResponse {
        let Some(target) = request.target.strip_prefix(API_PREFIX) else {
            return not_found();
        };
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let segments: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        let method = request.method;

        match (method, segments.as_slice()) {
            (SimpleMethod::GET, []) => HttpResponse::json(
                200,
                &json!({"api": {
                    "name": "fixture",
                    "employees": {"@href": "/employees"},
                    "teams": {"@href": "/teams"},
                    "projects": {"@href": "/projects"},
                    "numbers": {"@href": "/numbers"},
                }}),
            ),

            (SimpleMethod::GET, ["numbers"]) => numbers_page(query),
            (SimpleMethod::GET, ["numbers", index]) => match index.parse::<usize>() {
                Ok(index) if index < NUMBERS_TOTAL => HttpResponse::json(200, &number(index)),
                _ => not_found(),
            },

            (_, ["employees", id, "file"]) => self.file_resource(request, &format!("/employees/{id}/file")),
            (_, [collection]) if self.store().collections.contains_key(*collection) => {
                self.collection_resource(request, collection)
            }
            (_, [collection, id]) if self.store().collections.contains_key(*collection) => {
                match id.parse::<usize>() {
                    Ok(id) => self.item_resource(request, collection, id),
                    Err(_) => not_found(),
                }
            }

            (_, ["moved"]) => HttpResponse::redirect(301, "/api/employees/1"),
            (_, ["found"]) => HttpResponse::redirect(302, "/api/employees/1"),
            (_, ["see-other"]) => HttpResponse::redirect(303, "/api/employees/2"),
            (_, ["temporary"]) => HttpResponse::redirect(307, "/api/employees/1"),
            (_, ["loop-a"]) => HttpResponse::redirect(302, "/api/loop-b"),
            (_, ["loop-b"]) => HttpResponse::redirect(302, "/api/loop-a"),
            (_, ["chain", hops]) => match hops.parse::<usize>() {
                Ok(0) => HttpResponse::redirect(302, "/api/employees/1"),
                Ok(hops) => HttpResponse::redirect(302, &format!("/api/chain/{}", hops - 1)),
                Err(_) => not_found(),
            },
            (_, ["choices"]) => HttpResponse::redirect(300, "/api/employees/1"),
            (_, ["permanent-new"]) => HttpResponse::redirect(308, "/api/employees/1"),
            (SimpleMethod::GET, ["not-modified"]) => {
                let mut store = self.store();
                store.not_modified_requests += 1;
                if store.not_modified_requests % 2 == 1 {
                    HttpResponse::status(304, "Not Modified")
                } else {
                    HttpResponse::json(200, &json!({"status": {"state": "fresh"}}))
                }
            }
            (SimpleMethod::GET, ["stable"]) => {
                let mut store = self.store();
                store.stable_requests += 1;
                if store.stable_requests == 1 {
                    HttpResponse::json(200, &json!({"stable": {"@id": "/stable", "state": "ok"}}))
                } else {
                    HttpResponse::status(304, "Not Modified")
                }
            }

            (SimpleMethod::GET, ["text"]) => HttpResponse::ok(b"plain text".to_vec()),
            (_, ["broken"]) => HttpResponse::status(500, "Internal Server Error"),
            (SimpleMethod::GET, ["flaky"]) => {
                let mut store = self.store();
                store.flaky_requests += 1;
                HttpResponse::json(
                    200,
                    &json!({"flaky": {"served": store.flaky_requests.to_string()}}),
                )
                .and_drop_connection()
            }
            (SimpleMethod::GET, ["slow"]) => {
                let millis = query
                    .strip_prefix("ms=")
                    .and_then(|ms| ms.parse::<u64>().ok())
                    .unwrap_or(100);
                thread::sleep(Duration::from_millis(millis));
                HttpResponse::json(200, &json!({"slow": {"waited": millis.to_string()}}))
            }
            (SimpleMethod::GET, ["whoami"]) => HttpResponse::json(
                200,
                &json!({"whoami": {
                    "authorization": request.header("authorization").unwrap_or_default(),
                    "client": request.header("x-client").unwrap_or_default(),
                    "accept": request.header("accept").unwrap_or_default(),
                }}),
            ),

            _ => not_found(),
        }
    }

    fn collection_resource(&self, request: &RawRequest, name: &str) -> HttpResponse {
        let singular = name.trim_end_matches('s');
        let mut store = self.store();
        let Some(collection) = store.collections.get_mut(name) else {
            return not_found();
        };

        match request.method {
            SimpleMethod::GET => {
                let items: Vec<Json> = collection.items.values().cloned().collect();
                let body = if items.is_empty() {
                    json!({})
                } else {
                    json!({ singular: items })
                };
                HttpResponse::json(200, &json!({ name: body }))
            }
            SimpleMethod::POST => match document_body(request, singular) {
                Some(item) => {
                    let (id, item) = collection.insert(name, item);
                    let location = format!("{API_PREFIX}/{name}/{id}");
                    if name == "projects" {
                        return HttpResponse::redirect(303, &location);
                    }
                    HttpResponse::json(201, &json!({ singular: item })).with_header("Location", &location)
                }
                None => HttpResponse::status(400, "Bad Request"),
            },
            _ => HttpResponse::status(405, "Method Not Allowed"),
        }
    }

    fn item_resource(&self, request: &RawRequest, name: &str, id: usize) -> HttpResponse {
        let singular = name.trim_end_matches('s');
        let mut store = self.store();
        let Some(collection) = store.collections.get_mut(name) else {
            return not_found();
        };

        match request.method {
            SimpleMethod::GET | SimpleMethod::HEAD => match collection.items.get(&id) {
                Some(item) => HttpResponse::json(200, &json!({ singular: item })),
                None => not_found(),
            },
            SimpleMethod::PUT => {
                if !collection.items.contains_key(&id) {
                    return not_found();
                }
                let Some(mut item) = document_body(request, singular) else {
                    return HttpResponse::status(400, "Bad Request");
                };
                if let Json::Object(fields) = &mut item {
                    fields.insert("@id".into(), json!(format!("/{name}/{id}")));
                }
                collection.items.insert(id, item.clone());
                HttpResponse::json(200, &json!({ singular: item }))
            }
            SimpleMethod::DELETE => match collection.items.remove(&id) {
                Some(_) => HttpResponse::status(200, "OK"),
                None => not_found(),
            },
            SimpleMethod::POST => HttpResponse::status(405, "Method Not Allowed"),
        }
    }

    fn file_resource(&self, request: &RawRequest, key: &str) -> HttpResponse {
        let mut store = self.store();
        match request.method {
            SimpleMethod::GET => match store.files.get(key) {
                Some((content_type, bytes)) => HttpResponse::status(200, "OK")
                    .with_header("Content-Type", content_type)
                    .with_body(bytes.clone()),
                None => not_found(),
            },
            SimpleMethod::POST | SimpleMethod::PUT => {
                let content_type = request
                    .header("content-type")
                    .unwrap_or("application/octet-stream")
                    .to_string();
                store
                    .files
                    .insert(key.to_string(), (content_type, request.body.clone()));
                HttpResponse::status(201, "Created")
            }
            _ => HttpResponse::status(405, "Method Not Allowed"),
        }
    }
}

fn not_found() -> HttpResponse {
    HttpResponse::status(404, "Not Found")
}

/// The body under `tag` of a posted `{tag: {...}}` document.
fn document_body(request: &RawRequest, tag: &str) -> Option<Json> {
    let Json::Object(mut root) = serde_json::from_slice::<Json>(&request.body).ok()? else {
        return None;
    };
    match root.remove(tag)? {
        Json::Null => Some(Json::Object(Map::new())),
        body @ Json::Object(_) => Some(body),
        _ => None,
    }
}

fn number(index: usize) -> Json {
    json!({"number": {"@id": format!("/numbers/{index}"), "value": index.to_string()}})
}

fn page_uri(start: usize) -> String {
    if start == 0 {
        "/numbers".to_string()
    } else {
        format!("/numbers?start={start}")
    }
}

fn numbers_page(query: &str) -> HttpResponse {
    let start = query
        .strip_prefix("start=")
        .and_then(|start| start.parse::<usize>().ok())
        .unwrap_or(0);
    if start >= NUMBERS_TOTAL || start % PAGE_SIZE != 0 {
        return not_found();
    }

    let end = (start + PAGE_SIZE).min(NUMBERS_TOTAL);
    let items: Vec<Json> = (start..end)
        .map(|index| json!({"@id": format!("/numbers/{index}"), "value": index.to_string()}))
        .collect();
    let next = if end < NUMBERS_TOTAL { page_uri(end) } else { String::new() };
    let previous = if start == 0 { String::new() } else { page_uri(start - PAGE_SIZE) };

    HttpResponse::json(
        200,
        &json!({"numbers": {
            "@id": page_uri(start),
            "@count": NUMBERS_TOTAL.to_string(),
            "@limit": PAGE_SIZE.to_string(),
            "@per_page": PAGE_SIZE.to_string(),
            "@num_pages": NUMBERS_TOTAL.div_ceil(PAGE_SIZE).to_string(),
            "@start_index": start.to_string(),
            "@end_index": (end - 1).to_string(),
            "@next_page": next,
            "@previous_page": previous,
            "@full_collection": "/numbers",
            "number": items,
        }}),
    )
}

/// A [`TestHttpServer`] answering through a fresh [`FixtureApi`].
#[derive(Debug)]
pub struct FixtureServer {
    api: Arc<FixtureApi>,
    server: TestHttpServer,
}

impl FixtureServer {
    #[must_use]
    pub fn start() -> Self {
        let api = Arc::new(FixtureApi::new());
        let handler_api = Arc::clone(&api);
        let server = TestHttpServer::with_response(move |request| handler_api.handle(request));
        Self { api, server }
    }

    /// `http://127.0.0.1:{port}/api`
    #[must_use]
    pub fn base_uri(&self) -> String {
        self.server.url(API_PREFIX)
    }

    /// The base URI with basic auth credentials in its user-info.
    #[must_use]
    pub fn base_uri_with_credentials(&self, user: &str, password: &str) -> String {
        self.base_uri()
            .replacen("http://", &format!("http://{user}:{password}@"), 1)
    }

    #[must_use]
    pub fn api(&self) -> &FixtureApi {
        &self.api
    }

    #[must_use]
    pub fn server(&self) -> &TestHttpServer {
        &self.server
    }

    /// Requests for `method` on `path`, given relative to the API base.
    #[must_use]
    pub fn hits(&self, method: SimpleMethod, path: &str) -> usize {
        self.server.hits(method, &format!("{API_PREFIX}{path}"))
    }
}
