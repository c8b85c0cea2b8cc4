//! Shared setup for the integration tests.

#![allow(dead_code)]

use restobj_core::{ClientSettings, HttpClient, ResourceProxy};
use restobj_testing::FixtureServer;

/// A fixture server plus a client driving requests on the test thread.
pub fn connect() -> (FixtureServer, HttpClient) {
    let fixture = FixtureServer::start();
    let client = connect_with(&fixture, |settings| settings.with_threaded(false));
    (fixture, client)
}

pub fn connect_with(
    fixture: &FixtureServer,
    configure: impl FnOnce(ClientSettings) -> ClientSettings,
) -> HttpClient {
    let settings = configure(ClientSettings::new(fixture.base_uri()));
    HttpClient::new(settings).expect("client should connect")
}

pub fn text(proxy: &ResourceProxy, name: &str) -> String {
    proxy
        .get(name)
        .expect("attribute should resolve")
        .as_text()
        .expect("attribute should be text")
        .to_string()
}
