use std::collections::{HashMap, HashSet};

use crate::errors::{HttpErrorKind, HttpStatusError, RobjError, RobjResult};

/// What a response status means for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Redirect,
    Error(HttpErrorKind),
}

/// Status code to typed error mapping, with per-code suppression for
/// callers that want to handle a status themselves.
#[derive(Debug, Clone, Default)]
pub struct ErrorTable {
    suppressed: HashSet<u16>,
}

impl ErrorTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `status` as a success from now on.
    pub fn suppress(&mut self, status: u16) {
        self.suppressed.insert(status);
    }

    pub fn restore(&mut self, status: u16) {
        self.suppressed.remove(&status);
    }

    #[must_use]
    pub fn is_suppressed(&self, status: u16) -> bool {
        self.suppressed.contains(&status)
    }

    #[must_use]
    pub fn classify(&self, status: u16) -> StatusClass {
        if self.is_suppressed(status) {
            return StatusClass::Success;
        }
        if (300..400).contains(&status) {
            return StatusClass::Redirect;
        }
        match HttpErrorKind::from_status(status) {
            Some(kind) => StatusClass::Error(kind),
            None => StatusClass::Success,
        }
    }

    /// # Errors
    ///
    /// [`RobjError::Http`] when `status` maps to an error kind.
    pub fn check(&self, method: &str, uri: &str, status: u16, reason: &str) -> RobjResult<()> {
        match self.classify(status) {
            StatusClass::Error(kind) => Err(RobjError::Http(HttpStatusError {
                kind,
                method: method.to_string(),
                uri: uri.to_string(),
                status,
                reason: reason.to_string(),
            })),
            _ => Ok(()),
        }
    }
}

/// URI to URI table filled by `301 Moved Permanently`.
#[derive(Debug, Clone, Default)]
pub struct RedirectTable {
    moved: HashMap<String, String>,
}

impl RedirectTable {
    pub fn record(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.moved.insert(from.into(), to.into());
    }

    #[must_use]
    pub fn target(&self, uri: &str) -> Option<&str> {
        self.moved.get(uri).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.moved.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty()
    }

    /// Follows recorded moves from `uri`, returning the final URI and the
    /// number of hops taken.
    ///
    /// # Errors
    ///
    /// [`RobjError::MaxRedirects`] when the chain is longer than
    /// `max_hops` or loops.
    pub fn resolve(&self, uri: &str, max_hops: usize) -> RobjResult<(String, usize)> {
        let mut current = uri.to_string();
        let mut seen = HashSet::from([current.clone()]);
        let mut hops = 0;

        while let Some(next) = self.moved.get(&current) {
            hops += 1;
            if hops > max_hops || !seen.insert(next.clone()) {
                return Err(RobjError::MaxRedirects {
                    uri: uri.to_string(),
                    hops,
                });
            }
            current.clone_from(next);
        }
        Ok((current, hops))
    }
}
