use std::collections::BTreeMap;
use std::str::FromStr;

/// Header names are normalized to upper case so lookups are
/// case-insensitive; `Custom` keeps any name without a dedicated variant.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(non_camel_case_types)]
pub enum SimpleHeader {
    ACCEPT,
    AUTHORIZATION,
    CONNECTION,
    CONTENT_LENGTH,
    CONTENT_LOCATION,
    CONTENT_TYPE,
    DATE,
    HOST,
    KEEP_ALIVE,
    LOCATION,
    SERVER,
    TRANSFER_ENCODING,
    USER_AGENT,
    Custom(String),
}

impl From<String> for SimpleHeader {
    fn from(value: String) -> Self {
        let upper = value.trim().to_uppercase().replace('_', "-");
        match upper.as_str() {
            "ACCEPT" => Self::ACCEPT,
            "AUTHORIZATION" => Self::AUTHORIZATION,
            "CONNECTION" => Self::CONNECTION,
            "CONTENT-LENGTH" => Self::CONTENT_LENGTH,
            "CONTENT-LOCATION" => Self::CONTENT_LOCATION,
            "CONTENT-TYPE" => Self::CONTENT_TYPE,
            "DATE" => Self::DATE,
            "HOST" => Self::HOST,
            "KEEP-ALIVE" => Self::KEEP_ALIVE,
            "LOCATION" => Self::LOCATION,
            "SERVER" => Self::SERVER,
            "TRANSFER-ENCODING" => Self::TRANSFER_ENCODING,
            "USER-AGENT" => Self::USER_AGENT,
            _ => Self::Custom(upper),
        }
    }
}

impl From<&str> for SimpleHeader {
    fn from(value: &str) -> Self {
        Self::from(String::from(value))
    }
}

impl FromStr for SimpleHeader {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl core::fmt::Display for SimpleHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom(inner) => write!(f, "{inner}"),
            Self::ACCEPT => write!(f, "ACCEPT"),
            Self::AUTHORIZATION => write!(f, "AUTHORIZATION"),
            Self::CONNECTION => write!(f, "CONNECTION"),
            Self::CONTENT_LENGTH => write!(f, "CONTENT-LENGTH"),
            Self::CONTENT_LOCATION => write!(f, "CONTENT-LOCATION"),
            Self::CONTENT_TYPE => write!(f, "CONTENT-TYPE"),
            Self::DATE => write!(f, "DATE"),
            Self::HOST => write!(f, "HOST"),
            Self::KEEP_ALIVE => write!(f, "KEEP-ALIVE"),
            Self::LOCATION => write!(f, "LOCATION"),
            Self::SERVER => write!(f, "SERVER"),
            Self::TRANSFER_ENCODING => write!(f, "TRANSFER-ENCODING"),
            Self::USER_AGENT => write!(f, "USER-AGENT"),
        }
    }
}

/// Multi-valued headers; values under one name keep insertion order.
pub type SimpleHeaders = BTreeMap<SimpleHeader, Vec<String>>;

pub fn add_header(headers: &mut SimpleHeaders, name: impl Into<SimpleHeader>, value: impl Into<String>) {
    headers.entry(name.into()).or_default().push(value.into());
}

/// Replaces every value under `name` with a single value.
pub fn set_header(headers: &mut SimpleHeaders, name: impl Into<SimpleHeader>, value: impl Into<String>) {
    headers.insert(name.into(), vec![value.into()]);
}

#[must_use]
pub fn first_header<'a>(headers: &'a SimpleHeaders, name: &SimpleHeader) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|values| values.first())
        .map(String::as_str)
}

/// True when any value under `name` contains `token`, compared
/// case-insensitively across comma separated lists.
#[must_use]
pub fn header_has_token(headers: &SimpleHeaders, name: &SimpleHeader, token: &str) -> bool {
    headers.get(name).is_some_and(|values| {
        values.iter().any(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SimpleMethod {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
}

impl SimpleMethod {
    /// Methods whose responses never carry a body.
    #[must_use]
    pub fn expects_no_body(self) -> bool {
        matches!(self, Self::HEAD)
    }

    #[must_use]
    pub fn parse(method: &str) -> Option<Self> {
        match method.trim().to_uppercase().as_str() {
            "GET" => Some(Self::GET),
            "POST" => Some(Self::POST),
            "PUT" => Some(Self::PUT),
            "DELETE" => Some(Self::DELETE),
            "HEAD" => Some(Self::HEAD),
            _ => None,
        }
    }
}

impl core::fmt::Display for SimpleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GET => write!(f, "GET"),
            Self::POST => write!(f, "POST"),
            Self::PUT => write!(f, "PUT"),
            Self::DELETE => write!(f, "DELETE"),
            Self::HEAD => write!(f, "HEAD"),
        }
    }
}
