//! Transient key/value data carried between requests.

use std::collections::BTreeMap;

use axum::http::header::COOKIE;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::HttpMetadata;

pub const DEFAULT_TEMPDATA_COOKIE: &str = "turbopush.tempdata";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempData(BTreeMap<String, Value>);

impl TempData {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for TempData {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Source of temp data for a request or for the upgrade request of a hub
/// connection.
pub trait TempDataProvider: Send + Sync {
    fn load(&self, http: &HttpMetadata) -> TempData;
}

/// Reads temp data from a URL-encoded JSON object stored in a cookie.
#[derive(Debug, Clone)]
pub struct CookieTempDataProvider {
    cookie_name: String,
}

impl CookieTempDataProvider {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    fn cookie_value<'a>(&self, http: &'a HttpMetadata) -> Option<&'a str> {
        http.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value)
    }
}

impl Default for CookieTempDataProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPDATA_COOKIE)
    }
}

impl TempDataProvider for CookieTempDataProvider {
    fn load(&self, http: &HttpMetadata) -> TempData {
        let Some(raw) = self.cookie_value(http) else {
            return TempData::default();
        };

        let decoded = match urlencoding::decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("Ignoring undecodable {} cookie: {}", self.cookie_name, e);
                return TempData::default();
            }
        };

        serde_json::from_str(&decoded).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed {} cookie: {}", self.cookie_name, e);
            TempData::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RouteData;
    use axum::http::{HeaderMap, HeaderValue, Method, Uri};
    use serde_json::json;

    fn http_with_cookie(cookie: &str) -> HttpMetadata {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
        HttpMetadata::new(Method::GET, Uri::from_static("/"), headers, RouteData::default())
    }

    #[test]
    fn reads_url_encoded_json_cookie() {
        let encoded = urlencoding::encode(r#"{"notice":"saved"}"#);
        let http = http_with_cookie(&format!("theme=dark; turbopush.tempdata={encoded}"));

        let temp_data = CookieTempDataProvider::default().load(&http);
        assert_eq!(temp_data.get("notice"), Some(&json!("saved")));
        assert_eq!(temp_data.len(), 1);
    }

    #[test]
    fn missing_cookie_yields_empty_data() {
        let http = http_with_cookie("theme=dark");
        assert!(CookieTempDataProvider::default().load(&http).is_empty());
    }

    #[test]
    fn malformed_cookie_yields_empty_data() {
        let http = http_with_cookie("turbopush.tempdata=not-json");
        assert!(CookieTempDataProvider::default().load(&http).is_empty());
    }

    #[test]
    fn custom_cookie_name_is_honoured() {
        let encoded = urlencoding::encode(r#"{"a":1}"#);
        let http = http_with_cookie(&format!("flash={encoded}"));
        let temp_data = CookieTempDataProvider::new("flash").load(&http);
        assert_eq!(temp_data.get("a"), Some(&json!(1)));
    }
}
