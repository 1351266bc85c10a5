//! Request validation module
//!
//! Content-type and body checks shared by the JSON endpoints.

use axum::http::{header, HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

pub const NO_JSON_DATA: &str = "No JSON data provided";

/// Validates that the request declares a JSON body
///
/// Media type parameters such as `charset` are accepted. A missing
/// Content-Type is rejected.
pub fn validate_json_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::UnsupportedMediaType)?;

    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    if media_type.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(ApiError::UnsupportedMediaType)
    }
}

/// Parses a required JSON body
///
/// An empty body, `null` or `{}` counts as no data.
pub fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request(NO_JSON_DATA));
    }

    let value: Value = serde_json::from_slice(body).map_err(invalid_json)?;
    let is_empty = match &value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    if is_empty {
        return Err(ApiError::bad_request(NO_JSON_DATA));
    }

    serde_json::from_value(value).map_err(invalid_json)
}

fn invalid_json(e: serde_json::Error) -> ApiError {
    ApiError::bad_request(format!("Invalid JSON format: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn test_json_content_type_accepted() {
        assert!(validate_json_content_type(&headers("application/json")).is_ok());
        assert!(validate_json_content_type(&headers("application/json; charset=utf-8")).is_ok());
        assert!(validate_json_content_type(&headers("Application/JSON")).is_ok());
    }

    #[test]
    fn test_other_content_types_rejected() {
        assert!(matches!(
            validate_json_content_type(&headers("text/plain")),
            Err(ApiError::UnsupportedMediaType)
        ));
        assert!(validate_json_content_type(&headers("application/jsonp")).is_err());
        assert!(validate_json_content_type(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_empty_bodies_are_no_data() {
        for body in [&b""[..], b"  \n", b"null", b"{}"] {
            let err = parse_json_body::<Value>(body).unwrap_err();
            assert_eq!(err.to_string(), "Bad Request: No JSON data provided");
        }
    }

    #[test]
    fn test_malformed_body() {
        let err = parse_json_body::<Value>(b"{\"offer_id\": ").unwrap_err();
        assert!(err.to_string().starts_with("Bad Request: Invalid JSON format: "));
    }

    #[test]
    fn test_wrong_shape_is_invalid_json() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Item {
            id: u32,
        }
        let err = parse_json_body::<Item>(br#"{"id": "seven"}"#).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON format"));
    }
}
