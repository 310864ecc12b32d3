use super::error::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a value to the log's self-describing text format.
///
/// JSON is used so that the `parameters` and `return_value` columns stay
/// human-inspectable in the execution log.
///
/// # Errors
/// Returns `CoreError::Serialization` if the value cannot be serialized.
pub fn serialize_value<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(CoreError::Serialization)
}

/// Deserializes a value from the log's text format.
///
/// # Errors
/// Returns `CoreError::Deserialization` if the text cannot be decoded.
pub fn deserialize_value<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(CoreError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Signup {
        user: String,
        age: u32,
        referrer: Option<String>,
        confirmed_at: DateTime<Utc>,
    }

    #[test]
    fn test_scalar_round_trips() {
        let n = serialize_value(&42i64).unwrap();
        assert_eq!(deserialize_value::<i64>(&n).unwrap(), 42);

        let f = serialize_value(&1.5f64).unwrap();
        assert_eq!(deserialize_value::<f64>(&f).unwrap(), 1.5);

        let s = serialize_value(&"hello".to_string()).unwrap();
        assert_eq!(deserialize_value::<String>(&s).unwrap(), "hello");

        let b = serialize_value(&true).unwrap();
        assert!(deserialize_value::<bool>(&b).unwrap());
    }

    #[test]
    fn test_nullable_round_trips() {
        let some: Option<i32> = Some(7);
        let none: Option<i32> = None;

        let some_text = serialize_value(&some).unwrap();
        let none_text = serialize_value(&none).unwrap();
        assert_eq!(deserialize_value::<Option<i32>>(&some_text).unwrap(), some);
        assert_eq!(deserialize_value::<Option<i32>>(&none_text).unwrap(), none);
    }

    #[test]
    fn test_record_round_trip() {
        let signup = Signup {
            user: "alice".to_string(),
            age: 34,
            referrer: None,
            confirmed_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };

        let text = serialize_value(&signup).unwrap();
        assert_eq!(deserialize_value::<Signup>(&text).unwrap(), signup);
    }

    #[test]
    fn test_argument_tuple_round_trip() {
        let args = ("World".to_string(), 3i32);
        let text = serialize_value(&args).unwrap();
        assert_eq!(deserialize_value::<(String, i32)>(&text).unwrap(), args);
    }

    #[test]
    fn test_output_is_readable_text() {
        let text = serialize_value(&("user", 1234)).unwrap();
        assert_eq!(text, r#"["user",1234]"#);
    }
}
