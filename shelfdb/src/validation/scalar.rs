use crate::document::{type_name, values_equal};
use crate::error::{Result, ShelfError};
use crate::schema::{AnyOfEntry, Rules, ScalarKind, TypeMarker};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Parse the date forms accepted on input: RFC 3339, `YYYY-MM-DDTHH:MM:SS[.fff]`
/// (taken as UTC) and `YYYY-MM-DD` (midnight UTC).
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Stored form of a date: RFC 3339, UTC, millisecond precision.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Validate and cast one scalar field value.
///
/// `None` is an absent key: the default applies if there is one, otherwise the
/// field is omitted (or rejected when required). `Some(Null)` is kept as `null`
/// for optional fields.
pub fn validate_scalar(
    field: &str,
    kind: ScalarKind,
    rules: &Rules,
    value: Option<&Value>,
) -> Result<Option<Value>> {
    let value = match value {
        Some(value) => value,
        None => {
            return match &rules.default {
                Some(default) => validate_scalar(field, kind, rules, Some(default)),
                None if rules.required => Err(ShelfError::validation(field, "is required")),
                None => Ok(None),
            }
        }
    };

    if value.is_null() {
        if rules.required {
            return Err(ShelfError::validation(field, "is required"));
        }
        if kind == ScalarKind::Any {
            check_any_of(field, rules, value)?;
        }
        return Ok(Some(Value::Null));
    }

    let cast = match kind {
        ScalarKind::String => cast_string(field, rules, value)?,
        ScalarKind::Number => cast_number(field, rules, value)?,
        ScalarKind::Boolean => match value {
            Value::Bool(_) => value.clone(),
            other => return Err(mismatch(field, kind, other)),
        },
        ScalarKind::Date => cast_date(field, rules, value)?,
        ScalarKind::Any => {
            check_any_of(field, rules, value)?;
            value.clone()
        }
    };
    Ok(Some(cast))
}

fn mismatch(field: &str, kind: ScalarKind, value: &Value) -> ShelfError {
    ShelfError::type_error(
        field,
        format!("expected {}, got {}", kind.name(), type_name(value)),
    )
}

fn cast_string(field: &str, rules: &Rules, value: &Value) -> Result<Value> {
    let Value::String(raw) = value else {
        return Err(mismatch(field, ScalarKind::String, value));
    };

    let mut text = if rules.trim {
        raw.trim().to_string()
    } else {
        raw.clone()
    };
    if rules.lowercase {
        text = text.to_lowercase();
    } else if rules.capitalize {
        let mut chars = text.chars();
        if let Some(first) = chars.next() {
            text = first.to_uppercase().chain(chars).collect();
        }
    }

    let length = text.chars().count();
    if let Some(min) = rules.min_length {
        if length < min {
            return Err(ShelfError::validation(
                field,
                format!("must be at least {min} characters long, got {length}"),
            ));
        }
    }
    if let Some(max) = rules.max_length {
        if length > max {
            return Err(ShelfError::validation(
                field,
                format!("must be at most {max} characters long, got {length}"),
            ));
        }
    }

    let cast = Value::String(text);
    check_enum(field, rules, &cast)?;
    if let Some(pattern) = &rules.pattern {
        if !pattern.is_match(cast.as_str().unwrap_or_default()) {
            return Err(ShelfError::validation(
                field,
                format!("{cast} does not match pattern '{}'", pattern.as_str()),
            ));
        }
    }
    Ok(cast)
}

fn cast_number(field: &str, rules: &Rules, value: &Value) -> Result<Value> {
    let Value::Number(number) = value else {
        return Err(mismatch(field, ScalarKind::Number, value));
    };
    let n = number.as_f64().unwrap_or(f64::NAN);

    if let Some(min) = rules.min {
        if n < min {
            return Err(ShelfError::validation(field, format!("must be >= {min}, got {number}")));
        }
    }
    if let Some(max) = rules.max {
        if n > max {
            return Err(ShelfError::validation(field, format!("must be <= {max}, got {number}")));
        }
    }
    check_enum(field, rules, value)?;
    if let Some(pattern) = &rules.pattern {
        let text = number.to_string();
        if !pattern.is_match(&text) {
            return Err(ShelfError::validation(
                field,
                format!("{text} does not match pattern '{}'", pattern.as_str()),
            ));
        }
    }
    Ok(value.clone())
}

fn cast_date(field: &str, rules: &Rules, value: &Value) -> Result<Value> {
    let date = match value {
        Value::String(text) => parse_date(text).ok_or_else(|| {
            ShelfError::type_error(field, format!("'{text}' is not a valid date"))
        })?,
        other => return Err(mismatch(field, ScalarKind::Date, other)),
    };

    if let Some(after) = &rules.starts_after {
        if date <= *after {
            return Err(ShelfError::validation(
                field,
                format!("must be after {}, got {}", format_date(after), format_date(&date)),
            ));
        }
    }
    if let Some(before) = &rules.starts_before {
        if date >= *before {
            return Err(ShelfError::validation(
                field,
                format!("must be before {}, got {}", format_date(before), format_date(&date)),
            ));
        }
    }
    Ok(Value::String(format_date(&date)))
}

fn check_enum(field: &str, rules: &Rules, value: &Value) -> Result<()> {
    if let Some(allowed) = &rules.enum_values {
        if !allowed.iter().any(|candidate| values_equal(candidate, value)) {
            let listed: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(ShelfError::validation(
                field,
                format!("{value} is not one of [{}]", listed.join(", ")),
            ));
        }
    }
    Ok(())
}

fn check_any_of(field: &str, rules: &Rules, value: &Value) -> Result<()> {
    let Some(entries) = &rules.any_of else {
        return Ok(());
    };
    let accepted = entries.iter().any(|entry| match entry {
        AnyOfEntry::Value(expected) => values_equal(expected, value),
        AnyOfEntry::Type(marker) => match marker {
            TypeMarker::String => value.is_string(),
            TypeMarker::Number => value.is_number(),
            TypeMarker::Boolean => value.is_boolean(),
            TypeMarker::Date => value.as_str().and_then(parse_date).is_some(),
            TypeMarker::Array => value.is_array(),
            TypeMarker::Object => value.is_object(),
        },
    });
    if accepted {
        Ok(())
    } else {
        Err(ShelfError::validation(
            field,
            format!("{value} is not accepted by anyOf"),
        ))
    }
}

/// Length and enum rules of an untyped (`type: Array`) list.
pub fn validate_array_rules(field: &str, rules: &Rules, items: &[Value]) -> Result<()> {
    if let Some(min) = rules.min_length {
        if items.len() < min {
            return Err(ShelfError::validation(
                field,
                format!("must hold at least {min} items, got {}", items.len()),
            ));
        }
    }
    if let Some(max) = rules.max_length {
        if items.len() > max {
            return Err(ShelfError::validation(
                field,
                format!("must hold at most {max} items, got {}", items.len()),
            ));
        }
    }
    for item in items {
        check_enum(field, rules, item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use regex::Regex;
    use serde_json::json;

    fn check(kind: ScalarKind, rules: &Rules, value: Value) -> Result<Option<Value>> {
        validate_scalar("f", kind, rules, Some(&value))
    }

    #[test]
    fn test_string_transforms_in_order() {
        let rules = Rules {
            trim: true,
            capitalize: true,
            max_length: Some(5),
            ..Rules::default()
        };
        let cast = check(ScalarKind::String, &rules, json!("  émile ")).unwrap();
        assert_eq!(cast, Some(json!("Émile")));

        let lower = Rules {
            trim: true,
            lowercase: true,
            ..Rules::default()
        };
        assert_eq!(
            check(ScalarKind::String, &lower, json!(" MiXed ")).unwrap(),
            Some(json!("mixed"))
        );
    }

    #[test]
    fn test_string_length_counts_chars() {
        let rules = Rules {
            min_length: Some(3),
            ..Rules::default()
        };
        assert!(check(ScalarKind::String, &rules, json!("äöü")).is_ok());
        let err = check(ScalarKind::String, &rules, json!("ab")).unwrap_err();
        assert!(err.to_string().contains("at least 3"));
    }

    #[test]
    fn test_string_enum_and_pattern() {
        let rules = Rules {
            enum_values: Some(vec![json!("red"), json!("green")]),
            ..Rules::default()
        };
        assert!(check(ScalarKind::String, &rules, json!("red")).is_ok());
        assert!(check(ScalarKind::String, &rules, json!("blue")).is_err());

        let rules = Rules {
            pattern: Some(Regex::new("^[a-z]+@[a-z]+$").unwrap()),
            ..Rules::default()
        };
        assert!(check(ScalarKind::String, &rules, json!("me@here")).is_ok());
        assert!(check(ScalarKind::String, &rules, json!("nope")).is_err());
    }

    #[test]
    fn test_number_range_message_cites_field() {
        let rules = Rules {
            min: Some(0.0),
            ..Rules::default()
        };
        let err = validate_scalar("age", ScalarKind::Number, &rules, Some(&json!(-1))).unwrap_err();
        assert_eq!(err.to_string(), "Validation error at 'age': must be >= 0, got -1");
    }

    #[test]
    fn test_wrong_type_is_a_type_error() {
        let err = check(ScalarKind::Number, &Rules::default(), json!("12")).unwrap_err();
        assert!(matches!(err, ShelfError::Type { .. }));
        let err = check(ScalarKind::Boolean, &Rules::default(), json!(1)).unwrap_err();
        assert!(matches!(err, ShelfError::Type { .. }));
    }

    #[test]
    fn test_absent_and_null() {
        let optional = Rules::default();
        assert_eq!(validate_scalar("f", ScalarKind::String, &optional, None).unwrap(), None);
        assert_eq!(check(ScalarKind::String, &optional, Value::Null).unwrap(), Some(Value::Null));

        let required = Rules {
            required: true,
            ..Rules::default()
        };
        assert!(validate_scalar("f", ScalarKind::String, &required, None).is_err());
        assert!(check(ScalarKind::String, &required, Value::Null).is_err());

        let defaulted = Rules {
            default: Some(json!(true)),
            ..Rules::default()
        };
        assert_eq!(
            validate_scalar("f", ScalarKind::Boolean, &defaulted, None).unwrap(),
            Some(json!(true))
        );
    }

    #[test]
    fn test_dates_are_normalized() {
        let rules = Rules::default();
        assert_eq!(
            check(ScalarKind::Date, &rules, json!("2024-01-02")).unwrap(),
            Some(json!("2024-01-02T00:00:00.000Z"))
        );
        assert_eq!(
            check(ScalarKind::Date, &rules, json!("2024-01-02T03:04:05+02:00")).unwrap(),
            Some(json!("2024-01-02T01:04:05.000Z"))
        );
        assert_eq!(
            check(ScalarKind::Date, &rules, json!("2024-01-02T03:04:05")).unwrap(),
            Some(json!("2024-01-02T03:04:05.000Z"))
        );
        assert!(check(ScalarKind::Date, &rules, json!("yesterday")).is_err());
    }

    #[test]
    fn test_date_bounds() {
        let rules = Rules {
            starts_after: parse_date("2020-01-01"),
            starts_before: parse_date("2030-01-01"),
            ..Rules::default()
        };
        assert!(check(ScalarKind::Date, &rules, json!("2024-06-01")).is_ok());
        assert!(check(ScalarKind::Date, &rules, json!("2019-06-01")).is_err());
        assert!(check(ScalarKind::Date, &rules, json!("2031-06-01")).is_err());
    }

    #[test]
    fn test_any_of_by_type_or_value() {
        let rules = Rules {
            any_of: Some(vec![
                AnyOfEntry::Type(TypeMarker::Number),
                AnyOfEntry::Value(json!("auto")),
            ]),
            ..Rules::default()
        };
        assert!(check(ScalarKind::Any, &rules, json!(12)).is_ok());
        assert!(check(ScalarKind::Any, &rules, json!("auto")).is_ok());
        assert!(check(ScalarKind::Any, &rules, json!("manual")).is_err());
        assert!(check(ScalarKind::Any, &rules, Value::Null).is_err());
        assert!(check(ScalarKind::Any, &Rules::default(), Value::Null).is_ok());
    }

    #[test]
    fn test_cast_is_idempotent() {
        let rules = Rules {
            trim: true,
            capitalize: true,
            ..Rules::default()
        };
        for (kind, rules, input) in [
            (ScalarKind::String, &rules, json!("  tom ")),
            (ScalarKind::Date, &Rules::default(), json!("2024-03-04")),
            (ScalarKind::Number, &Rules::default(), json!(4.5)),
        ] {
            let once = check(kind, rules, input).unwrap().unwrap();
            let twice = check(kind, rules, once.clone()).unwrap().unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_array_rules() {
        let rules = Rules {
            max_length: Some(2),
            enum_values: Some(vec![json!(1), json!(2)]),
            ..Rules::default()
        };
        assert!(validate_array_rules("a", &rules, &[json!(1), json!(2)]).is_ok());
        assert!(validate_array_rules("a", &rules, &[json!(1), json!(2), json!(1)]).is_err());
        assert!(validate_array_rules("a", &rules, &[json!(3)]).is_err());
    }
}
