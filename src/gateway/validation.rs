use regex::Regex;
use serde_json::Value;

/// Request-body limits enforced before anything else looks at the input.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
pub const MAX_JSON_DEPTH: usize = 10;
pub const MAX_ARRAY_ELEMENTS: usize = 1_000;
pub const MAX_OBJECT_KEYS: usize = 100;
pub const MAX_STRING_BYTES: usize = 100 * 1024;

/// Structural validation: depth, fan-out, and string-size caps applied
/// recursively over the parsed body.
pub fn validate_payload(value: &Value) -> Result<(), String> {
    check_value(value, 1)
}

fn check_value(value: &Value, depth: usize) -> Result<(), String> {
    if depth > MAX_JSON_DEPTH {
        return Err(format!("JSON nesting exceeds {MAX_JSON_DEPTH} levels"));
    }
    match value {
        Value::String(s) if s.len() > MAX_STRING_BYTES => {
            Err(format!("string exceeds {MAX_STRING_BYTES} bytes"))
        }
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_ELEMENTS {
                return Err(format!("array exceeds {MAX_ARRAY_ELEMENTS} elements"));
            }
            items.iter().try_for_each(|item| check_value(item, depth + 1))
        }
        Value::Object(map) => {
            if map.len() > MAX_OBJECT_KEYS {
                return Err(format!("object exceeds {MAX_OBJECT_KEYS} keys"));
            }
            map.values().try_for_each(|item| check_value(item, depth + 1))
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

type Predicate = fn(&Value) -> bool;

/// Declarative per-field rule with a builder for composing checks.
pub struct FieldRule {
    name: &'static str,
    required: bool,
    field_type: Option<FieldType>,
    min_len: Option<usize>,
    max_len: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    pattern: Option<&'static str>,
    one_of: Option<&'static [&'static str]>,
    custom: Option<Predicate>,
}

impl FieldRule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            field_type: None,
            min_len: None,
            max_len: None,
            min: None,
            max: None,
            pattern: None,
            one_of: None,
            custom: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn min_len(mut self, min_len: usize) -> Self {
        self.min_len = Some(min_len);
        self
    }

    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.one_of = Some(values);
        self
    }

    pub fn custom(mut self, predicate: Predicate) -> Self {
        self.custom = Some(predicate);
        self
    }

    fn check(&self, value: Option<&Value>) -> Result<(), String> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            if self.required {
                return Err(format!("{} is required", self.name));
            }
            return Ok(());
        };

        if let Some(expected) = self.field_type {
            let ok = match expected {
                FieldType::String => value.is_string(),
                FieldType::Number => value.is_number(),
                FieldType::Boolean => value.is_boolean(),
                FieldType::Array => value.is_array(),
                FieldType::Object => value.is_object(),
            };
            if !ok {
                return Err(format!("{} has the wrong type", self.name));
            }
        }

        if let Some(s) = value.as_str() {
            if self.min_len.is_some_and(|min| s.len() < min) {
                return Err(format!("{} is too short", self.name));
            }
            if self.max_len.is_some_and(|max| s.len() > max) {
                return Err(format!("{} is too long", self.name));
            }
            if let Some(pattern) = self.pattern {
                let re = Regex::new(pattern).map_err(|e| format!("bad pattern: {e}"))?;
                if !re.is_match(s) {
                    return Err(format!("{} has an invalid format", self.name));
                }
            }
            if let Some(allowed) = self.one_of {
                if !allowed.contains(&s) {
                    return Err(format!(
                        "{} must be one of: {}",
                        self.name,
                        allowed.join(", ")
                    ));
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if self.min.is_some_and(|min| n < min) {
                return Err(format!("{} is below the minimum", self.name));
            }
            if self.max.is_some_and(|max| n > max) {
                return Err(format!("{} is above the maximum", self.name));
            }
        }

        if let Some(predicate) = self.custom {
            if !predicate(value) {
                return Err(format!("{} failed validation", self.name));
            }
        }

        Ok(())
    }
}

pub fn validate_fields(body: &Value, rules: &[FieldRule]) -> Result<(), String> {
    let Some(map) = body.as_object() else {
        return Err("request body must be a JSON object".to_string());
    };
    for rule in rules {
        rule.check(map.get(rule.name))?;
    }
    Ok(())
}
