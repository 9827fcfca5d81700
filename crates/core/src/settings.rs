use serde::Serialize;
use std::fmt;
use tracing::warn;

/// A flat scalar value destined for a module setting.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Str(String),
    /// Canonical variant name of an enum-typed setting.
    Enum(String),
}

impl SettingValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Null => "null",
            SettingValue::Bool(_) => "bool",
            SettingValue::Int(_) => "int",
            SettingValue::Long(_) => "long",
            SettingValue::Str(_) => "string",
            SettingValue::Enum(_) => "enum",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SettingValue::Int(i) => Some(*i as i64),
            SettingValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Str(s) | SettingValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON scalar. Arrays and objects have no scalar form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(SettingValue::Null),
            serde_json::Value::Bool(b) => Some(SettingValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(match i32::try_from(i) {
                        Ok(small) => SettingValue::Int(small),
                        Err(_) => SettingValue::Long(i),
                    })
                } else {
                    n.as_f64().map(|f| {
                        if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                            SettingValue::Long(f as i64)
                        } else {
                            SettingValue::Str(f.to_string())
                        }
                    })
                }
            }
            serde_json::Value::String(s) => Some(SettingValue::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Null => write!(f, "null"),
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Int(i) => write!(f, "{}", i),
            SettingValue::Long(l) => write!(f, "{}", l),
            SettingValue::Str(s) | SettingValue::Enum(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        SettingValue::Int(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Long(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Str(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Str(v)
    }
}

/// Declared type of a writable setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Bool,
    Int,
    Long,
    Str,
    /// Variant names with their underlying values.
    Enum(&'static [(&'static str, i64)]),
}

impl SettingKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingKind::Bool => "bool",
            SettingKind::Int => "int",
            SettingKind::Long => "long",
            SettingKind::Str => "string",
            SettingKind::Enum(_) => "enum",
        }
    }

    /// Run the coercion ladder. `None` means the value cannot be assigned.
    ///
    /// Order: exact type match, enum parse (name or underlying value),
    /// bool/int/long numeric equivalence, string parse, primitive conversion.
    pub fn coerce(&self, value: &SettingValue) -> Option<SettingValue> {
        if let Some(exact) = self.exact(value) {
            return Some(exact);
        }
        if let SettingKind::Enum(variants) = self {
            return coerce_enum(variants, value);
        }
        if let Some(numeric) = self.numeric(value) {
            return Some(numeric);
        }
        if let Some(parsed) = self.parse(value) {
            return Some(parsed);
        }
        self.convert(value)
    }

    fn exact(&self, value: &SettingValue) -> Option<SettingValue> {
        match (self, value) {
            (SettingKind::Bool, SettingValue::Bool(_))
            | (SettingKind::Int, SettingValue::Int(_))
            | (SettingKind::Long, SettingValue::Long(_))
            | (SettingKind::Str, SettingValue::Str(_)) => Some(value.clone()),
            (SettingKind::Enum(variants), SettingValue::Enum(name)) => variants
                .iter()
                .find(|(v, _)| *v == name.as_str())
                .map(|(v, _)| SettingValue::Enum(v.to_string())),
            _ => None,
        }
    }

    fn numeric(&self, value: &SettingValue) -> Option<SettingValue> {
        match (self, value) {
            (SettingKind::Bool, SettingValue::Int(i)) => Some(SettingValue::Bool(*i != 0)),
            (SettingKind::Bool, SettingValue::Long(l)) => Some(SettingValue::Bool(*l != 0)),
            (SettingKind::Int, SettingValue::Bool(b)) => Some(SettingValue::Int(i32::from(*b))),
            (SettingKind::Int, SettingValue::Long(l)) => i32::try_from(*l).ok().map(SettingValue::Int),
            (SettingKind::Long, SettingValue::Bool(b)) => Some(SettingValue::Long(i64::from(*b))),
            (SettingKind::Long, SettingValue::Int(i)) => Some(SettingValue::Long(*i as i64)),
            _ => None,
        }
    }

    fn parse(&self, value: &SettingValue) -> Option<SettingValue> {
        let SettingValue::Str(s) = value else {
            return None;
        };
        let s = s.trim();
        match self {
            SettingKind::Bool => {
                if s.eq_ignore_ascii_case("true") {
                    Some(SettingValue::Bool(true))
                } else if s.eq_ignore_ascii_case("false") {
                    Some(SettingValue::Bool(false))
                } else {
                    s.parse::<i64>().ok().map(|n| SettingValue::Bool(n != 0))
                }
            }
            SettingKind::Int => s.parse::<i32>().ok().map(SettingValue::Int),
            SettingKind::Long => s.parse::<i64>().ok().map(SettingValue::Long),
            _ => None,
        }
    }

    fn convert(&self, value: &SettingValue) -> Option<SettingValue> {
        match (self, value) {
            (SettingKind::Str, SettingValue::Bool(_))
            | (SettingKind::Str, SettingValue::Int(_))
            | (SettingKind::Str, SettingValue::Long(_))
            | (SettingKind::Str, SettingValue::Enum(_)) => Some(SettingValue::Str(value.to_string())),
            _ => None,
        }
    }
}

fn coerce_enum(variants: &[(&'static str, i64)], value: &SettingValue) -> Option<SettingValue> {
    let by_value = |n: i64| {
        variants
            .iter()
            .find(|(_, v)| *v == n)
            .map(|(name, _)| SettingValue::Enum(name.to_string()))
    };
    match value {
        SettingValue::Str(s) | SettingValue::Enum(s) => {
            let s = s.trim();
            variants
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(s))
                .map(|(name, _)| SettingValue::Enum(name.to_string()))
                .or_else(|| s.parse::<i64>().ok().and_then(by_value))
        }
        SettingValue::Int(i) => by_value(*i as i64),
        SettingValue::Long(l) => by_value(*l),
        _ => None,
    }
}

/// A writable setting a module exposes to `apply_configuration`.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingSpec {
    pub name: &'static str,
    pub kind: SettingKind,
    pub nullable: bool,
    pub description: &'static str,
}

impl SettingSpec {
    pub const fn new(name: &'static str, kind: SettingKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            description,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Coerce a value for this setting, honoring nullability.
    pub fn accept(&self, value: &SettingValue) -> std::result::Result<SettingValue, String> {
        if matches!(value, SettingValue::Null) {
            return if self.nullable {
                Ok(SettingValue::Null)
            } else {
                Err(format!("cannot assign null to non-nullable {} '{}'", self.kind.type_name(), self.name))
            };
        }
        self.kind.coerce(value).ok_or_else(|| {
            format!(
                "'{}' expects {} but got {} ({})",
                self.name,
                self.kind.type_name(),
                value.type_name(),
                value
            )
        })
    }
}

/// Flat name -> scalar bag, applied in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsBag {
    entries: Vec<(String, SettingValue)>,
}

impl SettingsBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<SettingValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<SettingValue>) {
        self.entries.push((key.to_string(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a bag from a JSON object, dropping non-scalar members.
    pub fn from_json(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut bag = Self::new();
        for (key, value) in map {
            match SettingValue::from_json(value) {
                Some(v) => bag.insert(key, v),
                None => warn!(setting = %key, "Ignoring non-scalar setting value"),
            }
        }
        bag
    }
}

/// One setting that was not assigned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSetting {
    pub key: String,
    pub reason: String,
}

/// Result of applying a settings bag to one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    pub module: String,
    pub applied: Vec<String>,
    pub skipped: Vec<SkippedSetting>,
}

impl ApplyReport {
    pub fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            ..Default::default()
        }
    }

    pub fn skip(&mut self, key: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(module = %self.module, setting = %key, reason = %reason, "Skipping setting");
        self.skipped.push(SkippedSetting {
            key: key.to_string(),
            reason,
        });
    }

    pub fn is_applied(&self, key: &str) -> bool {
        self.applied.iter().any(|k| k.eq_ignore_ascii_case(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODE: &[(&str, i64)] = &[("Off", 0), ("Eco", 1), ("Full", 2)];

    #[test]
    fn test_exact_match() {
        assert_eq!(SettingKind::Bool.coerce(&true.into()), Some(SettingValue::Bool(true)));
        assert_eq!(SettingKind::Int.coerce(&5.into()), Some(SettingValue::Int(5)));
        assert_eq!(SettingKind::Str.coerce(&"x".into()), Some(SettingValue::Str("x".into())));
    }

    #[test]
    fn test_enum_by_name_and_value() {
        let kind = SettingKind::Enum(MODE);
        assert_eq!(kind.coerce(&"eco".into()), Some(SettingValue::Enum("Eco".into())));
        assert_eq!(kind.coerce(&2.into()), Some(SettingValue::Enum("Full".into())));
        assert_eq!(kind.coerce(&"0".into()), Some(SettingValue::Enum("Off".into())));
        assert_eq!(kind.coerce(&"turbo".into()), None);
        assert_eq!(kind.coerce(&7i64.into()), None);
    }

    #[test]
    fn test_numeric_equivalence() {
        assert_eq!(SettingKind::Bool.coerce(&0.into()), Some(SettingValue::Bool(false)));
        assert_eq!(SettingKind::Bool.coerce(&42i64.into()), Some(SettingValue::Bool(true)));
        assert_eq!(SettingKind::Int.coerce(&true.into()), Some(SettingValue::Int(1)));
        assert_eq!(SettingKind::Long.coerce(&7.into()), Some(SettingValue::Long(7)));
        assert_eq!(SettingKind::Int.coerce(&(i64::MAX).into()), None);
    }

    #[test]
    fn test_string_parse() {
        assert_eq!(SettingKind::Bool.coerce(&"TRUE".into()), Some(SettingValue::Bool(true)));
        assert_eq!(SettingKind::Bool.coerce(&"0".into()), Some(SettingValue::Bool(false)));
        assert_eq!(SettingKind::Int.coerce(&" 1500 ".into()), Some(SettingValue::Int(1500)));
        assert_eq!(SettingKind::Long.coerce(&"abc".into()), None);
    }

    #[test]
    fn test_primitive_convert_to_string() {
        assert_eq!(SettingKind::Str.coerce(&12.into()), Some(SettingValue::Str("12".into())));
        assert_eq!(SettingKind::Str.coerce(&false.into()), Some(SettingValue::Str("false".into())));
    }

    #[test]
    fn test_null_requires_nullable() {
        let strict = SettingSpec::new("timeoutMs", SettingKind::Long, "");
        assert!(strict.accept(&SettingValue::Null).is_err());
        let loose = SettingSpec::new("label", SettingKind::Str, "").nullable();
        assert_eq!(loose.accept(&SettingValue::Null), Ok(SettingValue::Null));
    }

    #[test]
    fn test_bag_from_json() {
        let json = serde_json::json!({
            "enabled": false,
            "timeoutMs": 5000,
            "big": 9_000_000_000i64,
            "nested": {"a": 1},
        });
        let bag = SettingsBag::from_json(json.as_object().unwrap());
        assert_eq!(bag.len(), 3);
        let values: Vec<_> = bag.iter().collect();
        assert!(values.contains(&("enabled", &SettingValue::Bool(false))));
        assert!(values.contains(&("timeoutMs", &SettingValue::Int(5000))));
        assert!(values.contains(&("big", &SettingValue::Long(9_000_000_000))));
    }
}
