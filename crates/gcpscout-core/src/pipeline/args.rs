use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::ReconError;

/// A single argument value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<usize> for ArgValue {
    fn from(v: usize) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(v: Vec<String>) -> Self {
        ArgValue::List(v)
    }
}

impl From<&[&str]> for ArgValue {
    fn from(v: &[&str]) -> Self {
        ArgValue::List(v.iter().map(|s| s.to_string()).collect())
    }
}

/// Immutable argument map shared by a link and every sub-chain it builds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Arc<BTreeMap<String, ArgValue>>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy with one more entry; the receiver is left untouched.
    pub fn with(&self, name: &str, value: impl Into<ArgValue>) -> Args {
        let mut map = (*self.0).clone();
        map.insert(name.to_string(), value.into());
        Args(Arc::new(map))
    }

    /// Copy where entries of `other` win.
    pub fn merge(&self, other: &Args) -> Args {
        let mut map = (*self.0).clone();
        for (k, v) in other.0.iter() {
            map.insert(k.clone(), v.clone());
        }
        Args(Arc::new(map))
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            ArgValue::Str(s) if !s.is_empty() => Some(s),
            ArgValue::List(l) => l.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name)? {
            ArgValue::Bool(b) => Some(*b),
            ArgValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            ArgValue::Int(i) => Some(*i),
            ArgValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// List view: strings are split on commas, empty entries dropped.
    pub fn list(&self, name: &str) -> Vec<String> {
        let raw: Vec<&str> = match self.0.get(name) {
            Some(ArgValue::Str(s)) => vec![s.as_str()],
            Some(ArgValue::List(l)) => l.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        };
        raw.iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<ArgValue>> FromIterator<(K, V)> for Args {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Args(Arc::new(
            iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Bool,
    Int,
    StringList,
}

/// A recognised option of a link.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
    pub default: Option<ArgValue>,
    pub required: bool,
    pub shortcode: Option<char>,
}

impl Param {
    fn of(kind: ParamKind, name: &'static str, description: &'static str) -> Self {
        Self { name, description, kind, default: None, required: false, shortcode: None }
    }

    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self::of(ParamKind::String, name, description)
    }

    pub fn bool(name: &'static str, description: &'static str) -> Self {
        Self::of(ParamKind::Bool, name, description)
    }

    pub fn int(name: &'static str, description: &'static str) -> Self {
        Self::of(ParamKind::Int, name, description)
    }

    pub fn list(name: &'static str, description: &'static str) -> Self {
        Self::of(ParamKind::StringList, name, description)
    }

    pub fn with_default(mut self, value: impl Into<ArgValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_shortcode(mut self, c: char) -> Self {
        self.shortcode = Some(c);
        self
    }

    fn normalize(&self, value: &ArgValue) -> Result<ArgValue, ReconError> {
        let invalid = |reason: &str| ReconError::InvalidParam {
            name: self.name.to_string(),
            reason: reason.to_string(),
        };
        match (self.kind, value) {
            (ParamKind::Bool, ArgValue::Bool(_)) => Ok(value.clone()),
            (ParamKind::Bool, ArgValue::Str(s)) => s
                .parse::<bool>()
                .map(ArgValue::Bool)
                .map_err(|_| invalid("expected true or false")),
            (ParamKind::Int, ArgValue::Int(_)) => Ok(value.clone()),
            (ParamKind::Int, ArgValue::Str(s)) => s
                .parse::<i64>()
                .map(ArgValue::Int)
                .map_err(|_| invalid("expected an integer")),
            (ParamKind::String, ArgValue::Str(_)) => Ok(value.clone()),
            (ParamKind::String, ArgValue::List(l)) => {
                Ok(ArgValue::Str(l.first().cloned().unwrap_or_default()))
            }
            (ParamKind::StringList, ArgValue::List(_)) => Ok(value.clone()),
            (ParamKind::StringList, ArgValue::Str(s)) => Ok(ArgValue::List(vec![s.clone()])),
            (ParamKind::Bool, _) => Err(invalid("expected true or false")),
            (ParamKind::Int, _) => Err(invalid("expected an integer")),
            (ParamKind::String, _) => Err(invalid("expected a string")),
            (ParamKind::StringList, _) => Err(invalid("expected a list of strings")),
        }
    }
}

/// Resolve a link's parameters against the incoming argument view: validate present
/// values, fill defaults, fail on missing required ones. Unrelated entries pass through.
pub fn resolve(params: &[Param], args: &Args) -> Result<Args, ReconError> {
    let mut map = (*args.0).clone();
    for param in params {
        match map.get(param.name) {
            Some(value) => {
                let normalized = param.normalize(value)?;
                map.insert(param.name.to_string(), normalized);
            }
            None => {
                if let Some(default) = &param.default {
                    map.insert(param.name.to_string(), default.clone());
                } else if param.required {
                    return Err(ReconError::MissingParam(param.name.to_string()));
                }
            }
        }
    }
    Ok(Args(Arc::new(map)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_leaves_original_untouched() {
        let a = Args::new().with("org", "1");
        let b = a.with("folder", "2");
        assert!(!a.contains("folder"));
        assert_eq!(b.str("org"), Some("1"));
    }

    #[test]
    fn test_list_splits_commas() {
        let args = Args::new().with("type", vec!["bucket,vm".to_string(), " sql ".to_string()]);
        assert_eq!(args.list("type"), vec!["bucket", "vm", "sql"]);
        let single = Args::new().with("type", "all");
        assert_eq!(single.list("type"), vec!["all"]);
        assert!(Args::new().list("type").is_empty());
    }

    #[test]
    fn test_resolve_defaults_and_required() {
        let params = vec![
            Param::bool("include-sys-projects", "").with_default(false),
            Param::string("version", "").required(),
        ];
        let err = resolve(&params, &Args::new()).unwrap_err();
        assert_eq!(err.to_string(), "missing required parameter: version");

        let resolved = resolve(&params, &Args::new().with("version", "v3")).unwrap();
        assert_eq!(resolved.bool("include-sys-projects"), Some(false));
        assert_eq!(resolved.str("version"), Some("v3"));
    }

    #[test]
    fn test_resolve_coerces_strings() {
        let params = vec![Param::bool("flag", ""), Param::int("n", "")];
        let resolved =
            resolve(&params, &Args::new().with("flag", "true").with("n", "12")).unwrap();
        assert_eq!(resolved.get("flag"), Some(&ArgValue::Bool(true)));
        assert_eq!(resolved.int("n"), Some(12));

        let err = resolve(&params, &Args::new().with("n", "twelve")).unwrap_err();
        assert!(err.to_string().contains("expected an integer"));
    }

    #[test]
    fn test_merge_prefers_other() {
        let base = Args::new().with("a", "1").with("b", "1");
        let merged = base.merge(&Args::new().with("b", "2"));
        assert_eq!(merged.str("a"), Some("1"));
        assert_eq!(merged.str("b"), Some("2"));
    }
}
