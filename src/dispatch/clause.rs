//! Rule clauses: `property OP value` tokens and their evaluation.
//!
//! Operators are `=`, `!=`, `<`, `<=`, `>`, `>=`, glob (`~`, `?` is one
//! character, `*` any run) and regex (`^`). Glob and regex are anchored
//! full matches against the string form of the value.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::cmp::Ordering;

use crate::document::PropertyValue;
use crate::errors::{BlobError, BlobResult};

/// Comparison operator of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Glob,
    Regex,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Neq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Glob => "~",
            Operator::Regex => "^",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Lt => ordering == Ordering::Less,
            Operator::Lte => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Gte => ordering != Ordering::Less,
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Neq => ordering != Ordering::Equal,
            Operator::Glob | Operator::Regex => false,
        }
    }
}

/// One `property OP value` condition.
#[derive(Debug, Clone)]
pub struct Clause {
    pub property: String,
    pub operator: Operator,
    pub value: String,
    pattern: Option<Regex>,
}

impl Clause {
    pub fn new(property: &str, operator: Operator, value: &str) -> BlobResult<Self> {
        let property = property.trim();
        if property.is_empty() {
            return Err(BlobError::configuration(format!(
                "missing property name in clause {}{value}",
                operator.symbol()
            )));
        }
        let pattern = match operator {
            Operator::Glob => Some(compile(&glob_to_regex(value), value)?),
            Operator::Regex => Some(compile(&format!("^(?:{value})$"), value)?),
            _ => None,
        };
        Ok(Self {
            property: property.to_string(),
            operator,
            value: value.to_string(),
            pattern,
        })
    }

    /// Parse a single `property OP value` token.
    pub fn parse(token: &str) -> BlobResult<Self> {
        let token = token.trim();
        let idx = token
            .find(|c| matches!(c, '=' | '!' | '<' | '>' | '~' | '^'))
            .ok_or_else(|| {
                BlobError::configuration(format!("no operator in clause {token:?}"))
            })?;
        let rest = &token[idx..];
        let (operator, len) = if rest.starts_with("!=") {
            (Operator::Neq, 2)
        } else if rest.starts_with("<=") {
            (Operator::Lte, 2)
        } else if rest.starts_with(">=") {
            (Operator::Gte, 2)
        } else {
            match rest.as_bytes()[0] {
                b'=' => (Operator::Eq, 1),
                b'<' => (Operator::Lt, 1),
                b'>' => (Operator::Gt, 1),
                b'~' => (Operator::Glob, 1),
                b'^' => (Operator::Regex, 1),
                _ => {
                    return Err(BlobError::configuration(format!(
                        "invalid operator in clause {token:?}"
                    )))
                }
            }
        };
        Self::new(&token[..idx], operator, rest[len..].trim())
    }

    /// Evaluate against the property's current value.
    pub fn matches(&self, value: &PropertyValue) -> bool {
        match self.operator {
            Operator::Glob | Operator::Regex => {
                let text = value.to_string();
                self.pattern.as_ref().is_some_and(|re| re.is_match(&text))
            }
            Operator::Eq | Operator::Neq => {
                let ordering = match value {
                    // Unset values compare as the literal string "null".
                    PropertyValue::Null => Some("null".cmp(self.value.as_str())),
                    other => self.compare(other),
                };
                // An unparseable literal is simply "different".
                let equal = ordering == Some(Ordering::Equal);
                if self.operator == Operator::Eq {
                    equal
                } else {
                    !equal
                }
            }
            _ => {
                let ordering = match value {
                    PropertyValue::Null => Some(self.compare_null()),
                    other => self.compare(other),
                };
                ordering.is_some_and(|o| self.operator.accepts(o))
            }
        }
    }

    /// Typed comparison of `value` against the literal. `None` when the
    /// literal cannot be read as the value's type.
    fn compare(&self, value: &PropertyValue) -> Option<Ordering> {
        let literal = self.value.as_str();
        match value {
            PropertyValue::Null => None,
            PropertyValue::String(s) => Some(s.as_str().cmp(literal)),
            PropertyValue::Boolean(b) => Some(b.to_string().as_str().cmp(literal)),
            PropertyValue::Integer(i) => literal.parse::<i64>().ok().map(|n| i.cmp(&n)),
            PropertyValue::Float(f) => literal.parse::<f64>().ok().and_then(|x| f.partial_cmp(&x)),
            PropertyValue::DateTime(dt) => parse_instant(literal).map(|other| dt.cmp(&other)),
        }
    }

    /// Ordering of an unset value: zero if the literal is numeric, the
    /// empty string otherwise.
    fn compare_null(&self) -> Ordering {
        let literal = self.value.as_str();
        if let Ok(n) = literal.parse::<i64>() {
            0i64.cmp(&n)
        } else if let Ok(x) = literal.parse::<f64>() {
            0f64.partial_cmp(&x).unwrap_or(Ordering::Less)
        } else {
            "".cmp(literal)
        }
    }
}

impl std::fmt::Display for Clause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.property, self.operator.symbol(), self.value)
    }
}

/// Split a comma-joined clause expression. `\,` is a literal comma.
pub fn parse_clauses(expression: &str) -> BlobResult<Vec<Clause>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = expression.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => tokens.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    tokens.push(current);

    let clauses = tokens
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| Clause::parse(t))
        .collect::<BlobResult<Vec<_>>>()?;
    if clauses.is_empty() {
        return Err(BlobError::configuration(format!(
            "empty clause expression {expression:?}"
        )));
    }
    Ok(clauses)
}

fn compile(pattern: &str, source: &str) -> BlobResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| BlobError::configuration(format!("invalid pattern {source:?}: {e}")))
}

fn glob_to_regex(glob: &str) -> String {
    let mut re = String::from("^(?:");
    for c in glob.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push_str(")$");
    re
}

/// Read a literal as an instant: RFC 3339, `YYYY-MM-DDTHH:MM:SS` (UTC) or
/// `YYYY-MM-DD` (midnight UTC).
fn parse_instant(literal: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(literal) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(literal, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(literal, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn clause(token: &str) -> Clause {
        Clause::parse(token).unwrap()
    }

    #[test]
    fn test_parse_operators() {
        let cases = [
            ("dc:format=video", Operator::Eq, "video"),
            ("dc:format!=video", Operator::Neq, "video"),
            ("size<5", Operator::Lt, "5"),
            ("size<=5", Operator::Lte, "5"),
            ("size>5", Operator::Gt, "5"),
            ("size>=5", Operator::Gte, "5"),
            ("blob:name~*.mp4", Operator::Glob, "*.mp4"),
            ("blob:mime-type^video/.*", Operator::Regex, "video/.*"),
        ];
        for (token, op, value) in cases {
            let c = clause(token);
            assert_eq!(c.operator, op, "{token}");
            assert_eq!(c.value, value, "{token}");
        }
        assert_eq!(clause(" dc:format = video ").property, "dc:format");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Clause::parse("dc:format").is_err());
        assert!(Clause::parse("=video").is_err());
        assert!(Clause::parse("x^(unclosed").is_err());
        assert!(parse_clauses(" , ").is_err());
    }

    #[test]
    fn test_parse_clause_list_with_escaped_comma() {
        let clauses = parse_clauses("dc:format=video, blob:name^a{1\\,3}").unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[1].value, "a{1,3}");
        assert!(clauses[1].matches(&"aaa".into()));
        assert!(!clauses[1].matches(&"aaaa".into()));
    }

    #[test]
    fn test_string_comparisons() {
        assert!(clause("p=video").matches(&"video".into()));
        assert!(!clause("p=video").matches(&"videos".into()));
        assert!(clause("p!=video").matches(&"audio".into()));
        assert!(clause("p<b").matches(&"a".into()));
        assert!(!clause("p<b").matches(&"c".into()));
        // Lexical, not numeric, for strings.
        assert!(clause("p<9").matches(&"10".into()));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(clause("n<5").matches(&PropertyValue::Integer(4)));
        assert!(!clause("n<5").matches(&PropertyValue::Integer(10)));
        assert!(clause("n>=2").matches(&PropertyValue::Integer(3)));
        assert!(clause("n=3").matches(&PropertyValue::Float(3.0)));
        assert!(clause("n>1e3").matches(&PropertyValue::Float(1500.5)));
    }

    #[test]
    fn test_unparseable_literal_for_numeric_value() {
        let v = PropertyValue::Integer(7);
        assert!(!clause("n<abc").matches(&v));
        assert!(!clause("n>=abc").matches(&v));
        assert!(!clause("n=abc").matches(&v));
        assert!(clause("n!=abc").matches(&v));
    }

    #[test]
    fn test_fractional_literal_for_integer_value() {
        let v = PropertyValue::Integer(3);
        assert!(!clause("n>=2.5").matches(&v));
        assert!(!clause("n<3.5").matches(&v));
        assert!(!clause("n=3.0").matches(&v));
        assert!(clause("n!=3.0").matches(&v));
        // Float-typed values still read fractional literals.
        assert!(clause("n>=2.5").matches(&PropertyValue::Float(3.0)));
    }

    #[test]
    fn test_null_equality_uses_literal_null() {
        assert!(clause("p=null").matches(&PropertyValue::Null));
        assert!(!clause("p=video").matches(&PropertyValue::Null));
        assert!(clause("p!=video").matches(&PropertyValue::Null));
        assert!(clause("p~nu*").matches(&PropertyValue::Null));
    }

    #[test]
    fn test_null_ordering_falls_back_to_zero() {
        assert!(clause("n<5").matches(&PropertyValue::Null));
        assert!(!clause("n>5").matches(&PropertyValue::Null));
        assert!(clause("n>-1.5").matches(&PropertyValue::Null));
        assert!(clause("n<=0").matches(&PropertyValue::Null));
        // Non-numeric literal compares against the empty string.
        assert!(clause("n<abc").matches(&PropertyValue::Null));
        assert!(!clause("n>abc").matches(&PropertyValue::Null));
    }

    #[test]
    fn test_datetime_comparisons() {
        let v = PropertyValue::DateTime(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        assert!(clause("d>2024-01-01").matches(&v));
        assert!(clause("d<2024-06-01T13:00:00Z").matches(&v));
        assert!(clause("d=2024-06-01T14:00:00+02:00").matches(&v));
        assert!(clause("d<=2024-06-01T12:00:00").matches(&v));
        assert!(!clause("d<yesterday").matches(&v));
        assert!(clause("d!=yesterday").matches(&v));
    }

    #[test]
    fn test_boolean_compares_as_string() {
        assert!(clause("b=true").matches(&PropertyValue::Boolean(true)));
        assert!(clause("b!=true").matches(&PropertyValue::Boolean(false)));
    }

    #[test]
    fn test_glob_is_anchored() {
        let c = clause("p~a?c*");
        assert!(c.matches(&"abc".into()));
        assert!(c.matches(&"axcdef".into()));
        assert!(!c.matches(&"ac".into()));
        assert!(!c.matches(&"xabc".into()));
        // Regex metacharacters in globs are literal.
        assert!(clause("p~a.b").matches(&"a.b".into()));
        assert!(!clause("p~a.b").matches(&"axb".into()));
    }

    #[test]
    fn test_regex_is_full_match() {
        let c = clause("p^vid");
        assert!(c.matches(&"vid".into()));
        assert!(!c.matches(&"video".into()));
        assert!(clause("p^vid.*").matches(&"video".into()));
    }

    #[test]
    fn test_glob_and_regex_agree() {
        let glob = clause("p~a*b");
        let regex = clause("p^a.*b");
        for input in ["ab", "axxb", "a-b", "ba", "abx", "", "b", "aab"] {
            let value = PropertyValue::from(input);
            assert_eq!(glob.matches(&value), regex.matches(&value), "{input}");
        }
    }

    #[test]
    fn test_display_roundtrips_token() {
        assert_eq!(clause("size<=5").to_string(), "size<=5");
    }
}
