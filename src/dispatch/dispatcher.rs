//! Provider selection for blobs.
//!
//! With no rules, every blob goes to the provider named after the owning
//! repository. With rules, the first rule whose clauses all match wins
//! and unmatched blobs go to the `default` rule's provider.

use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

use super::clause::{parse_clauses, Clause};
use crate::document::{BlobInfo, ContentObject, PropertyValue};
use crate::errors::{BlobError, BlobResult};

/// Clause expression marking the default rule.
pub const DEFAULT_RULE: &str = "default";

pub const PROP_REPOSITORY_NAME: &str = "ecm:repositoryName";
pub const PROP_PATH: &str = "ecm:path";
pub const PROP_IS_RECORD: &str = "ecm:isRecord";
pub const PROP_IS_FLEXIBLE_RECORD: &str = "ecm:isFlexibleRecord";

/// Prefix of properties read from the blob under test.
pub const BLOB_PREFIX: &str = "blob:";
pub const BLOB_NAME: &str = "blob:name";
pub const BLOB_MIME_TYPE: &str = "blob:mime-type";
pub const BLOB_ENCODING: &str = "blob:encoding";
pub const BLOB_DIGEST: &str = "blob:digest";
pub const BLOB_LENGTH: &str = "blob:length";
pub const BLOB_XPATH: &str = "blob:xpath";

/// One configured rule, as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuleConfig {
    /// Comma-joined `property OP value` tokens, or `default`.
    pub clauses: String,
    /// Target provider id.
    pub provider: String,
}

impl RuleConfig {
    pub fn new(clauses: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            clauses: clauses.into(),
            provider: provider.into(),
        }
    }
}

/// A parsed rule: all clauses must match for `provider_id` to be chosen.
#[derive(Debug, Clone)]
pub struct Rule {
    pub clauses: Vec<Clause>,
    pub provider_id: String,
}

#[derive(Debug, Clone)]
enum Mode {
    RepositoryName,
    Rules {
        rules: Vec<Rule>,
        default_provider_id: String,
    },
}

/// Outcome of [`BlobDispatcher::resolve_provider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub provider_id: String,
    /// False when the provider was derived from the repository name.
    pub rule_based: bool,
}

/// Chooses the provider that should own a blob.
#[derive(Debug, Clone)]
pub struct BlobDispatcher {
    mode: Mode,
}

impl Default for BlobDispatcher {
    fn default() -> Self {
        Self::repository_name()
    }
}

impl BlobDispatcher {
    /// One provider per repository name.
    pub fn repository_name() -> Self {
        Self {
            mode: Mode::RepositoryName,
        }
    }

    /// Build from configured rules. Invalid configuration is logged and
    /// degrades to repository-name dispatch for every blob.
    pub fn from_rules(rules: &[RuleConfig]) -> Self {
        match Self::try_from_rules(rules) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                error!("Invalid blob dispatch configuration, dispatching by repository name: {e}");
                Self::repository_name()
            }
        }
    }

    /// Strict variant of [`from_rules`](Self::from_rules).
    pub fn try_from_rules(rules: &[RuleConfig]) -> BlobResult<Self> {
        if rules.is_empty() {
            return Ok(Self::repository_name());
        }
        let mut parsed = Vec::new();
        let mut default_provider_id: Option<String> = None;
        for rule in rules {
            if rule.provider.trim().is_empty() {
                return Err(BlobError::configuration(format!(
                    "rule {:?} has no target provider",
                    rule.clauses
                )));
            }
            if rule.clauses.trim() == DEFAULT_RULE {
                if default_provider_id.is_some() {
                    return Err(BlobError::configuration("more than one default rule"));
                }
                default_provider_id = Some(rule.provider.clone());
                continue;
            }
            parsed.push(Rule {
                clauses: parse_clauses(&rule.clauses)?,
                provider_id: rule.provider.clone(),
            });
        }
        let default_provider_id = default_provider_id
            .ok_or_else(|| BlobError::configuration("dispatch rules configured without a default rule"))?;
        info!(
            "Blob dispatch uses {} rule(s), default provider {}",
            parsed.len(),
            default_provider_id
        );
        Ok(Self {
            mode: Mode::Rules {
                rules: parsed,
                default_provider_id,
            },
        })
    }

    pub fn is_rule_based(&self) -> bool {
        matches!(self.mode, Mode::Rules { .. })
    }

    /// Pick the provider for `blob` attached to `doc` at `xpath`.
    pub fn resolve_provider(&self, doc: &dyn ContentObject, blob: &BlobInfo, xpath: &str) -> Dispatch {
        let (rules, default_provider_id) = match &self.mode {
            Mode::RepositoryName => {
                return Dispatch {
                    provider_id: doc.repository_name().to_string(),
                    rule_based: false,
                }
            }
            Mode::Rules {
                rules,
                default_provider_id,
            } => (rules, default_provider_id),
        };
        for rule in rules {
            if rule_matches(rule, doc, blob, xpath) {
                debug!(
                    "Blob at {} of {} dispatched to {}",
                    xpath,
                    doc.id(),
                    rule.provider_id
                );
                return Dispatch {
                    provider_id: rule.provider_id.clone(),
                    rule_based: true,
                };
            }
        }
        Dispatch {
            provider_id: default_provider_id.clone(),
            rule_based: true,
        }
    }

    /// Every provider id a rule can select, default included.
    pub fn provider_ids(&self) -> BTreeSet<String> {
        match &self.mode {
            Mode::RepositoryName => BTreeSet::new(),
            Mode::Rules {
                rules,
                default_provider_id,
            } => rules
                .iter()
                .map(|r| r.provider_id.clone())
                .chain(std::iter::once(default_provider_id.clone()))
                .collect(),
        }
    }

    /// Properties referenced by any rule clause.
    pub fn rule_properties(&self) -> BTreeSet<String> {
        match &self.mode {
            Mode::RepositoryName => BTreeSet::new(),
            Mode::Rules { rules, .. } => rules
                .iter()
                .flat_map(|r| r.clauses.iter().map(|c| c.property.clone()))
                .collect(),
        }
    }

    /// Whether a change to any of `changed` can alter a dispatch decision.
    /// A changed path matches a rule property that is equal to it, nested
    /// under it, or a parent of it.
    pub fn depends_on(&self, changed: &[String]) -> bool {
        let properties = self.rule_properties();
        changed.iter().any(|path| {
            properties.iter().any(|prop| {
                prop == path
                    || prop.starts_with(&format!("{path}/"))
                    || path.starts_with(&format!("{prop}/"))
            })
        })
    }

    /// Whether any rule reads the blob itself (`blob:*`).
    pub fn uses_blob_properties(&self) -> bool {
        self.rule_properties()
            .iter()
            .any(|p| p.starts_with(BLOB_PREFIX))
    }
}

/// All clauses must match; a clause on a property the object lacks makes
/// the whole rule a non-match.
fn rule_matches(rule: &Rule, doc: &dyn ContentObject, blob: &BlobInfo, xpath: &str) -> bool {
    rule.clauses.iter().all(|clause| {
        match property_value(doc, blob, xpath, &clause.property) {
            Some(value) => clause.matches(&value),
            None => false,
        }
    })
}

/// Resolve a pseudo-property or a regular property.
fn property_value(
    doc: &dyn ContentObject,
    blob: &BlobInfo,
    xpath: &str,
    name: &str,
) -> Option<PropertyValue> {
    let opt = |value: &Option<String>| {
        value
            .clone()
            .map(PropertyValue::String)
            .unwrap_or(PropertyValue::Null)
    };
    let value = match name {
        PROP_REPOSITORY_NAME => PropertyValue::from(doc.repository_name()),
        PROP_PATH => doc
            .path()
            .map(PropertyValue::from)
            .unwrap_or(PropertyValue::Null),
        // A flexible record only holds the attachments placed under
        // retention as records.
        PROP_IS_RECORD => PropertyValue::Boolean(
            doc.is_record()
                && (!doc.is_flexible_record() || doc.is_under_retention_or_legal_hold(xpath)),
        ),
        PROP_IS_FLEXIBLE_RECORD => PropertyValue::Boolean(doc.is_flexible_record()),
        BLOB_NAME => opt(&blob.filename),
        BLOB_MIME_TYPE => opt(&blob.mime_type),
        BLOB_ENCODING => opt(&blob.encoding),
        BLOB_DIGEST => opt(&blob.digest),
        BLOB_LENGTH => blob
            .length
            .map(|l| PropertyValue::Integer(l as i64))
            .unwrap_or(PropertyValue::Null),
        BLOB_XPATH => PropertyValue::from(xpath),
        _ => return doc.property(name),
    };
    Some(value)
}
