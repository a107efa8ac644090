//! Per-record pass/fail checks.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. required fields (the name field is always required)
//! 2. URL fields are absolute `http`/`https` URLs, and at least one source
//!    field carries one
//! 3. region match on the location fields
//! 4. lifecycle keywords ("broke ground", ...) in free-text fields
//! 5. enumerated categories
//!
//! The lifecycle check is a plain substring test. "Not yet under
//! construction" still contains "under construction" and is rejected; that
//! is how the filter behaves and callers tune it through the keyword list.

use crate::models::{fields, Record};
use crate::utils::contains_phrase;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

/// Why a record was dropped. Not an error: an expected filtering outcome.
///
/// The `Display` text is the reason written to the rejection log line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// A required field is absent, null or blank.
    #[error("missing required field: {field}")]
    MissingField { field: String },

    /// A URL field holds something other than an absolute http(s) URL.
    #[error("invalid URL")]
    InvalidUrl { field: String, value: String },

    /// None of the source fields carries a usable URL.
    #[error("no verifiable source URL")]
    NoSourceUrl,

    /// No location field names a known locality or region code.
    #[error("out of region")]
    OutOfRegion,

    /// A lifecycle keyword shows the project has already started.
    #[error("already past target stage")]
    AlreadyPastTargetStage { keyword: String, field: String },

    /// A categorized field is missing or outside its allowed values.
    #[error("invalid {field} '{value}'")]
    InvalidCategory { field: String, value: String },
}

/// Everything a record must satisfy to be published.
///
/// Deserializable so profiles can carry and override the rules; every key
/// is optional and falls back to [`Default`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationRules {
    /// Field holding the record's display name; always required.
    pub name_field: String,
    /// Fields that must be present and non-blank.
    pub required_fields: Vec<String>,
    /// Fields that, when present, must hold an absolute http(s) URL.
    pub url_fields: Vec<String>,
    /// At least one of these must hold a valid URL. Empty disables the check.
    pub source_fields: Vec<String>,
    /// Geographic filter; `None` accepts any location.
    pub region: Option<RegionFilter>,
    /// Stage filter for projects; `None` disables it.
    pub lifecycle: Option<LifecycleFilter>,
    /// Enumerated fields, each checked independently.
    pub categories: Vec<CategoryConstraint>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            name_field: fields::NAME.to_string(),
            required_fields: Vec::new(),
            url_fields: Vec::new(),
            source_fields: Vec::new(),
            region: None,
            lifecycle: None,
            categories: Vec::new(),
        }
    }
}

/// A record is in region when any location field names a locality or a
/// region code.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RegionFilter {
    /// Fields searched for localities and codes (city, county, address...).
    pub location_fields: Vec<String>,
    /// Matched as whole words or phrases, case-insensitively ("new castle").
    pub localities: Vec<String>,
    /// Matched as whole words ("DE").
    pub region_codes: Vec<String>,
    /// Field holding a two-letter state code. A code not listed in
    /// `region_codes` rejects the record whatever its city says.
    pub code_field: Option<String>,
}

/// Free-text keywords showing a project is already past the target stage.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleFilter {
    /// Matched as case-insensitive substrings.
    pub keywords: Vec<String>,
    /// Fields searched, in order; the first hit is reported.
    pub text_fields: Vec<String>,
}

/// Closed set of values for one field.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct CategoryConstraint {
    pub field: String,
    /// Case-sensitive exact matches.
    pub allowed: Vec<String>,
}

/// Result of [`validate`]: input order is kept on both sides.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    /// Records that passed every check, unchanged.
    pub accepted: Vec<Record>,
    /// Dropped records with the first check they failed.
    pub rejected: Vec<(Record, Rejection)>,
}

/// Split records into accepted and rejected, logging one line per rejection.
///
/// # Arguments
///
/// * `records` - Shaped candidates from the harvest stage
/// * `rules` - Rules of the current intent
///
/// # Returns
///
/// A [`ValidationOutcome`]; records are moved, never modified.
#[instrument(level = "info", skip_all, fields(candidates = records.len()))]
pub fn validate(records: Vec<Record>, rules: &ValidationRules) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    for (i, record) in records.into_iter().enumerate() {
        match check(&record, rules) {
            Ok(()) => {
                info!(index = i, name = %record.label(&rules.name_field), "Accepted record");
                outcome.accepted.push(record);
            }
            Err(rejection) => {
                warn!(
                    index = i,
                    name = %record.label(&rules.name_field),
                    reason = %rejection,
                    detail = ?rejection,
                    "Rejected record"
                );
                outcome.rejected.push((record, rejection));
            }
        }
    }

    info!(
        accepted = outcome.accepted.len(),
        rejected = outcome.rejected.len(),
        "Validation complete"
    );
    outcome
}

/// Run every check against one record, stopping at the first failure.
pub fn check(record: &Record, rules: &ValidationRules) -> Result<(), Rejection> {
    check_required(record, rules)?;
    check_urls(record, rules)?;
    if let Some(region) = &rules.region {
        check_region(record, region)?;
    }
    if let Some(lifecycle) = &rules.lifecycle {
        check_lifecycle(record, lifecycle)?;
    }
    for constraint in &rules.categories {
        check_category(record, constraint)?;
    }
    Ok(())
}

fn check_required(record: &Record, rules: &ValidationRules) -> Result<(), Rejection> {
    std::iter::once(&rules.name_field)
        .chain(rules.required_fields.iter())
        .find(|field| !record.has(field))
        .map_or(Ok(()), |field| {
            Err(Rejection::MissingField {
                field: field.clone(),
            })
        })
}

fn check_urls(record: &Record, rules: &ValidationRules) -> Result<(), Rejection> {
    for field in &rules.url_fields {
        if let Some(value) = record.text(field) {
            if !is_http_url(&value) {
                return Err(Rejection::InvalidUrl {
                    field: field.clone(),
                    value,
                });
            }
        }
    }

    if rules.source_fields.is_empty() {
        return Ok(());
    }
    let has_source = rules
        .source_fields
        .iter()
        .filter_map(|field| record.text(field))
        .any(|value| is_http_url(&value));
    if has_source {
        Ok(())
    } else {
        Err(Rejection::NoSourceUrl)
    }
}

fn check_region(record: &Record, region: &RegionFilter) -> Result<(), Rejection> {
    let foreign_code = region
        .code_field
        .as_ref()
        .and_then(|field| record.text(field))
        .filter(|code| code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()))
        .is_some_and(|code| {
            !region
                .region_codes
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&code))
        });
    if foreign_code {
        return Err(Rejection::OutOfRegion);
    }

    let matched = region
        .location_fields
        .iter()
        .filter_map(|field| record.text(field))
        .any(|location| {
            region
                .localities
                .iter()
                .chain(region.region_codes.iter())
                .any(|name| contains_phrase(&location, name))
        });
    if matched {
        Ok(())
    } else {
        Err(Rejection::OutOfRegion)
    }
}

fn check_lifecycle(record: &Record, lifecycle: &LifecycleFilter) -> Result<(), Rejection> {
    for field in &lifecycle.text_fields {
        let Some(text) = record.text(field) else {
            continue;
        };
        let lowered = text.to_lowercase();
        if let Some(keyword) = lifecycle
            .keywords
            .iter()
            .find(|kw| lowered.contains(&kw.to_lowercase()))
        {
            return Err(Rejection::AlreadyPastTargetStage {
                keyword: keyword.clone(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}

fn check_category(record: &Record, constraint: &CategoryConstraint) -> Result<(), Rejection> {
    let value = record.text(&constraint.field).unwrap_or_default();
    if constraint.allowed.iter().any(|allowed| *allowed == value) {
        Ok(())
    } else {
        Err(Rejection::InvalidCategory {
            field: constraint.field.clone(),
            value,
        })
    }
}

/// Absolute URL written with a literal `http://` or `https://` prefix and
/// a host. Scheme-relative or upper-case forms are refused even though a
/// browser would accept them.
pub fn is_http_url(value: &str) -> bool {
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return false;
    }
    match Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(v: Value) -> Record {
        serde_json::from_value(v).unwrap()
    }

    fn firm_rules() -> ValidationRules {
        ValidationRules {
            required_fields: vec!["city".into(), "website".into()],
            url_fields: vec!["website".into(), "source_url".into()],
            source_fields: vec!["website".into(), "source_url".into()],
            region: Some(RegionFilter {
                location_fields: vec!["city".into(), "state".into(), "address".into()],
                localities: vec!["dover".into(), "wilmington".into(), "new castle".into()],
                region_codes: vec!["DE".into()],
                code_field: Some("state".into()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_complete_record() {
        let r = record(json!({"name": "Acme Design", "website": "https://acme.example", "city": "Dover"}));
        assert_eq!(check(&r, &firm_rules()), Ok(()));
    }

    #[test]
    fn test_missing_name_is_always_rejected() {
        let r = record(json!({"name": "  ", "website": "https://acme.example", "city": "Dover"}));
        assert_eq!(
            check(&r, &ValidationRules::default()),
            Err(Rejection::MissingField { field: "name".into() })
        );
    }

    #[test]
    fn test_missing_required_field_names_the_field() {
        let r = record(json!({"name": "Acme Design", "website": "https://acme.example"}));
        let rejection = check(&r, &firm_rules()).unwrap_err();
        assert_eq!(rejection, Rejection::MissingField { field: "city".into() });
        assert!(rejection.to_string().contains("city"));
    }

    #[test]
    fn test_ftp_scheme_is_invalid_url() {
        let r = record(json!({"name": "Acme Design", "website": "ftp://acme.example", "city": "Dover"}));
        let rejection = check(&r, &firm_rules()).unwrap_err();
        assert_eq!(rejection.to_string(), "invalid URL");
        assert!(matches!(rejection, Rejection::InvalidUrl { ref field, .. } if field == "website"));
    }

    #[test]
    fn test_relative_url_is_invalid() {
        let r = record(json!({"name": "Acme", "website": "https://acme.example", "source_url": "acme.example/about", "city": "Dover"}));
        assert!(matches!(check(&r, &firm_rules()), Err(Rejection::InvalidUrl { .. })));
    }

    #[test]
    fn test_source_url_required_when_configured() {
        let rules = ValidationRules {
            source_fields: vec!["website".into(), "source_url".into()],
            ..Default::default()
        };
        let r = record(json!({"name": "Acme", "address": "1 Main St, Dover"}));
        assert_eq!(check(&r, &rules), Err(Rejection::NoSourceUrl));
        let r = record(json!({"name": "Acme", "source_url": "http://news.example/acme"}));
        assert_eq!(check(&r, &rules), Ok(()));
    }

    #[test]
    fn test_region_code_matches_as_word_only() {
        let r = record(json!({"name": "Acme", "website": "https://acme.example", "city": "Lewes", "state": "DE"}));
        assert_eq!(check(&r, &firm_rules()), Ok(()));

        let r = record(json!({"name": "Acme", "website": "https://acme.example", "city": "Design District", "state": "PA"}));
        assert_eq!(check(&r, &firm_rules()), Err(Rejection::OutOfRegion));
    }

    #[test]
    fn test_locality_must_be_a_whole_word() {
        let rules = ValidationRules {
            region: Some(RegionFilter {
                location_fields: vec!["city".into(), "state".into()],
                localities: vec!["kent".into(), "bear".into(), "new castle".into()],
                region_codes: vec!["DE".into()],
                code_field: None,
            }),
            ..Default::default()
        };
        for (city, state) in [("Louisville", "Kentucky"), ("Bearden", "TN"), ("Newcastle", "WY")] {
            let r = record(json!({"name": "Acme", "city": city, "state": state}));
            assert_eq!(check(&r, &rules), Err(Rejection::OutOfRegion), "{city}, {state}");
        }
        let r = record(json!({"name": "Acme", "city": "Kent County"}));
        assert_eq!(check(&r, &rules), Ok(()));
    }

    #[test]
    fn test_foreign_state_code_overrides_city() {
        let rules = firm_rules();
        for (city, state) in [("Dover", "NJ"), ("Wilmington", "nc")] {
            let r = record(json!({"name": "Acme", "website": "https://acme.example", "city": city, "state": state}));
            assert_eq!(check(&r, &rules), Err(Rejection::OutOfRegion), "{city}, {state}");
        }
        let r = record(json!({"name": "Acme", "website": "https://acme.example", "city": "Dover", "state": "de"}));
        assert_eq!(check(&r, &rules), Ok(()));
        // Full state names are not codes; the city decides.
        let r = record(json!({"name": "Acme", "website": "https://acme.example", "city": "Dover", "state": "Delaware"}));
        assert_eq!(check(&r, &rules), Ok(()));
    }

    #[test]
    fn test_region_locality_is_case_insensitive() {
        let r = record(json!({"name": "Acme", "website": "https://acme.example", "city": "Philadelphia", "address": "200 Main St, NEW CASTLE"}));
        assert_eq!(check(&r, &firm_rules()), Ok(()));
    }

    #[test]
    fn test_lifecycle_keyword_rejects() {
        let rules = ValidationRules {
            lifecycle: Some(LifecycleFilter {
                keywords: vec!["under construction".into(), "broke ground".into()],
                text_fields: vec!["description".into(), "construction_status".into()],
            }),
            ..Default::default()
        };
        let r = record(json!({"name": "Bayhealth Tower", "construction_status": "Crews Broke Ground in May"}));
        assert_eq!(
            check(&r, &rules),
            Err(Rejection::AlreadyPastTargetStage {
                keyword: "broke ground".into(),
                field: "construction_status".into()
            })
        );

        // Lexical filter: a negated mention still matches.
        let r = record(json!({"name": "Nemours Clinic", "description": "Not yet under construction"}));
        assert_eq!(check(&r, &rules).unwrap_err().to_string(), "already past target stage");

        let r = record(json!({"name": "UD Lab", "description": "In design; bids due Q3"}));
        assert_eq!(check(&r, &rules), Ok(()));
    }

    #[test]
    fn test_category_is_case_sensitive() {
        let rules = ValidationRules {
            name_field: "title".into(),
            categories: vec![CategoryConstraint {
                field: "sector".into(),
                allowed: vec!["Healthcare".into(), "Multi Family".into()],
            }],
            ..Default::default()
        };
        let ok = record(json!({"title": "New clinic", "sector": "Healthcare"}));
        assert_eq!(check(&ok, &rules), Ok(()));
        let bad = record(json!({"title": "New clinic", "sector": "healthcare"}));
        assert_eq!(
            check(&bad, &rules),
            Err(Rejection::InvalidCategory { field: "sector".into(), value: "healthcare".into() })
        );
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        // Missing city and bad URL: the required-field failure wins.
        let r = record(json!({"name": "Acme", "website": "ftp://acme.example"}));
        assert!(matches!(check(&r, &firm_rules()), Err(Rejection::MissingField { .. })));
    }

    #[test]
    fn test_validate_partitions_batch() {
        let records = vec![
            record(json!({"name": "Acme Design", "website": "https://acme.example", "city": "Dover"})),
            record(json!({"name": "Acme Design", "website": "ftp://acme.example", "city": "Dover"})),
            record(json!({"website": "https://nameless.example", "city": "Dover"})),
        ];
        let outcome = validate(records, &firm_rules());
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.rejected.len(), 2);
        assert_eq!(outcome.rejected[0].1.to_string(), "invalid URL");
        assert_eq!(outcome.rejected[1].1, Rejection::MissingField { field: "name".into() });
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://acme.example"));
        assert!(is_http_url("http://acme.example/path?q=1"));
        assert!(!is_http_url("ftp://acme.example"));
        assert!(!is_http_url("www.acme.example"));
        assert!(!is_http_url("N/A"));
        assert!(!is_http_url("http:acme.example"));
        assert!(!is_http_url("HTTPS://ACME.EXAMPLE"));
        assert!(!is_http_url("https://"));
    }

    #[test]
    fn test_rules_deserialize_from_yaml_with_defaults() {
        let yaml = "required_fields: [city]\nregion:\n  location_fields: [city]\n  localities: [dover]\n";
        let rules: ValidationRules = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules.name_field, "name");
        assert_eq!(rules.required_fields, vec!["city".to_string()]);
        assert!(rules.region.unwrap().region_codes.is_empty());
    }
}
