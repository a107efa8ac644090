//! Harvest intents and their data-driven profiles.
//!
//! An [`IntentProfile`] is everything that differs between "find firms",
//! "find project leads" and "triage news": prompts, the payload collection
//! key, record shaping, validation rules, dedup fields and the store filter.
//! The pipeline itself is the same for all three.
//!
//! Built-in profiles can be overridden from YAML. The file is merged over
//! the built-in profile for the chosen intent, so it only needs the keys it
//! changes:
//!
//! ```yaml
//! record_count: 20
//! rules:
//!   lifecycle:
//!     keywords: [under construction, broke ground, topped out, ribbon cutting]
//! ```

use crate::dedup::{default_stop_words, DedupConfig};
use crate::error::Result;
use crate::models::{fields, Headline, Record};
use crate::scrapers::google_news;
use crate::store::EqFilter;
use crate::utils::{today_iso, today_long};
use crate::validate::{CategoryConstraint, LifecycleFilter, RegionFilter, ValidationRules};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::Value as YamlValue;
use std::fmt;
use std::path::Path;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HarvestIntent {
    /// Architecture and interior design firms.
    Firms,
    /// Vertical construction projects still in planning or design.
    Leads,
    /// Construction news headlines triaged by sector.
    News,
}

impl fmt::Display for HarvestIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HarvestIntent::Firms => "firms",
            HarvestIntent::Leads => "leads",
            HarvestIntent::News => "news",
        })
    }
}

/// Field fix-ups applied to every parsed record before validation.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Shaping {
    /// Drop every field not listed. `None` keeps all fields.
    pub keep_fields: Option<Vec<String>>,
    pub fill_from: Vec<FillFrom>,
    pub placeholders: Vec<Placeholder>,
}

/// Copy `from` into `field` when `field` is empty.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FillFrom {
    pub field: String,
    pub from: String,
}

/// Replace placeholder values (case-insensitive; blank always counts) with
/// a fixed text.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Placeholder {
    pub field: String,
    pub values: Vec<String>,
    pub replacement: String,
}

impl Shaping {
    pub fn apply(&self, mut record: Record) -> Record {
        record.trim_strings();
        if let Some(keep) = &self.keep_fields {
            record.retain_fields(keep);
        }
        for fill in &self.fill_from {
            if !record.has(&fill.field) {
                if let Some(value) = record.get(&fill.from).cloned() {
                    record.insert(fill.field.clone(), value);
                }
            }
        }
        for placeholder in &self.placeholders {
            let is_placeholder = match record.text(&placeholder.field) {
                None => record.get(&placeholder.field).is_some(),
                Some(v) => placeholder.values.iter().any(|p| p.eq_ignore_ascii_case(&v)),
            };
            if is_placeholder {
                record.insert(
                    placeholder.field.clone(),
                    Value::String(placeholder.replacement.clone()),
                );
            }
        }
        record
    }
}

/// Where the news intent gets its headlines.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadlineSource {
    pub feed_url: String,
    pub limit: usize,
}

impl Default for HeadlineSource {
    fn default() -> Self {
        Self {
            feed_url: google_news::DEFAULT_FEED_URL.to_string(),
            limit: google_news::DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IntentProfile {
    /// Key wrapping the record array in the webhook payload.
    pub collection_key: String,
    pub system_prompt: String,
    /// Placeholders: `{count}`, `{locality}`, `{today}`, `{today_iso}`, `{headlines}`.
    pub user_prompt: String,
    pub web_search: bool,
    pub record_count: usize,
    /// Whole-region label used when not harvesting per locality.
    pub region_name: String,
    /// Localities harvested one by one with `--per-locality`.
    pub localities: Vec<String>,
    pub headlines: Option<HeadlineSource>,
    pub shaping: Shaping,
    pub rules: ValidationRules,
    pub dedup: DedupConfig,
    /// Narrows the store read that seeds deduplication.
    pub store_filter: Option<EqFilter>,
}

impl Default for IntentProfile {
    fn default() -> Self {
        Self {
            collection_key: "records".to_string(),
            system_prompt: String::new(),
            user_prompt: String::new(),
            web_search: false,
            record_count: 10,
            region_name: "Delaware".to_string(),
            localities: Vec::new(),
            headlines: None,
            shaping: Shaping::default(),
            rules: ValidationRules::default(),
            dedup: DedupConfig::default(),
            store_filter: None,
        }
    }
}

/// Values substituted into a prompt template.
#[derive(Debug, Clone, Default)]
pub struct PromptVars<'a> {
    pub locality: Option<&'a str>,
    pub headlines: &'a [Headline],
}

impl IntentProfile {
    pub fn builtin(intent: HarvestIntent) -> Self {
        match intent {
            HarvestIntent::Firms => firms_profile(),
            HarvestIntent::Leads => leads_profile(),
            HarvestIntent::News => news_profile(),
        }
    }

    /// Built-in profile for `intent`, with an optional YAML file merged over it.
    #[instrument(level = "info", skip_all, fields(%intent))]
    pub fn load(intent: HarvestIntent, overrides: Option<&Path>) -> Result<Self> {
        let base = Self::builtin(intent);
        let Some(path) = overrides else {
            return Ok(base);
        };
        let text = std::fs::read_to_string(path)?;
        let profile = base.merged_with_yaml(&text)?;
        info!(path = %path.display(), "Loaded profile overrides");
        Ok(profile)
    }

    pub fn merged_with_yaml(&self, yaml: &str) -> Result<Self> {
        let mut base = serde_yaml::to_value(self)?;
        let overlay: YamlValue = serde_yaml::from_str(yaml)?;
        if !overlay.is_null() {
            merge_yaml(&mut base, overlay);
        }
        Ok(serde_yaml::from_value(base)?)
    }

    /// Name field used for logging and the always-required check.
    pub fn name_field(&self) -> &str {
        &self.rules.name_field
    }

    pub fn render_user_prompt(&self, vars: &PromptVars<'_>) -> String {
        self.render(&self.user_prompt, vars)
    }

    pub fn render_system_prompt(&self, vars: &PromptVars<'_>) -> String {
        self.render(&self.system_prompt, vars)
    }

    fn render(&self, template: &str, vars: &PromptVars<'_>) -> String {
        let locality = vars.locality.unwrap_or(self.region_name.as_str());
        let mut out = template
            .replace("{count}", &self.record_count.to_string())
            .replace("{locality}", locality)
            .replace("{today_iso}", &today_iso())
            .replace("{today}", &today_long());
        if out.contains("{headlines}") {
            let headlines =
                serde_json::to_string_pretty(vars.headlines).unwrap_or_else(|_| "[]".to_string());
            out = out.replace("{headlines}", &headlines);
        }
        out
    }
}

/// Recursively merge `overlay` into `base`; mappings merge, everything else replaces.
fn merge_yaml(base: &mut YamlValue, overlay: YamlValue) {
    match (base, overlay) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Municipalities and counties accepted as "in Delaware", matched as whole
/// words. `code_field` names the record's state-code field, if it has one.
fn delaware_region(location_fields: &[&str], code_field: Option<&str>) -> RegionFilter {
    RegionFilter {
        location_fields: strings(location_fields),
        code_field: code_field.map(str::to_string),
        localities: strings(&[
            "delaware",
            "wilmington",
            "dover",
            "newark",
            "middletown",
            "smyrna",
            "milford",
            "seaford",
            "georgetown",
            "lewes",
            "rehoboth",
            "new castle",
            "bear",
            "hockessin",
            "claymont",
            "camden",
            "harrington",
            "laurel",
            "millsboro",
            "selbyville",
            "ocean view",
            "bethany beach",
            "milton",
            "townsend",
            "kent",
            "sussex",
        ]),
        region_codes: strings(&["DE"]),
    }
}

fn firms_profile() -> IntentProfile {
    IntentProfile {
        collection_key: "firms".to_string(),
        system_prompt: "You are a business directory researcher with live web search.\n\
Look firms up in AIA Delaware member listings, professional associations and search results, \
and confirm each one has a working website and a Delaware address.\n\
Cite a real source URL for every firm. Reply with a JSON array only, no prose."
            .to_string(),
        user_prompt: "Find {count} real architecture or interior design firms operating in {locality} today ({today}).\n\n\
Useful searches: \"AIA Delaware member architects\", \"architecture firms Wilmington Delaware\", \
\"interior design firms Newark Delaware\", \"Delaware registered architects\".\n\n\
Only include firms with a working website, a Delaware office and activity in the last two years.\n\n\
Reply with a JSON array of objects with these keys:\n\
name, address, city, state (\"DE\"), website (full URL), phone (or null), contact_email (or null), \
specialties (array of strings), description (2-3 sentences), source_url (where you found it), \
last_verified (\"{today}\")."
            .to_string(),
        web_search: true,
        rules: ValidationRules {
            name_field: fields::NAME.to_string(),
            required_fields: strings(&[fields::CITY, fields::WEBSITE]),
            url_fields: strings(&[fields::WEBSITE, fields::SOURCE_URL]),
            source_fields: strings(&[fields::WEBSITE, fields::SOURCE_URL]),
            region: Some(delaware_region(
                &[fields::CITY, fields::STATE, fields::ADDRESS],
                Some(fields::STATE),
            )),
            ..Default::default()
        },
        dedup: DedupConfig {
            fields: strings(&[fields::NAME, fields::CITY]),
            stop_words: default_stop_words(),
        },
        store_filter: Some(EqFilter {
            column: fields::STATE.to_string(),
            value: "DE".to_string(),
        }),
        ..Default::default()
    }
}

fn leads_profile() -> IntentProfile {
    IntentProfile {
        collection_key: "leads".to_string(),
        system_prompt: "You are a construction market analyst with live web search.\n\
Find vertical building projects in Delaware 6-18 months before they go to bid, with interior \
flooring potential: hospitals, schools, offices, multifamily.\n\
Work from municipal and county planning agendas, healthcare system expansions (ChristianaCare, \
Bayhealth, Nemours), State OMB and university capital programs, and architect selection notices.\n\
Reply with a JSON array only, no prose."
            .to_string(),
        user_prompt: "Today is {today}. Find {count} real vertical construction projects in {locality} \
that are in planning, design or permitting.\n\n\
Rules:\n\
- Construction must start in the future; skip anything that has broken ground.\n\
- Buildings only: no roads, bridges or sewer work.\n\
- Name the architect or designer whenever one has been selected.\n\
- Estimate flooring scope from the sector and square footage.\n\n\
Reply with a JSON array of objects with these keys:\n\
name, address, city, county (New Castle|Kent|Sussex), \
sector (Healthcare|Education|Corporate|Multi Family|Hospitality|Senior Living|Retail|Mixed Use), \
budget, source_url, designer, general_contractor (or \"TBD - Pre-bid\"), \
project_stage (Planning|Design|Permits), construction_status (\"Not Started - Expected <date>\"), \
description (2-3 sentences), flooring_opportunity, flooring_tags (array, e.g. LVT, Carpet, Tile), \
estimated_sqft (number), last_updated (\"{today_iso}\")."
            .to_string(),
        web_search: true,
        localities: strings(&[
            "the City of Wilmington, Delaware",
            "New Castle County, Delaware",
            "Kent County, Delaware",
            "Sussex County, Delaware",
        ]),
        shaping: Shaping {
            placeholders: vec![Placeholder {
                field: fields::DESIGNER.to_string(),
                values: strings(&["TBD", "N/A", "Unknown"]),
                replacement: "Seeking Architect / RFP Stage".to_string(),
            }],
            ..Default::default()
        },
        rules: ValidationRules {
            name_field: fields::NAME.to_string(),
            required_fields: strings(&[fields::SOURCE_URL]),
            url_fields: strings(&[fields::SOURCE_URL]),
            source_fields: strings(&[fields::SOURCE_URL]),
            region: Some(delaware_region(
                &[fields::CITY, fields::COUNTY, fields::ADDRESS],
                None,
            )),
            lifecycle: Some(LifecycleFilter {
                keywords: strings(&[
                    "under construction",
                    "groundbreaking held",
                    "broke ground",
                    "topped out",
                ]),
                text_fields: strings(&[fields::DESCRIPTION, fields::CONSTRUCTION_STATUS]),
            }),
            ..Default::default()
        },
        dedup: DedupConfig {
            fields: strings(&[fields::NAME, fields::CITY, fields::ESTIMATED_SQFT]),
            stop_words: default_stop_words(),
        },
        ..Default::default()
    }
}

fn news_profile() -> IntentProfile {
    let sectors = strings(&[
        "Healthcare",
        "Government",
        "Corporate",
        "Education",
        "Multi Family",
        "Hospitality",
        "Senior Living",
        "Retail",
    ]);
    IntentProfile {
        collection_key: "news".to_string(),
        system_prompt: "You are a construction analyst. Reply with valid JSON only, without markdown."
            .to_string(),
        user_prompt: format!(
            "Review the news headlines below.\n\
1. Drop anything that is not about building construction (road and highway paving does not count).\n\
2. Put each remaining story in exactly one sector, spelled exactly as one of: {}.\n\
3. Reply with only a JSON array of objects with keys title, source_url (the full article link), \
sector and summary (one or two sentences).\n\n\
Headlines:\n{{headlines}}",
            sectors.join(", ")
        ),
        web_search: false,
        headlines: Some(HeadlineSource::default()),
        shaping: Shaping {
            keep_fields: Some(strings(&[
                fields::TITLE,
                fields::SOURCE_URL,
                fields::SECTOR,
                fields::SUMMARY,
            ])),
            fill_from: vec![FillFrom {
                field: fields::SUMMARY.to_string(),
                from: fields::TITLE.to_string(),
            }],
            ..Default::default()
        },
        rules: ValidationRules {
            name_field: fields::TITLE.to_string(),
            required_fields: strings(&[fields::SOURCE_URL, fields::SECTOR]),
            url_fields: strings(&[fields::SOURCE_URL]),
            categories: vec![CategoryConstraint {
                field: fields::SECTOR.to_string(),
                allowed: sectors,
            }],
            ..Default::default()
        },
        dedup: DedupConfig {
            fields: strings(&[fields::TITLE]),
            stop_words: default_stop_words(),
        },
        ..Default::default()
    }
}
