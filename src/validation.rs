//! Field checks that run before any network call.
//!
//! Create and edit share one rule set: bedrooms and bathrooms must be
//! whole numbers `>= 0` on both paths.

use crate::error::{Result, SubmissionError};
use crate::models::{Availability, ListingFields, ListingKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Order in which violations are reported; the first failing field wins
const FIELD_ORDER: [&str; 10] = [
    "title",
    "description",
    "location",
    "price",
    "bedrooms",
    "bathrooms",
    "area",
    "available_from",
    "available_to",
    "availability",
];

/// Raw listing form as typed by the seller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingForm {
    pub title: String,
    pub description: String,
    pub kind: Option<ListingKind>,
    pub price: String,
    pub location: String,
    pub bedrooms: String,
    pub bathrooms: String,
    pub area: String,
    pub available_from: String,
    pub available_to: String,
}

/// Typed candidate field set
#[derive(Debug, Clone, Validate)]
pub struct ListingDraft {
    #[validate(length(min = 5, max = 200, message = "must be between 5 and 200 characters"))]
    pub title: String,

    #[validate(length(min = 20, max = 5000, message = "must be between 20 and 5000 characters"))]
    pub description: String,

    pub kind: ListingKind,

    #[validate(range(exclusive_min = 0.0, message = "must be greater than 0"))]
    pub price: f64,

    #[validate(length(min = 3, max = 200, message = "must be between 3 and 200 characters"))]
    pub location: String,

    #[validate(range(min = 0, message = "must be 0 or greater"))]
    pub bedrooms: i64,

    #[validate(range(min = 0, message = "must be 0 or greater"))]
    pub bathrooms: i64,

    #[validate(range(min = 1, message = "must be greater than 0"))]
    pub area: Option<i64>,

    pub available_from: Option<NaiveDate>,
    pub available_to: Option<NaiveDate>,
}

impl ListingForm {
    /// Parse the text fields into a typed draft.
    ///
    /// Empty optional fields become `None`; anything unparseable is a
    /// validation error on that field, the earliest field winning.
    pub fn parse(&self) -> Result<ListingDraft> {
        let (draft, mut failures) = self.parse_lenient();
        match first_in_order(&mut failures) {
            Some(err) => Err(err),
            None => Ok(draft),
        }
    }

    /// Parse every field, substituting a passing placeholder for each one
    /// that fails so the draft can still be rule-checked.
    fn parse_lenient(&self) -> (ListingDraft, Vec<Violation>) {
        let mut failures = Vec::new();
        let draft = ListingDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            kind: self.kind.unwrap_or(ListingKind::Rent),
            price: or_record(&mut failures, parse_price(&self.price), 1.0),
            location: self.location.clone(),
            bedrooms: or_record(&mut failures, parse_whole("bedrooms", &self.bedrooms), 0),
            bathrooms: or_record(&mut failures, parse_whole("bathrooms", &self.bathrooms), 0),
            area: or_record(&mut failures, parse_optional_whole("area", &self.area), None),
            available_from: or_record(
                &mut failures,
                parse_date("available_from", &self.available_from),
                None,
            ),
            available_to: or_record(
                &mut failures,
                parse_date("available_to", &self.available_to),
                None,
            ),
        };
        (draft, failures)
    }
}

fn or_record<T>(failures: &mut Vec<Violation>, parsed: Result<T>, placeholder: T) -> T {
    match parsed {
        Ok(value) => value,
        Err(SubmissionError::Validation { field, rule }) => {
            failures.push((field, rule));
            placeholder
        }
        Err(other) => {
            failures.push(("listing", other.to_string()));
            placeholder
        }
    }
}

impl From<&ListingFields> for ListingForm {
    fn from(fields: &ListingFields) -> Self {
        let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        Self {
            title: fields.title.clone(),
            description: fields.description.clone(),
            kind: Some(fields.kind),
            price: fields.price.to_string(),
            location: fields.location.clone(),
            bedrooms: fields.bedrooms.to_string(),
            bathrooms: fields.bathrooms.to_string(),
            area: fields.area.map(|a| a.to_string()).unwrap_or_default(),
            available_from: date(fields.availability.from),
            available_to: date(fields.availability.to),
        }
    }
}

/// A failing field and the rule it broke
type Violation = (&'static str, String);

/// Pick the violation of the earliest field in [`FIELD_ORDER`]
fn first_in_order(violations: &mut Vec<Violation>) -> Option<SubmissionError> {
    let rank = |field: &str| {
        FIELD_ORDER
            .iter()
            .position(|f| *f == field)
            .unwrap_or(FIELD_ORDER.len())
    };
    violations.sort_by_key(|(field, _)| rank(field));
    violations
        .drain(..)
        .next()
        .map(|(field, rule)| SubmissionError::validation(field, rule))
}

fn parse_price(raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(price) if price.is_finite() => Ok(price),
        _ => Err(SubmissionError::validation("price", "must be a number")),
    }
}

fn parse_whole(field: &'static str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| SubmissionError::validation(field, "must be a whole number"))
}

fn parse_optional_whole(field: &'static str, raw: &str) -> Result<Option<i64>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_whole(field, raw).map(Some)
}

fn parse_date(field: &'static str, raw: &str) -> Result<Option<NaiveDate>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| SubmissionError::validation(field, "must be a date (YYYY-MM-DD)"))
}

/// Check a draft and return the normalized field set, or the first violation.
pub fn validate(draft: &ListingDraft) -> Result<ListingFields> {
    check(draft, Vec::new())
}

/// Parse and validate a raw form in one step.
///
/// Parse failures and rule failures compete on field order, so a short
/// title is reported ahead of an unparseable price.
pub fn validate_form(form: &ListingForm) -> Result<ListingFields> {
    let (draft, failures) = form.parse_lenient();
    check(&draft, failures)
}

fn check(draft: &ListingDraft, mut violations: Vec<Violation>) -> Result<ListingFields> {
    let mut draft = draft.clone();
    draft.title = draft.title.trim().to_string();
    draft.description = draft.description.trim().to_string();
    draft.location = draft.location.trim().to_string();

    if let Err(errors) = draft.validate() {
        let field_errors = errors.field_errors();
        for field in FIELD_ORDER {
            if let Some(first) = field_errors.get(field).and_then(|errs| errs.first()) {
                let rule = first
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| first.code.to_string());
                violations.push((field, rule));
            }
        }
        if violations.is_empty() {
            violations.push(("listing", errors.to_string()));
        }
    }

    let availability = match draft.kind {
        ListingKind::Rent => Availability {
            from: draft.available_from,
            to: draft.available_to,
        },
        ListingKind::Sale => Availability::default(),
    };
    if let (Some(from), Some(to)) = (availability.from, availability.to) {
        if from > to {
            violations.push((
                "availability",
                "available from must not be after available to".to_string(),
            ));
        }
    }

    if let Some(err) = first_in_order(&mut violations) {
        return Err(err);
    }

    Ok(ListingFields {
        title: draft.title,
        description: draft.description,
        kind: draft.kind,
        price: draft.price,
        location: draft.location,
        bedrooms: to_count("bedrooms", draft.bedrooms)?,
        bathrooms: to_count("bathrooms", draft.bathrooms)?,
        area: draft.area.map(|a| to_count("area", a)).transpose()?,
        availability,
    })
}

fn to_count(field: &'static str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| SubmissionError::validation(field, "is too large"))
}
