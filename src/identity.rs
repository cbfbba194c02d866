//! Identity references and date windows.
//!
//! Turns free-form sender/mention references (`<@U123>`, `U123`, `@alice`,
//! `alice`) into predicates the message store can evaluate, and validates
//! the user-facing inputs (references and date bounds) before any query runs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::models::Identity;

static BRACKETED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<@([A-Z0-9]+)(?:\|[^>]*)?>$").expect("valid bracketed id regex"));

static PLATFORM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[UWS][A-Z0-9]{2,}$").expect("valid platform id regex"));

static ALNUM_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid alnum id regex"));

static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@?[\p{L}\p{N}._-]+$").expect("valid name regex"));

// ============================================================================
// Date ranges
// ============================================================================

/// Inclusive `[start, end]` window with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Start,
    End,
}

impl Bound {
    fn label(self) -> &'static str {
        match self {
            Bound::Start => "start",
            Bound::End => "end",
        }
    }
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidRange(format!(
                "start {} is later than end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse user-supplied bounds. Date-only values cover whole days.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start = parse_bound(start, Bound::Start)?;
        let end = parse_bound(end, Bound::End)?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Validate a pair of user-supplied bounds.
pub fn validate_date_range(start: &str, end: &str) -> Result<DateRange> {
    DateRange::parse(start, end)
}

fn parse_bound(raw: &str, bound: Bound) -> Result<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(Error::InvalidRange(format!(
            "{} date is missing",
            bound.label()
        )));
    }

    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let naive = match bound {
            Bound::Start => date.and_hms_opt(0, 0, 0),
            Bound::End => date.and_hms_micro_opt(23, 59, 59, 999_999),
        };
        if let Some(naive) = naive {
            return Ok(naive.and_utc());
        }
    }

    Err(Error::InvalidRange(format!(
        "{} date '{}' is not a valid date (use YYYY-MM-DD or RFC 3339)",
        bound.label(),
        value
    )))
}

// ============================================================================
// Identity references
// ============================================================================

/// Shape of a sender or mention reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityReference {
    /// `<@U123>` or `<@U123|label>`
    BracketedId(String),
    /// `U123`, `W123` or `S123`
    BareId(String),
    /// Display name with any leading `@` removed
    Name(String),
    /// Anything else; only usable as a substring
    Literal(String),
}

impl IdentityReference {
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();

        if let Some(caps) = BRACKETED_ID.captures(value) {
            return IdentityReference::BracketedId(caps[1].to_string());
        }
        if PLATFORM_ID.is_match(value) {
            return IdentityReference::BareId(value.to_string());
        }
        if NAME.is_match(value) {
            let name = value.trim_start_matches('@');
            return IdentityReference::Name(name.to_string());
        }
        IdentityReference::Literal(value.to_string())
    }
}

/// Disjunction of conditions that identify one referenced identity.
///
/// A message matches when any id matches, any name matches (case-insensitive)
/// or any literal occurs in its text (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityPredicate {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub literals: Vec<String>,
}

impl IdentityPredicate {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.names.is_empty() && self.literals.is_empty()
    }

    /// Does a message authored by this sender satisfy the predicate?
    pub fn matches_sender(
        &self,
        sender_id: &str,
        sender_display_name: &str,
        sender: Option<&Identity>,
    ) -> bool {
        if self.ids.iter().any(|id| id == sender_id) {
            return true;
        }
        self.names.iter().any(|name| {
            names_equal(name, sender_display_name)
                || sender.is_some_and(|identity| identity.matches_name(name))
        })
    }

    /// Does a message with this text and these mention targets satisfy it?
    ///
    /// `targets` pairs each mentioned id with its directory entry, if known.
    pub fn matches_mention(&self, text: &str, targets: &[(&str, Option<&Identity>)]) -> bool {
        let by_relation = targets.iter().any(|(target_id, identity)| {
            self.ids.iter().any(|id| id == target_id)
                || identity.is_some_and(|identity| {
                    self.names.iter().any(|name| identity.matches_name(name))
                })
        });
        if by_relation {
            return true;
        }

        let text = text.to_lowercase();
        self.literals
            .iter()
            .any(|literal| text.contains(&literal.to_lowercase()))
    }
}

fn names_equal(a: &str, b: &str) -> bool {
    !b.is_empty() && a.to_lowercase() == b.to_lowercase()
}

/// Resolve one reference. Never fails; unknown shapes become literals.
pub fn resolve_reference(raw: &str) -> IdentityPredicate {
    match IdentityReference::parse(raw) {
        IdentityReference::BracketedId(id) | IdentityReference::BareId(id) => {
            let mut literals = vec![format!("<@{}>", id), format!("<@{}|", id)];
            if id.starts_with('S') {
                literals.push(format!("<!subteam^{}>", id));
                literals.push(format!("<!subteam^{}|", id));
            }
            IdentityPredicate {
                ids: vec![id],
                names: Vec::new(),
                literals,
            }
        }
        IdentityReference::Name(name) => IdentityPredicate {
            literals: vec![format!("@{}", name)],
            names: vec![name],
            ids: Vec::new(),
        },
        IdentityReference::Literal(literal) if literal.is_empty() => IdentityPredicate::default(),
        IdentityReference::Literal(literal) => IdentityPredicate {
            literals: vec![literal],
            ..Default::default()
        },
    }
}

pub fn resolve_references(refs: &[String]) -> Vec<IdentityPredicate> {
    refs.iter().map(|r| resolve_reference(r)).collect()
}

/// Check that a reference has one of the accepted shapes.
pub fn validate_identity_reference(raw: &str) -> Result<()> {
    let value = raw.trim();
    let well_formed = !value.is_empty()
        && (BRACKETED_ID.is_match(value) || ALNUM_ID.is_match(value) || NAME.is_match(value));

    if well_formed {
        Ok(())
    } else {
        Err(Error::MalformedIdentityReference {
            reference: raw.to_string(),
        })
    }
}

pub fn validate_identity_references(refs: &[String]) -> Result<()> {
    refs.iter()
        .try_for_each(|r| validate_identity_reference(r))
}
