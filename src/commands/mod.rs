//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI. Commands take the
//! loaded [`Config`](crate::config::Config); the store-facing parts are
//! generic so they run against [`MemoryStore`](crate::store::MemoryStore)
//! in tests.

pub mod crawl;
pub mod generate;
pub mod messages;
pub mod migrate;
pub mod topics;

use crate::error::Result;
use crate::identity::{validate_date_range, validate_identity_references};
use crate::models::MessageFilter;

/// Window and filters shared by `messages` and `generate`.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub start: String,
    pub end: String,
    pub senders: Vec<String>,
    pub mentions: Vec<String>,
    pub include_threads: bool,
}

impl Selection {
    /// Validate user input and build the filter.
    pub fn to_filter(&self) -> Result<MessageFilter> {
        let range = validate_date_range(&self.start, &self.end)?;
        validate_identity_references(&self.senders)?;
        validate_identity_references(&self.mentions)?;

        Ok(MessageFilter::new(range)
            .with_senders(self.senders.iter().cloned())
            .with_mentions(self.mentions.iter().cloned())
            .with_threads(self.include_threads))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn selection_builds_filter() {
        let selection = Selection {
            start: "2024-01-01".into(),
            end: "2024-01-31".into(),
            senders: vec!["@alice".into()],
            mentions: vec!["<@U123>".into()],
            include_threads: true,
        };
        let filter = selection.to_filter().unwrap();
        assert_eq!(filter.sender_contains, vec!["@alice".to_string()]);
        assert_eq!(filter.mention_targets, vec!["<@U123>".to_string()]);
        assert!(filter.include_threads);
    }

    #[test]
    fn selection_rejects_bad_input_before_querying() {
        let reversed = Selection {
            start: "2024-02-01".into(),
            end: "2024-01-01".into(),
            ..Selection::default()
        };
        assert!(matches!(reversed.to_filter(), Err(Error::InvalidRange(_))));

        let malformed = Selection {
            start: "2024-01-01".into(),
            end: "2024-01-02".into(),
            senders: vec!["not a name!".into()],
            ..Selection::default()
        };
        assert!(matches!(
            malformed.to_filter(),
            Err(Error::MalformedIdentityReference { .. })
        ));
    }
}
