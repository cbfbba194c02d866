//! Command-level tests against the in-memory store.

mod test_generate;
mod test_messages;
mod test_topics;
