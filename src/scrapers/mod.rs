//! Dashboard scraping: login, row collection, and row parsing.

pub mod login;
pub mod page;
pub mod record;

pub use login::{AuthError, Authenticator, LoginSelectors, LoginStage};
pub use page::{scrape_records, ScrapeError, ScrapeReport};
pub use record::{parse_record, parse_record_versioned, ParseError, SCHEMA_VERSION};

/// Default selector for one listing row on the dashboard.
pub const DEFAULT_ROW_SELECTOR: &str = ".project-row";
