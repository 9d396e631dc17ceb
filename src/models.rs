use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One historical edit of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: i32,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Canonical page handed to sinks.
///
/// An empty `redirect_title` means the page is not a redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub title: String,
    pub id: i32,
    pub namespace: u32,
    pub redirect_title: String,
    pub revisions: Vec<Revision>,
}

impl Page {
    pub fn is_redirect(&self) -> bool {
        !self.redirect_title.is_empty()
    }
}

/// Pages decoded from one archive segment, in segment order.
pub type PageBlock = Vec<Page>;
