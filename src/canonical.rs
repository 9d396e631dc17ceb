use crate::error::DecodeError;
use crate::models::{Page, Revision};
use crate::parser::{RawPage, RawRedirect, RawRevision};
use chrono::{DateTime, SecondsFormat, Utc};

/// Converts a decoded `<page>` into the canonical [`Page`].
///
/// A malformed revision timestamp fails the whole page.
pub fn to_page(raw: RawPage) -> Result<Page, DecodeError> {
    let revisions = raw
        .revisions
        .into_iter()
        .map(to_revision)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        title: raw.title,
        id: raw.id,
        namespace: raw.namespace,
        redirect_title: raw.redirect.map(|r| r.title).unwrap_or_default(),
        revisions,
    })
}

fn to_revision(raw: RawRevision) -> Result<Revision, DecodeError> {
    Ok(Revision {
        id: raw.id,
        timestamp: parse_timestamp(&raw.timestamp)?,
        text: raw.text,
    })
}

/// Parses dump timestamps such as `2024-01-15T10:30:00Z`.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DecodeError::parse("timestamp", format!("{:?}: {}", value, e)))
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Maps a canonical page back onto the dump schema.
pub fn to_raw(page: &Page) -> RawPage {
    RawPage {
        title: page.title.clone(),
        namespace: page.namespace,
        id: page.id,
        redirect: page.is_redirect().then(|| RawRedirect {
            title: page.redirect_title.clone(),
        }),
        revisions: page
            .revisions
            .iter()
            .map(|r| RawRevision {
                id: r.id,
                timestamp: format_timestamp(&r.timestamp),
                text: r.text.clone(),
            })
            .collect(),
    }
}
