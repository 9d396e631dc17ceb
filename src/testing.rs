//! Fixtures for building in-memory multistream archives.

use crate::parser::{pages_to_xml, RawPage, RawRedirect, RawRevision};
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::io::Write;

pub fn raw_page(id: i32) -> RawPage {
    RawPage {
        title: format!("Page {}", id),
        namespace: 0,
        id,
        redirect: None,
        revisions: vec![RawRevision {
            id: id * 100,
            timestamp: "2021-03-04T05:06:07Z".to_string(),
            text: format!("text of page {}", id),
        }],
    }
}

pub fn redirect_page(id: i32, target: &str) -> RawPage {
    RawPage {
        redirect: Some(RawRedirect {
            title: target.to_string(),
        }),
        ..raw_page(id)
    }
}

pub fn compress(xml: &str) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// A multistream archive: a header stream, one stream per segment, and a
/// closing stream, together with the matching index text.
pub struct Archive {
    pub data: Vec<u8>,
    pub index: String,
    pub offsets: Vec<i64>,
}

pub fn build_archive(segments: &[Vec<RawPage>]) -> Archive {
    let mut data = compress(
        "<mediawiki>\n<siteinfo><sitename>Wikipedia</sitename><dbname>testwiki</dbname></siteinfo>\n",
    );
    let mut index = String::new();
    let mut offsets = Vec::with_capacity(segments.len());

    for pages in segments {
        let offset = data.len() as i64;
        offsets.push(offset);
        for page in pages {
            index.push_str(&format!("{}:{}:{}\n", offset, page.id, page.title));
        }
        data.extend(compress(&pages_to_xml(pages).unwrap()));
    }
    data.extend(compress("</mediawiki>\n"));

    Archive {
        data,
        index,
        offsets,
    }
}

/// `count` segments of `per_segment` pages with consecutive ids starting at 1.
pub fn uniform_segments(count: usize, per_segment: usize) -> Vec<Vec<RawPage>> {
    (0..count)
        .map(|s| {
            (0..per_segment)
                .map(|p| raw_page((s * per_segment + p + 1) as i32))
                .collect()
        })
        .collect()
}
