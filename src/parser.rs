use crate::error::DecodeError;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::io::{BufRead, Write};
use std::mem;
use std::str::FromStr;

/// `<redirect title="..."/>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRedirect {
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRevision {
    pub id: i32,
    pub timestamp: String,
    pub text: String,
}

/// A `<page>` element as it appears in the dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPage {
    pub title: String,
    pub namespace: u32,
    pub id: i32,
    pub redirect: Option<RawRedirect>,
    pub revisions: Vec<RawRevision>,
}

/// Skips ahead to the next `<page>` and decodes it.
///
/// Returns `Ok(None)` if the stream ends before another page starts.
pub fn read_page<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
) -> Result<Option<RawPage>, DecodeError> {
    loop {
        buf.clear();
        match reader.read_event_into(buf).map_err(|e| xml_error("page", e))? {
            Event::Start(e) if e.name().as_ref() == b"page" => break,
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
    read_page_body(reader, buf).map(Some)
}

/// Decodes the content of a `<page>` whose start tag was already consumed.
pub(crate) fn read_page_body<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
) -> Result<RawPage, DecodeError> {
    let mut page = RawPage::default();
    // Elements currently open below <page>
    let mut path: Vec<Vec<u8>> = Vec::with_capacity(4);
    let mut text = String::new();

    loop {
        buf.clear();
        match reader.read_event_into(buf).map_err(|e| xml_error("page", e))? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if path.is_empty() {
                    match name.as_slice() {
                        b"revision" => page.revisions.push(RawRevision::default()),
                        b"redirect" => page.redirect = Some(redirect_from(&e)?),
                        _ => {}
                    }
                }
                path.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                if path.is_empty() && e.name().as_ref() == b"redirect" {
                    page.redirect = Some(redirect_from(&e)?);
                }
            }
            Event::Text(e) => {
                if !path.is_empty() {
                    let unescaped = e.unescape().map_err(|e| xml_error("page", e))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(e) => {
                if !path.is_empty() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => match path.pop() {
                None => return Ok(page),
                Some(name) => assign_field(&mut page, &path, &name, &mut text)?,
            },
            Event::Eof => {
                return Err(DecodeError::parse(
                    "page",
                    "stream ended inside <page> element",
                ))
            }
            _ => {}
        }
    }
}

/// Stores the text collected for a closed element; `parents` is the path
/// below `<page>` leading to it.
fn assign_field(
    page: &mut RawPage,
    parents: &[Vec<u8>],
    name: &[u8],
    text: &mut String,
) -> Result<(), DecodeError> {
    match (parents, name) {
        ([], b"title") => page.title = mem::take(text),
        ([], b"ns") => page.namespace = parse_number("ns", text)?,
        ([], b"id") => page.id = parse_number("id", text)?,
        ([parent], field) if parent.as_slice() == b"revision" => {
            if let Some(revision) = page.revisions.last_mut() {
                match field {
                    b"id" => revision.id = parse_number("revision id", text)?,
                    b"timestamp" => revision.timestamp = mem::take(text),
                    b"text" => revision.text = mem::take(text),
                    _ => {}
                }
            }
        }
        _ => {}
    }
    text.clear();
    Ok(())
}

fn parse_number<T>(context: &'static str, text: &str) -> Result<T, DecodeError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text.trim()
        .parse()
        .map_err(|e| DecodeError::parse(context, format!("{:?}: {}", text, e)))
}

fn redirect_from(e: &BytesStart<'_>) -> Result<RawRedirect, DecodeError> {
    let title = match e
        .try_get_attribute("title")
        .map_err(|e| xml_error("redirect", e))?
    {
        Some(attr) => attr
            .unescape_value()
            .map_err(|e| xml_error("redirect", e))?
            .into_owned(),
        None => String::new(),
    };
    Ok(RawRedirect { title })
}

pub(crate) fn xml_error(context: &'static str, e: quick_xml::Error) -> DecodeError {
    DecodeError::parse(context, e.to_string())
}

/// Writes `page` as a `<page>` element in dump layout.
pub fn write_page<W: Write>(writer: &mut Writer<W>, page: &RawPage) -> quick_xml::Result<()> {
    writer
        .create_element("page")
        .write_inner_content(|w| {
            w.create_element("title")
                .write_text_content(BytesText::new(&page.title))?;
            w.create_element("ns")
                .write_text_content(BytesText::new(&page.namespace.to_string()))?;
            w.create_element("id")
                .write_text_content(BytesText::new(&page.id.to_string()))?;
            if let Some(redirect) = &page.redirect {
                w.create_element("redirect")
                    .with_attribute(("title", redirect.title.as_str()))
                    .write_empty()?;
            }
            for revision in &page.revisions {
                w.create_element("revision").write_inner_content(|w| {
                    w.create_element("id")
                        .write_text_content(BytesText::new(&revision.id.to_string()))?;
                    w.create_element("timestamp")
                        .write_text_content(BytesText::new(&revision.timestamp))?;
                    w.create_element("text")
                        .with_attribute(("xml:space", "preserve"))
                        .write_text_content(BytesText::new(&revision.text))?;
                    Ok::<(), quick_xml::Error>(())
                })?;
            }
            Ok::<(), quick_xml::Error>(())
        })?;
    Ok(())
}

/// Serializes pages back to back, without any enclosing element.
pub fn pages_to_xml(pages: &[RawPage]) -> quick_xml::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    for page in pages {
        write_page(&mut writer, page)?;
    }
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}
