//! NZB manifest generation
//!
//! NZB is an XML-based file format used to describe Usenet binary posts.
//! Every posted file becomes one `<file>` element listing the Message-IDs of
//! its parts, so downloaders can fetch and reassemble them.
//!
//! Reference: https://sabnzbd.org/wiki/extra/nzb-spec

mod registry;

pub use registry::NzbRegistry;

use crate::error::{PostError, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

/// NZB document
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Nzb {
    /// Files described in this NZB, in posting order
    pub files: Vec<NzbFile>,
}

/// A single file entry in an NZB
#[derive(Debug, Clone, PartialEq)]
pub struct NzbFile {
    /// Poster name/email
    pub poster: String,
    /// Unix timestamp of posting
    pub date: i64,
    /// Subject line
    pub subject: String,
    /// Newsgroups where this file was posted
    pub groups: Vec<String>,
    /// Segments (parts) of this file
    pub segments: Vec<NzbSegment>,
}

/// A segment (part) of a file
#[derive(Debug, Clone, PartialEq)]
pub struct NzbSegment {
    /// Size of this segment in bytes
    pub bytes: u64,
    /// Segment number (1-based)
    pub number: u32,
    /// Message-ID without angle brackets
    pub message_id: String,
}

impl NzbFile {
    /// Calculate total size of all segments
    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes).sum()
    }
}

fn xml_err(e: impl std::fmt::Display) -> PostError {
    PostError::Nzb(e.to_string())
}

impl Nzb {
    /// Render the document, with `comment` as the first child of `<nzb>`
    ///
    /// # Example
    /// ```
    /// use nntp_poster::nzb::{Nzb, NzbFile, NzbSegment};
    ///
    /// let nzb = Nzb {
    ///     files: vec![NzbFile {
    ///         poster: "user@example.com".to_string(),
    ///         date: 1234567890,
    ///         subject: "Test [1/1]".to_string(),
    ///         groups: vec!["alt.binaries.test".to_string()],
    ///         segments: vec![NzbSegment {
    ///             bytes: 768000,
    ///             number: 1,
    ///             message_id: "part1@example.com".to_string(),
    ///         }],
    ///     }],
    /// };
    ///
    /// let xml = nzb.to_xml("Generated by hand").unwrap();
    /// assert!(xml.contains("<!--Generated by hand-->"));
    /// assert!(xml.contains(">part1@example.com</segment>"));
    /// ```
    pub fn to_xml(&self, comment: &str) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        let mut nzb_elem = BytesStart::new("nzb");
        nzb_elem.push_attribute(("xmlns", "http://www.newzbin.com/DTD/2003/nzb"));
        writer.write_event(Event::Start(nzb_elem)).map_err(xml_err)?;
        writer
            .write_event(Event::Comment(BytesText::from_escaped(comment.replace("--", "- -"))))
            .map_err(xml_err)?;

        for file in &self.files {
            let mut file_elem = BytesStart::new("file");
            // push_attribute escapes for us
            file_elem.push_attribute(("poster", file.poster.as_str()));
            file_elem.push_attribute(("date", file.date.to_string().as_str()));
            file_elem.push_attribute(("subject", file.subject.as_str()));
            writer.write_event(Event::Start(file_elem)).map_err(xml_err)?;

            writer
                .write_event(Event::Start(BytesStart::new("groups")))
                .map_err(xml_err)?;
            for group in &file.groups {
                writer
                    .write_event(Event::Start(BytesStart::new("group")))
                    .map_err(xml_err)?;
                writer
                    .write_event(Event::Text(BytesText::new(group)))
                    .map_err(xml_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new("group")))
                    .map_err(xml_err)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("groups")))
                .map_err(xml_err)?;

            writer
                .write_event(Event::Start(BytesStart::new("segments")))
                .map_err(xml_err)?;
            for segment in &file.segments {
                let mut seg_elem = BytesStart::new("segment");
                seg_elem.push_attribute(("bytes", segment.bytes.to_string().as_str()));
                seg_elem.push_attribute(("number", segment.number.to_string().as_str()));
                writer.write_event(Event::Start(seg_elem)).map_err(xml_err)?;
                writer
                    .write_event(Event::Text(BytesText::new(&segment.message_id)))
                    .map_err(xml_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new("segment")))
                    .map_err(xml_err)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("segments")))
                .map_err(xml_err)?;

            writer
                .write_event(Event::End(BytesEnd::new("file")))
                .map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("nzb")))
            .map_err(xml_err)?;

        let body = String::from_utf8(writer.into_inner().into_inner()).map_err(xml_err)?;

        let mut result = String::with_capacity(body.len() + 160);
        result.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        result.push_str("<!DOCTYPE nzb PUBLIC \"-//newzBin//DTD NZB 1.1//EN\" \"http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd\">\n");
        result.push_str(&body);
        result.push('\n');
        Ok(result)
    }

    /// Read back a document produced by [`to_xml`](Self::to_xml)
    ///
    /// # Errors
    ///
    /// Returns [`PostError::Nzb`] on malformed XML.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut nzb = Nzb::default();
        let mut current_file: Option<NzbFile> = None;
        let mut current_segment: Option<NzbSegment> = None;
        let mut in_group = false;

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) => match e.name().as_ref() {
                    b"file" => {
                        let mut file = NzbFile {
                            poster: String::new(),
                            date: 0,
                            subject: String::new(),
                            groups: Vec::new(),
                            segments: Vec::new(),
                        };
                        for attr in e.attributes().flatten() {
                            let value = attr.unescape_value().map_err(xml_err)?.into_owned();
                            match attr.key.as_ref() {
                                b"poster" => file.poster = value,
                                b"date" => file.date = value.parse().unwrap_or(0),
                                b"subject" => file.subject = value,
                                _ => {}
                            }
                        }
                        current_file = Some(file);
                    }
                    b"group" => in_group = true,
                    b"segment" => {
                        let mut segment = NzbSegment {
                            bytes: 0,
                            number: 0,
                            message_id: String::new(),
                        };
                        for attr in e.attributes().flatten() {
                            let value = String::from_utf8_lossy(&attr.value);
                            match attr.key.as_ref() {
                                b"bytes" => segment.bytes = value.parse().unwrap_or(0),
                                b"number" => segment.number = value.parse().unwrap_or(0),
                                _ => {}
                            }
                        }
                        current_segment = Some(segment);
                    }
                    _ => {}
                },
                Event::Text(e) => {
                    let text = e.unescape().map_err(xml_err)?.into_owned();
                    if let Some(segment) = current_segment.as_mut() {
                        segment.message_id = text;
                    } else if in_group && let Some(file) = current_file.as_mut() {
                        file.groups.push(text);
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"group" => in_group = false,
                    b"segment" => {
                        if let (Some(file), Some(segment)) =
                            (current_file.as_mut(), current_segment.take())
                        {
                            file.segments.push(segment);
                        }
                    }
                    b"file" => {
                        if let Some(file) = current_file.take() {
                            nzb.files.push(file);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(nzb)
    }
}

/// Make `name` usable as a file name
///
/// Keeps only the last path component and replaces characters that are
/// troublesome in file names with `_`.
pub fn safe_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(name);
    base.chars()
        .map(|c| match c {
            ' ' | '\\' | '|' | '/' | ':' | '*' | '?' | '<' | '>' => '_',
            other => other,
        })
        .collect()
}
