//! Pages handed out to callers and their XML wire form.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::source::RecordSerializer;
use crate::types::{Result, SessionKey, TotalPages};

/// Header field carrying the session key.
pub const PAGE_KEY_FIELD: &str = "pageKey";
/// Header field carrying the index of the returned page.
pub const CURRENT_PAGE_FIELD: &str = "currentPage";
/// Header field carrying the number of pages held in memory.
pub const IN_MEMORY_PAGES_FIELD: &str = "inMemoryPages";
/// Header field carrying the total page count, or `unknown`.
pub const TOTAL_PAGES_FIELD: &str = "totalPages";

/// Cache statistics stamped onto a page when it is handed out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageHeader {
    /// Key of the owning session; `None` for unregistered single-page results.
    pub page_key: Option<SessionKey>,
    /// Index of this page.
    pub current_page: usize,
    /// Pages currently held in the session's window.
    pub in_memory_pages: usize,
    /// Total pages in the result.
    pub total_pages: TotalPages,
}

impl PageHeader {
    /// Header fields in wire order.
    pub fn fields(&self) -> [(&'static str, String); 4] {
        [
            (
                PAGE_KEY_FIELD,
                self.page_key
                    .as_ref()
                    .map(|key| key.to_string())
                    .unwrap_or_default(),
            ),
            (CURRENT_PAGE_FIELD, self.current_page.to_string()),
            (IN_MEMORY_PAGES_FIELD, self.in_memory_pages.to_string()),
            (TOTAL_PAGES_FIELD, self.total_pages.to_string()),
        ]
    }

    /// Looks up a header field by its wire name.
    pub fn get(&self, name: &str) -> Option<String> {
        self.fields()
            .into_iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }
}

/// Up to `records_per_page` rendered records plus a header.
///
/// The record list is shared and never changes after construction; the
/// header is recomputed from live session state each time the page is
/// handed out.
#[derive(Clone, Debug)]
pub struct Page {
    index: usize,
    records: Arc<[String]>,
    header: Option<PageHeader>,
}

impl Page {
    /// Builds page `index` by rendering `raw` records with `serializer`.
    pub fn build<I>(index: usize, raw: I, serializer: &dyn RecordSerializer) -> Result<Self>
    where
        I: IntoIterator<Item = Result<String>>,
    {
        let mut records = Vec::new();
        for (slot, record) in raw.into_iter().enumerate() {
            records.push(serializer.to_xml(slot, &record?)?);
        }
        Ok(Self::from_rendered(index, records))
    }

    /// Wraps already rendered records.
    pub fn from_rendered(index: usize, records: Vec<String>) -> Self {
        Self {
            index,
            records: records.into(),
            header: None,
        }
    }

    /// Page index within its result.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Rendered record sub-documents, in order.
    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// Number of records on this page.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the page holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Header stamped when the page was handed out.
    pub fn header(&self) -> Option<&PageHeader> {
        self.header.as_ref()
    }

    /// Returns a copy of this page carrying `header`. Records are shared.
    pub fn stamped(&self, header: PageHeader) -> Page {
        Page {
            index: self.index,
            records: Arc::clone(&self.records),
            header: Some(header),
        }
    }

    /// Renders the page wire document.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(64 + self.records.iter().map(String::len).sum::<usize>());
        out.push_str("<Page>");
        if let Some(header) = &self.header {
            out.push_str("<Header>");
            for (name, value) in header.fields() {
                let _ = write!(out, "<{name} value=\"{}\"/>", escape_xml(&value));
            }
            out.push_str("</Header>");
        }
        out.push_str("<RecordContainer>");
        for record in self.records.iter() {
            out.push_str("<Record>");
            out.push_str(record);
            out.push_str("</Record>");
        }
        out.push_str("</RecordContainer></Page>");
        out
    }
}

/// Escapes text for use in XML content and attribute values.
pub fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
