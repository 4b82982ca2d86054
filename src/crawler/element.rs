//! Owned wrapper around a matched HTML/XML element
//!
//! Elements are copied out of the parsed document before callbacks run, so
//! callbacks never hold on to the document itself.

use crate::crawler::Request;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;

/// Element matched by an HTML or XML callback's selector
#[derive(Debug, Clone)]
pub struct Element {
    /// Tag name
    pub name: String,
    /// Concatenated text of the element and its descendants
    pub text: String,
    pub attributes: Vec<(String, String)>,
    pub inner_html: String,
    /// Position among the elements matched by the same callback
    pub index: usize,
    pub request: Arc<Request>,
}

impl Element {
    pub(crate) fn from_node(node: ElementRef<'_>, index: usize, request: &Arc<Request>) -> Self {
        let value = node.value();
        Self {
            name: value.name().to_string(),
            text: node.text().collect(),
            attributes: value
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            inner_html: node.inner_html(),
            index,
            request: Arc::clone(request),
        }
    }

    /// Returns an attribute value, or an empty string when it is missing
    pub fn attr(&self, name: &str) -> String {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    /// Resolves a link attribute against the originating request
    pub fn absolute_url(&self, link: &str) -> Option<String> {
        self.request.absolute_url(link)
    }

    // Runs `f` on every descendant matching `selector`; invalid selectors match nothing
    fn with_matches<T>(&self, selector: &str, f: impl FnOnce(Vec<ElementRef<'_>>) -> T) -> T {
        let fragment = Html::parse_fragment(&self.inner_html);
        let matches = match Selector::parse(selector) {
            Ok(selector) => fragment.select(&selector).collect(),
            Err(_) => {
                tracing::debug!("Ignoring invalid child selector {:?}", selector);
                Vec::new()
            }
        };
        f(matches)
    }

    /// Concatenated, trimmed text of all descendants matching `selector`
    pub fn child_text(&self, selector: &str) -> String {
        self.with_matches(selector, |nodes| {
            nodes
                .iter()
                .flat_map(|n| n.text())
                .collect::<String>()
                .trim()
                .to_string()
        })
    }

    /// Trimmed text of each descendant matching `selector`
    pub fn child_texts(&self, selector: &str) -> Vec<String> {
        self.with_matches(selector, |nodes| {
            nodes
                .iter()
                .map(|n| n.text().collect::<String>().trim().to_string())
                .collect()
        })
    }

    /// Trimmed attribute of the first matching descendant that has it
    pub fn child_attr(&self, selector: &str, attr: &str) -> String {
        self.with_matches(selector, |nodes| {
            nodes
                .iter()
                .find_map(|n| n.value().attr(attr))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        })
    }

    /// Attribute of every matching descendant that has it
    pub fn child_attrs(&self, selector: &str, attr: &str) -> Vec<String> {
        self.with_matches(selector, |nodes| {
            nodes
                .iter()
                .filter_map(|n| n.value().attr(attr))
                .map(|v| v.trim().to_string())
                .collect()
        })
    }

    /// Owned copies of the descendants matching `selector`
    pub fn children(&self, selector: &str) -> Vec<Element> {
        self.with_matches(selector, |nodes| {
            nodes
                .into_iter()
                .enumerate()
                .map(|(i, n)| Element::from_node(n, i, &self.request))
                .collect()
        })
    }
}
