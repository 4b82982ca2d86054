//! Callback registries for the collector's extension points
//!
//! Each extension point keeps an ordered list of handlers. Dispatch takes a
//! snapshot of the list under the read lock and invokes it after the lock is
//! released, so callbacks may register or detach callbacks themselves; such
//! changes apply to later dispatches.

use crate::crawler::{Element, Request, Response};
use crate::CrawlError;
use std::fmt;
use std::sync::Arc;

pub type RequestCallback = Arc<dyn Fn(&mut Request) + Send + Sync>;
pub type ResponseCallback = Arc<dyn Fn(&Response) + Send + Sync>;
pub type ElementCallback = Arc<dyn Fn(&Element) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&Response, &CrawlError) + Send + Sync>;

/// Handle returned by every callback registration, used to detach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Element callback bound to a CSS selector
#[derive(Clone)]
pub(crate) struct SelectorCallback {
    pub selector: String,
    pub function: ElementCallback,
}

pub(crate) type Registry<T> = Vec<(CallbackId, T)>;

#[derive(Default)]
pub(crate) struct Callbacks {
    next_id: u64,
    pub request: Registry<RequestCallback>,
    pub response_headers: Registry<ResponseCallback>,
    pub response: Registry<ResponseCallback>,
    pub html: Registry<SelectorCallback>,
    pub xml: Registry<SelectorCallback>,
    pub error: Registry<ErrorCallback>,
    pub scraped: Registry<ResponseCallback>,
}

impl Callbacks {
    pub fn next_id(&mut self) -> CallbackId {
        self.next_id += 1;
        CallbackId(self.next_id)
    }

    /// Removes the callback with `id` from whichever registry holds it
    pub fn detach(&mut self, id: CallbackId) -> bool {
        fn remove<T>(registry: &mut Registry<T>, id: CallbackId) -> bool {
            let before = registry.len();
            registry.retain(|(entry, _)| *entry != id);
            registry.len() != before
        }

        remove(&mut self.request, id)
            || remove(&mut self.response_headers, id)
            || remove(&mut self.response, id)
            || remove(&mut self.html, id)
            || remove(&mut self.xml, id)
            || remove(&mut self.error, id)
            || remove(&mut self.scraped, id)
    }

    /// Removes the first HTML callback registered for `selector`
    pub fn detach_html(&mut self, selector: &str) -> bool {
        detach_selector(&mut self.html, selector)
    }

    /// Removes the first XML callback registered for `query`
    pub fn detach_xml(&mut self, query: &str) -> bool {
        detach_selector(&mut self.xml, query)
    }
}

fn detach_selector(registry: &mut Registry<SelectorCallback>, selector: &str) -> bool {
    match registry.iter().position(|(_, cb)| cb.selector == selector) {
        Some(index) => {
            registry.remove(index);
            true
        }
        None => false,
    }
}

/// Copies the handlers out of a registry, in registration order
pub(crate) fn snapshot<T: Clone>(registry: &Registry<T>) -> Vec<T> {
    registry.iter().map(|(_, f)| f.clone()).collect()
}
