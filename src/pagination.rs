use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result, error_from_response};
use crate::transport::{ApiRequest, RetryPolicy, Transport, send_with_retry};

#[derive(Debug, Deserialize)]
struct PageResponse<T> {
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

/// One page of a paginated listing.
///
/// List endpoints return their items in fixed-size pages; every `list_*`
/// method returns the first one (or the requested `page_number`). A page can
/// be measured with [`len`](Self::len), indexed with [`get`](Self::get),
/// iterated, and followed with [`next`](Self::next), which returns `None`
/// once the listing is exhausted.
///
/// ```no_run
/// # fn main() -> picterra::Result<()> {
/// let client = picterra::Client::from_env()?;
/// for page in client.list_rasters(&Default::default())?.pages() {
///     for raster in &page? {
///         println!("{}", raster["name"]);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct ResultsPage<T = Value> {
    url: String,
    items: Vec<T>,
    next: Option<String>,
    count: Option<u64>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl<T: DeserializeOwned> ResultsPage<T> {
    pub(crate) fn fetch(
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
        url: &str,
    ) -> Result<Self> {
        let resp = send_with_retry(transport.as_ref(), retry, &ApiRequest::get(url))?;
        if !resp.is_success() {
            return Err(error_from_response(resp.status, url, &resp.body));
        }
        let page: PageResponse<T> = serde_json::from_str(&resp.body)
            .map_err(|e| Error::unexpected(url, format!("invalid page: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            items: page.results,
            next: page.next.filter(|n| !n.is_empty()),
            count: page.count,
            transport,
            retry,
        })
    }

    /// Fetches the following page; `Ok(None)` at the end of the listing,
    /// without touching the network.
    pub fn next(&self) -> Result<Option<ResultsPage<T>>> {
        match &self.next {
            Some(url) => Self::fetch(self.transport.clone(), self.retry, url).map(Some),
            None => Ok(None),
        }
    }

    /// Iterates over this page and the ones after it, fetching each on demand.
    ///
    /// Iteration stops after the last page or after the first error.
    pub fn pages(self) -> Pages<T> {
        Pages {
            transport: self.transport.clone(),
            retry: self.retry,
            first: Some(self),
            next_url: None,
        }
    }
}

impl<T> ResultsPage<T> {
    /// Number of items in this page (not in the whole listing).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&T> {
        self.items.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.items.len(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    /// Total size of the listing, as reported by the server.
    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

impl<T: fmt::Debug> fmt::Debug for ResultsPage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultsPage")
            .field("url", &self.url)
            .field("items", &self.items)
            .field("next", &self.next)
            .field("count", &self.count)
            .finish()
    }
}

impl<T> fmt::Display for ResultsPage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} results from {}", self.items.len(), self.url)
    }
}

impl<T> IntoIterator for ResultsPage<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a ResultsPage<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Lazy iterator over the pages of a listing, see [`ResultsPage::pages`].
pub struct Pages<T = Value> {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    first: Option<ResultsPage<T>>,
    next_url: Option<String>,
}

impl<T: DeserializeOwned> Iterator for Pages<T> {
    type Item = Result<ResultsPage<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(page) = self.first.take() {
            self.next_url = page.next.clone();
            return Some(Ok(page));
        }
        let url = self.next_url.take()?;
        let page = ResultsPage::fetch(self.transport.clone(), self.retry, &url);
        if let Ok(page) = &page {
            self.next_url = page.next.clone();
        }
        Some(page)
    }
}
