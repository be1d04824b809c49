//! Filter parameters for a single post-index request and their mapping onto
//! the query string names the upstream API expects.

/// Hard upper bound the API enforces on posts per request.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostQuery {
    pub tags: Vec<String>,
    /// Zero-based page index (`pid`).
    pub page: Option<u64>,
    pub limit: Option<usize>,
    /// Change id filter (`cid`), unix time of the last post update.
    pub change_id: Option<u64>,
    pub id: Option<u64>,
}

impl PostQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query for one page of a tag search.
    pub fn page(tags: &[String], page: u64, page_size: usize) -> Self {
        Self {
            tags: tags.to_vec(),
            page: Some(page),
            limit: Some(page_size),
            ..Self::default()
        }
    }

    /// Zero-record request used to read the total match count.
    pub fn count_probe(tags: &[String]) -> Self {
        Self {
            tags: tags.to_vec(),
            limit: Some(0),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.min(MAX_PAGE_SIZE));
        self
    }

    pub fn with_change_id(mut self, change_id: u64) -> Self {
        self.change_id = Some(change_id);
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Space-joined tag filter as sent on the wire.
    pub fn tag_filter(&self) -> String {
        self.tags.join(" ")
    }

    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::with_capacity(5);
        if !self.tags.is_empty() {
            params.push(("tags", self.tag_filter()));
        }
        if let Some(page) = self.page {
            params.push(("pid", page.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.min(MAX_PAGE_SIZE).to_string()));
        }
        if let Some(change_id) = self.change_id {
            params.push(("cid", change_id.to_string()));
        }
        if let Some(id) = self.id {
            params.push(("id", id.to_string()));
        }
        params
    }
}
