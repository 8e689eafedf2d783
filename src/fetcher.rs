use crate::error::UpstreamError;
use crate::twitter::{FollowSource, UserRecord};
use futures_util::stream::{self, Stream};
use std::fmt;
use tracing::debug;

/// Largest `max_results` the following endpoint accepts
pub const MAX_FOLLOWING_PAGE_SIZE: u32 = 1000;

/// Paginated collections the pipeline reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection {
    ListMembers { list_id: String },
    Following { user_id: String },
}

impl Collection {
    /// Endpoint path relative to the API base URL
    pub fn path(&self) -> String {
        match self {
            Collection::ListMembers { list_id } => format!("lists/{list_id}/members"),
            Collection::Following { user_id } => format!("users/{user_id}/following"),
        }
    }

    /// Largest `max_results` the endpoint accepts
    pub fn max_page_size(&self) -> u32 {
        match self {
            Collection::ListMembers { .. } => 100,
            Collection::Following { .. } => MAX_FOLLOWING_PAGE_SIZE,
        }
    }

    pub fn user_fields(&self) -> &'static str {
        match self {
            Collection::ListMembers { .. } => "id,username,name",
            Collection::Following { .. } => "id,username,name,created_at",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::ListMembers { list_id } => write!(f, "members of list {list_id}"),
            Collection::Following { user_id } => write!(f, "following of user {user_id}"),
        }
    }
}

/// Lazy page-by-page reader over a collection.
///
/// Pages are requested only when asked for; the pager stops after the
/// source answers without a continuation token.
pub struct Pager<'a, S> {
    source: &'a S,
    collection: Collection,
    page_size: u32,
    next_token: Option<String>,
    exhausted: bool,
    calls: u32,
}

impl<'a, S: FollowSource> Pager<'a, S> {
    pub fn new(source: &'a S, collection: Collection, page_size: u32) -> Self {
        let page_size = page_size.clamp(1, collection.max_page_size());
        Self {
            source,
            collection,
            page_size,
            next_token: None,
            exhausted: false,
            calls: 0,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Requests made so far
    pub fn calls_made(&self) -> u32 {
        self.calls
    }

    /// Fetch the next page, or `None` once the collection is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<UserRecord>>, UpstreamError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .source
            .fetch_page(&self.collection, self.page_size, self.next_token.as_deref())
            .await?;
        self.calls += 1;

        let next_token = page.meta.next_token.filter(|token| !token.is_empty());
        if next_token.is_some() && next_token == self.next_token {
            return Err(UpstreamError::InvalidResponse(format!(
                "{} repeated pagination token {:?}",
                self.collection, next_token
            )));
        }

        debug!(
            "Page {} of {}: {} records",
            self.calls,
            self.collection,
            page.data.len()
        );

        self.exhausted = next_token.is_none();
        self.next_token = next_token;
        Ok(Some(page.data))
    }

    /// The same page sequence as a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<UserRecord>, UpstreamError>> + 'a {
        stream::try_unfold(self, |mut pager| async move {
            let page = pager.next_page().await?;
            Ok::<_, UpstreamError>(page.map(|page| (page, pager)))
        })
    }
}

/// A fully materialized collection and the calls it took
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fetched {
    pub records: Vec<UserRecord>,
    pub calls: u32,
}

/// Read every page of `collection`, keeping source order
pub async fn fetch_all<S: FollowSource>(
    source: &S,
    collection: Collection,
    page_size: u32,
) -> Result<Fetched, UpstreamError> {
    let mut pager = Pager::new(source, collection, page_size);
    let mut records = Vec::new();

    while let Some(page) = pager.next_page().await? {
        records.extend(page);
    }

    Ok(Fetched {
        records,
        calls: pager.calls_made(),
    })
}
