//! Paginated query execution shared by the SQL steps and the supervisor

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::query::sql::{fix_cross_database_refs, paginate, strip_cross_database_refs};
use crate::domain::query::QueryExecutor;
use crate::domain::workflow::Row;
use crate::domain::DomainError;

/// One page of a query's results
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Query text actually executed
    pub query: String,
    pub rows: Vec<Row>,
    /// More rows exist beyond this page
    pub has_next: bool,
}

#[derive(Debug, Clone)]
pub struct QueryRunner {
    executor: Arc<dyn QueryExecutor>,
    page_size: usize,
}

impl QueryRunner {
    pub fn new(executor: Arc<dyn QueryExecutor>, page_size: usize) -> Self {
        Self {
            executor,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Count first; when the count exceeds the page size, execute only the
    /// first page and flag that more rows exist. A failed count is logged and
    /// treated as a single page so the execution reports the real error.
    pub async fn run(&self, query: &str) -> Result<QueryPage, DomainError> {
        let total = match self.executor.count_rows(query, self.page_size).await {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "Row count failed; executing without pagination");
                0
            }
        };

        let has_next = total > self.page_size;
        let query = if has_next {
            paginate(query, self.page_size, 0)
        } else {
            query.to_string()
        };

        debug!(total, has_next, "Executing query");
        let rows = self.executor.execute(&query).await?;

        Ok(QueryPage {
            query,
            rows,
            has_next,
        })
    }

    /// Fetch page `page` (zero-based) of `query`. One row past the page is
    /// read to tell whether another page follows, so no count is needed.
    pub async fn fetch_page(&self, query: &str, page: usize) -> Result<QueryPage, DomainError> {
        let paged = paginate(query, self.page_size + 1, page * self.page_size);
        debug!(page, "Fetching result page");

        let mut rows = self.executor.execute(&paged).await?;
        let has_next = rows.len() > self.page_size;
        rows.truncate(self.page_size);

        Ok(QueryPage {
            query: paged,
            rows,
            has_next,
        })
    }

    /// [`Self::fetch_page`] with the same cross-database handling as
    /// [`Self::run_with_cross_database_fix`]
    pub async fn fetch_page_with_cross_database_fix(
        &self,
        query: &str,
        page: usize,
    ) -> Result<QueryPage, DomainError> {
        let stripped = strip_cross_database_refs(query);

        match self.fetch_page(&stripped, page).await {
            Ok(page) => Ok(page),
            Err(first) => {
                warn!(error = %first, page, "Page fetch failed; retrying with cross-database references removed");
                self.fetch_page(&fix_cross_database_refs(&stripped), page).await
            }
        }
    }

    /// Run with quoted three-part names stripped, retrying once with every
    /// three-part form rewritten if the first run fails
    pub async fn run_with_cross_database_fix(&self, query: &str) -> Result<QueryPage, DomainError> {
        let stripped = strip_cross_database_refs(query);

        match self.run(&stripped).await {
            Ok(page) => Ok(page),
            Err(first) => {
                let fixed = fix_cross_database_refs(&stripped);
                warn!(error = %first, "Query failed; retrying with cross-database references removed");
                self.run(&fixed).await
            }
        }
    }
}
