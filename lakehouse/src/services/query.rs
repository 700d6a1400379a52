use arrow::array::AsArray;
use arrow::datatypes::Int64Type;
use common::config::QuerySettings;
use common::{Error, Result};
use datafusion::execution::context::SessionContext;
use datafusion::prelude::{ParquetReadOptions, SessionConfig};
use ingest::ObjectStorage;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::api::models::DataPage;
use crate::utils::arrow::batches_to_json;

/// Table names reserved for one query.
#[derive(Debug, Clone)]
pub struct QueryTables {
    pub facts: String,
    pub dimension: String,
}

/// Runs a query against tables registered under fresh names and deregisters
/// them afterwards, whether or not the query succeeded.
pub struct QueryExecutor<'a> {
    ctx: &'a SessionContext,
    tables: QueryTables,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(ctx: &'a SessionContext) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            ctx,
            tables: QueryTables {
                facts: format!("facts_{}", id),
                dimension: format!("dim_{}", id),
            },
        }
    }

    pub async fn execute<F, Fut, T>(&self, query_fn: F) -> Result<T>
    where
        F: FnOnce(QueryTables) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = query_fn(self.tables.clone()).await;
        self.ctx.deregister_table(&self.tables.facts)?;
        self.ctx.deregister_table(&self.tables.dimension)?;
        result
    }
}

/// Session settings for scanning the partitioned fact tree.
pub fn session_config() -> SessionConfig {
    SessionConfig::new().set_bool("datafusion.execution.listing_table_ignore_subdirectory", false)
}

/// Paged reads over the fact partitions, joined with the dimension when it is present.
pub struct DataGateway {
    ctx: SessionContext,
    storage: Arc<dyn ObjectStorage>,
    table_root: Url,
    facts_prefix: String,
    dimension_path: Option<String>,
    settings: QuerySettings,
}

impl DataGateway {
    pub fn new(
        ctx: SessionContext,
        storage: Arc<dyn ObjectStorage>,
        table_root: Url,
        facts_prefix: String,
        dimension_path: Option<String>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            ctx,
            storage,
            table_root,
            facts_prefix,
            dimension_path,
            settings,
        }
    }

    /// Validates raw paging parameters, applying the configured default size.
    pub fn page_bounds(&self, page: Option<i64>, size: Option<i64>) -> Result<(u64, u64)> {
        let page = page.unwrap_or(1);
        let size = size.unwrap_or(self.settings.default_page_size as i64);
        if page < 1 {
            return Err(Error::InvalidInput(format!("page must be >= 1, got {}", page)));
        }
        if size < 1 || size > self.settings.max_page_size as i64 {
            return Err(Error::InvalidInput(format!(
                "size must be between 1 and {}, got {}",
                self.settings.max_page_size, size
            )));
        }
        if (page - 1).checked_mul(size).is_none() {
            return Err(Error::InvalidInput(format!(
                "page {} is out of range for size {}",
                page, size
            )));
        }
        Ok((page as u64, size as u64))
    }

    pub async fn page(&self, page: u64, size: u64) -> Result<DataPage> {
        let facts = self.storage.list_objects(&self.facts_prefix).await?;
        if !facts.iter().any(|key| key.ends_with(".parquet")) {
            debug!(prefix = %self.facts_prefix, "No fact partitions yet");
            return Ok(DataPage::empty(page));
        }

        let dimension = match &self.dimension_path {
            Some(path) if self.storage.check_file_exists(path).await? => Some(path.clone()),
            _ => None,
        };

        let facts_url = self.table_root.join(&self.facts_prefix)?;
        let dimension_url = dimension
            .map(|path| self.table_root.join(&path))
            .transpose()?;
        let offset = page
            .saturating_sub(1)
            .checked_mul(size)
            .ok_or_else(|| Error::InvalidInput(format!("page {} is out of range", page)))?;

        let executor = QueryExecutor::new(&self.ctx);
        let (rows, total_records) = executor
            .execute(|tables| async move {
                self.ctx
                    .register_parquet(&tables.facts, facts_url.as_str(), ParquetReadOptions::default())
                    .await?;
                if let Some(url) = &dimension_url {
                    self.ctx
                        .register_parquet(&tables.dimension, url.as_str(), ParquetReadOptions::default())
                        .await?;
                }

                let sql = self.page_sql(&tables, dimension_url.is_some(), size, offset);
                debug!(sql = %sql, "Running page query");
                let batches = self.ctx.sql(&sql).await?.collect().await?;
                let rows = batches_to_json(&batches)?;

                let count_sql = format!("SELECT COUNT(*) AS total FROM {}", quote(&tables.facts));
                let counted = self.ctx.sql(&count_sql).await?.collect().await?;
                let total = counted
                    .first()
                    .filter(|batch| batch.num_rows() > 0)
                    .and_then(|batch| batch.column(0).as_primitive_opt::<Int64Type>())
                    .map(|column| column.value(0))
                    .unwrap_or(0);

                Ok((rows, total.max(0) as u64))
            })
            .await?;

        info!(page, size, total_records, rows = rows.len(), "Served data page");
        Ok(DataPage {
            total_records,
            total_pages: total_records.div_ceil(size),
            current_page: page,
            page_size: rows.len(),
            data: rows,
        })
    }

    fn page_sql(&self, tables: &QueryTables, joined: bool, size: u64, offset: u64) -> String {
        let settings = &self.settings;
        let order = format!("ORDER BY f.{} DESC", quote(&settings.order_by));
        let paging = format!("LIMIT {} OFFSET {}", size, offset);

        if !joined {
            return format!("SELECT f.* FROM {} AS f {} {}", quote(&tables.facts), order, paging);
        }

        let mut projection = vec!["f.*".to_string()];
        projection.extend(
            settings
                .dimension_columns
                .iter()
                .map(|column| format!("d.{}", quote(column))),
        );
        format!(
            "SELECT {} FROM {} AS f LEFT JOIN {} AS d ON f.{key} = d.{key} {} {}",
            projection.join(", "),
            quote(&tables.facts),
            quote(&tables.dimension),
            order,
            paging,
            key = quote(&settings.join_key),
        )
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}
