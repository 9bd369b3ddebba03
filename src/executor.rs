//! Import pipeline orchestrator.
//!
//! Runs parse, header resolution, materialization and reconciliation for one
//! uploaded file, then writes each record to the row store in file order.
//! A failing row never aborts the run: it is logged and counted in
//! [`ImportOutcome::errors`].

use crate::config::ImportProfile;
use crate::error::{ImportError, StoreError};
use crate::events::{EventBus, ImportEvent};
use crate::headers::resolve;
use crate::materialize::{Materialized, Materializer};
use crate::reconcile::{reconcile, Action, ReconciliationIndex};
use crate::retry::{is_retriable_insert, retry_linear, USER_INSERT_ATTEMPTS};
use crate::schema::{
    unix_millis, ImportOutcome, ImportRecord, ProductRecord, RestockRecord, Size, UserRecord,
    PRODUCTS_TABLE, USERS_TABLE, VARIANTS_TABLE,
};
use crate::sheet_parser::parse_file;
use crate::store::{cell_text, describe, eq, ilike, Filter, RowStore};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of writing one record's primary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Written {
    Added,
    Updated,
    Failed,
}

/// Executes import runs against a [`RowStore`].
#[derive(Clone)]
pub struct ImportExecutor {
    store: Arc<dyn RowStore>,
    retry_delay_ms: u64,
    events: Option<EventBus>,
}

impl ImportExecutor {
    pub fn new(store: Arc<dyn RowStore>, retry_delay_ms: u64) -> Self {
        Self {
            store,
            retry_delay_ms,
            events: None,
        }
    }

    /// Publish an [`ImportEvent`] on `events` after every completed run.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Import one uploaded file with `profile`.
    ///
    /// Parse failures and failures to read the existing keys are returned
    /// before any write is issued. Everything after that is counted in the
    /// outcome instead.
    pub async fn import_file(
        &self,
        profile: &ImportProfile,
        filename: &str,
        data: &[u8],
    ) -> Result<ImportOutcome, ImportError> {
        let fingerprint = content_hash(data);
        let sheet = parse_file(filename, data)?;
        info!(
            "Starting {} import: {} [{}] ({} rows, {:?}, sha256={})",
            profile.kind,
            filename,
            sheet.name,
            sheet.rows.len(),
            sheet.source_type,
            &fingerprint[..12]
        );

        let map = resolve(&sheet.headers, &profile.fields);
        for field in &profile.fields {
            if let Some(header) = map.header(&field.name) {
                debug!("Column '{}' -> {}", header, field.name);
            }
        }
        let unmapped = map.unmapped(&profile.fields);
        if !unmapped.is_empty() {
            debug!("Fields without a matching column: {}", unmapped.join(", "));
        }

        let materializer = Materializer::new(profile, &map, unix_millis());
        let rows: Vec<(usize, Materialized)> = sheet
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| (i, materializer.materialize(i, row)))
            .collect();

        let mut index = ReconciliationIndex::load(self.store.as_ref(), profile.kind).await?;
        if index.is_empty() {
            info!("No existing {} keys, every row will be created", profile.kind);
        } else {
            info!("Loaded {} existing {} keys", index.len(), profile.kind);
        }
        let outcome = self.execute(rows, &mut index).await;

        info!(
            "Finished {} import: {} added, {} updated, {} errors, {} rows",
            profile.kind, outcome.added, outcome.updated, outcome.errors, outcome.total_processed
        );
        if let Some(events) = &self.events {
            events.publish(ImportEvent::for_run(profile.kind, outcome));
        }
        Ok(outcome)
    }

    /// Write materialized rows in order. `index` is updated with every key
    /// this run creates.
    pub async fn execute(
        &self,
        rows: Vec<(usize, Materialized)>,
        index: &mut ReconciliationIndex,
    ) -> ImportOutcome {
        let mut outcome = ImportOutcome {
            total_processed: rows.len(),
            ..Default::default()
        };
        let mut batch_seen = HashSet::new();

        for (row_index, row) in rows {
            // Data row N sits on line N + 2 of the file
            let line = row_index + 2;
            let record = match row {
                Materialized::Record(record) => record,
                Materialized::Unparseable => {
                    warn!(line, "Row has no usable data, skipped");
                    outcome.errors += 1;
                    continue;
                }
            };

            let action = reconcile(record.key(), index, &mut batch_seen);
            if action == Action::SkipDuplicate {
                warn!(line, key = record.key(), "Key already seen in this file, skipped");
                outcome.errors += 1;
                continue;
            }

            let (written, sub_errors) = match &record {
                ImportRecord::Product(product) => self.write_product(action, product).await,
                ImportRecord::User(user) => (self.write_user(action, user).await, 0),
                ImportRecord::Restock(restock) => self.write_restock(action, restock).await,
            };

            match written {
                Written::Added => outcome.added += 1,
                Written::Updated => outcome.updated += 1,
                Written::Failed => {
                    warn!(line, key = record.key(), "Row could not be written");
                    outcome.errors += 1;
                }
            }
            outcome.errors += sub_errors;
        }

        outcome
    }

    // ========================================================================
    // Products
    // ========================================================================

    /// Upsert the product row, then each of its variants.
    async fn write_product(&self, action: Action, product: &ProductRecord) -> (Written, usize) {
        let row = product.to_row();
        let key = [eq("code_article", &product.code_article)];

        let written = if action == Action::Create {
            let result = self.store.insert(PRODUCTS_TABLE, &row).await;
            self.settle_insert(PRODUCTS_TABLE, &key, &row, result).await
        } else {
            self.update(PRODUCTS_TABLE, &key, &row).await
        };
        if written == Written::Failed {
            return (written, 0);
        }

        (written, self.write_variants(product).await)
    }

    /// Returns the number of variant writes that failed. The product row is
    /// kept either way.
    async fn write_variants(&self, product: &ProductRecord) -> usize {
        let existing = match self.existing_variants(&product.code_article).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Could not read variants of {}: {}", product.code_article, e);
                return product.variants.len();
            }
        };

        let mut failed = 0;
        for variant in &product.variants {
            let key = variant_key(&product.code_article, variant.size);
            let patch = json!({ "price": variant.price, "stock": variant.stock });

            let written = if existing.contains_key(&variant.size) {
                self.update(VARIANTS_TABLE, &key, &patch).await
            } else {
                let row = json!({
                    "product_code": product.code_article,
                    "size": variant.size.as_str(),
                    "price": variant.price,
                    "stock": variant.stock,
                });
                let result = self.store.insert(VARIANTS_TABLE, &row).await;
                self.settle_insert(VARIANTS_TABLE, &key, &patch, result).await
            };

            if written == Written::Failed {
                failed += 1;
            }
        }
        failed
    }

    // ========================================================================
    // Users
    // ========================================================================

    async fn write_user(&self, action: Action, user: &UserRecord) -> Written {
        let key = [user_filter(user)];
        let patch = user.to_patch();

        if action != Action::Create {
            return self.update(USERS_TABLE, &key, &patch).await;
        }

        let row = user.to_row();
        let result = retry_linear(
            USER_INSERT_ATTEMPTS,
            self.retry_delay_ms,
            is_retriable_insert,
            || self.store.insert(USERS_TABLE, &row),
        )
        .await;
        self.settle_insert(USERS_TABLE, &key, &patch, result).await
    }

    // ========================================================================
    // Restock
    // ========================================================================

    /// Add quantities to the product's variants. Missing variants are created
    /// at the catalog price. Unknown products are never created.
    async fn write_restock(&self, action: Action, restock: &RestockRecord) -> (Written, usize) {
        if action == Action::Create {
            warn!("Restock for unknown product {}", restock.code_article);
            return (Written::Failed, 0);
        }

        let existing = match self.existing_variants(&restock.code_article).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("Could not read variants of {}: {}", restock.code_article, e);
                return (Written::Failed, 0);
            }
        };

        let mut failed = 0;
        for (size, quantity) in &restock.quantities {
            let key = variant_key(&restock.code_article, *size);
            let written = match existing.get(size) {
                Some(stock) => {
                    let patch = json!({ "stock": stock.saturating_add(*quantity) });
                    self.update(VARIANTS_TABLE, &key, &patch).await
                }
                None => {
                    let row = json!({
                        "product_code": restock.code_article,
                        "size": size.as_str(),
                        "price": size.default_price(),
                        "stock": quantity,
                    });
                    match self.store.insert(VARIANTS_TABLE, &row).await {
                        Ok(_) => Written::Added,
                        Err(e) => {
                            warn!("Insert into {} failed ({}): {}", VARIANTS_TABLE, describe(&key), e);
                            Written::Failed
                        }
                    }
                }
            };
            if written == Written::Failed {
                failed += 1;
            }
        }

        (Written::Updated, failed)
    }

    // ========================================================================
    // Store helpers
    // ========================================================================

    /// Turn an insert result into a [`Written`]. A unique violation means the
    /// row appeared after the index was loaded, so it is updated instead.
    async fn settle_insert(
        &self,
        table: &str,
        key: &[Filter],
        patch: &Value,
        result: Result<Value, StoreError>,
    ) -> Written {
        match result {
            Ok(_) => Written::Added,
            Err(e) if e.is_unique_violation() => {
                debug!("{} row {} already exists, updating", table, describe(key));
                self.update(table, key, patch).await
            }
            Err(e) => {
                warn!("Insert into {} failed ({}): {}", table, describe(key), e);
                Written::Failed
            }
        }
    }

    async fn update(&self, table: &str, key: &[Filter], patch: &Value) -> Written {
        match self.store.update(table, key, patch).await {
            Ok(()) => Written::Updated,
            Err(e) => {
                warn!("Update of {} failed ({}): {}", table, describe(key), e);
                Written::Failed
            }
        }
    }

    /// Current stock per size for one product.
    async fn existing_variants(&self, code_article: &str) -> Result<HashMap<Size, u32>, StoreError> {
        let rows = self
            .store
            .select(
                VARIANTS_TABLE,
                &[eq("product_code", code_article)],
                "size,stock",
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let label = cell_text(row.get("size")?);
                let size = Size::ALL.into_iter().find(|s| s.as_str() == label)?;
                Some((size, stock_of(row)))
            })
            .collect())
    }
}

fn variant_key(code_article: &str, size: Size) -> [Filter; 2] {
    [eq("product_code", code_article), eq("size", size.as_str())]
}

/// Emails are matched case-insensitively; rows created elsewhere may not be
/// lower-cased.
fn user_filter(user: &UserRecord) -> Filter {
    match user.key_column() {
        ("email", email) => ilike("email", email),
        (column, value) => eq(column, value),
    }
}

fn stock_of(row: &Value) -> u32 {
    match row.get("stock") {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .unwrap_or(0),
        Some(other) => cell_text(other).trim().parse().unwrap_or(0),
        None => 0,
    }
}

fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
