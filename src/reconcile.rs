//! Create-vs-update decisions for one import run.

use crate::error::StoreError;
use crate::schema::{ImportKind, PRODUCTS_TABLE, USERS_TABLE};
use crate::store::{cell_text, RowStore};
use std::collections::HashSet;

/// What to do with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    /// The key already appeared earlier in this batch.
    SkipDuplicate,
}

/// Keys already present in the remote store, plus the ones created by this run.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationIndex {
    keys: HashSet<String>,
}

impl ReconciliationIndex {
    /// Read every existing key for `kind` from the store.
    ///
    /// Products and restock use product codes. Users are keyed by lower-cased
    /// email, or by client code for accounts without an email.
    pub async fn load(store: &dyn RowStore, kind: ImportKind) -> Result<Self, StoreError> {
        let keys: HashSet<String> = match kind {
            ImportKind::Products | ImportKind::Restock => store
                .select(PRODUCTS_TABLE, &[], "code_article")
                .await?
                .iter()
                .filter_map(|row| row.get("code_article"))
                .map(cell_text)
                .filter(|k| !k.is_empty())
                .collect(),
            ImportKind::Users => store
                .select(USERS_TABLE, &[], "email,code_client")
                .await?
                .iter()
                .flat_map(|row| {
                    [
                        row.get("email").map(|v| cell_text(v).to_lowercase()),
                        row.get("code_client").map(cell_text),
                    ]
                })
                .flatten()
                .filter(|k| !k.is_empty())
                .collect(),
        };

        Ok(Self { keys })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn insert(&mut self, key: &str) {
        self.keys.insert(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Decide the action for `key` and record it.
///
/// The batch check runs before the index check: two rows sharing a key that
/// does not exist remotely yet must not both be created.
pub fn reconcile(key: &str, index: &mut ReconciliationIndex, batch_seen: &mut HashSet<String>) -> Action {
    if !batch_seen.insert(key.to_string()) {
        return Action::SkipDuplicate;
    }
    if index.contains(key) {
        Action::Update
    } else {
        index.insert(key);
        Action::Create
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_new_key_is_created_then_duplicate() {
        let mut index = ReconciliationIndex::default();
        let mut seen = HashSet::new();

        assert_eq!(reconcile("L001", &mut index, &mut seen), Action::Create);
        assert!(index.contains("L001"));
        assert_eq!(reconcile("L001", &mut index, &mut seen), Action::SkipDuplicate);
    }

    #[test]
    fn test_existing_key_is_updated_once() {
        let mut index = ReconciliationIndex::default();
        index.insert("L001");
        let mut seen = HashSet::new();

        assert_eq!(reconcile("L001", &mut index, &mut seen), Action::Update);
        assert_eq!(reconcile("L001", &mut index, &mut seen), Action::SkipDuplicate);
        assert_eq!(reconcile("L002", &mut index, &mut seen), Action::Create);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_fresh_batch_sees_keys_created_by_previous_run() {
        let mut index = ReconciliationIndex::default();
        let mut seen = HashSet::new();
        reconcile("L001", &mut index, &mut seen);

        let mut next_run_seen = HashSet::new();
        assert_eq!(reconcile("L001", &mut index, &mut next_run_seen), Action::Update);
    }

    #[tokio::test]
    async fn test_load_user_keys() {
        let store = MemoryStore::new();
        store.seed(
            "profiles",
            vec![
                json!({"email": "Awa@Example.com", "code_client": "C1"}),
                json!({"email": null, "code_client": "C2"}),
            ],
        );

        let index = ReconciliationIndex::load(&store, ImportKind::Users).await.unwrap();
        assert!(index.contains("awa@example.com"));
        assert!(index.contains("C1"));
        assert!(index.contains("C2"));
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_load_product_keys() {
        let store = MemoryStore::new();
        store.seed(
            "products",
            vec![json!({"code_article": "L001"}), json!({"code_article": "L002"})],
        );

        let index = ReconciliationIndex::load(&store, ImportKind::Restock).await.unwrap();
        assert!(index.contains("L002"));
        assert!(!index.is_empty());
    }
}
