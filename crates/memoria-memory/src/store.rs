// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed memory store with vector BLOB storage.
//!
//! The store owns no business logic beyond the write invariants: importance
//! is clamped and categories are normalized on every write.

use memoria_core::MemoriaError;
use memoria_storage::{Database, map_tr_err};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::category::Category;
use crate::types::{
    Memory, MemoryFilter, MemorySource, NewMemory, blob_to_vec, clamp_importance, now_timestamp,
    vec_to_blob,
};

const MEMORY_COLUMNS: &str = "id, user_id, content, category, importance, tags, embedding, source, timestamp, last_accessed, access_count";

/// Persistent store for memories in SQLite.
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    /// Creates a new MemoryStore on an opened (migrated) database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new memory and return it as stored (with its assigned id).
    pub async fn insert(&self, memory: NewMemory) -> Result<Memory, MemoriaError> {
        let stored = Memory {
            id: Uuid::new_v4().to_string(),
            user_id: memory.user_id,
            content: memory.content,
            category: Category::normalize(memory.category.as_str()),
            importance: clamp_importance(memory.importance),
            tags: memory.tags,
            embedding: memory.embedding,
            source: memory.source,
            timestamp: now_timestamp(),
            last_accessed: None,
            access_count: 0,
        };

        let row = stored.clone();
        let tags_json = serde_json::to_string(&row.tags).map_err(|e| MemoriaError::Storage {
            source: Box::new(e),
        })?;
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO memories (id, user_id, content, category, importance, tags, embedding, source, timestamp, last_accessed, access_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, 0)",
                    params![
                        row.id,
                        row.user_id,
                        row.content,
                        row.category.as_str(),
                        row.importance,
                        tags_json,
                        row.embedding.as_deref().map(vec_to_blob),
                        row.source.as_str(),
                        row.timestamp,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(stored)
    }

    /// Get a memory by ID.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Memory>, MemoriaError> {
        let id = id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<Option<Memory>, rusqlite::Error> {
                let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
                conn.query_row(&sql, params![id], row_to_memory).optional()
            })
            .await
            .map_err(map_tr_err)
    }

    /// List a user's memories, newest first.
    pub async fn get(
        &self,
        user_id: &str,
        filter: &MemoryFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>, MemoriaError> {
        let user_id = user_id.to_string();
        let category = filter.category.as_ref().map(|c| c.as_str().to_string());
        let source = filter.source.map(|s| s.as_str());
        let min_importance = filter.min_importance.map(i64::from);
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<Memory>, rusqlite::Error> {
                let sql = format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories
                     WHERE user_id = ?1
                       AND (?2 IS NULL OR category = ?2)
                       AND (?3 IS NULL OR source = ?3)
                       AND (?4 IS NULL OR importance >= ?4)
                     ORDER BY timestamp DESC
                     LIMIT ?5 OFFSET ?6"
                );
                let mut stmt = conn.prepare(&sql)?;
                let memories = stmt
                    .query_map(
                        params![
                            user_id,
                            category,
                            source,
                            min_importance,
                            limit as i64,
                            offset as i64
                        ],
                        row_to_memory,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(memories)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Get a user's memories by IDs (batch retrieval after search).
    pub async fn get_by_ids(
        &self,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<Memory>, MemoriaError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let user_id = user_id.to_string();
        let ids = ids.to_vec();
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<Memory>, rusqlite::Error> {
                // ?1 is the user; ids start at ?2
                let placeholders: Vec<String> =
                    (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ?1 AND id IN ({})",
                    placeholders.join(", ")
                );
                let mut stmt = conn.prepare(&sql)?;

                let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
                values.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));
                let memories = stmt
                    .query_map(values.as_slice(), row_to_memory)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(memories)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Case-insensitive substring match on content.
    pub async fn search_by_content_like(
        &self,
        user_id: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<Memory>, MemoriaError> {
        self.search_like(user_id, "content LIKE ?2 ESCAPE '\\'", term, limit)
            .await
    }

    /// Memories whose category equals or contains the normalized term.
    ///
    /// A term with no `[a-z0-9]` content names no category and matches nothing.
    pub async fn search_by_category(
        &self,
        user_id: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<Memory>, MemoriaError> {
        let Some(normalized) = Category::try_normalize(term) else {
            return Ok(vec![]);
        };
        self.search_like(
            user_id,
            "category LIKE ?2 ESCAPE '\\'",
            normalized.as_str(),
            limit,
        )
        .await
    }

    /// Memories with a tag containing the term.
    pub async fn search_by_tag(
        &self,
        user_id: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<Memory>, MemoriaError> {
        self.search_like(
            user_id,
            "EXISTS (SELECT 1 FROM json_each(memories.tags) WHERE json_each.value LIKE ?2 ESCAPE '\\')",
            term,
            limit,
        )
        .await
    }

    async fn search_like(
        &self,
        user_id: &str,
        predicate: &'static str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<Memory>, MemoriaError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(vec![]);
        }
        let user_id = user_id.to_string();
        let pattern = format!("%{}%", escape_like(term));
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<Memory>, rusqlite::Error> {
                let sql = format!(
                    "SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ?1 AND {predicate} ORDER BY importance DESC, timestamp DESC LIMIT ?3"
                );
                let mut stmt = conn.prepare(&sql)?;
                let memories = stmt
                    .query_map(params![user_id, pattern, limit as i64], row_to_memory)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(memories)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Record one retrieval of a memory.
    pub async fn update_access_count(&self, id: &str) -> Result<(), MemoriaError> {
        self.update_access_counts(&[id.to_string()]).await
    }

    /// Record one retrieval of each memory, in a single transaction.
    pub async fn update_access_counts(&self, ids: &[String]) -> Result<(), MemoriaError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.to_vec();
        let now = now_timestamp();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
                    )?;
                    for id in &ids {
                        stmt.execute(params![now, id])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    /// Explicit content update. Returns false if the memory does not exist.
    pub async fn update_content(
        &self,
        id: &str,
        content: &str,
        embedding: Option<Vec<f32>>,
    ) -> Result<bool, MemoriaError> {
        let id = id.to_string();
        let content = content.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let changed = conn.execute(
                    "UPDATE memories SET content = ?1, embedding = ?2 WHERE id = ?3",
                    params![content, embedding.as_deref().map(vec_to_blob), id],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Re-categorize a memory. The category is normalized before writing.
    pub async fn update_category(&self, id: &str, category: &str) -> Result<bool, MemoriaError> {
        let id = id.to_string();
        let category = Category::normalize(category);
        self.db
            .connection()
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let changed = conn.execute(
                    "UPDATE memories SET category = ?1 WHERE id = ?2",
                    params![category.as_str(), id],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Delete a memory. Returns false if it did not exist.
    pub async fn delete(&self, id: &str) -> Result<bool, MemoriaError> {
        let id = id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let changed = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
                Ok(changed > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    /// All stored embeddings of a user as `(id, vector)` pairs.
    pub async fn get_embeddings(
        &self,
        user_id: &str,
    ) -> Result<Vec<(String, Vec<f32>)>, MemoriaError> {
        let user_id = user_id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<(String, Vec<f32>)>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, embedding FROM memories WHERE user_id = ?1 AND embedding IS NOT NULL",
                )?;
                let results = stmt
                    .query_map(params![user_id], |row| {
                        let id: String = row.get(0)?;
                        let blob: Vec<u8> = row.get(1)?;
                        Ok((id, blob_to_vec(&blob)))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(results)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Every memory of every user, without embeddings, for an index rebuild.
    pub async fn all_for_indexing(&self) -> Result<Vec<Memory>, MemoriaError> {
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<Memory>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, content, category, importance, tags, NULL, source, timestamp, last_accessed, access_count FROM memories",
                )?;
                let memories = stmt
                    .query_map([], row_to_memory)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(memories)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Memory count per category for a user, largest first.
    pub async fn category_counts(
        &self,
        user_id: &str,
    ) -> Result<Vec<(Category, u64)>, MemoriaError> {
        let user_id = user_id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<(Category, u64)>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT category, COUNT(*) FROM memories WHERE user_id = ?1 GROUP BY category ORDER BY COUNT(*) DESC, category",
                )?;
                let counts = stmt
                    .query_map(params![user_id], |row| {
                        let category: String = row.get(0)?;
                        let count: i64 = row.get(1)?;
                        Ok((Category::from(category), count.max(0) as u64))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(counts)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Number of memories a user has.
    pub async fn count(&self, user_id: &str) -> Result<u64, MemoriaError> {
        let user_id = user_id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM memories WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
            })
            .await
            .map(|n| n.max(0) as u64)
            .map_err(map_tr_err)
    }

    /// Count one more use of a category in the registry table.
    pub async fn record_category(&self, category: &Category) -> Result<(), MemoriaError> {
        let name = category.as_str().to_string();
        let is_core = category.is_core();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO memory_categories (name, is_core, usage_count) VALUES (?1, ?2, 1)
                     ON CONFLICT(name) DO UPDATE SET usage_count = usage_count + 1",
                    params![name, is_core],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Every registered category with its usage count.
    pub async fn list_categories(&self) -> Result<Vec<(Category, u64)>, MemoriaError> {
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<(Category, u64)>, rusqlite::Error> {
                let mut stmt =
                    conn.prepare("SELECT name, usage_count FROM memory_categories ORDER BY name")?;
                let rows = stmt
                    .query_map([], |row| {
                        let name: String = row.get(0)?;
                        let count: i64 = row.get(1)?;
                        Ok((Category::from(name), count.max(0) as u64))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `\` as the escape character.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Convert a rusqlite Row to a Memory struct.
fn row_to_memory(row: &rusqlite::Row<'_>) -> Result<Memory, rusqlite::Error> {
    let category: String = row.get(3)?;
    let importance: i64 = row.get(4)?;
    let tags_json: String = row.get(5)?;
    let embedding: Option<Vec<u8>> = row.get(6)?;
    let source: String = row.get(7)?;
    let access_count: i64 = row.get(10)?;

    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        category: Category::from(category),
        importance: clamp_importance(importance),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        embedding: embedding.map(|blob| blob_to_vec(&blob)),
        source: MemorySource::from_str_value(&source),
        timestamp: row.get(8)?,
        last_accessed: row.get(9)?,
        access_count: access_count.max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> MemoryStore {
        MemoryStore::new(Database::open_in_memory().await.unwrap())
    }

    fn new_memory(user: &str, content: &str, category: &str, importance: i64) -> NewMemory {
        NewMemory {
            user_id: user.to_string(),
            content: content.to_string(),
            category: category.to_string(),
            importance,
            tags: vec!["test".to_string()],
            embedding: Some(vec![0.1; 8]),
            source: MemorySource::Manual,
        }
    }

    #[tokio::test]
    async fn insert_and_get_by_id() {
        let store = setup_store().await;
        let stored = store
            .insert(new_memory("u1", "User's dog is named Max", "relationship", 6))
            .await
            .unwrap();

        let retrieved = store.get_by_id(&stored.id).await.unwrap().unwrap();
        assert_eq!(retrieved.content, "User's dog is named Max");
        assert_eq!(retrieved.source, MemorySource::Manual);
        assert_eq!(retrieved.tags, vec!["test"]);
        assert_eq!(retrieved.embedding.as_ref().map(Vec::len), Some(8));
        assert_eq!(retrieved.access_count, 0);
    }

    #[tokio::test]
    async fn insert_clamps_importance_and_normalizes_category() {
        let store = setup_store().await;
        let high = store
            .insert(new_memory("u1", "a", "Work Context!", 15))
            .await
            .unwrap();
        let low = store.insert(new_memory("u1", "b", "", -3)).await.unwrap();

        let high = store.get_by_id(&high.id).await.unwrap().unwrap();
        let low = store.get_by_id(&low.id).await.unwrap().unwrap();
        assert_eq!(high.importance, 10);
        assert_eq!(high.category.as_str(), "work_context");
        assert_eq!(low.importance, 1);
        assert_eq!(low.category.as_str(), "other");
    }

    #[tokio::test]
    async fn get_by_id_nonexistent() {
        let store = setup_store().await;
        assert!(store.get_by_id("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queries_are_scoped_to_user() {
        let store = setup_store().await;
        let mine = store
            .insert(new_memory("u1", "I live in Seattle", "location", 8))
            .await
            .unwrap();
        store
            .insert(new_memory("u2", "I live in Berlin", "location", 8))
            .await
            .unwrap();

        let found = store.search_by_content_like("u1", "live", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, mine.id);

        let ids = store.get_by_ids("u2", &[mine.id.clone()]).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(store.count("u1").await.unwrap(), 1);
        assert_eq!(store.get_embeddings("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_applies_filter_limit_and_offset() {
        let store = setup_store().await;
        for i in 0..5 {
            store
                .insert(new_memory("u1", &format!("fact {i}"), "preference", i + 3))
                .await
                .unwrap();
        }
        store
            .insert(new_memory("u1", "other fact", "device", 9))
            .await
            .unwrap();

        let filter = MemoryFilter {
            category: Some(Category::from("preference")),
            min_importance: Some(5),
            ..Default::default()
        };
        let page = store.get("u1", &filter, 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|m| m.category.as_str() == "preference"));
        let rest = store.get("u1", &filter, 10, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn like_search_escapes_wildcards() {
        let store = setup_store().await;
        store
            .insert(new_memory("u1", "saving 100% of bonus", "goal", 5))
            .await
            .unwrap();
        store
            .insert(new_memory("u1", "saving 100 dollars", "goal", 5))
            .await
            .unwrap();

        let found = store.search_by_content_like("u1", "100%", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.search_by_content_like("u1", "  ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn category_and_tag_search() {
        let store = setup_store().await;
        let mut memory = new_memory("u1", "Uses a standing desk", "work_context", 4);
        memory.tags = vec!["ergonomics".to_string(), "office".to_string()];
        store.insert(memory).await.unwrap();

        assert_eq!(store.search_by_category("u1", "Work", 10).await.unwrap().len(), 1);
        assert_eq!(store.search_by_tag("u1", "ergo", 10).await.unwrap().len(), 1);
        assert!(store.search_by_tag("u1", "kitchen", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn category_search_ignores_terms_without_ascii_content() {
        let store = setup_store().await;
        store
            .insert(new_memory("u1", "The wifi password is on the fridge", "other", 3))
            .await
            .unwrap();

        assert_eq!(store.search_by_category("u1", "other", 10).await.unwrap().len(), 1);
        for term in ["我住在哪里", "???", "北京"] {
            assert!(
                store.search_by_category("u1", term, 10).await.unwrap().is_empty(),
                "{term} should not match the fallback category"
            );
        }
    }

    #[tokio::test]
    async fn access_counts_increment() {
        let store = setup_store().await;
        let stored = store
            .insert(new_memory("u1", "fact", "other", 5))
            .await
            .unwrap();
        store.update_access_count(&stored.id).await.unwrap();
        store
            .update_access_counts(&[stored.id.clone(), stored.id.clone()])
            .await
            .unwrap();

        let retrieved = store.get_by_id(&stored.id).await.unwrap().unwrap();
        assert_eq!(retrieved.access_count, 3);
        assert!(retrieved.last_accessed.is_some());
    }

    #[tokio::test]
    async fn update_and_delete() {
        let store = setup_store().await;
        let stored = store
            .insert(new_memory("u1", "old content", "other", 5))
            .await
            .unwrap();

        assert!(store.update_content(&stored.id, "new content", None).await.unwrap());
        assert!(store.update_category(&stored.id, "Device Info").await.unwrap());
        let updated = store.get_by_id(&stored.id).await.unwrap().unwrap();
        assert_eq!(updated.content, "new content");
        assert!(updated.embedding.is_none());
        assert_eq!(updated.category.as_str(), "device_info");

        assert!(store.delete(&stored.id).await.unwrap());
        assert!(!store.delete(&stored.id).await.unwrap());
        assert!(store.get_by_id(&stored.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn embedding_less_memories_are_excluded_from_vector_scan() {
        let store = setup_store().await;
        let mut memory = new_memory("u1", "no vector", "other", 5);
        memory.embedding = None;
        store.insert(memory).await.unwrap();
        store
            .insert(new_memory("u1", "with vector", "other", 5))
            .await
            .unwrap();

        assert_eq!(store.get_embeddings("u1").await.unwrap().len(), 1);
        let all = store.all_for_indexing().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|m| m.embedding.is_none()));
    }

    #[tokio::test]
    async fn category_counts_and_registry_table() {
        let store = setup_store().await;
        for category in ["health", "health", "device"] {
            let stored = store
                .insert(new_memory("u1", "x", category, 5))
                .await
                .unwrap();
            store.record_category(&stored.category).await.unwrap();
        }

        let counts = store.category_counts("u1").await.unwrap();
        assert_eq!(counts[0], (Category::from("health"), 2));
        assert_eq!(counts[1], (Category::from("device"), 1));

        let registered = store.list_categories().await.unwrap();
        assert_eq!(
            registered,
            vec![(Category::from("device"), 1), (Category::from("health"), 2)]
        );
    }
}
