//! Memory record CRUD and listing.

use chrono::Utc;
use rusqlite::params;
use tracing::debug;
use zerocopy::IntoBytes;

use reverie_core::VectorId;

use crate::error::{MemoryError, Result};
use crate::types::{
    MemoryFilters, MemoryRecord, MemoryType, MemoryUpdate, PersonaId, Speaker,
};

use super::persona_ops::parse_timestamp;
use super::MetadataStore;

impl MetadataStore {
    /// Insert a memory record, optionally with its embedding blob.
    pub fn put_memory_record(
        &self,
        record: &MemoryRecord,
        embedding: Option<&[f32]>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let tags_json = serde_json::to_string(&record.tags)?;
        let context_json = record
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let embedding_bytes = embedding.map(|e| e.as_bytes().to_vec());

        conn.execute(
            r#"
            INSERT INTO memories (id, persona_id, memory_type, importance, content,
                                  created_at, last_accessed, access_count,
                                  conversation_id, speaker, tags, context, embedding)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                record.id.to_string(),
                record.persona_id.to_string(),
                record.memory_type.as_str(),
                record.importance,
                record.content,
                record.created_at.to_rfc3339(),
                record.last_accessed.to_rfc3339(),
                record.access_count,
                record.conversation_id,
                record.speaker.map(|s| s.as_str()),
                tags_json,
                context_json,
                embedding_bytes,
            ],
        )?;

        debug!("Inserted memory record {}", record.id);
        Ok(())
    }

    /// Get a memory record by id.
    pub fn get_memory_record(&self, id: VectorId) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, persona_id, memory_type, importance, content, created_at,
                   last_accessed, access_count, conversation_id, speaker, tags, context
            FROM memories
            WHERE id = ?1
            "#,
        )?;

        let mut rows = stmt.query(params![id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_record(row)?))
        } else {
            Ok(None)
        }
    }

    /// Read the stored embedding blob for a memory, if present.
    pub fn get_embedding(&self, id: VectorId) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock().unwrap();

        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM memories WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    MemoryError::NotFound(format!("memory {}", id))
                }
                other => MemoryError::Database(other),
            })?;

        Ok(blob.map(|bytes| decode_embedding(&bytes)))
    }

    /// Apply a partial update to a memory record.
    pub fn update_memory_record(&self, id: VectorId, update: &MemoryUpdate) -> Result<()> {
        let existing = self
            .get_memory_record(id)?
            .ok_or_else(|| MemoryError::NotFound(format!("memory {}", id)))?;

        let importance = update.importance.unwrap_or(existing.importance);
        if !(0.0..=1.0).contains(&importance) {
            return Err(MemoryError::Validation(format!(
                "importance {} out of range [0, 1]",
                importance
            )));
        }
        let tags = update.tags.clone().unwrap_or(existing.tags);
        let context = update.context.clone().or(existing.context);

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET importance = ?2, tags = ?3, context = ?4 WHERE id = ?1",
            params![
                id.to_string(),
                importance,
                serde_json::to_string(&tags)?,
                context.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )?;
        Ok(())
    }

    /// Record an access: bump the counter and refresh `last_accessed`.
    pub fn touch_memory(&self, id: VectorId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"
            UPDATE memories
            SET last_accessed = ?2, access_count = access_count + 1
            WHERE id = ?1
            "#,
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        if rows == 0 {
            return Err(MemoryError::NotFound(format!("memory {}", id)));
        }
        Ok(())
    }

    /// Delete a memory record.
    pub fn delete_memory_record(&self, id: VectorId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])?;
        Ok(rows > 0)
    }

    /// List a persona's memories with filters, newest first.
    pub fn list_by_persona(
        &self,
        persona_id: PersonaId,
        filters: &MemoryFilters,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            r#"
            SELECT id, persona_id, memory_type, importance, content, created_at,
                   last_accessed, access_count, conversation_id, speaker, tags, context
            FROM memories
            WHERE persona_id = ?1
            "#,
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(persona_id.to_string())];

        if !filters.memory_types.is_empty() {
            let placeholders: Vec<String> = filters
                .memory_types
                .iter()
                .map(|t| {
                    params_vec.push(Box::new(t.as_str().to_string()));
                    format!("?{}", params_vec.len())
                })
                .collect();
            sql.push_str(&format!(" AND memory_type IN ({})", placeholders.join(", ")));
        }
        let now = Utc::now();
        if let Some(max_age) = filters.max_age {
            let cutoff = now - chrono::Duration::from_std(max_age).unwrap_or_default();
            params_vec.push(Box::new(cutoff.to_rfc3339()));
            sql.push_str(&format!(" AND created_at >= ?{}", params_vec.len()));
        }
        if let Some(min_age) = filters.min_age {
            let cutoff = now - chrono::Duration::from_std(min_age).unwrap_or_default();
            params_vec.push(Box::new(cutoff.to_rfc3339()));
            sql.push_str(&format!(" AND created_at <= ?{}", params_vec.len()));
        }
        if let Some(ref conversation_id) = filters.conversation_id {
            params_vec.push(Box::new(conversation_id.clone()));
            sql.push_str(&format!(" AND conversation_id = ?{}", params_vec.len()));
        }

        params_vec.push(Box::new(limit as i64));
        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ?{}",
            params_vec.len()
        ));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(params_refs.as_slice())?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }
        Ok(records)
    }

    /// Memories in a conversation, oldest first.
    pub fn list_conversation(
        &self,
        persona_id: PersonaId,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, persona_id, memory_type, importance, content, created_at,
                   last_accessed, access_count, conversation_id, speaker, tags, context
            FROM memories
            WHERE persona_id = ?1 AND conversation_id = ?2
            ORDER BY created_at ASC
            LIMIT ?3
            "#,
        )?;

        let mut rows = stmt.query(params![
            persona_id.to_string(),
            conversation_id,
            limit as i64
        ])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }
        Ok(records)
    }

    /// Count a persona's active memories.
    pub fn count_active_memories(&self, persona_id: PersonaId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE persona_id = ?1",
            params![persona_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Count all memory records.
    pub fn count_memories(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Iterate every memory record (startup rebuild path).
    pub fn all_memory_records(&self) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, persona_id, memory_type, importance, content, created_at,
                   last_accessed, access_count, conversation_id, speaker, tags, context
            FROM memories
            ORDER BY created_at ASC
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(Self::row_to_record(row)?);
        }
        Ok(records)
    }

    /// Convert a row to a record.
    ///
    /// Expected column order: id, persona_id, memory_type, importance,
    /// content, created_at, last_accessed, access_count, conversation_id,
    /// speaker, tags, context.
    fn row_to_record(row: &rusqlite::Row) -> Result<MemoryRecord> {
        let id_str: String = row.get(0)?;
        let persona_str: String = row.get(1)?;
        let type_str: String = row.get(2)?;
        let created_at_str: String = row.get(5)?;
        let last_accessed_str: String = row.get(6)?;
        let speaker_str: Option<String> = row.get(9)?;
        let tags_json: String = row.get(10)?;
        let context_json: Option<String> = row.get(11)?;

        Ok(MemoryRecord {
            id: VectorId::parse(&id_str)
                .map_err(|e| MemoryError::Validation(format!("corrupt memory id: {}", e)))?,
            persona_id: PersonaId::parse(&persona_str)?,
            memory_type: MemoryType::from_str(&type_str)?,
            importance: row.get(3)?,
            content: row.get(4)?,
            created_at: parse_timestamp(&created_at_str)?,
            last_accessed: parse_timestamp(&last_accessed_str)?,
            access_count: row.get(7)?,
            conversation_id: row.get(8)?,
            speaker: speaker_str.as_deref().map(Speaker::from_str).transpose()?,
            tags: serde_json::from_str(&tags_json)?,
            context: context_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
        })
    }
}

/// Decode a little-endian f32 blob written by `put_memory_record`.
fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Persona, PersonaConfig};
    use std::time::Duration;

    fn store_with_persona() -> (MetadataStore, PersonaId) {
        let store = MetadataStore::open_in_memory().unwrap();
        let persona = Persona::new("Test", PersonaConfig::default());
        store.put_persona(&persona).unwrap();
        (store, persona.id)
    }

    #[test]
    fn test_record_roundtrip_with_embedding() {
        let (store, persona) = store_with_persona();
        let record = MemoryRecord::new(persona, MemoryType::Fact, "water boils at 100C", 0.8)
            .with_tags(vec!["physics".to_string()])
            .with_context(serde_json::json!({"source": "school"}));
        let embedding = vec![0.25f32, -1.5, 3.0];

        store.put_memory_record(&record, Some(&embedding)).unwrap();

        let loaded = store.get_memory_record(record.id).unwrap().unwrap();
        assert_eq!(loaded.content, "water boils at 100C");
        assert_eq!(loaded.memory_type, MemoryType::Fact);
        assert_eq!(loaded.tags, vec!["physics"]);
        assert_eq!(
            loaded.context.unwrap()["source"],
            serde_json::json!("school")
        );

        let stored_embedding = store.get_embedding(record.id).unwrap().unwrap();
        assert_eq!(stored_embedding, embedding);
    }

    #[test]
    fn test_missing_embedding_is_none() {
        let (store, persona) = store_with_persona();
        let record = MemoryRecord::new(persona, MemoryType::Fact, "no vector", 0.5);
        store.put_memory_record(&record, None).unwrap();
        assert!(store.get_embedding(record.id).unwrap().is_none());
    }

    #[test]
    fn test_partial_update() {
        let (store, persona) = store_with_persona();
        let record = MemoryRecord::new(persona, MemoryType::Preference, "likes tea", 0.4);
        store.put_memory_record(&record, None).unwrap();

        store
            .update_memory_record(
                record.id,
                &MemoryUpdate {
                    importance: Some(0.9),
                    ..Default::default()
                },
            )
            .unwrap();

        let loaded = store.get_memory_record(record.id).unwrap().unwrap();
        assert_eq!(loaded.importance, 0.9);
        assert_eq!(loaded.content, "likes tea");
    }

    #[test]
    fn test_update_rejects_out_of_range_importance() {
        let (store, persona) = store_with_persona();
        let record = MemoryRecord::new(persona, MemoryType::Fact, "x", 0.5);
        store.put_memory_record(&record, None).unwrap();

        let err = store
            .update_memory_record(
                record.id,
                &MemoryUpdate {
                    importance: Some(1.5),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[test]
    fn test_touch_increments_access() {
        let (store, persona) = store_with_persona();
        let record = MemoryRecord::new(persona, MemoryType::Fact, "x", 0.5);
        store.put_memory_record(&record, None).unwrap();

        store.touch_memory(record.id).unwrap();
        store.touch_memory(record.id).unwrap();

        let loaded = store.get_memory_record(record.id).unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
        assert!(loaded.last_accessed >= record.last_accessed);
    }

    #[test]
    fn test_delete_record() {
        let (store, persona) = store_with_persona();
        let record = MemoryRecord::new(persona, MemoryType::Fact, "x", 0.5);
        store.put_memory_record(&record, None).unwrap();

        assert!(store.delete_memory_record(record.id).unwrap());
        assert!(!store.delete_memory_record(record.id).unwrap());
        assert!(store.get_memory_record(record.id).unwrap().is_none());
    }

    #[test]
    fn test_list_by_persona_with_type_filter() {
        let (store, persona) = store_with_persona();
        for (t, content) in [
            (MemoryType::Fact, "a fact"),
            (MemoryType::Preference, "a preference"),
            (MemoryType::Fact, "another fact"),
        ] {
            store
                .put_memory_record(&MemoryRecord::new(persona, t, content, 0.5), None)
                .unwrap();
        }

        let facts = store
            .list_by_persona(
                persona,
                &MemoryFilters {
                    memory_types: vec![MemoryType::Fact],
                    ..Default::default()
                },
                100,
            )
            .unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|r| r.memory_type == MemoryType::Fact));
    }

    #[test]
    fn test_list_by_persona_age_window() {
        let (store, persona) = store_with_persona();

        let mut old = MemoryRecord::new(persona, MemoryType::Fact, "old", 0.5);
        old.created_at = Utc::now() - chrono::Duration::hours(10);
        store.put_memory_record(&old, None).unwrap();

        let fresh = MemoryRecord::new(persona, MemoryType::Fact, "fresh", 0.5);
        store.put_memory_record(&fresh, None).unwrap();

        let recent = store
            .list_by_persona(
                persona,
                &MemoryFilters {
                    max_age: Some(Duration::from_secs(3600)),
                    ..Default::default()
                },
                100,
            )
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "fresh");

        let aged = store
            .list_by_persona(
                persona,
                &MemoryFilters {
                    min_age: Some(Duration::from_secs(3600)),
                    ..Default::default()
                },
                100,
            )
            .unwrap();
        assert_eq!(aged.len(), 1);
        assert_eq!(aged[0].content, "old");
    }

    #[test]
    fn test_conversation_ordering() {
        let (store, persona) = store_with_persona();
        let base = Utc::now();

        let mut first = MemoryRecord::new(persona, MemoryType::Conversation, "hello", 0.5)
            .with_conversation("conv-1", Speaker::User);
        first.created_at = base;
        let mut second = MemoryRecord::new(persona, MemoryType::Conversation, "hi there", 0.5)
            .with_conversation("conv-1", Speaker::Assistant);
        second.created_at = base + chrono::Duration::milliseconds(5);

        // Insert out of order; listing must sort by timestamp ascending.
        store.put_memory_record(&second, None).unwrap();
        store.put_memory_record(&first, None).unwrap();

        let history = store.list_conversation(persona, "conv-1", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[0].speaker, Some(Speaker::User));
        assert_eq!(history[1].content, "hi there");
        assert_eq!(history[1].speaker, Some(Speaker::Assistant));
    }

    #[test]
    fn test_count_active() {
        let (store, persona) = store_with_persona();
        assert_eq!(store.count_active_memories(persona).unwrap(), 0);
        for i in 0..3 {
            store
                .put_memory_record(
                    &MemoryRecord::new(persona, MemoryType::Fact, format!("m{}", i), 0.5),
                    None,
                )
                .unwrap();
        }
        assert_eq!(store.count_active_memories(persona).unwrap(), 3);
        assert_eq!(store.count_memories().unwrap(), 3);
    }
}
