//! Persona CRUD operations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::types::{Persona, PersonaConfig, PersonaId};

use super::MetadataStore;

impl MetadataStore {
    /// Insert a new persona.
    pub fn put_persona(&self, persona: &Persona) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO personas (id, name, description, system_prompt,
                                  max_memory_size, memory_decay_ms, embedding_model,
                                  created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                persona.id.to_string(),
                persona.name,
                persona.description,
                persona.system_prompt,
                persona.config.max_memory_size as i64,
                persona.config.memory_decay.as_millis() as i64,
                persona.config.embedding_model,
                persona.created_at.to_rfc3339(),
                persona.updated_at.to_rfc3339(),
            ],
        )?;

        debug!("Inserted persona {}", persona.id);
        Ok(())
    }

    /// Get a persona by id.
    pub fn get_persona(&self, id: PersonaId) -> Result<Option<Persona>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, description, system_prompt, max_memory_size,
                   memory_decay_ms, embedding_model, created_at, updated_at
            FROM personas
            WHERE id = ?1
            "#,
        )?;

        let mut rows = stmt.query(params![id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_persona(row)?))
        } else {
            Ok(None)
        }
    }

    /// List all personas, newest first.
    pub fn list_personas(&self) -> Result<Vec<Persona>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, description, system_prompt, max_memory_size,
                   memory_decay_ms, embedding_model, created_at, updated_at
            FROM personas
            ORDER BY created_at DESC
            "#,
        )?;

        let mut rows = stmt.query([])?;
        let mut personas = Vec::new();
        while let Some(row) = rows.next()? {
            personas.push(Self::row_to_persona(row)?);
        }
        Ok(personas)
    }

    /// Update an existing persona.
    pub fn update_persona(&self, persona: &Persona) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let rows = conn.execute(
            r#"
            UPDATE personas
            SET name = ?2, description = ?3, system_prompt = ?4,
                max_memory_size = ?5, memory_decay_ms = ?6, embedding_model = ?7,
                updated_at = ?8
            WHERE id = ?1
            "#,
            params![
                persona.id.to_string(),
                persona.name,
                persona.description,
                persona.system_prompt,
                persona.config.max_memory_size as i64,
                persona.config.memory_decay.as_millis() as i64,
                persona.config.embedding_model,
                Utc::now().to_rfc3339(),
            ],
        )?;

        if rows == 0 {
            return Err(MemoryError::NotFound(format!("persona {}", persona.id)));
        }
        Ok(())
    }

    /// Delete a persona. Memory rows cascade via the foreign key.
    ///
    /// Returns the ids of the memories that were cascaded, so the caller can
    /// evict the matching vectors from the in-process store.
    pub fn delete_persona(&self, id: PersonaId) -> Result<Vec<reverie_core::VectorId>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare("SELECT id FROM memories WHERE persona_id = ?1")?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let mut memory_ids = Vec::new();
        while let Some(row) = rows.next()? {
            let id_str: String = row.get(0)?;
            memory_ids.push(reverie_core::VectorId::parse(&id_str).map_err(|e| {
                MemoryError::Validation(format!("corrupt memory id in database: {}", e))
            })?);
        }
        drop(rows);
        drop(stmt);

        let deleted = conn.execute("DELETE FROM personas WHERE id = ?1", params![id.to_string()])?;
        if deleted == 0 {
            return Err(MemoryError::NotFound(format!("persona {}", id)));
        }

        debug!(
            "Deleted persona {} ({} memories cascaded)",
            id,
            memory_ids.len()
        );
        Ok(memory_ids)
    }

    /// Count personas.
    pub fn count_personas(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM personas", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_persona(row: &rusqlite::Row) -> Result<Persona> {
        let id_str: String = row.get(0)?;
        let decay_ms: i64 = row.get(5)?;
        let created_at_str: String = row.get(7)?;
        let updated_at_str: String = row.get(8)?;

        Ok(Persona {
            id: PersonaId::parse(&id_str)?,
            name: row.get(1)?,
            description: row.get(2)?,
            system_prompt: row.get(3)?,
            config: PersonaConfig {
                max_memory_size: row.get::<_, i64>(4)? as usize,
                memory_decay: Duration::from_millis(decay_ms.max(0) as u64),
                embedding_model: row.get(6)?,
            },
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }
}

/// Parse an RFC3339 timestamp stored by this crate.
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::Validation(format!("bad timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> MetadataStore {
        MetadataStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_persona_roundtrip() {
        let store = test_store();
        let persona = Persona::new("Ada", PersonaConfig::default())
            .with_description("test persona")
            .with_system_prompt("You are Ada.");
        store.put_persona(&persona).unwrap();

        let loaded = store.get_persona(persona.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Ada");
        assert_eq!(loaded.description.as_deref(), Some("test persona"));
        assert_eq!(loaded.config.max_memory_size, persona.config.max_memory_size);
        assert_eq!(loaded.config.memory_decay, persona.config.memory_decay);
    }

    #[test]
    fn test_get_missing_persona() {
        let store = test_store();
        assert!(store.get_persona(PersonaId::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_persona() {
        let store = test_store();
        let mut persona = Persona::new("Ada", PersonaConfig::default());
        store.put_persona(&persona).unwrap();

        persona.name = "Ada Lovelace".to_string();
        persona.config.max_memory_size = 42;
        store.update_persona(&persona).unwrap();

        let loaded = store.get_persona(persona.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Ada Lovelace");
        assert_eq!(loaded.config.max_memory_size, 42);
    }

    #[test]
    fn test_update_missing_persona() {
        let store = test_store();
        let persona = Persona::new("Ghost", PersonaConfig::default());
        assert!(matches!(
            store.update_persona(&persona),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_persona_cascades() {
        use crate::types::{MemoryRecord, MemoryType};

        let store = test_store();
        let persona = Persona::new("Ada", PersonaConfig::default());
        store.put_persona(&persona).unwrap();

        let record = MemoryRecord::new(persona.id, MemoryType::Fact, "fact", 0.5);
        store.put_memory_record(&record, None).unwrap();

        let cascaded = store.delete_persona(persona.id).unwrap();
        assert_eq!(cascaded, vec![record.id]);
        assert!(store.get_memory_record(record.id).unwrap().is_none());
        assert!(store.get_persona(persona.id).unwrap().is_none());
    }

    #[test]
    fn test_list_personas() {
        let store = test_store();
        store
            .put_persona(&Persona::new("A", PersonaConfig::default()))
            .unwrap();
        store
            .put_persona(&Persona::new("B", PersonaConfig::default()))
            .unwrap();
        assert_eq!(store.list_personas().unwrap().len(), 2);
        assert_eq!(store.count_personas().unwrap(), 2);
    }
}
