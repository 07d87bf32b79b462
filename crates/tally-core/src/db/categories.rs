//! Category operations

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use super::Database;
use crate::classifier::FALLBACK_LABEL;
use crate::error::Result;
use crate::models::Category;

/// Insert-or-return-existing on the UNIQUE label column
///
/// Two batches racing on the same new label both end up with the one row.
fn resolve_on(conn: &Connection, label: &str) -> Result<i64> {
    let label = match label.trim() {
        "" => FALLBACK_LABEL,
        trimmed => trimmed,
    };

    conn.execute(
        "INSERT INTO categories (description) VALUES (?) ON CONFLICT(description) DO NOTHING",
        params![label],
    )?;

    let id = conn.query_row(
        "SELECT id FROM categories WHERE description = ?",
        params![label],
        |row| row.get(0),
    )?;
    Ok(id)
}

impl Database {
    /// Resolve a category label to its id, creating the category if needed
    pub fn resolve_category(&self, label: &str) -> Result<i64> {
        let conn = self.conn()?;
        resolve_on(&conn, label)
    }

    pub fn get_category_by_description(&self, description: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                "SELECT id, description FROM categories WHERE description = ?",
                params![description],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        description: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(category)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, description FROM categories ORDER BY description")?;
        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    description: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }
}

/// Label to id cache scoped to one batch run
///
/// A chunk of 500 items usually carries a handful of distinct labels, so
/// this keeps category lookups to one round-trip per label per batch.
#[derive(Debug, Default)]
pub struct CategoryCache {
    ids: HashMap<String, i64>,
}

impl CategoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every label using an open connection, in input order
    pub fn resolve_all(&mut self, conn: &Connection, labels: &[String]) -> Result<Vec<i64>> {
        labels
            .iter()
            .map(|label| self.resolve(conn, label))
            .collect()
    }

    pub fn resolve(&mut self, conn: &Connection, label: &str) -> Result<i64> {
        if let Some(id) = self.ids.get(label) {
            return Ok(*id);
        }
        let id = resolve_on(conn, label)?;
        self.ids.insert(label.to_string(), id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
