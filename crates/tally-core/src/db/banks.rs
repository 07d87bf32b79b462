//! Bank operations

use rusqlite::{params, OptionalExtension};

use super::Database;
use crate::error::{Error, Result};
use crate::models::Bank;

impl Database {
    /// Insert a bank row if missing; returns true when a row was created
    pub fn ensure_bank(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO banks (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
            params![name.trim().to_uppercase()],
        )?;
        Ok(inserted > 0)
    }

    /// Look a bank up by name (bank codes are stored upper-case)
    pub fn get_bank_by_name(&self, name: &str) -> Result<Option<Bank>> {
        let conn = self.conn()?;
        let bank = conn
            .query_row(
                "SELECT id, name FROM banks WHERE name = ?",
                params![name.trim().to_uppercase()],
                |row| {
                    Ok(Bank {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(bank)
    }

    /// Like `get_bank_by_name`, but a missing bank is an error
    pub fn require_bank(&self, name: &str) -> Result<Bank> {
        self.get_bank_by_name(name)?
            .ok_or_else(|| Error::BankNotFound(name.to_string()))
    }

    pub fn list_banks(&self) -> Result<Vec<Bank>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name FROM banks ORDER BY name")?;
        let banks = stmt
            .query_map([], |row| {
                Ok(Bank {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(banks)
    }
}
