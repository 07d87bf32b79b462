//! Transaction operations

use chrono::Utc;
use rusqlite::{params, Row};

use super::{format_date, format_datetime, parse_date, Database};
use crate::error::{Error, Result};
use crate::models::{NewTransaction, Transaction, TransactionType};

const TRANSACTION_COLUMNS: &str = "id, user_id, category_id, bank_id, batch_id, name, reference, \
     value, transaction_date, transaction_type";

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let date: String = row.get(8)?;
    let kind: String = row.get(9)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category_id: row.get(2)?,
        bank_id: row.get(3)?,
        batch_id: row.get(4)?,
        name: row.get(5)?,
        reference: row.get(6)?,
        value: row.get(7)?,
        transaction_date: parse_date(&date)?,
        transaction_type: kind.parse().unwrap_or(TransactionType::Expense),
    })
}

impl Database {
    /// Persist one chunk of a batch atomically
    ///
    /// Inserts every row and advances the batch's `processed_count` in a single
    /// SQLite transaction: either the whole chunk and its progress land, or
    /// nothing does. The batch must be `processing`.
    pub fn commit_chunk(&self, batch_id: &str, chunk: &[NewTransaction]) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut ids = Vec::with_capacity(chunk.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transactions
                    (id, user_id, category_id, bank_id, batch_id, name, reference,
                     value, transaction_date, transaction_type)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for item in chunk {
                if item.batch_id != batch_id {
                    return Err(Error::InvalidData(format!(
                        "Transaction for batch {} committed under batch {}",
                        item.batch_id, batch_id
                    )));
                }
                let id = uuid::Uuid::new_v4().to_string();
                stmt.execute(params![
                    id,
                    item.user_id,
                    item.category_id,
                    item.bank_id,
                    item.batch_id,
                    item.name,
                    item.reference,
                    item.value,
                    format_date(&item.transaction_date),
                    item.transaction_type.as_str(),
                ])?;
                ids.push(id);
            }
        }

        let updated = tx.execute(
            "UPDATE batches
             SET processed_count = processed_count + ?, updated_at = ?
             WHERE id = ? AND status = 'processing'",
            params![chunk.len() as i64, format_datetime(&Utc::now()), batch_id],
        )?;
        if updated == 0 {
            // Dropping `tx` rolls the inserts back
            return Err(Error::InvalidData(format!(
                "Batch {} is not processing",
                batch_id
            )));
        }

        tx.commit()?;
        Ok(ids)
    }

    /// Transactions produced by a batch, in insertion order
    pub fn list_transactions_for_batch(&self, batch_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE batch_id = ? ORDER BY rowid",
            TRANSACTION_COLUMNS
        ))?;
        let transactions = stmt
            .query_map(params![batch_id], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    pub fn count_transactions_for_batch(&self, batch_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE batch_id = ?",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Transaction counts per category label for a batch, largest first
    pub fn count_transactions_by_category(&self, batch_id: &str) -> Result<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.description, COUNT(*) AS n
             FROM transactions t
             JOIN categories c ON c.id = t.category_id
             WHERE t.batch_id = ?
             GROUP BY c.description
             ORDER BY n DESC, c.description",
        )?;
        let counts = stmt
            .query_map(params![batch_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}
