use super::*;

impl SignalDb {
    // =========================================================================
    // Account name cache
    // =========================================================================

    /// Record that an account was seen with this name. Never deletes; a known
    /// owner is kept when the observer doesn't supply one.
    pub fn upsert_account_name(&self, entry: &AccountNameCacheEntry) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO account_name_cache (account_id, account_name, owner_id, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account_id) DO UPDATE SET
                account_name = excluded.account_name,
                owner_id = COALESCE(excluded.owner_id, account_name_cache.owner_id),
                updated_at = excluded.updated_at",
            params![
                entry.account_id,
                entry.account_name,
                entry.owner_id,
                to_db_timestamp(entry.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Convenience for request paths: upsert with `updated_at = now`.
    pub fn observe_account(
        &self,
        account_id: &str,
        account_name: &str,
        owner_id: Option<&str>,
    ) -> Result<(), DbError> {
        self.upsert_account_name(&AccountNameCacheEntry {
            account_id: account_id.to_string(),
            account_name: account_name.to_string(),
            owner_id: owner_id.map(String::from),
            updated_at: Utc::now(),
        })
    }

    pub fn get_account_name(&self, account_id: &str) -> Result<Option<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT account_name FROM account_name_cache WHERE account_id = ?1")?;
        let mut rows = stmt.query_map(params![account_id], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?)
    }

    /// Accounts for batch enumeration, most recently observed first.
    pub fn list_known_accounts(&self, limit: usize) -> Result<Vec<AccountNameCacheEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id, account_name, owner_id, updated_at
             FROM account_name_cache
             ORDER BY updated_at DESC, account_id ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AccountNameCacheEntry {
                account_id: row.get(0)?,
                account_name: row.get(1)?,
                owner_id: row.get(2)?,
                updated_at: timestamp_column(row, 3)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}
