use chrono::Duration;
use rusqlite::params_from_iter;

use super::*;

/// Expiry applied when a writer does not set one.
pub const DEFAULT_SIGNAL_TTL_HOURS: i64 = 24;

const SIGNAL_COLUMNS: &str =
    "id, account_id, opportunity_id, source, payload, created_at, updated_at, expires_at";

impl SignalDb {
    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace signals. See [`SignalDb::upsert_signals_at`].
    pub fn upsert_signals(&self, signals: &[NewSignal]) -> Result<usize, DbError> {
        self.upsert_signals_at(signals, Utc::now())
    }

    /// Insert or replace signals as of `now`.
    ///
    /// Each signal replaces whatever row exists for its logical key
    /// (opportunity for call-derived, account for news-derived) in a single
    /// statement, so there is never a window with zero or two rows for a key.
    /// `created_at` survives a replace unless the replaced row had already
    /// expired. All rows commit together.
    pub fn upsert_signals_at(
        &self,
        signals: &[NewSignal],
        now: DateTime<Utc>,
    ) -> Result<usize, DbError> {
        if signals.is_empty() {
            return Ok(0);
        }

        let now_str = to_db_timestamp(now);
        let default_expiry = now + Duration::hours(DEFAULT_SIGNAL_TTL_HOURS);

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO buying_signals
                    (entity_key, account_id, opportunity_id, source, payload,
                     created_at, updated_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
                 ON CONFLICT(entity_key, source) DO UPDATE SET
                    account_id = excluded.account_id,
                    opportunity_id = excluded.opportunity_id,
                    payload = excluded.payload,
                    created_at = CASE
                        WHEN buying_signals.expires_at IS NOT NULL
                             AND buying_signals.expires_at <= excluded.updated_at
                        THEN excluded.created_at
                        ELSE buying_signals.created_at
                    END,
                    updated_at = excluded.updated_at,
                    expires_at = excluded.expires_at",
            )?;

            for signal in signals {
                let payload = serde_json::to_string(&signal.payload)?;
                let expires_at = signal.expires_at.unwrap_or(default_expiry);
                stmt.execute(params![
                    signal.entity_key(),
                    signal.account_id,
                    signal.opportunity_id,
                    signal.source.as_str(),
                    payload,
                    now_str,
                    to_db_timestamp(expires_at),
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("Signal store: upserted {} signal(s)", signals.len());
        Ok(signals.len())
    }

    /// Delete every row whose expiry has passed. Returns the number removed.
    pub fn sweep_expired(&self) -> Result<usize, DbError> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let removed = self.conn.execute(
            "DELETE FROM buying_signals WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![to_db_timestamp(now)],
        )?;
        Ok(removed)
    }

    // =========================================================================
    // Reads (fresh rows only)
    // =========================================================================

    pub fn get_signals_by_opportunity_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<StoredSignal>, DbError> {
        self.get_signals_by_opportunity_ids_at(ids, Utc::now())
    }

    pub fn get_signals_by_opportunity_ids_at(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredSignal>, DbError> {
        self.query_fresh("opportunity_id", ids, now)
    }

    pub fn get_signals_by_account_ids(&self, ids: &[String]) -> Result<Vec<StoredSignal>, DbError> {
        self.get_signals_by_account_ids_at(ids, Utc::now())
    }

    pub fn get_signals_by_account_ids_at(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredSignal>, DbError> {
        self.query_fresh("account_id", ids, now)
    }

    /// `column` is one of the two fixed id columns, never caller input.
    fn query_fresh(
        &self,
        column: &'static str,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredSignal>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (0..ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS}
             FROM buying_signals
             WHERE {column} IN ({placeholders})
               AND (expires_at IS NULL OR expires_at > ?1)
             ORDER BY updated_at DESC, id DESC"
        );

        let bind = std::iter::once(to_db_timestamp(now)).chain(ids.iter().cloned());
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind), Self::map_signal_row)?;

        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    /// Map a row to StoredSignal. Expects columns in `SIGNAL_COLUMNS` order.
    fn map_signal_row(row: &rusqlite::Row) -> rusqlite::Result<StoredSignal> {
        let source_raw: String = row.get(3)?;
        let source = source_raw.parse::<SignalSource>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        let payload_raw: String = row.get(4)?;
        let payload = serde_json::from_str(&payload_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(StoredSignal {
            id: row.get(0)?,
            account_id: row.get(1)?,
            opportunity_id: row.get(2)?,
            source,
            payload,
            created_at: timestamp_column(row, 5)?,
            updated_at: timestamp_column(row, 6)?,
            expires_at: optional_timestamp_column(row, 7)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;
    use serde_json::json;

    fn call_signal(account: &str, opp: &str, score: f64) -> NewSignal {
        NewSignal {
            account_id: account.to_string(),
            opportunity_id: Some(opp.to_string()),
            source: SignalSource::CallDerived,
            payload: json!({ "weightedScore": score }),
            expires_at: None,
        }
    }

    fn news_signal(account: &str, headline: &str) -> NewSignal {
        NewSignal {
            account_id: account.to_string(),
            opportunity_id: None,
            source: SignalSource::NewsDerived,
            payload: json!({ "headline": headline }),
            expires_at: None,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_upsert_same_call_signal_twice_leaves_one_row() {
        let db = test_db();
        let signal = call_signal("acc-1", "opp-1", 0.4);

        db.upsert_signals(&[signal.clone()]).expect("first upsert");
        db.upsert_signals(&[signal.clone()]).expect("second upsert");

        assert_eq!(
            db.count_rows_for_key(&signal.entity_key(), SignalSource::CallDerived)
                .unwrap(),
            1
        );
        let fresh = db.get_signals_by_opportunity_ids(&ids(&["opp-1"])).unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_payload_and_keeps_created_at() {
        let db = test_db();
        let t0 = Utc::now() - Duration::hours(2);
        let t1 = Utc::now() - Duration::hours(1);

        db.upsert_signals_at(&[call_signal("acc-1", "opp-1", 0.2)], t0)
            .unwrap();
        db.upsert_signals_at(&[call_signal("acc-1", "opp-1", 0.9)], t1)
            .unwrap();

        let fresh = db.get_signals_by_opportunity_ids(&ids(&["opp-1"])).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].payload["weightedScore"], json!(0.9));
        assert_eq!(to_db_timestamp(fresh[0].created_at), to_db_timestamp(t0));
        assert_eq!(to_db_timestamp(fresh[0].updated_at), to_db_timestamp(t1));
    }

    #[test]
    fn test_replacing_stale_row_resets_created_at() {
        let db = test_db();
        let t0 = Utc::now() - Duration::hours(48);
        let t1 = Utc::now();

        db.upsert_signals_at(&[call_signal("acc-1", "opp-1", 0.2)], t0)
            .unwrap();
        db.upsert_signals_at(&[call_signal("acc-1", "opp-1", 0.3)], t1)
            .unwrap();

        let fresh = db.get_signals_by_opportunity_ids(&ids(&["opp-1"])).unwrap();
        assert_eq!(to_db_timestamp(fresh[0].created_at), to_db_timestamp(t1));
    }

    #[test]
    fn test_news_signal_replaces_per_account() {
        let db = test_db();
        db.upsert_signals(&[news_signal("acc-1", "Acme raises Series C")])
            .unwrap();
        db.upsert_signals(&[news_signal("acc-1", "Acme hires new CFO")])
            .unwrap();
        db.upsert_signals(&[news_signal("acc-2", "Globex expands to EU")])
            .unwrap();

        let acc1 = db.get_signals_by_account_ids(&ids(&["acc-1"])).unwrap();
        assert_eq!(acc1.len(), 1);
        assert_eq!(acc1[0].payload["headline"], json!("Acme hires new CFO"));
        assert_eq!(acc1[0].source, SignalSource::NewsDerived);
    }

    #[test]
    fn test_call_and_news_signals_coexist_for_account() {
        let db = test_db();
        db.upsert_signals(&[
            call_signal("acc-1", "opp-1", 0.5),
            call_signal("acc-1", "opp-2", 0.6),
            news_signal("acc-1", "Acme raises Series C"),
        ])
        .unwrap();

        let by_account = db.get_signals_by_account_ids(&ids(&["acc-1"])).unwrap();
        assert_eq!(by_account.len(), 3);

        let by_opp = db
            .get_signals_by_opportunity_ids(&ids(&["opp-2", "opp-missing"]))
            .unwrap();
        assert_eq!(by_opp.len(), 1);
        assert_eq!(by_opp[0].opportunity_id.as_deref(), Some("opp-2"));
    }

    #[test]
    fn test_account_level_call_signal_does_not_collide_with_news() {
        let db = test_db();
        let account_level = NewSignal {
            opportunity_id: None,
            ..call_signal("acc-1", "unused", 0.1)
        };
        db.upsert_signals(&[account_level, news_signal("acc-1", "headline")])
            .unwrap();
        assert_eq!(db.get_signals_by_account_ids(&ids(&["acc-1"])).unwrap().len(), 2);
    }

    #[test]
    fn test_expired_signal_hidden_before_sweep_and_gone_after() {
        let db = test_db();
        let mut expired = call_signal("acc-1", "opp-1", 0.5);
        expired.expires_at = Some(Utc::now() - Duration::minutes(1));
        db.upsert_signals(&[expired.clone(), call_signal("acc-1", "opp-2", 0.7)])
            .unwrap();

        let fresh = db.get_signals_by_opportunity_ids(&ids(&["opp-1"])).unwrap();
        assert!(fresh.is_empty(), "stale row must not be readable");
        let by_account = db.get_signals_by_account_ids(&ids(&["acc-1"])).unwrap();
        assert_eq!(by_account.len(), 1);

        // Still physically present
        assert_eq!(
            db.count_rows_for_key(&expired.entity_key(), SignalSource::CallDerived)
                .unwrap(),
            1
        );

        let removed = db.sweep_expired().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            db.count_rows_for_key(&expired.entity_key(), SignalSource::CallDerived)
                .unwrap(),
            0
        );

        // Idempotent
        assert_eq!(db.sweep_expired().unwrap(), 0);
    }

    #[test]
    fn test_default_expiry_is_24_hours() {
        let db = test_db();
        let now = Utc::now();
        db.upsert_signals_at(&[call_signal("acc-1", "opp-1", 0.5)], now)
            .unwrap();

        let stored = db.get_signals_by_opportunity_ids_at(&ids(&["opp-1"]), now).unwrap();
        let expires_at = stored[0].expires_at.expect("default expiry set");
        assert_eq!(
            to_db_timestamp(expires_at),
            to_db_timestamp(now + Duration::hours(DEFAULT_SIGNAL_TTL_HOURS))
        );

        let later = now + Duration::hours(25);
        assert!(stored[0].is_fresh_at(now));
        assert!(!stored[0].is_fresh_at(later));
        assert!(db
            .get_signals_by_opportunity_ids_at(&ids(&["opp-1"]), later)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_null_expiry_is_always_fresh() {
        let db = test_db();
        db.conn_ref()
            .execute(
                "INSERT INTO buying_signals
                 (entity_key, account_id, opportunity_id, source, payload,
                  created_at, updated_at, expires_at)
                 VALUES ('opp:opp-9', 'acc-9', 'opp-9', 'call-derived', '{}',
                         '2020-01-01T00:00:00.000Z', '2020-01-01T00:00:00.000Z', NULL)",
                [],
            )
            .unwrap();

        let fresh = db.get_signals_by_opportunity_ids(&ids(&["opp-9"])).unwrap();
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].expires_at.is_none());
        assert_eq!(db.sweep_expired().unwrap(), 0);
    }

    #[test]
    fn test_empty_inputs() {
        let db = test_db();
        assert_eq!(db.upsert_signals(&[]).unwrap(), 0);
        assert!(db.get_signals_by_account_ids(&[]).unwrap().is_empty());
        assert!(db.get_signals_by_opportunity_ids(&[]).unwrap().is_empty());
    }
}
