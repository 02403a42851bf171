use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

use concilio_core::{
    ChildDraft, EntityKind, EntityLink, LinkOrigin, Money, ReconciliationStatus, TransactionId,
    TransactionRecord,
};
use concilio_reconcile::{EnrichmentPatch, IncomingRecord};

pub type DbPool = Pool<Sqlite>;

pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{}?mode=rwc", path.display()))
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sequence_number TEXT NOT NULL DEFAULT '',
            dedup_hash TEXT NOT NULL DEFAULT '',
            execution_date TEXT NOT NULL,
            value_date TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            counterparty_name TEXT NOT NULL DEFAULT '',
            counterparty_iban TEXT NOT NULL DEFAULT '',
            communication TEXT NOT NULL DEFAULT '',
            account_number TEXT NOT NULL DEFAULT '',
            category_id TEXT,
            account_code TEXT,
            status TEXT NOT NULL DEFAULT 'unverified',
            parent_id INTEGER REFERENCES transactions(id) ON DELETE CASCADE,
            child_index INTEGER,
            is_parent INTEGER NOT NULL DEFAULT 0,
            child_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_transactions_dedup_hash ON transactions(dedup_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_parent ON transactions(parent_id)")
        .execute(pool)
        .await?;

    // No unique constraint on (transaction_id, entity_kind, entity_id):
    // link uniqueness is enforced at insertion by the registry.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transaction_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            entity_name TEXT NOT NULL DEFAULT '',
            confidence INTEGER NOT NULL,
            matched_at TEXT NOT NULL,
            matched_by TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn status_from_str(s: &str) -> ReconciliationStatus {
    match s {
        "notFound" => ReconciliationStatus::NotFound,
        "reconciled" => ReconciliationStatus::Reconciled,
        _ => ReconciliationStatus::Unverified,
    }
}

fn origin_from_str(s: &str) -> LinkOrigin {
    match s {
        "automatic" => LinkOrigin::Automatic,
        _ => LinkOrigin::Manual,
    }
}

fn row_to_record(row: &SqliteRow) -> Result<TransactionRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let execution_date: NaiveDate = row.try_get("execution_date")?;
    let value_date: NaiveDate = row.try_get("value_date")?;

    let record = TransactionRecord {
        id: TransactionId(row.try_get("id")?),
        sequence_number: row.try_get("sequence_number")?,
        dedup_hash: row.try_get("dedup_hash")?,
        execution_date,
        value_date,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        counterparty_name: row.try_get("counterparty_name")?,
        counterparty_iban: row.try_get("counterparty_iban")?,
        communication: row.try_get("communication")?,
        account_number: row.try_get("account_number")?,
        category_id: row.try_get("category_id")?,
        account_code: row.try_get("account_code")?,
        status: status_from_str(&status),
        is_reconciled: false,
        links: Vec::new(),
        parent_id: row.try_get::<Option<i64>, _>("parent_id")?.map(TransactionId),
        child_index: row
            .try_get::<Option<i64>, _>("child_index")?
            .map(|i| i as u32),
        is_parent: row.try_get::<i64, _>("is_parent")? != 0,
        child_count: row.try_get::<i64, _>("child_count")? as u32,
    };
    Ok(record)
}

fn row_to_link(row: &SqliteRow) -> Result<EntityLink, sqlx::Error> {
    let kind: String = row.try_get("entity_kind")?;
    let matched_by: String = row.try_get("matched_by")?;
    let matched_at: DateTime<Utc> = row.try_get("matched_at")?;
    Ok(EntityLink {
        entity_kind: kind
            .parse::<EntityKind>()
            .unwrap_or(EntityKind::Event),
        entity_id: row.try_get("entity_id")?,
        entity_name: row.try_get("entity_name")?,
        confidence: row.try_get::<i64, _>("confidence")? as u8,
        matched_at,
        matched_by: origin_from_str(&matched_by),
    })
}

async fn attach_links(pool: &DbPool, records: &mut [TransactionRecord]) -> Result<(), sqlx::Error> {
    let rows = sqlx::query(
        "SELECT transaction_id, entity_kind, entity_id, entity_name, confidence, matched_at, matched_by
         FROM transaction_links ORDER BY transaction_id, id",
    )
    .fetch_all(pool)
    .await?;

    for row in rows {
        let tx_id = TransactionId(row.try_get("transaction_id")?);
        if let Some(record) = records.iter_mut().find(|r| r.id == tx_id) {
            record.links.push(row_to_link(&row)?);
        }
    }
    for record in records.iter_mut() {
        record.is_reconciled = record.derive_reconciled();
    }
    Ok(())
}

/// Full ledger snapshot in insertion order, links attached.
pub async fn fetch_all_transactions(pool: &DbPool) -> Result<Vec<TransactionRecord>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM transactions ORDER BY id")
        .fetch_all(pool)
        .await?;
    let mut records = rows
        .iter()
        .map(row_to_record)
        .collect::<Result<Vec<_>, _>>()?;
    attach_links(pool, &mut records).await?;
    Ok(records)
}

pub async fn get_transaction(
    pool: &DbPool,
    id: TransactionId,
) -> Result<Option<TransactionRecord>, sqlx::Error> {
    let row = sqlx::query("SELECT * FROM transactions WHERE id = ?")
        .bind(id.0)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else { return Ok(None) };

    let mut record = row_to_record(&row)?;
    let link_rows = sqlx::query(
        "SELECT transaction_id, entity_kind, entity_id, entity_name, confidence, matched_at, matched_by
         FROM transaction_links WHERE transaction_id = ? ORDER BY id",
    )
    .bind(id.0)
    .fetch_all(pool)
    .await?;
    for link_row in &link_rows {
        record.links.push(row_to_link(link_row)?);
    }
    record.is_reconciled = record.derive_reconciled();
    Ok(Some(record))
}

pub async fn get_children(
    pool: &DbPool,
    parent: TransactionId,
) -> Result<Vec<TransactionRecord>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM transactions WHERE parent_id = ? ORDER BY child_index")
        .bind(parent.0)
        .fetch_all(pool)
        .await?;
    let mut records = rows
        .iter()
        .map(row_to_record)
        .collect::<Result<Vec<_>, _>>()?;
    attach_links(pool, &mut records).await?;
    Ok(records)
}

/// Insert a freshly imported record; the dedup hash is computed here so the
/// stored value always matches the resolver's fingerprint.
pub async fn insert_imported(
    pool: &DbPool,
    record: &IncomingRecord,
) -> Result<TransactionId, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO transactions
            (sequence_number, dedup_hash, execution_date, value_date, amount_cents,
             counterparty_name, counterparty_iban, communication, account_number)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(record.sequence_number.trim())
    .bind(record.fingerprint())
    .bind(record.execution_date)
    .bind(record.value_date)
    .bind(record.amount.to_cents())
    .bind(record.counterparty_name.trim())
    .bind(record.counterparty_iban.trim())
    .bind(record.communication.trim())
    .bind(record.account_number.trim())
    .fetch_one(pool)
    .await?;

    Ok(TransactionId(row.try_get("id")?))
}

pub async fn insert_child(pool: &DbPool, draft: &ChildDraft) -> Result<TransactionId, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO transactions
            (sequence_number, dedup_hash, execution_date, value_date, amount_cents,
             counterparty_name, counterparty_iban, communication, account_number,
             category_id, account_code, parent_id, child_index)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&draft.sequence_number)
    .bind(&draft.dedup_hash)
    .bind(draft.execution_date)
    .bind(draft.value_date)
    .bind(draft.amount.to_cents())
    .bind(&draft.counterparty_name)
    .bind(&draft.counterparty_iban)
    .bind(&draft.communication)
    .bind(&draft.account_number)
    .bind(&draft.category_id)
    .bind(&draft.account_code)
    .bind(draft.parent_id.0)
    .bind(i64::from(draft.child_index))
    .fetch_one(pool)
    .await?;

    Ok(TransactionId(row.try_get("id")?))
}

/// Adopt the complete sequence number and hash of an incoming record on an
/// entry that was stored with an unfinished number.
pub async fn complete_sequence(
    pool: &DbPool,
    id: TransactionId,
    sequence_number: &str,
    dedup_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE transactions SET sequence_number = ?, dedup_hash = ? WHERE id = ?")
        .bind(sequence_number.trim())
        .bind(dedup_hash)
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fill blank fields from an enrichment patch. Guarded per column so a
/// concurrent writer can never be overwritten with import data.
pub async fn apply_enrichment(
    pool: &DbPool,
    id: TransactionId,
    patch: &EnrichmentPatch,
) -> Result<(), sqlx::Error> {
    if let Some(name) = &patch.counterparty_name {
        sqlx::query(
            "UPDATE transactions SET counterparty_name = ? WHERE id = ? AND counterparty_name = ''",
        )
        .bind(name)
        .bind(id.0)
        .execute(pool)
        .await?;
    }
    if let Some(iban) = &patch.counterparty_iban {
        sqlx::query(
            "UPDATE transactions SET counterparty_iban = ? WHERE id = ? AND counterparty_iban = ''",
        )
        .bind(iban)
        .bind(id.0)
        .execute(pool)
        .await?;
    }
    if let Some(communication) = &patch.communication {
        sqlx::query(
            "UPDATE transactions SET communication = ? WHERE id = ? AND communication = ''",
        )
        .bind(communication)
        .bind(id.0)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn set_classification(
    pool: &DbPool,
    id: TransactionId,
    category_id: Option<&str>,
    account_code: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE transactions SET category_id = ?, account_code = ? WHERE id = ?")
        .bind(category_id)
        .bind(account_code)
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_status(
    pool: &DbPool,
    id: TransactionId,
    status: ReconciliationStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE transactions SET status = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_link(
    pool: &DbPool,
    transaction_id: TransactionId,
    link: &EntityLink,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transaction_links
            (transaction_id, entity_kind, entity_id, entity_name, confidence, matched_at, matched_by)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(transaction_id.0)
    .bind(link.entity_kind.to_string())
    .bind(&link.entity_id)
    .bind(&link.entity_name)
    .bind(i64::from(link.confidence))
    .bind(link.matched_at)
    .bind(match link.matched_by {
        LinkOrigin::Manual => "manual",
        LinkOrigin::Automatic => "automatic",
    })
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_link(
    pool: &DbPool,
    transaction_id: TransactionId,
    kind: EntityKind,
    entity_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM transaction_links WHERE transaction_id = ? AND entity_kind = ? AND entity_id = ?",
    )
    .bind(transaction_id.0)
    .bind(kind.to_string())
    .bind(entity_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn set_split_flags(
    pool: &DbPool,
    id: TransactionId,
    is_parent: bool,
    child_count: u32,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE transactions SET is_parent = ?, child_count = ? WHERE id = ?")
        .bind(i64::from(is_parent))
        .bind(i64::from(child_count))
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_transaction(pool: &DbPool, id: TransactionId) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn incoming(seq: &str, cents: i64, name: &str) -> IncomingRecord {
        IncomingRecord {
            sequence_number: seq.to_string(),
            execution_date: d(2025, 3, 1),
            value_date: d(2025, 3, 2),
            amount: Money::from_cents(cents),
            counterparty_name: name.to_string(),
            counterparty_iban: "BE71096123456769".to_string(),
            communication: "brood lustrumweekend".to_string(),
            account_number: "BE02735001234567".to_string(),
        }
    }

    async fn test_db() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("test.db")).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let (_dir, pool) = test_db().await;

        let rec = incoming("2025-00001", -1500, "Bakkerij Janssens");
        let id = insert_imported(&pool, &rec).await.unwrap();

        let stored = get_transaction(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.sequence_number, "2025-00001");
        assert_eq!(stored.amount.to_cents(), -1500);
        assert_eq!(stored.counterparty_name, "Bakkerij Janssens");
        assert_eq!(stored.dedup_hash, rec.fingerprint());
        assert_eq!(stored.status, ReconciliationStatus::Unverified);
        assert!(!stored.is_reconciled);
        assert!(stored.links.is_empty());
    }

    #[tokio::test]
    async fn links_round_trip_and_derive_reconciled() {
        let (_dir, pool) = test_db().await;
        let id = insert_imported(&pool, &incoming("2025-00001", -1500, "Bakkerij"))
            .await
            .unwrap();

        let link = EntityLink {
            entity_kind: EntityKind::Expense,
            entity_id: "claim-1".to_string(),
            entity_name: "drank kickoff".to_string(),
            confidence: 92,
            matched_at: Utc::now(),
            matched_by: LinkOrigin::Automatic,
        };
        insert_link(&pool, id, &link).await.unwrap();
        set_status(&pool, id, ReconciliationStatus::Reconciled)
            .await
            .unwrap();

        let stored = get_transaction(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.links.len(), 1);
        assert_eq!(stored.links[0].entity_id, "claim-1");
        assert_eq!(stored.links[0].matched_by, LinkOrigin::Automatic);
        assert!(stored.is_reconciled);

        let removed = delete_link(&pool, id, EntityKind::Expense, "claim-1")
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn enrichment_only_fills_blank_columns() {
        let (_dir, pool) = test_db().await;
        let id = insert_imported(&pool, &incoming("2025-00001", -1500, ""))
            .await
            .unwrap();

        let patch = EnrichmentPatch {
            counterparty_name: Some("Bakkerij Janssens".to_string()),
            counterparty_iban: None,
            communication: Some("should not overwrite".to_string()),
        };
        apply_enrichment(&pool, id, &patch).await.unwrap();

        let stored = get_transaction(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.counterparty_name, "Bakkerij Janssens");
        // communication was non-empty at insert; the guard keeps it
        assert_eq!(stored.communication, "brood lustrumweekend");
    }

    #[tokio::test]
    async fn children_fetch_in_index_order() {
        let (_dir, pool) = test_db().await;
        let parent = insert_imported(&pool, &incoming("2025-00001", -8000, "Drukkerij"))
            .await
            .unwrap();

        for (index, cents) in [(2u32, -3000i64), (1, -5000)] {
            let draft = ChildDraft {
                parent_id: parent,
                child_index: index,
                sequence_number: format!("2025-00001.{index}"),
                dedup_hash: format!("child-{index}"),
                execution_date: d(2025, 3, 1),
                value_date: d(2025, 3, 2),
                amount: Money::from_cents(cents),
                counterparty_name: "Drukkerij".to_string(),
                counterparty_iban: String::new(),
                communication: format!("deel {index}"),
                account_number: "BE02735001234567".to_string(),
                category_id: None,
                account_code: None,
            };
            insert_child(&pool, &draft).await.unwrap();
        }
        set_split_flags(&pool, parent, true, 2).await.unwrap();

        let children = get_children(&pool, parent).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].child_index, Some(1));
        assert_eq!(children[1].child_index, Some(2));

        let stored_parent = get_transaction(&pool, parent).await.unwrap().unwrap();
        assert!(stored_parent.is_parent);
        assert_eq!(stored_parent.child_count, 2);
    }

    #[tokio::test]
    async fn complete_sequence_updates_number_and_hash() {
        let (_dir, pool) = test_db().await;
        let id = insert_imported(&pool, &incoming("2025-", -1500, "Bakkerij"))
            .await
            .unwrap();

        complete_sequence(&pool, id, "2025-00042", "newhash")
            .await
            .unwrap();
        let stored = get_transaction(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.sequence_number, "2025-00042");
        assert_eq!(stored.dedup_hash, "newhash");
    }
}
