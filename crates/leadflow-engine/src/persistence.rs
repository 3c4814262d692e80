//! SQLite-backed store for campaigns, segments, and the CRM collections the
//! engine touches.
//!
//! Each aggregate is one row: indexed columns for the fields the tick
//! queries, the full entity as a JSON payload column. A campaign write is a
//! single `INSERT OR REPLACE`, so sub-entities (A/B block, funnel, criteria)
//! can never be half-updated.

use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use leadflow_core::{Company, EngineError, EmailTemplate, Lead, Result, Student};

use crate::campaign::{Campaign, CampaignStatus};
use crate::segment::Segment;

/// Engine persistence store.
pub struct CampaignStore {
    conn: Mutex<Connection>,
}

impl CampaignStore {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| EngineError::Store(format!("DB open: {e}")))?;
        // WAL for better concurrent read performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Store(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            -- Campaign aggregates. Sub-entities live inside the JSON payload.
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS segments (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                data TEXT NOT NULL
            );

            -- CRM collections. The engine reads leads and writes the
            -- conversion side effects.
            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS companies (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT ''
            );
            ",
        )
        .map_err(|e| EngineError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EngineError::Store(format!("Lock: {e}")))
    }

    // ─── Campaigns ──────────────────────────────────────

    /// Persist a whole campaign aggregate atomically. Invariants are checked
    /// before the write.
    pub fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        campaign.validate()?;
        let data = serde_json::to_string(campaign)
            .map_err(|e| EngineError::Store(format!("Serialize campaign: {e}")))?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO campaigns (id, name, status, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    campaign.id.to_string(),
                    campaign.name,
                    status_str(campaign.status),
                    data,
                    campaign.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| EngineError::Store(format!("Save campaign: {e}")))?;
        Ok(())
    }

    pub fn load_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM campaigns WHERE id = ?1")
            .map_err(|e| EngineError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| EngineError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(data)) => Ok(serde_json::from_str(&data).ok()),
            _ => Ok(None),
        }
    }

    pub fn load_campaigns(&self) -> Vec<Campaign> {
        self.campaigns_where("SELECT data FROM campaigns ORDER BY created_at")
    }

    /// Campaigns the tick evaluates.
    pub fn scheduled_campaigns(&self) -> Vec<Campaign> {
        self.campaigns_where(
            "SELECT data FROM campaigns WHERE status = 'scheduled' ORDER BY created_at",
        )
    }

    fn campaigns_where(&self, sql: &str) -> Vec<Campaign> {
        let Ok(conn) = self.lock() else {
            return Vec::new();
        };
        let Ok(mut stmt) = conn.prepare(sql) else {
            return Vec::new();
        };
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).ok();
        rows.map(|r| {
            r.filter_map(|data| data.ok().and_then(|d| serde_json::from_str(&d).ok()))
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn delete_campaign(&self, id: Uuid) -> Result<bool> {
        let n = self
            .lock()?
            .execute("DELETE FROM campaigns WHERE id = ?1", params![id.to_string()])
            .map_err(|e| EngineError::Store(format!("Delete campaign: {e}")))?;
        Ok(n > 0)
    }

    /// Compare-and-set claim: Scheduled → Active. Returns false if another
    /// invocation already claimed the campaign, guarding against double-send
    /// when ticks overlap. The column and the JSON payload move together so
    /// a crash right after the claim cannot leave them disagreeing.
    pub fn claim_scheduled(&self, id: Uuid) -> Result<bool> {
        let n = self
            .lock()?
            .execute(
                "UPDATE campaigns
                 SET status = 'active', data = json_set(data, '$.status', 'active')
                 WHERE id = ?1 AND status = 'scheduled'",
                params![id.to_string()],
            )
            .map_err(|e| EngineError::Store(format!("Claim campaign: {e}")))?;
        Ok(n == 1)
    }

    // ─── Segments ──────────────────────────────────────

    pub fn save_segment(&self, segment: &Segment) -> Result<()> {
        crate::segment::validate(segment)?;
        let data = serde_json::to_string(segment)
            .map_err(|e| EngineError::Store(format!("Serialize segment: {e}")))?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO segments (id, name, data) VALUES (?1, ?2, ?3)",
                params![segment.id.to_string(), segment.name, data],
            )
            .map_err(|e| EngineError::Store(format!("Save segment: {e}")))?;
        Ok(())
    }

    pub fn load_segment(&self, id: Uuid) -> Result<Option<Segment>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM segments WHERE id = ?1")
            .map_err(|e| EngineError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| EngineError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(data)) => Ok(serde_json::from_str(&data).ok()),
            _ => Ok(None),
        }
    }

    // ─── Leads ──────────────────────────────────────

    pub fn save_lead(&self, lead: &Lead) -> Result<()> {
        let data = serde_json::to_string(lead)
            .map_err(|e| EngineError::Store(format!("Serialize lead: {e}")))?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO leads (id, email, data) VALUES (?1, ?2, ?3)",
                params![lead.id.to_string(), lead.email, data],
            )
            .map_err(|e| EngineError::Store(format!("Save lead: {e}")))?;
        Ok(())
    }

    pub fn load_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM leads WHERE id = ?1")
            .map_err(|e| EngineError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| EngineError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(data)) => Ok(serde_json::from_str(&data).ok()),
            _ => Ok(None),
        }
    }

    /// Single bulk fetch; segment criteria are evaluated in-process against
    /// this list rather than pushed into store queries.
    pub fn load_leads(&self) -> Vec<Lead> {
        let Ok(conn) = self.lock() else {
            return Vec::new();
        };
        let Ok(mut stmt) = conn.prepare("SELECT data FROM leads") else {
            return Vec::new();
        };
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).ok();
        rows.map(|r| {
            r.filter_map(|data| data.ok().and_then(|d| serde_json::from_str(&d).ok()))
                .collect()
        })
        .unwrap_or_default()
    }

    // ─── Conversion targets ──────────────────────────────────────

    pub fn save_student(&self, student: &Student) -> Result<()> {
        let data = serde_json::to_string(student)
            .map_err(|e| EngineError::Store(format!("Serialize student: {e}")))?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO students (id, data) VALUES (?1, ?2)",
                params![student.id.to_string(), data],
            )
            .map_err(|e| EngineError::Store(format!("Save student: {e}")))?;
        Ok(())
    }

    pub fn load_students(&self) -> Vec<Student> {
        let Ok(conn) = self.lock() else {
            return Vec::new();
        };
        let Ok(mut stmt) = conn.prepare("SELECT data FROM students") else {
            return Vec::new();
        };
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).ok();
        rows.map(|r| {
            r.filter_map(|data| data.ok().and_then(|d| serde_json::from_str(&d).ok()))
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn save_company(&self, company: &Company) -> Result<()> {
        let data = serde_json::to_string(company)
            .map_err(|e| EngineError::Store(format!("Serialize company: {e}")))?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO companies (id, data) VALUES (?1, ?2)",
                params![company.id.to_string(), data],
            )
            .map_err(|e| EngineError::Store(format!("Save company: {e}")))?;
        Ok(())
    }

    pub fn load_company(&self, id: Uuid) -> Result<Option<Company>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT data FROM companies WHERE id = ?1")
            .map_err(|e| EngineError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| EngineError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(data)) => Ok(serde_json::from_str(&data).ok()),
            _ => Ok(None),
        }
    }

    // ─── Templates ──────────────────────────────────────

    pub fn save_template(&self, template: &EmailTemplate) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO templates (id, name, subject, body) VALUES (?1, ?2, ?3, ?4)",
                params![template.id, template.name, template.subject, template.body],
            )
            .map_err(|e| EngineError::Store(format!("Save template: {e}")))?;
        Ok(())
    }

    pub fn load_template(&self, id: &str) -> Result<Option<EmailTemplate>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, name, subject, body FROM templates WHERE id = ?1")
            .map_err(|e| EngineError::Store(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map(params![id], |row| {
                Ok(EmailTemplate {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    subject: row.get(2)?,
                    body: row.get(3)?,
                })
            })
            .map_err(|e| EngineError::Store(format!("Query: {e}")))?;
        match rows.next() {
            Some(Ok(t)) => Ok(Some(t)),
            _ => Ok(None),
        }
    }
}

/// The serde snake_case rendering of a campaign status, used for the indexed
/// column so SQL filters agree with the JSON payload.
fn status_str(status: CampaignStatus) -> &'static str {
    match status {
        CampaignStatus::Draft => "draft",
        CampaignStatus::Scheduled => "scheduled",
        CampaignStatus::Active => "active",
        CampaignStatus::Paused => "paused",
        CampaignStatus::Completed => "completed",
        CampaignStatus::Cancelled => "cancelled",
    }
}
