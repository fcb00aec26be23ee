//! Data Fetcher (C4): executes a `QueryPlan` against the row store with
//! offset/limit pagination and a separate, cached total-count query.

use async_trait::async_trait;
use report_core::planner::QueryPlan;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;

pub type Row = HashMap<String, Value>;

/// The relational row store this system reads timesheet-like records from.
/// `PgDataStore` (grounded the same way `report_core::store::postgres`
/// grounds the job store) is the production implementation; tests use
/// `StubDataStore`, a hand-rolled in-memory double.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn fetch(&self, plan: &QueryPlan, offset: i64, limit: i64) -> Result<Vec<Row>>;
    async fn count(&self, plan: &QueryPlan) -> Result<i64>;
}

pub struct PgDataStore {
    pool: sqlx::PgPool,
}

impl PgDataStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataStore for PgDataStore {
    async fn fetch(&self, plan: &QueryPlan, offset: i64, limit: i64) -> Result<Vec<Row>> {
        let (where_clause, binds) = build_predicate(plan);
        let sql = format!(
            "SELECT row_to_json(t) AS row FROM timesheets t {where_clause} ORDER BY t.id ASC OFFSET $OFFSET LIMIT $LIMIT"
        );
        let sql = bind_placeholders(&sql, binds.len());

        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        for b in &binds {
            query = query.bind(b.clone());
        }
        query = query.bind(offset).bind(limit);

        let rows: Vec<Value> = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| crate::error::EngineError::DataAccess(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|v| v.as_object().map(|o| o.clone().into_iter().collect()))
            .collect())
    }

    async fn count(&self, plan: &QueryPlan) -> Result<i64> {
        let (where_clause, binds) = build_predicate(plan);
        let sql = format!("SELECT COUNT(*) FROM timesheets t {where_clause}");
        let sql = bind_placeholders(&sql, binds.len());

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for b in &binds {
            query = query.bind(b.clone());
        }

        query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| crate::error::EngineError::DataAccess(e.to_string()).into())
    }
}

/// Builds the `WHERE` clause mandated by role policy: tenant-restricted
/// roles always get a tenant predicate, owner-scoped roles always get a
/// user-id predicate, and a date range is applied when present.
fn build_predicate(plan: &QueryPlan) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    if let Some(tenant_id) = &plan.tenant_id {
        clauses.push("t.county_id = $BIND".to_string());
        binds.push(Value::String(tenant_id.clone()));
    }
    if let Some(user_id) = &plan.user_id {
        clauses.push("t.user_id = $BIND".to_string());
        binds.push(Value::String(user_id.clone()));
    }
    if let Some(range) = &plan.date_range {
        clauses.push("t.record_date >= $BIND".to_string());
        binds.push(Value::String(range.start.to_rfc3339()));
        clauses.push("t.record_date <= $BIND".to_string());
        binds.push(Value::String(range.end.to_rfc3339()));
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), binds)
    }
}

/// Replaces the `$BIND`/`$OFFSET`/`$LIMIT` placeholders left by
/// `build_predicate` with sequential Postgres `$n` positional parameters.
fn bind_placeholders(sql: &str, bind_count: usize) -> String {
    let mut out = sql.to_string();
    for i in 1..=bind_count {
        out = out.replacen("$BIND", &format!("${i}"), 1);
    }
    out = out.replacen("$OFFSET", &format!("${}", bind_count + 1), 1);
    out = out.replacen("$LIMIT", &format!("${}", bind_count + 2), 1);
    out
}

/// Hand-rolled in-memory double used by the chunk streamer's tests, in the
/// same spirit as this codebase's hand-written `MockStore` job-store double.
pub struct StubDataStore {
    pub rows: Vec<Row>,
}

#[async_trait]
impl DataStore for StubDataStore {
    async fn fetch(&self, _plan: &QueryPlan, offset: i64, limit: i64) -> Result<Vec<Row>> {
        let offset = offset as usize;
        let limit = limit as usize;
        if offset >= self.rows.len() {
            return Ok(Vec::new());
        }
        let end = (offset + limit).min(self.rows.len());
        Ok(self.rows[offset..end].to_vec())
    }

    async fn count(&self, _plan: &QueryPlan) -> Result<i64> {
        Ok(self.rows.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> Row {
        let mut r = HashMap::new();
        r.insert("timesheetId".to_string(), Value::String(id.to_string()));
        r
    }

    fn plan() -> QueryPlan {
        QueryPlan {
            role: "ADMIN".into(),
            report_type: "TIMESHEET_SUMMARY".into(),
            tenant_id: None,
            user_id: None,
            date_range: None,
            extra_filters: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn stub_store_paginates() {
        let store = StubDataStore {
            rows: vec![row("1"), row("2"), row("3")],
        };
        let chunk = store.fetch(&plan(), 0, 2).await.unwrap();
        assert_eq!(chunk.len(), 2);
        let chunk = store.fetch(&plan(), 2, 2).await.unwrap();
        assert_eq!(chunk.len(), 1);
        let chunk = store.fetch(&plan(), 3, 2).await.unwrap();
        assert!(chunk.is_empty());
    }

    #[test]
    fn predicate_builder_includes_tenant_and_date_range() {
        let mut p = plan();
        p.tenant_id = Some("MARICOPA".into());
        p.date_range = Some(report_core::planner::DateRange {
            start: chrono::Utc::now(),
            end: chrono::Utc::now(),
        });
        let (clause, binds) = build_predicate(&p);
        assert!(clause.contains("county_id"));
        assert!(clause.contains("record_date"));
        assert_eq!(binds.len(), 3);
    }
}
