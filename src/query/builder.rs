use std::collections::{BTreeSet, HashMap};

use crate::error::Result;
use crate::report::WeeklyReport;
use crate::storage::repository::{self, METRIC_COLUMNS, NARRATIVE_COLUMNS};
use crate::storage::Database;

/// Sort keys accepted by `ReportQuery::order_by`.
const ORDER_FIELDS: &[(&str, &str)] = &[
    ("week", "m.week_start"),
    ("user", "m.user_id"),
    ("messages", "m.message_count"),
    ("active_days", "m.active_days"),
    ("coverage", "m.channel_coverage_ratio"),
];

/// Builder for listing stored weekly reports with optional filters.
#[derive(Debug, Clone, Default)]
pub struct ReportQuery {
    user_id: Option<String>,
    week_from: Option<String>,
    week_to: Option<String>,
    min_messages: Option<u32>,
    has_narrative: Option<bool>,
    limit: Option<u32>,
    order_by: Option<String>,
    order_desc: bool,
}

fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ReportQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// Weeks starting on or after this key.
    pub fn week_from(mut self, key: &str) -> Self {
        self.week_from = Some(key.to_string());
        self
    }

    /// Weeks starting on or before this key.
    pub fn week_to(mut self, key: &str) -> Self {
        self.week_to = Some(key.to_string());
        self
    }

    pub fn min_messages(mut self, n: u32) -> Self {
        self.min_messages = Some(n);
        self
    }

    pub fn has_narrative(mut self, val: bool) -> Self {
        self.has_narrative = Some(val);
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// One of `week`, `user`, `messages`, `active_days`, `coverage`.
    /// Anything else falls back to `week`.
    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by = Some(field.to_string());
        self
    }

    pub fn descending(mut self) -> Self {
        self.order_desc = true;
        self
    }

    /// Build and execute the query.
    pub async fn reports(self, db: &Database) -> Result<Vec<WeeklyReport>> {
        let builder = self;
        let reports = db
            .reader()
            .call(move |conn| {
                let (sql, params) = builder.build_sql();
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(param_refs.as_slice(), |row| {
                    let metric = repository::metric_from_row(row, 0)?;
                    let has_narrative = row.get::<_, Option<String>>(17)?.is_some();
                    let narrative = if has_narrative {
                        Some(repository::narrative_from_row(row, 17)?)
                    } else {
                        None
                    };
                    let user_name: Option<String> = row.get(24)?;
                    Ok(WeeklyReport::new(metric, narrative, user_name))
                })?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
            })
            .await?;
        Ok(reports)
    }

    pub async fn to_json(self, db: &Database) -> Result<String> {
        let rows = self.reports(db).await?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    /// CSV with one column per key seen in any row. Signal columns are the
    /// union across rows; a row without a signal leaves its cell empty.
    pub async fn to_csv(self, db: &Database) -> Result<String> {
        let rows: Vec<Vec<(String, String)>> = self
            .reports(db)
            .await?
            .iter()
            .map(WeeklyReport::to_key_values)
            .collect();
        let mut out = String::new();
        let Some(first) = rows.first() else {
            return Ok(out);
        };

        let mut header: Vec<String> = first
            .iter()
            .map(|(k, _)| k.clone())
            .filter(|k| !k.starts_with("signal_"))
            .collect();
        let signals: BTreeSet<&str> = rows
            .iter()
            .flatten()
            .map(|(k, _)| k.as_str())
            .filter(|k| k.starts_with("signal_"))
            .collect();
        header.extend(signals.into_iter().map(str::to_string));

        out.push_str(&header.join(","));
        out.push('\n');
        for row in &rows {
            let cells: HashMap<&str, &str> =
                row.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            let values: Vec<String> = header
                .iter()
                .map(|k| csv_escape(cells.get(k.as_str()).copied().unwrap_or_default()))
                .collect();
            out.push_str(&values.join(","));
            out.push('\n');
        }
        Ok(out)
    }

    fn build_sql(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut wheres = Vec::new();
        let mut param_idx = 1;

        let mut sql = format!(
            "SELECT {}, {},
                CASE WHEN u.display_name != '' THEN u.display_name ELSE u.handle END
             FROM metrics_weekly m
             LEFT JOIN gpt_analyses g ON g.user_id = m.user_id AND g.week_start = m.week_start
             LEFT JOIN users u ON u.user_id = m.user_id",
            prefixed(METRIC_COLUMNS, "m"),
            prefixed(NARRATIVE_COLUMNS, "g"),
        );

        if let Some(ref id) = self.user_id {
            wheres.push(format!("m.user_id = ?{param_idx}"));
            params.push(Box::new(id.clone()));
            param_idx += 1;
        }
        if let Some(ref key) = self.week_from {
            wheres.push(format!("m.week_start >= ?{param_idx}"));
            params.push(Box::new(key.clone()));
            param_idx += 1;
        }
        if let Some(ref key) = self.week_to {
            wheres.push(format!("m.week_start <= ?{param_idx}"));
            params.push(Box::new(key.clone()));
            param_idx += 1;
        }
        if let Some(n) = self.min_messages {
            wheres.push(format!("m.message_count >= ?{param_idx}"));
            params.push(Box::new(n));
            param_idx += 1;
        }
        match self.has_narrative {
            Some(true) => wheres.push("g.user_id IS NOT NULL".to_string()),
            Some(false) => wheres.push("g.user_id IS NULL".to_string()),
            None => {}
        }

        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }

        let order_field = self
            .order_by
            .as_deref()
            .and_then(|f| ORDER_FIELDS.iter().find(|(name, _)| *name == f))
            .map(|(_, col)| *col)
            .unwrap_or("m.week_start");
        let order_dir = if self.order_desc { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY {order_field} {order_dir}, m.user_id ASC"));

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT ?{param_idx}"));
            params.push(Box::new(limit));
        }

        (sql, params)
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
