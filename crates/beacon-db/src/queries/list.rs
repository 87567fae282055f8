use anyhow::Result;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};

use beacon_types::models::{Paginated, StatusView};
use beacon_types::query::ListParams;

use super::QueryError;

#[derive(Clone, Copy)]
pub(crate) enum FilterKind {
    Text,
    Bool,
}

/// Describes how a resource's table view maps onto SQL.
pub(crate) struct ListSpec {
    pub from: &'static str,
    pub columns: &'static str,
    pub deleted_col: &'static str,
    /// Column holding the domain status, for custom status views.
    pub status_col: Option<&'static str>,
    pub search_cols: &'static [&'static str],
    /// (query parameter, column, kind)
    pub filters: &'static [(&'static str, &'static str, FilterKind)],
    /// (sortBy value, column)
    pub sorts: &'static [(&'static str, &'static str)],
    pub default_sort: &'static str,
    pub id_col: &'static str,
}

/// Registers `fold_case(text)`, a Unicode lower-casing that agrees with
/// `str::to_lowercase`. SQLite's own `LOWER()` only folds ASCII.
pub(crate) fn register_fold_case(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|text| text.to_lowercase())),
    )
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn where_clause(spec: &ListSpec, params: &ListParams) -> Result<(String, Vec<Value>), QueryError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    match &params.status {
        StatusView::Active => clauses.push(format!("{} IS NULL", spec.deleted_col)),
        StatusView::Deleted => clauses.push(format!("{} IS NOT NULL", spec.deleted_col)),
        StatusView::All => {}
        StatusView::Custom(status) => {
            let col = spec
                .status_col
                .ok_or_else(|| QueryError::UnknownStatus(status.clone()))?;
            clauses.push(format!("{} IS NULL AND {} = ?", spec.deleted_col, col));
            values.push(Value::Text(status.clone()));
        }
    }

    if let Some(search) = &params.search {
        let pattern = escape_like(search);
        let ors: Vec<String> = spec
            .search_cols
            .iter()
            .map(|col| format!("fold_case(COALESCE({}, '')) LIKE ? ESCAPE '\\'", col))
            .collect();
        clauses.push(format!("({})", ors.join(" OR ")));
        for _ in spec.search_cols {
            values.push(Value::Text(pattern.clone()));
        }
    }

    for (field, raw) in &params.filters {
        let (_, col, kind) = spec
            .filters
            .iter()
            .find(|(name, _, _)| *name == field.as_str())
            .ok_or_else(|| QueryError::UnknownFilter(field.clone()))?;
        match kind {
            FilterKind::Text => {
                clauses.push(format!("{} = ?", col));
                values.push(Value::Text(raw.clone()));
            }
            FilterKind::Bool => {
                let flag = match raw.as_str() {
                    "true" | "1" => 1,
                    "false" | "0" => 0,
                    _ => {
                        return Err(QueryError::InvalidFilterValue {
                            field: field.clone(),
                            value: raw.clone(),
                        });
                    }
                };
                clauses.push(format!("{} = ?", col));
                values.push(Value::Integer(flag));
            }
        }
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Ok((sql, values))
}

pub(crate) fn run_list<R>(
    conn: &Connection,
    spec: &ListSpec,
    params: &ListParams,
    map: fn(&Row<'_>) -> rusqlite::Result<R>,
) -> Result<Paginated<R>> {
    let (where_sql, values) = where_clause(spec, params)?;

    let sort_col = match &params.sort_by {
        Some(key) => spec
            .sorts
            .iter()
            .find(|(name, _)| *name == key.as_str())
            .map(|(_, col)| *col)
            .ok_or_else(|| QueryError::UnknownSort(key.clone()))?,
        None => spec.default_sort,
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}{}", spec.from, where_sql),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} {}, {} {} LIMIT {} OFFSET {}",
        spec.columns,
        spec.from,
        where_sql,
        sort_col,
        params.sort_order.as_sql(),
        spec.id_col,
        params.sort_order.as_sql(),
        params.limit,
        params.offset(),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Paginated::new(rows, params.page, params.limit, total as u64))
}
