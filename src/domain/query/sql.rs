//! Text transformations applied to generated SQL

use once_cell::sync::Lazy;
use regex::Regex;

static FENCED_SQL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:sql)?\s*(.*?)```").unwrap());

// "db"."schema"."table" -> "schema"."table"
static QUOTED_THREE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"]+"\."([^"]+)"\."([^"]+)""#).unwrap());

// db.schema.table -> schema.table
static BARE_THREE_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[a-zA-Z_][a-zA-Z0-9_]*\.([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)")
        .unwrap()
});

// db."schema"."table" -> "schema"."table"
static MIXED_BARE_DB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\b[a-zA-Z_][a-zA-Z0-9_]*\."([^"]+)"\."([^"]+)""#).unwrap());

// "db".schema.table -> schema.table
static MIXED_QUOTED_DB: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""[^"]+"\.([a-zA-Z_][a-zA-Z0-9_]*)\.([a-zA-Z_][a-zA-Z0-9_]*)"#).unwrap()
});

/// Pull the SQL statement out of an LLM reply, dropping code fences
pub fn extract_sql(reply: &str) -> String {
    let body = FENCED_SQL
        .captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(reply);

    body.trim().trim_end_matches(';').trim().to_string()
}

/// Wrap `query` so it yields one page of at most `limit` rows
pub fn paginate(query: &str, limit: usize, offset: usize) -> String {
    let inner = query.trim().trim_end_matches(';').trim();
    format!(
        "SELECT * FROM ({}) AS page LIMIT {} OFFSET {}",
        inner, limit, offset
    )
}

/// Rewrite quoted three-part names to two-part names
pub fn strip_cross_database_refs(query: &str) -> String {
    QUOTED_THREE_PART.replace_all(query, "\"$1\".\"$2\"").into_owned()
}

/// Rewrite every three-part name form, quoted, bare or mixed
pub fn fix_cross_database_refs(query: &str) -> String {
    let fixed = QUOTED_THREE_PART.replace_all(query, "\"$1\".\"$2\"");
    let fixed = BARE_THREE_PART.replace_all(&fixed, "$1.$2");
    let fixed = MIXED_BARE_DB.replace_all(&fixed, "\"$1\".\"$2\"");
    MIXED_QUOTED_DB.replace_all(&fixed, "$1.$2").into_owned()
}

/// Render `value` as a single-quoted SQL string literal
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn is_cross_database_error(message: &str) -> bool {
    message.to_ascii_lowercase().contains("cross-database")
}
