//! Natural-language lookup table to parameterised SQL, and the raw query tool

use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::LazyLock;

use conclave_core::ConclaveResult;
use conclave_store::{StorageEngine, json_to_sql};

/// A statement plus its bound parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlStatement {
    fn fixed(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            params: Vec::new(),
        }
    }

    fn prompt_contains(term: &str) -> Self {
        Self {
            sql: "SELECT * FROM generations WHERE prompt LIKE ?1 ESCAPE '\\' ORDER BY created_at DESC"
                .to_string(),
            params: vec![Value::String(like_pattern(term))],
        }
    }
}

fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

enum Action {
    Fixed(&'static str),
    /// Built from the text following the keyword
    Term(fn(&str) -> SqlStatement),
}

struct Rule {
    pattern: Regex,
    action: Action,
}

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let table: [(&str, Action); 8] = [
        (
            r"(?i)show all",
            Action::Fixed("SELECT * FROM generations ORDER BY created_at DESC"),
        ),
        (
            r"(?i)latest",
            Action::Fixed("SELECT * FROM generations ORDER BY created_at DESC LIMIT 1"),
        ),
        (
            r"(?i)images",
            Action::Fixed("SELECT * FROM generations WHERE type = 'image' ORDER BY created_at DESC"),
        ),
        (
            r"(?i)music",
            Action::Fixed("SELECT * FROM generations WHERE type = 'music' ORDER BY created_at DESC"),
        ),
        (
            r"(?i)sprites",
            Action::Fixed(
                "SELECT * FROM generations WHERE type = 'sprite_video' ORDER BY created_at DESC",
            ),
        ),
        (r"(?i)search(.*)$", Action::Term(SqlStatement::prompt_contains)),
        (
            r"(?i)before(.*)$",
            Action::Term(|date| SqlStatement {
                sql: "SELECT * FROM generations WHERE created_at < ?1 ORDER BY created_at DESC"
                    .to_string(),
                params: vec![Value::String(date.to_string())],
            }),
        ),
        (
            r"(?i)after(.*)$",
            Action::Term(|date| SqlStatement {
                sql: "SELECT * FROM generations WHERE created_at > ?1 ORDER BY created_at DESC"
                    .to_string(),
                params: vec![Value::String(date.to_string())],
            }),
        ),
    ];

    table
        .into_iter()
        .filter_map(|(pattern, action)| {
            Regex::new(pattern)
                .ok()
                .map(|pattern| Rule { pattern, action })
        })
        .collect()
});

/// Translate a natural-language request into SQL.
///
/// Rules are tried in order; keyword rules that need a term are skipped when
/// nothing follows the keyword. Unmatched input becomes a prompt substring
/// search. User text only ever reaches the database as a bound parameter.
pub fn natural_to_sql(natural: &str) -> SqlStatement {
    for rule in RULES.iter() {
        let Some(captures) = rule.pattern.captures(natural) else {
            continue;
        };
        match &rule.action {
            Action::Fixed(sql) => return SqlStatement::fixed(sql),
            Action::Term(build) => {
                let term = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                if !term.is_empty() {
                    return build(term);
                }
            }
        }
    }
    SqlStatement::prompt_contains(natural.trim())
}

/// Run a statement through the storage capability
pub async fn execute_query(
    storage: &dyn StorageEngine,
    query: &str,
    params: &[Value],
) -> ConclaveResult<Value> {
    let params = params.iter().map(json_to_sql).collect();
    let rows = storage.query(query, params).await?;
    Ok(json!({
        "rowCount": rows.len(),
        "columns": rows.columns,
        "rows": rows.rows,
    }))
}
