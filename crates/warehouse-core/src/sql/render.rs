use serde::Serialize;

use crate::cohort::filter::{Predicate, PropertyFilter, PropertyGroup};

/// Virtual table over the external files; every argument is a bound query
/// parameter, never interpolated text.
pub const S3_SOURCE: &str =
    "s3({url_pattern:String}, {access_key:String}, {access_secret:String}, {format:String})";

const PLAIN_NUMBER_PATTERN: &str = r"'^-?[0-9]+(\.[0-9]+)?$'";

pub fn render_describe_sql() -> String {
    format!(
        "DESCRIBE TABLE (\n    SELECT *\n    FROM {}\n    LIMIT 1\n)",
        S3_SOURCE
    )
}

pub fn render_count_sql() -> String {
    format!("SELECT count()\nFROM {}", S3_SOURCE)
}

/// Positional parameter for a row-store query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
    TextArray(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

fn bind(params: &mut Vec<SqlParam>, param: SqlParam) -> String {
    params.push(param);
    format!("${}", params.len())
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn render_predicate(filter: &PropertyFilter, params: &mut Vec<SqlParam>) -> String {
    let key = bind(params, SqlParam::Text(filter.key.clone()));
    let prop = format!("(properties ->> {}::text)", key);

    match &filter.predicate {
        Predicate::Exact(values) => {
            let p = bind(params, SqlParam::TextArray(values.clone()));
            format!("{} = ANY({}::text[])", prop, p)
        }
        Predicate::IsNot(values) => {
            let p = bind(params, SqlParam::TextArray(values.clone()));
            format!("NOT (COALESCE({}, '') = ANY({}::text[]))", prop, p)
        }
        Predicate::IContains(needle) => {
            let p = bind(params, SqlParam::Text(like_pattern(needle)));
            format!("{} ILIKE {}::text", prop, p)
        }
        Predicate::NotIContains(needle) => {
            let p = bind(params, SqlParam::Text(like_pattern(needle)));
            format!("NOT (COALESCE({}, '') ILIKE {}::text)", prop, p)
        }
        Predicate::Regex(re) => {
            let p = bind(params, SqlParam::Text(re.as_str().to_string()));
            format!("{} ~ {}::text", prop, p)
        }
        Predicate::NotRegex(re) => {
            let p = bind(params, SqlParam::Text(re.as_str().to_string()));
            format!("NOT (COALESCE({}, '') ~ {}::text)", prop, p)
        }
        Predicate::Gt(n) | Predicate::Lt(n) => {
            let op = if matches!(filter.predicate, Predicate::Gt(_)) { ">" } else { "<" };
            let p = bind(params, SqlParam::Float(*n));
            format!(
                "CASE WHEN {prop} ~ {pattern} THEN {prop}::double precision {op} {p}::double precision ELSE false END",
                prop = prop,
                pattern = PLAIN_NUMBER_PATTERN,
                op = op,
                p = p,
            )
        }
        Predicate::IsSet => format!("{} IS NOT NULL", prop),
        Predicate::IsNotSet => format!("{} IS NULL", prop),
    }
}

/// Person-matching query for a dynamic cohort: groups are OR'd, the filters
/// inside a group AND'd, and everything is scoped to one team.
///
/// Returns `None` when no group carries a filter; such a cohort matches nobody.
pub fn render_cohort_match_sql(team_id: i64, groups: &[PropertyGroup]) -> Option<CohortQuery> {
    let mut params = vec![SqlParam::Int(team_id)];

    let mut clauses = Vec::new();
    for group in groups.iter().filter(|g| !g.filters.is_empty()) {
        let predicates = group
            .filters
            .iter()
            .map(|f| render_predicate(f, &mut params))
            .collect::<Vec<_>>()
            .join("\n         AND ");
        clauses.push(format!("({})", predicates));
    }

    if clauses.is_empty() {
        return None;
    }

    let sql = format!(
        "SELECT id::bigint\nFROM posthog_person\nWHERE team_id = $1::bigint\n  AND ({})\nORDER BY id",
        clauses.join("\n    OR ")
    );

    Some(CohortQuery { sql, params })
}
