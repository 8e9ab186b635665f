use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Parse check for rendered row-store SQL. Placeholders (`$1`) are accepted.
pub fn parse_ok(sql: &str) -> anyhow::Result<()> {
    let dialect = PostgreSqlDialect {};
    let statements = Parser::parse_sql(&dialect, sql)?;
    anyhow::ensure!(statements.len() == 1, "expected one statement, found {}", statements.len());
    Ok(())
}
