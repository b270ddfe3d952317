//! SQL statement generation per dialect.

use super::Dialect;
use crate::transfer::PageWindow;

/// Builds the handful of statements the mover issues against a table.
#[derive(Debug, Clone, Copy)]
pub struct SqlGenerator {
    dialect: Dialect,
}

impl SqlGenerator {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Schema-qualified table name following the dialect's quoting discipline.
    ///
    /// An empty schema yields the bare table name.
    pub fn qualify(&self, schema: &str, table: &str) -> String {
        let quote = |name: &str| {
            if self.dialect.quotes_identifiers() {
                format!("\"{}\"", name.replace('"', "\"\""))
            } else {
                name.to_string()
            }
        };

        if schema.trim().is_empty() {
            quote(table)
        } else {
            format!("{}.{}", quote(schema), quote(table))
        }
    }

    pub fn select_all(&self, schema: &str, table: &str) -> String {
        format!("SELECT * FROM {}", self.qualify(schema, table))
    }

    pub fn row_count(&self, schema: &str, table: &str) -> String {
        format!("SELECT count(1) FROM {}", self.qualify(schema, table))
    }

    /// `INSERT INTO <S>.<T> VALUES (...)` with one placeholder per column.
    pub fn insert_values(&self, schema: &str, table: &str, column_count: usize) -> String {
        let placeholders: Vec<String> = (1..=column_count)
            .map(|i| self.dialect.param_placeholder(i))
            .collect();
        format!(
            "INSERT INTO {} VALUES ({})",
            self.qualify(schema, table),
            placeholders.join(", ")
        )
    }

    /// Paginated SELECT for one window, ordered by the first column.
    ///
    /// Falls back to an unpaged `SELECT *` when the dialect has no known
    /// pagination syntax.
    pub fn page(&self, schema: &str, table: &str, window: &PageWindow) -> String {
        let name = self.qualify(schema, table);
        let start = window.start;
        let end = window.start + window.length;

        match self.dialect {
            Dialect::Oracle => format!(
                "SELECT * FROM (SELECT subQ.*, rownum RNUM FROM (SELECT * FROM {} ORDER BY 1) subQ \
                 WHERE rownum <= {} ORDER BY 1) WHERE RNUM > {} ORDER BY 1",
                name, end, start
            ),
            Dialect::MsSql => format!(
                "SELECT * FROM {} ORDER BY 1 OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                name, start, window.length
            ),
            Dialect::PostgreSql | Dialect::MySql | Dialect::H2 => format!(
                "SELECT * FROM {} ORDER BY 1 LIMIT {} OFFSET {}",
                name, window.length, start
            ),
            Dialect::Other => self.select_all(schema, table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: u64, length: u64) -> PageWindow {
        PageWindow {
            index: 0,
            start,
            length,
        }
    }

    #[test]
    fn test_quoted_and_plain_names() {
        let pg = SqlGenerator::new(Dialect::PostgreSql);
        assert_eq!(pg.select_all("S", "T1"), "SELECT * FROM \"S\".\"T1\"");
        assert_eq!(pg.row_count("", "T1"), "SELECT count(1) FROM \"T1\"");

        let ora = SqlGenerator::new(Dialect::Oracle);
        assert_eq!(ora.select_all("S", "T1"), "SELECT * FROM S.T1");
        assert_eq!(ora.row_count("S", "T1"), "SELECT count(1) FROM S.T1");
        assert_eq!(ora.select_all("", "T1"), "SELECT * FROM T1");
    }

    #[test]
    fn test_insert_placeholders() {
        assert_eq!(
            SqlGenerator::new(Dialect::Oracle).insert_values("S", "T1", 3),
            "INSERT INTO S.T1 VALUES (?, ?, ?)"
        );
        assert_eq!(
            SqlGenerator::new(Dialect::PostgreSql).insert_values("S", "T1", 2),
            "INSERT INTO \"S\".\"T1\" VALUES ($1, $2)"
        );
        assert_eq!(
            SqlGenerator::new(Dialect::MsSql).insert_values("dbo", "T1", 2),
            "INSERT INTO \"dbo\".\"T1\" VALUES (@P1, @P2)"
        );
    }

    #[test]
    fn test_oracle_page() {
        let sql = SqlGenerator::new(Dialect::Oracle).page("S", "T", &window(1000, 1000));
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT subQ.*, rownum RNUM FROM (SELECT * FROM S.T ORDER BY 1) subQ \
             WHERE rownum <= 2000 ORDER BY 1) WHERE RNUM > 1000 ORDER BY 1"
        );
    }

    #[test]
    fn test_mssql_page() {
        let sql = SqlGenerator::new(Dialect::MsSql).page("dbo", "T", &window(2000, 500));
        assert_eq!(
            sql,
            "SELECT * FROM \"dbo\".\"T\" ORDER BY 1 OFFSET 2000 ROWS FETCH NEXT 500 ROWS ONLY"
        );
    }

    #[test]
    fn test_limit_offset_pages() {
        let w = window(0, 1000);
        assert_eq!(
            SqlGenerator::new(Dialect::PostgreSql).page("S", "T", &w),
            "SELECT * FROM \"S\".\"T\" ORDER BY 1 LIMIT 1000 OFFSET 0"
        );
        assert_eq!(
            SqlGenerator::new(Dialect::MySql).page("S", "T", &w),
            "SELECT * FROM S.T ORDER BY 1 LIMIT 1000 OFFSET 0"
        );
        assert_eq!(
            SqlGenerator::new(Dialect::H2).page("S", "T", &window(10, 5)),
            "SELECT * FROM S.T ORDER BY 1 LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn test_unknown_dialect_falls_back_to_select_all() {
        let sql = SqlGenerator::new(Dialect::Other).page("S", "T", &window(100, 100));
        assert_eq!(sql, "SELECT * FROM S.T");
    }
}
