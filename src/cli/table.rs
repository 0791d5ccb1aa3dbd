//! Table formatting for database inspection output.
//!
//! `rafter cache view` renders the recorded functions as a table with
//! rounded borders and left-aligned content rows.

use tabled::settings::{Alignment, Modify, Style, object::Rows};
use tabled::{Table, Tabled};

use crate::core::db::DbStats;

/// One row of the `cache view` table: a recorded function.
#[derive(Tabled)]
pub struct FunctionDisplayRow {
    /// Cached procedure name
    #[tabled(rename = "Function")]
    pub name: String,

    /// Number of recorded calls
    #[tabled(rename = "Calls")]
    pub calls: usize,

    /// Identity digest (truncated)
    #[tabled(rename = "Digest")]
    pub digest: String,
}

/// Render database statistics as a table string.
pub fn create_stats_table(stats: &DbStats) -> String {
    let rows: Vec<FunctionDisplayRow> = stats
        .functions
        .iter()
        .map(|f| FunctionDisplayRow {
            name: f.name.clone(),
            calls: f.calls,
            digest: f.digest.chars().take(12).collect(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::new(1..)).with(Alignment::left()));
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::Database;

    #[test]
    fn test_stats_table_lists_functions() {
        let db = Database::new("unused.db");
        db.save_function("ocaml.bytecode.compile", "0123456789abcdef");
        let table = create_stats_table(&db.stats());
        assert!(table.contains("ocaml.bytecode.compile"));
        assert!(table.contains("0123456789ab"));
        assert!(!table.contains("0123456789abcdef"));
    }
}
