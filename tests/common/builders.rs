//! Test data builders for creating test objects

use pipeflow::Row;
use serde_json::Value;

/// Builder for creating test rows
pub struct RowBuilder {
    row: Row,
}

impl RowBuilder {
    pub fn new() -> Self {
        Self { row: Row::new() }
    }

    pub fn number(self, n: i64) -> Self {
        self.column("number", n)
    }

    pub fn name(self, name: &str) -> Self {
        self.column("name", name)
    }

    pub fn column(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.row = self.row.with(column, value);
        self
    }

    pub fn build(self) -> Row {
        self.row
    }
}

/// Rows `{ "number": n, "name": "item-n" }`
pub fn named_rows(count: i64) -> Vec<Row> {
    (1..=count)
        .map(|n| RowBuilder::new().number(n).name(&format!("item-{}", n)).build())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_builder() {
        let row = RowBuilder::new().number(7).name("seven").build();

        assert_eq!(row.get_i64("number"), Some(7));
        assert_eq!(row.get_str("name"), Some("seven"));
        assert_eq!(row.len(), 2);
    }
}
