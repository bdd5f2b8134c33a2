use std::fmt::{self, Display, Formatter};

use comfy_table::presets::UTF8_HORIZONTAL_BORDERS_ONLY;
use comfy_table::{Cell, ContentArrangement, Row, Table};

/// Tabular result of an administrative statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Output {
    pub fn new<I, T>(header: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn action(action: &str, success: bool) -> Self {
        let mut output = Output::new(vec!["action", "success"]);
        output.push_row(vec![action.to_string(), success.to_string()]);
        output
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.header.len());
        self.rows.push(row);
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Display for Output {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::DynamicFullWidth);
        table.load_preset(UTF8_HORIZONTAL_BORDERS_ONLY);
        table.set_header(self.header.iter());

        if self.rows.is_empty() {
            table.add_row(Row::from(vec!["No data!"]));
        } else {
            for row in &self.rows {
                table.add_row(row.iter().map(Cell::new).collect::<Vec<_>>());
            }
        }

        table.fmt(f)
    }
}
