//! Terminal output helpers.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Table};
use console::style;

use crate::domain::models::{Project, Task};

/// Build the standard table shell.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(headers.iter().map(|h| Cell::new(style(h).bold().to_string())));
    table
}

pub fn task_table(tasks: &[Task]) -> Table {
    let mut t = table(&["id", "project", "summary", "priority", "status", "agent"]);
    for task in tasks {
        t.add_row(vec![
            short_id(&task.id.to_string()),
            short_id(&task.project_id.to_string()),
            task.summary.clone(),
            task.priority.to_string(),
            task.status.as_str().to_string(),
            task.assigned_agent_id.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    t
}

pub fn project_table(projects: &[Project]) -> Table {
    let mut t = table(&["id", "name", "status"]);
    for project in projects {
        t.add_row(vec![
            project.id.to_string(),
            project.name.clone(),
            project.status.as_str().to_string(),
        ]);
    }
    t
}

/// First eight characters of an id, enough to disambiguate interactively.
pub fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
