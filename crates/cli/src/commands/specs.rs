//! Spec and task listing

use anyhow::Result;
use serde::Serialize;

use specdeck_common::DiscoveredTest;

use crate::client::RunnerClient;
use crate::output::{print_list, OutputFormat, TableDisplay};

/// One selectable task row
#[derive(Serialize)]
pub struct TaskDisplay {
    pub task: String,
    pub name: String,
    pub label: String,
    pub required: bool,
}

impl TaskDisplay {
    fn from_test(test: &DiscoveredTest) -> Vec<Self> {
        test.children
            .iter()
            .map(|child| Self {
                task: format!("{}::{}", test.id, child.id),
                name: test.display_name.clone(),
                label: child.label.clone(),
                required: child.required,
            })
            .collect()
    }
}

impl TableDisplay for TaskDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Task", "Spec", "Label", "Required"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.task.clone(),
            self.name.clone(),
            self.label.clone(),
            if self.required { "yes" } else { "" }.to_string(),
        ]
    }
}

pub async fn execute(client: &RunnerClient, format: OutputFormat) -> Result<()> {
    let tests = client.tests().await?;
    match format {
        OutputFormat::Json => crate::output::print_json(&tests),
        OutputFormat::Table => {
            let rows: Vec<TaskDisplay> = tests.iter().flat_map(TaskDisplay::from_test).collect();
            print_list(&rows, format);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use specdeck_common::TestChild;

    #[test]
    fn test_task_rows() {
        let test = DiscoveredTest {
            id: "tests/a.spec.js".to_string(),
            display_name: "A".to_string(),
            children: vec![TestChild {
                id: "login".to_string(),
                label: "Log in (required)".to_string(),
                required: true,
            }],
        };
        let rows = TaskDisplay::from_test(&test);
        assert_eq!(rows[0].task, "tests/a.spec.js::login");
        assert_eq!(rows[0].row()[3], "yes");
    }
}
