//! Task and configuration registry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::HarnessError;
use crate::domain::{BenchmarkConfiguration, BenchmarkTaskCase};

/// Registered tasks and configurations, kept in registration order.
///
/// Sequential runs execute in this order, so it is part of the contract.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkRegistry {
    tasks: Vec<BenchmarkTaskCase>,
    configurations: Vec<BenchmarkConfiguration>,
}

impl BenchmarkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. A duplicate id is rejected unless `overwrite` is set,
    /// in which case the task is replaced in its original position.
    pub fn register_task(
        &mut self,
        case: BenchmarkTaskCase,
        overwrite: bool,
    ) -> Result<(), HarnessError> {
        case.validate()?;
        match self.tasks.iter().position(|t| t.task_id == case.task_id) {
            Some(_) if !overwrite => Err(HarnessError::DuplicateTask {
                task_id: case.task_id,
            }),
            Some(i) => {
                self.tasks[i] = case;
                Ok(())
            }
            None => {
                self.tasks.push(case);
                Ok(())
            }
        }
    }

    /// Register a configuration under its name. Same overwrite rule as
    /// [`register_task`](Self::register_task).
    pub fn register_configuration(
        &mut self,
        config: BenchmarkConfiguration,
        overwrite: bool,
    ) -> Result<(), HarnessError> {
        config.validate()?;
        match self
            .configurations
            .iter()
            .position(|c| c.name == config.name)
        {
            Some(_) if !overwrite => Err(HarnessError::DuplicateConfiguration { name: config.name }),
            Some(i) => {
                self.configurations[i] = config;
                Ok(())
            }
            None => {
                self.configurations.push(config);
                Ok(())
            }
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&BenchmarkTaskCase> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn configuration(&self, name: &str) -> Option<&BenchmarkConfiguration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    pub fn tasks(&self) -> &[BenchmarkTaskCase] {
        &self.tasks
    }

    pub fn configurations(&self) -> &[BenchmarkConfiguration] {
        &self.configurations
    }

    /// Cartesian product of the requested tasks and configurations, in
    /// registration order (tasks outer, configurations inner). Duplicate
    /// request entries collapse; unknown ids are an error.
    pub fn work_set(
        &self,
        task_ids: &[String],
        config_names: &[String],
    ) -> Result<Vec<(BenchmarkTaskCase, BenchmarkConfiguration)>, HarnessError> {
        if let Some(missing) = task_ids.iter().find(|id| self.task(id).is_none()) {
            return Err(HarnessError::UnknownTask {
                task_id: missing.clone(),
            });
        }
        if let Some(missing) = config_names.iter().find(|n| self.configuration(n).is_none()) {
            return Err(HarnessError::UnknownConfiguration {
                name: missing.clone(),
            });
        }

        let tasks = self.tasks.iter().filter(|t| task_ids.contains(&t.task_id));
        let mut work = Vec::new();
        for task in tasks {
            for config in self
                .configurations
                .iter()
                .filter(|c| config_names.contains(&c.name))
            {
                work.push((task.clone(), config.clone()));
            }
        }
        Ok(work)
    }

    /// Register everything in a catalog, honoring `overwrite` for each entry.
    pub fn load_catalog(
        &mut self,
        catalog: BenchmarkCatalog,
        overwrite: bool,
    ) -> Result<(), HarnessError> {
        for task in catalog.tasks {
            self.register_task(task, overwrite)?;
        }
        for config in catalog.configurations {
            self.register_configuration(config, overwrite)?;
        }
        Ok(())
    }
}

/// File form of a set of benchmark definitions.
///
/// ```toml
/// [[tasks]]
/// task_id = "summarize_doc"
/// name = "Summarize a document"
/// task_type = "summarization"
/// scoring_criteria = { accuracy = 0.6, brevity = 0.4 }
///
/// [[configurations]]
/// name = "fast"
/// model = "small"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkCatalog {
    pub tasks: Vec<BenchmarkTaskCase>,
    pub configurations: Vec<BenchmarkConfiguration>,
}

impl BenchmarkCatalog {
    pub fn from_json_str(s: &str) -> Result<Self, HarnessError> {
        serde_json::from_str(s).map_err(|e| HarnessError::Catalog(e.to_string()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, HarnessError> {
        toml::from_str(s).map_err(|e| HarnessError::Catalog(e.to_string()))
    }

    /// Load by file extension: `.json`, otherwise TOML.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Catalog(format!("{}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&raw),
            _ => Self::from_toml_str(&raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use std::collections::BTreeMap;

    fn task(id: &str) -> BenchmarkTaskCase {
        let weights: BTreeMap<String, f64> = [("accuracy".to_string(), 1.0)].into_iter().collect();
        BenchmarkTaskCase::new(id, TaskType::QuestionAnswering, weights)
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn duplicates_need_overwrite() {
        let mut reg = BenchmarkRegistry::new();
        reg.register_task(task("t1"), false).unwrap();
        assert!(matches!(
            reg.register_task(task("t1"), false),
            Err(HarnessError::DuplicateTask { .. })
        ));
        reg.register_task(task("t1").with_description("v2"), true)
            .unwrap();
        assert_eq!(reg.tasks().len(), 1);
        assert_eq!(reg.task("t1").unwrap().description, "v2");

        reg.register_configuration(BenchmarkConfiguration::new("fast", "m"), false)
            .unwrap();
        assert!(matches!(
            reg.register_configuration(BenchmarkConfiguration::new("fast", "m2"), false),
            Err(HarnessError::DuplicateConfiguration { .. })
        ));
        reg.register_configuration(BenchmarkConfiguration::new("fast", "m2"), true)
            .unwrap();
        assert_eq!(reg.configuration("fast").unwrap().model, "m2");
    }

    #[test]
    fn invalid_task_is_rejected() {
        let mut reg = BenchmarkRegistry::new();
        let bad = BenchmarkTaskCase::new("t", TaskType::ToolUse, BTreeMap::new());
        assert!(matches!(
            reg.register_task(bad, false),
            Err(HarnessError::Validation(_))
        ));
    }

    #[test]
    fn work_set_follows_registration_order() {
        let mut reg = BenchmarkRegistry::new();
        for id in ["t1", "t2"] {
            reg.register_task(task(id), false).unwrap();
        }
        for name in ["a", "b", "c"] {
            reg.register_configuration(BenchmarkConfiguration::new(name, "m"), false)
                .unwrap();
        }
        let work = reg
            .work_set(&ids(&["t2", "t1"]), &ids(&["c", "a"]))
            .unwrap();
        let pairs: Vec<_> = work
            .iter()
            .map(|(t, c)| (t.task_id.as_str(), c.name.as_str()))
            .collect();
        assert_eq!(pairs, vec![("t1", "a"), ("t1", "c"), ("t2", "a"), ("t2", "c")]);

        assert!(matches!(
            reg.work_set(&ids(&["nope"]), &ids(&["a"])),
            Err(HarnessError::UnknownTask { .. })
        ));
    }

    #[test]
    fn catalog_parses_toml_and_json() {
        let toml = r#"
            [[tasks]]
            task_id = "summarize_doc"
            name = "Summarize"
            task_type = "summarization"
            scoring_criteria = { accuracy = 0.6, brevity = 0.4 }

            [[configurations]]
            name = "fast"
            model = "small"
        "#;
        let catalog = BenchmarkCatalog::from_toml_str(toml).unwrap();
        assert_eq!(catalog.tasks[0].task_type, TaskType::Summarization);
        assert_eq!(catalog.configurations[0].temperature, 0.7);

        let json = serde_json::to_string(&catalog).unwrap();
        assert_eq!(BenchmarkCatalog::from_json_str(&json).unwrap(), catalog);

        let mut reg = BenchmarkRegistry::new();
        reg.load_catalog(catalog, false).unwrap();
        assert!(reg.task("summarize_doc").is_some());
    }

    #[test]
    fn catalog_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{"configurations": [{"name": "fast"}]}"#).unwrap();
        let catalog = BenchmarkCatalog::load(&path).unwrap();
        assert_eq!(catalog.configurations.len(), 1);
        assert!(catalog.tasks.is_empty());
    }
}
