use crate::config::schema::{ApiConfig, OutputConfig, PollerConfig, PollingConfig};
use crate::error::{Error, Result};
use crate::output::{
    OutputHandler, console::ConsoleOutput, csv::CsvOutput, json::JsonOutput, sqlite::SqliteOutput,
};
use crate::sink::{EventSink, FanoutSink, LogSink, OutputSink};
use indicatif::MultiProgress;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PollerConfig> {
        let path = path.as_ref();
        let mut visited = HashSet::new();
        Self::load_with_inheritance(path, &mut visited, false)
    }

    fn load_with_inheritance(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        is_parent_load: bool,
    ) -> Result<PollerConfig> {
        let path = fs::canonicalize(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        if visited.contains(&path) {
            return Err(Error::Config(format!(
                "Circular inheritance detected involving {}",
                path.display()
            )));
        }
        visited.insert(path.clone());

        let config = Self::load_file(&path)?;

        let final_config = if let Some(parent_path_str) = &config.extends {
            let parent_path = path
                .parent()
                .ok_or_else(|| {
                    Error::Config(format!(
                        "Cannot determine parent directory for {}",
                        path.display()
                    ))
                })?
                .join(parent_path_str);

            let parent_config = Self::load_with_inheritance(&parent_path, visited, true)?;
            Self::merge_configs(parent_config, config)
        } else {
            config
        };

        if !is_parent_load {
            final_config.validate()?;
        }

        Ok(final_config)
    }

    fn load_file(path: &Path) -> Result<PollerConfig> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Err(Error::Config(format!(
                "Unsupported file extension: {}",
                path.display()
            ))),
        }
    }

    /// Child sections left at their defaults inherit the parent's values.
    fn merge_configs(mut parent: PollerConfig, child: PollerConfig) -> PollerConfig {
        if !child.name.is_empty() {
            parent.name = child.name;
        }
        if child.api != ApiConfig::default() {
            parent.api = child.api;
        }
        if child.output.is_some() {
            parent.output = child.output;
        }

        let defaults = PollingConfig::default();
        let markets = if child.polling.markets.is_empty() {
            std::mem::take(&mut parent.polling.markets)
        } else {
            child.polling.markets.clone()
        };
        let child_settings = PollingConfig {
            markets: Vec::new(),
            ..child.polling
        };
        if child_settings != defaults {
            parent.polling = child_settings;
        }
        parent.polling.markets = markets;

        parent.extends = None;
        parent
    }

    /// Builds the event sink for the configured output. File outputs also log each event.
    pub async fn create_sink(
        config: &PollerConfig,
        multi: Option<Arc<MultiProgress>>,
    ) -> Result<Arc<dyn EventSink>> {
        let handler: Box<dyn OutputHandler> = match &config.output {
            None | Some(OutputConfig::Log) => return Ok(Arc::new(LogSink)),
            Some(OutputConfig::Console) => {
                return Ok(Arc::new(OutputSink::new(Box::new(ConsoleOutput::new(multi)))));
            }
            Some(OutputConfig::Json { path }) => Box::new(JsonOutput::new(PathBuf::from(path))?),
            Some(OutputConfig::Csv { path }) => Box::new(CsvOutput::new(PathBuf::from(path))?),
            Some(OutputConfig::Sqlite { path, table }) => {
                Box::new(SqliteOutput::new(PathBuf::from(path), table.clone()).await?)
            }
        };
        Ok(Arc::new(FanoutSink::new(vec![
            Arc::new(LogSink),
            Arc::new(OutputSink::new(handler)),
        ])))
    }
}
