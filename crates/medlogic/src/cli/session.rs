//! Service setup shared by the commands

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use medlogic_eval::{LogicConfig, LogicService};
use medlogic_model::{DataBundle, PersonDataSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Inputs every command shares
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub config: Option<PathBuf>,
    pub data: Option<PathBuf>,
    pub index_date: Option<String>,
}

/// A loaded bundle with a service over it
pub struct Session {
    pub bundle: DataBundle,
    pub service: LogicService,
}

impl Session {
    pub fn open(config: &SessionConfig) -> Result<Self> {
        let logic_config = match &config.config {
            Some(path) => LogicConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration: {}", path.display()))?,
            None => LogicConfig::default(),
        };
        let bundle = match &config.data {
            Some(path) => load_bundle(path)?,
            None => DataBundle::default(),
        };
        debug!(
            "Loaded {} concept(s), {} patient(s), {} observation(s)",
            bundle.dictionary().len(),
            bundle.patients().len(),
            bundle.observations().len()
        );

        let mut builder = LogicService::builder()
            .config(logic_config)
            .concepts(Arc::new(bundle.dictionary().clone()))
            .data_source(Arc::new(bundle.observation_source()))
            .data_source(Arc::new(PersonDataSource::new()));
        if let Some(date) = &config.index_date {
            builder = builder.index_date(parse_instant(date)?);
        }
        let service = builder.build().context("Failed to build logic service")?;

        Ok(Self { bundle, service })
    }
}

fn load_bundle(path: &Path) -> Result<DataBundle> {
    DataBundle::from_file(path)
        .with_context(|| format!("Failed to load data bundle: {}", path.display()))
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 instant
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .with_context(|| format!("Invalid date '{s}'. Expected YYYY-MM-DD or RFC 3339"))
}
