// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Extraction engine configuration
///
/// A typed record of every tunable the pipeline reads; the property-file
/// syntax accepted by [`Config::from_properties`] uses `KEY = VALUE` lines.
#[derive(Clone, Debug)]
pub struct Config {
    /// Minimum n-gram depth, in bytes
    pub min_depth: usize,

    /// Maximum n-gram depth, in bytes
    pub max_depth: usize,

    /// Directory holding the benign Bloom filter files
    pub bloom_filter_dir: PathBuf,

    /// Whether lookups load the whole filter payload into memory
    pub bloom_from_memory: bool,

    /// Whether filter construction runs the pipelined build path
    pub bloom_threaded: bool,

    /// Action keyword for emitted rules
    pub rule_action: String,

    /// Output file for single-attack content rules
    pub rule_file: PathBuf,

    /// Output file for pcre-bearing rules
    pub pcre_rule_file: PathBuf,

    /// Output file for rules produced by unsupervised clustering
    pub cluster_rule_file: PathBuf,

    /// Relative score jump that cuts the dendrogram into clusters
    pub level_percent_thresh: f64,

    /// Optional alignment scoring table override
    pub scoring_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_depth: 4,
            max_depth: 10,
            bloom_filter_dir: ".".into(),
            bloom_from_memory: true,
            bloom_threaded: false,
            rule_action: "alert".into(),
            rule_file: "sigforge.rules".into(),
            pcre_rule_file: "sigforge-pcre.rules".into(),
            cluster_rule_file: "sigforge-cluster.rules".into(),
            level_percent_thresh: 0.5,
            scoring_file: None,
        }
    }
}

impl Config {
    /// Initializes a new config with the given filter directory.
    #[must_use]
    pub fn new<P: AsRef<Path>>(bloom_filter_dir: P) -> Self {
        Self {
            bloom_filter_dir: bloom_filter_dir.as_ref().into(),
            ..Default::default()
        }
    }

    /// Sets the n-gram depth window.
    #[must_use]
    pub fn depth_window(mut self, min: usize, max: usize) -> Self {
        self.min_depth = min;
        self.max_depth = max;
        self
    }

    /// Sets whether the filter payload is served from memory.
    #[must_use]
    pub fn bloom_from_memory(mut self, enabled: bool) -> Self {
        self.bloom_from_memory = enabled;
        self
    }

    /// Sets whether filter construction is pipelined.
    #[must_use]
    pub fn bloom_threaded(mut self, enabled: bool) -> Self {
        self.bloom_threaded = enabled;
        self
    }

    /// Sets the dendrogram cut threshold.
    #[must_use]
    pub fn level_percent_thresh(mut self, thresh: f64) -> Self {
        self.level_percent_thresh = thresh;
        self
    }

    /// Parses a properties block of `KEY = VALUE` lines.
    ///
    /// Unknown keys are logged and skipped; blank lines and `#` comments
    /// are ignored. Missing keys keep their defaults.
    pub fn from_properties(text: &str) -> Result<Self> {
        let mut config = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::InvalidConfig("expected KEY = VALUE line"));
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "ASG.MinDepth" => {
                    config.min_depth = value
                        .parse()
                        .map_err(|_| Error::InvalidConfig("ASG.MinDepth"))?;
                }
                "ASG.MaxDepth" => {
                    config.max_depth = value
                        .parse()
                        .map_err(|_| Error::InvalidConfig("ASG.MaxDepth"))?;
                }
                "ASG.BloomFilterDir" => {
                    config.bloom_filter_dir = value.into();
                }
                "ASG.BloomFromMemory" => {
                    config.bloom_from_memory = parse_flag(value, "ASG.BloomFromMemory")?;
                }
                "ASG.BloomThreaded" => {
                    config.bloom_threaded = parse_flag(value, "ASG.BloomThreaded")?;
                }
                "ASG.RuleAction" => {
                    config.rule_action = value.into();
                }
                "ASG.SuricataRuleFile" => {
                    config.rule_file = value.into();
                }
                "ASG.SuricataPcreRuleFile" => {
                    config.pcre_rule_file = value.into();
                }
                "ASG.SuricataUnsupervisedClusterRuleFile" => {
                    config.cluster_rule_file = value.into();
                }
                "Dendrogram.LevelPercentThresh" => {
                    config.level_percent_thresh = value
                        .parse()
                        .map_err(|_| Error::InvalidConfig("Dendrogram.LevelPercentThresh"))?;
                }
                "LocalAlignment.ScoringEngineFile" => {
                    config.scoring_file = Some(value.into());
                }
                _ => {
                    log::warn!("Unknown property: {key}");
                }
            }
        }

        config.validate()?;

        Ok(config)
    }

    /// Reads a properties file from disk.
    pub fn from_properties_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_properties(&text)
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.min_depth == 0 {
            return Err(Error::InvalidConfig("ASG.MinDepth must be positive"));
        }
        if self.min_depth > self.max_depth {
            return Err(Error::InvalidConfig("ASG.MinDepth exceeds ASG.MaxDepth"));
        }
        if !(0.0..=1.0).contains(&self.level_percent_thresh) {
            return Err(Error::InvalidConfig(
                "Dendrogram.LevelPercentThresh outside [0, 1]",
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str, key: &'static str) -> Result<bool> {
    match value {
        "T" => Ok(true),
        "F" => Ok(false),
        _ => {
            log::error!("Bad {key} value: {value}");
            Err(Error::InvalidConfig(key))
        }
    }
}
