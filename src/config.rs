/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    errors::ConfigError,
    matrix::MatrixLoader,
    pattern::{builder::PatternBuilder, TrafficPattern},
};
use serde_yaml::Value;
use std::{fs, path::Path};

pub const TRAFFIC_PATTERNS: &str = "traffic_patterns";

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********

/// A parsed config file. Traffic pattern records are kept raw until they are handed to the
/// [`PatternBuilder`] so that defaults and validation live in one place.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub traffic_patterns: Vec<Value>,
}
impl Config {
    pub fn try_from_path(path: &Path) -> Result<Config, ConfigError> {
        let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Config::try_from_str(&config_str)
    }

    pub fn try_from_str(conf_str: &str) -> Result<Config, ConfigError> {
        let doc: Value = serde_yaml::from_str(conf_str)?;

        let traffic_patterns = match doc.get(TRAFFIC_PATTERNS) {
            None => return Err(ConfigError::MissingTrafficPatterns),
            Some(Value::Sequence(records)) => records.clone(),
            Some(_) => return Err(ConfigError::TrafficPatternsNotAList),
        };

        Ok(Config { traffic_patterns })
    }

    /// Builds the traffic patterns in config order. Fails on the first invalid record, before
    /// anything has run.
    pub fn traffic_patterns(
        &self,
        loader: &dyn MatrixLoader,
    ) -> Result<Vec<TrafficPattern>, ConfigError> {
        PatternBuilder::new(loader).build_all(&self.traffic_patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{matrix::FileMatrixLoader, pattern::XferOp};
    use std::path::Path;

    #[test]
    fn can_load_config_file() -> anyhow::Result<()> {
        let cfg = Config::try_from_path(Path::new("./fixtures/two_patterns.yaml"))?;
        assert_eq!(cfg.traffic_patterns.len(), 2);

        let patterns = cfg.traffic_patterns(&FileMatrixLoader)?;
        assert_eq!(patterns[0].matrix().get(0, 1), Some(1024));
        assert_eq!(patterns[0].shards(), 2);
        assert_eq!(patterns[1].xfer_op(), XferOp::Read);

        Ok(())
    }

    #[test]
    fn missing_traffic_patterns_key_is_an_error() {
        let res = Config::try_from_str("patterns:\n  - matrix_file: a.txt\n");
        assert!(matches!(res, Err(ConfigError::MissingTrafficPatterns)));

        let res = Config::try_from_str("");
        assert!(matches!(res, Err(ConfigError::MissingTrafficPatterns)));
    }

    #[test]
    fn traffic_patterns_must_be_a_list() {
        let res = Config::try_from_str("traffic_patterns:\n  matrix_file: a.txt\n");
        assert!(matches!(res, Err(ConfigError::TrafficPatternsNotAList)));
    }

    #[test]
    fn unreadable_config_is_an_error() {
        let res = Config::try_from_path(Path::new("./fixtures/nope.yaml"));
        assert!(matches!(res, Err(ConfigError::Unreadable { .. })));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let res = Config::try_from_str("traffic_patterns: [");
        assert!(matches!(res, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_matrix_file_fails_the_whole_config() -> anyhow::Result<()> {
        let cfg = Config::try_from_path(Path::new("./fixtures/missing_matrix_file.yaml"))?;

        match cfg.traffic_patterns(&FileMatrixLoader) {
            Err(ConfigError::MissingFields { index, fields }) => {
                assert_eq!(index, 1);
                assert_eq!(fields, vec!["matrix_file".to_string()]);
            }
            other => panic!("expected missing fields error, got {:?}", other),
        }

        Ok(())
    }
}
