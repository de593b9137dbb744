#![forbid(unsafe_code)]

mod command;
mod error;
mod monitor;
mod port;
mod sources;

pub use command::Commands;
pub use error::Error;
pub use monitor::Monitor;
pub use port::{PortSpec, Ports};
pub use sources::{ConfigChain, ConfigSource, DefaultSource, FileSource, Loaded, MergedSource};

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub command: Commands,
    pub port: Ports,
    pub monitor: Monitor,
}

impl Config {
    /// Load configuration from a TOML file. Missing fields are filled with defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml_edit::de::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let toml = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from multiple TOML files. Later files override earlier ones.
    pub fn load_multiple<T, U>(paths: U) -> Result<Self, Error>
    where
        T: AsRef<Path>,
        U: IntoIterator<Item = T>,
    {
        let mut merged = toml_edit::DocumentMut::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let doc: toml_edit::DocumentMut = text.parse()?;
            merge_document(&mut merged, doc);
        }
        let config: Config = toml_edit::de::from_str(&merged.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Check what serde cannot: every command pattern must compile.
    pub fn validate(&self) -> Result<(), Error> {
        for pattern in self.command.patterns() {
            regex::Regex::new(pattern).map_err(|source| Error::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            })?;
        }
        Ok(())
    }
}

fn merge_document(target: &mut toml_edit::DocumentMut, source: toml_edit::DocumentMut) {
    for (key, item) in source.iter() {
        merge_item(
            target.entry(key).or_insert(toml_edit::Item::None),
            item.clone(),
        );
    }
}

fn merge_item(target: &mut toml_edit::Item, source: toml_edit::Item) {
    use toml_edit::Item;
    match (target, source) {
        (Item::Table(target_table), Item::Table(source_table)) => {
            for (key, item) in source_table.iter() {
                merge_item(target_table.entry(key).or_insert(Item::None), item.clone());
            }
        }
        (Item::ArrayOfTables(target_array), Item::ArrayOfTables(source_array)) => {
            for table in source_array.iter() {
                target_array.push(table.clone());
            }
        }
        (target_item, source_item) => {
            *target_item = source_item;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.port.excludes = vec![PortSpec::Single(22), PortSpec::Range(9000, 9999)];
        config.command.includes = vec!["nginx".to_owned()];
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn load_multiple_merges() {
        let dir = tempdir().unwrap();
        let path1 = dir.path().join("a.toml");
        let path2 = dir.path().join("b.toml");

        std::fs::write(
            &path1,
            "[monitor]\ncycle = 60\n[command]\nincludes = [\"java\"]\n",
        )
        .unwrap();
        std::fs::write(&path2, "[port]\nexcludes = [\"1-1024\"]\n").unwrap();

        let cfg = Config::load_multiple([path1, path2]).unwrap();
        assert_eq!(cfg.monitor.cycle, Duration::from_secs(60));
        assert_eq!(cfg.monitor.command_timeout, Duration::from_secs(10));
        assert_eq!(cfg.command.includes, vec!["java".to_owned()]);
        assert_eq!(cfg.command.excludes, Commands::default().excludes);
        assert_eq!(cfg.port.excludes, vec![PortSpec::Range(1, 1024)]);
    }

    #[test]
    fn later_file_overrides_earlier() {
        let dir = tempdir().unwrap();
        let path1 = dir.path().join("a.toml");
        let path2 = dir.path().join("b.toml");

        std::fs::write(&path1, "[monitor]\ncycle = 60\n").unwrap();
        std::fs::write(&path2, "[monitor]\ncycle = 5\n").unwrap();

        let cfg = Config::load_multiple([path1, path2]).unwrap();
        assert_eq!(cfg.monitor.cycle, Duration::from_secs(5));
    }

    #[test]
    fn default_excludes_kernel_threads() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        let re = regex::Regex::new(&config.command.excludes[0]).unwrap();
        assert!(re.is_match("[kworker/0:1]"));
        assert!(!re.is_match("/usr/bin/python3 [x]"));
    }
}
