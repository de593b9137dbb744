use crate::{Config, Error};
use std::fmt;
use std::path::PathBuf;

/// Somewhere a [`Config`] can be read from.
pub trait ConfigSource: fmt::Debug + Send + Sync {
    /// Read, decode and validate the configuration.
    fn load(&self) -> Result<Config, Error>;

    /// Short human readable name, used in logs.
    fn describe(&self) -> String;
}

/// A single TOML file.
#[derive(Debug, Clone)]
pub struct FileSource(pub PathBuf);

impl ConfigSource for FileSource {
    fn load(&self) -> Result<Config, Error> {
        Config::load(&self.0)
    }

    fn describe(&self) -> String {
        format!("file {}", self.0.display())
    }
}

/// Several TOML files merged in order. Fails when none of them exist so the
/// next source in a [`ConfigChain`] gets a chance.
#[derive(Debug, Clone)]
pub struct MergedSource(pub Vec<PathBuf>);

impl ConfigSource for MergedSource {
    fn load(&self) -> Result<Config, Error> {
        if !self.0.iter().any(|path| path.exists()) {
            return Err(Error::NotFound(self.0.clone()));
        }
        Config::load_multiple(&self.0)
    }

    fn describe(&self) -> String {
        format!("merged files {:?}", self.0)
    }
}

/// The built-in configuration. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSource;

impl ConfigSource for DefaultSource {
    fn load(&self) -> Result<Config, Error> {
        Ok(Config::default())
    }

    fn describe(&self) -> String {
        "built-in defaults".to_owned()
    }
}

/// Result of a successful [`ConfigChain::load`].
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    /// The source the configuration came from.
    pub source: String,
    /// Sources tried before it, with the reason each was passed over.
    pub skipped: Vec<(String, Error)>,
}

/// Sources in priority order; the first that loads wins.
#[derive(Debug, Default)]
pub struct ConfigChain {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl ConfigChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Try each source in turn. When every source fails the caller is
    /// expected to keep whatever configuration it already has.
    pub fn load(&self) -> Result<Loaded, Error> {
        let mut skipped = Vec::new();
        for source in &self.sources {
            match source.load() {
                Ok(config) => {
                    return Ok(Loaded {
                        config,
                        source: source.describe(),
                        skipped,
                    });
                }
                Err(err) => skipped.push((source.describe(), err)),
            }
        }
        Err(Error::NoSource)
    }
}
