// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Event loop options.
mod loop_config {
    pub const SECTION_NAME: &str = "event_loop";
    // Maximum number of readiness events harvested per poller wait.
    pub const BATCH_SIZE: &str = "batch_size";
    // Forces bounded poller waits instead of blocking ones.
    pub const BUSY_WAIT: &str = "busy_wait";
}

/// Default cap on readiness events harvested per poller wait.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// By default the loop is allowed to block on the poller when it has nothing else to do.
pub const DEFAULT_BUSY_WAIT: bool = false;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Event loop configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Common associated functions for configuration objects.
impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        let config: Vec<Yaml> = match YamlLoader::load_from_str(&config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("failed to parse configuration file: {:?}", e);
                error!("new(): {:?}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "wrong number of config objects")),
        };

        Ok(Self(config_obj.clone()))
    }

    /// Reads the maximum number of readiness events harvested per poller wait. The environment variable takes
    /// precedence over the underlying configuration file; absent both, the default applies.
    pub fn batch_size(&self) -> Result<usize, Fail> {
        if let Some(batch_size) = Self::get_typed_env_option(loop_config::BATCH_SIZE)? {
            return Self::check_batch_size(batch_size);
        }
        let section: &Yaml = match self.get_loop_config() {
            Ok(section) => section,
            Err(_) => return Ok(DEFAULT_BATCH_SIZE),
        };
        match Self::get_option(section, loop_config::BATCH_SIZE) {
            Ok(value) => match value.as_i64() {
                Some(batch_size) if batch_size > 0 => Self::check_batch_size(batch_size as usize),
                _ => {
                    let cause: String = format!("parameter {:?} has unexpected type", loop_config::BATCH_SIZE);
                    error!("batch_size(): {:?}", cause);
                    Err(Fail::new(libc::EINVAL, &cause))
                },
            },
            Err(_) => Ok(DEFAULT_BATCH_SIZE),
        }
    }

    /// Reads whether the loop must use bounded poller waits. The environment variable takes precedence over the
    /// underlying configuration file; absent both, the default applies.
    pub fn busy_wait(&self) -> Result<bool, Fail> {
        if let Some(busy_wait) = Self::get_typed_env_option(loop_config::BUSY_WAIT)? {
            return Ok(busy_wait);
        }
        let section: &Yaml = match self.get_loop_config() {
            Ok(section) => section,
            Err(_) => return Ok(DEFAULT_BUSY_WAIT),
        };
        match Self::get_option(section, loop_config::BUSY_WAIT) {
            Ok(value) => match value.as_bool() {
                Some(busy_wait) => Ok(busy_wait),
                None => {
                    let cause: String = format!("parameter {:?} has unexpected type", loop_config::BUSY_WAIT);
                    error!("busy_wait(): {:?}", cause);
                    Err(Fail::new(libc::EINVAL, &cause))
                },
            },
            Err(_) => Ok(DEFAULT_BUSY_WAIT),
        }
    }

    fn get_loop_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, loop_config::SECTION_NAME)
    }

    fn check_batch_size(batch_size: usize) -> Result<usize, Fail> {
        if batch_size == 0 {
            let cause: String = format!("parameter {:?} must be positive", loop_config::BATCH_SIZE);
            error!("check_batch_size(): {:?}", cause);
            return Err(Fail::new(libc::ERANGE, &cause));
        }
        Ok(batch_size)
    }

    /// Index `yaml` to find the subsection at `index`, validating that it is a hash.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let message: String = format!("parameter {:?} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, &message))
            },
        }
    }

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option {:?}", index);
                Err(Fail::new(libc::EINVAL, &message))
            },
            value => Ok(value),
        }
    }

    /// Reads an option from the environment. The variable name is the upper-cased option name.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            }
            let message: String = format!("parameter {:?} has unexpected type", index);
            return Err(Fail::new(libc::EINVAL, &message));
        }
        Ok(None)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::Config;
    use ::anyhow::Result;
    use ::std::{
        fs,
        path::PathBuf,
        sync::{
            Mutex,
            MutexGuard,
        },
    };
    use ::yaml_rust::YamlLoader;

    /// Tests run concurrently, but environment overrides are process-wide.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn config_from_str(text: &str) -> Result<Config> {
        let mut docs = YamlLoader::load_from_str(text)?;
        Ok(Config(docs.remove(0)))
    }

    #[test]
    fn config_reads_loop_options() -> Result<()> {
        let _guard: MutexGuard<'static, ()> = lock_env();
        let config: Config = config_from_str("event_loop:\n  batch_size: 16\n  busy_wait: true\n")?;
        crate::ensure_eq!(config.batch_size().unwrap(), 16);
        crate::ensure_eq!(config.busy_wait().unwrap(), true);
        Ok(())
    }

    #[test]
    fn config_defaults_missing_options() -> Result<()> {
        let _guard: MutexGuard<'static, ()> = lock_env();
        let config: Config = config_from_str("event_loop:\n  batch_size: 16\n")?;
        crate::ensure_eq!(config.busy_wait().unwrap(), false);

        let config: Config = config_from_str("unrelated: 1\n")?;
        crate::ensure_eq!(config.batch_size().unwrap(), super::DEFAULT_BATCH_SIZE);
        crate::ensure_eq!(config.busy_wait().unwrap(), super::DEFAULT_BUSY_WAIT);
        Ok(())
    }

    #[test]
    fn config_rejects_mistyped_options() -> Result<()> {
        let _guard: MutexGuard<'static, ()> = lock_env();
        let config: Config = config_from_str("event_loop:\n  batch_size: nope\n")?;
        crate::ensure_eq!(config.batch_size().is_err(), true);
        Ok(())
    }

    #[test]
    fn config_env_override_takes_precedence() -> Result<()> {
        let _guard: MutexGuard<'static, ()> = lock_env();
        let config: Config = config_from_str("event_loop:\n  batch_size: 16\n")?;
        ::std::env::set_var("BATCH_SIZE", "8");
        let batch_size = config.batch_size();
        ::std::env::remove_var("BATCH_SIZE");
        crate::ensure_eq!(batch_size.unwrap(), 8);
        Ok(())
    }

    #[test]
    fn config_reads_file() -> Result<()> {
        let _guard: MutexGuard<'static, ()> = lock_env();
        let mut path: PathBuf = ::std::env::temp_dir();
        path.push("chainloop-config-test.yaml");
        fs::write(&path, "event_loop:\n  batch_size: 4\n")?;
        let config: Config = match Config::new(path.to_str().unwrap()) {
            Ok(config) => config,
            Err(e) => anyhow::bail!("failed to read config: {:?}", e),
        };
        crate::ensure_eq!(config.batch_size().unwrap(), 4);
        fs::remove_file(&path)?;
        Ok(())
    }
}
