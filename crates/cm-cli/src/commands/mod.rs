pub mod exec;
pub mod shell;
pub mod tail;

use cm_core::config::Config;
use cm_session::path_resolver::ExecutablePathResolver;
use cm_session::CommandRunner;

/// Load the config file named on the command line, or the default one.
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Runner configured from the `[process]` section.
pub fn runner(config: &Config) -> CommandRunner {
    CommandRunner::new(ExecutablePathResolver::new(), &config.process)
}
