use crate::utils::config::LogConfig;
use log::LevelFilter;

/// Routes the `log` facade to the configured file, or stderr.
pub fn init(config: &LogConfig) -> Result<(), std::io::Error> {
    let level = parse_level(&config.level);

    match &config.file {
        Some(path) => simple_logging::log_to_file(path, level),
        None => {
            simple_logging::log_to_stderr(level);
            Ok(())
        }
    }
}

fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}
