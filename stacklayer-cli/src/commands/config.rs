//! Configuration management CLI commands.
//!
//! Provides `config path`, `config init` and `config show` for locating,
//! creating and inspecting `~/.stacklayer/config.ini`.

use clap::Subcommand;
use std::path::Path;
use stacklayer::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Create the configuration file with default values
    ///
    /// An existing file is left untouched.
    Init,

    /// Print the effective configuration
    ///
    /// Values missing from the file are shown with their defaults.
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    let path = config_file_path();
    match command {
        ConfigCommands::Path => run_path(&path),
        ConfigCommands::Init => run_init(&path),
        ConfigCommands::Show => run_show(&path),
    }
}

/// Show the configuration file path.
fn run_path(path: &Path) -> Result<(), CliError> {
    println!("{}", path.display());
    Ok(())
}

/// Create the configuration file.
fn run_init(path: &Path) -> Result<(), CliError> {
    if ConfigFile::ensure_exists_at(path)? {
        println!("Created configuration file: {}", path.display());
    } else {
        println!("Configuration file already exists: {}", path.display());
    }
    Ok(())
}

/// Print the effective configuration.
fn run_show(path: &Path) -> Result<(), CliError> {
    print!("{}", render(path)?);
    Ok(())
}

fn render(path: &Path) -> Result<String, CliError> {
    let config = ConfigFile::load_from(path)?;
    let origin = if path.exists() {
        format!("# Loaded from {}\n", path.display())
    } else {
        format!("# {} not found; showing defaults\n", path.display())
    };
    Ok(origin + &config.to_config_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_file_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");

        run_init(&path).unwrap();
        assert!(path.exists());

        fs::write(&path, "[executor]\nmax_concurrent_tasks = 4\n").unwrap();
        run_init(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "[executor]\nmax_concurrent_tasks = 4\n"
        );
    }

    #[test]
    fn test_render_missing_file_shows_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.ini");

        let text = render(&path).unwrap();

        assert!(text.contains("showing defaults"));
        assert!(text.contains("[executor]"));
        assert!(!path.exists());
    }

    #[test]
    fn test_render_reflects_file_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        fs::write(&path, "[executor]\nmax_concurrent_tasks = 4\n").unwrap();

        let text = render(&path).unwrap();

        assert!(text.starts_with("# Loaded from"));
        assert!(text.contains("max_concurrent_tasks = 4"));
    }

    #[test]
    fn test_render_rejects_invalid_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.ini");
        fs::write(&path, "[executor]\nmax_concurrent_tasks = many\n").unwrap();

        assert!(matches!(render(&path), Err(CliError::ConfigFile(_))));
    }
}
