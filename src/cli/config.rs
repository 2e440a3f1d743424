use crate::config::generate::generate_starter_config;
use crate::config::{user_config_path, SYSTEM_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = target_path();
    let written = write_config(&config_content, &config_path)?;
    println!("Config file written to {}", written.display());
    Ok(())
}

/// ~/.config/logferry/config.yml when its directory can be created, else the
/// system location.
fn target_path() -> PathBuf {
    if let Some(user_config) = user_config_path() {
        if let Some(parent) = user_config.parent() {
            match fs::create_dir_all(parent) {
                Ok(_) => return user_config,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
                }
            }
        }
    }

    PathBuf::from(SYSTEM_CONFIG_PATH)
}

/// Write `content` to `path`, refusing to overwrite an existing file.
pub fn write_config(content: &str, path: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, content)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_config_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.yml");

        write_config("producer: ~\n", &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "producer: ~\n");
    }

    #[test]
    fn test_write_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "original").unwrap();

        assert!(write_config("new", &path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
    }
}
