pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{load_config, parse_config, ConfigError};
pub use types::{
    CollectorConfig, Config, MalformedConfig, MalformedLinePolicy, ProducerConfig, RetryConfig,
};

/// Names a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "LOGFERRY_CONFIG";

pub const SYSTEM_CONFIG_PATH: &str = "/etc/logferry/config.yml";

fn env_reference() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// Config text after `$env{NAME}` substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expanded {
    pub text: String,
    /// Referenced names with no value, sorted and deduplicated. Their
    /// references are left in `text` as written.
    pub missing: Vec<String>,
}

/// Substitute `$env{NAME}` references using `lookup`.
pub fn expand_with<F>(text: &str, lookup: F) -> Expanded
where
    F: Fn(&str) -> Option<String>,
{
    let Some(re) = env_reference() else {
        return Expanded {
            text: text.to_string(),
            missing: Vec::new(),
        };
    };

    let mut missing = Vec::new();
    let expanded = re.replace_all(text, |caps: &regex::Captures| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            missing.push(name.to_string());
            caps[0].to_string()
        })
    });
    let text = expanded.into_owned();

    missing.sort();
    missing.dedup();
    Expanded { text, missing }
}

pub fn expand_env_vars(text: &str) -> Expanded {
    expand_with(text, |name| std::env::var(name).ok())
}

/// `~` or a leading `~/` becomes the home directory. `~user` forms are left alone.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) if rest.as_os_str().is_empty() => home,
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/logferry/config.yml"))
}

/// Where a config file is looked for, in precedence order.
///
/// A path given by flag or environment is used whether or not it exists, so a
/// typo surfaces as a load error. The default locations are only used when
/// present.
#[derive(Debug, Clone, Default)]
pub struct ConfigSearch {
    explicit: Option<PathBuf>,
    from_env: Option<PathBuf>,
    defaults: Vec<PathBuf>,
}

impl ConfigSearch {
    /// Search for the running process: `--config`, then `LOGFERRY_CONFIG`,
    /// then the user and system locations.
    pub fn for_process(explicit: Option<&Path>) -> Self {
        let from_env = std::env::var_os(CONFIG_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::new(explicit.map(Path::to_path_buf), from_env, default_locations())
    }

    pub fn new(explicit: Option<PathBuf>, from_env: Option<PathBuf>, defaults: Vec<PathBuf>) -> Self {
        Self {
            explicit,
            from_env,
            defaults,
        }
    }

    pub fn resolve(&self) -> Option<PathBuf> {
        if let Some(path) = self.explicit.as_ref().or(self.from_env.as_ref()) {
            return Some(expand_tilde(path));
        }
        self.defaults.iter().find(|path| path.is_file()).cloned()
    }
}

fn default_locations() -> Vec<PathBuf> {
    user_config_path()
        .into_iter()
        .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG_PATH)))
        .collect()
}

/// The default locations, for "not found" messages.
pub fn searched_locations() -> String {
    default_locations()
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    ConfigSearch::for_process(explicit).resolve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "SPOOL" => Some("/var/spool".to_string()),
            "PORT" => Some("5275".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_substitutes_known_names() {
        let expanded = expand_with("dir: $env{SPOOL}/in\nlisten: 0.0.0.0:$env{PORT}", lookup);
        assert_eq!(expanded.text, "dir: /var/spool/in\nlisten: 0.0.0.0:5275");
        assert!(expanded.missing.is_empty());
    }

    #[test]
    fn test_expand_reports_missing_once() {
        let expanded = expand_with("$env{ROOT}/$env{SPOOL}/$env{ROOT}/$env{AAA}", lookup);
        assert_eq!(expanded.text, "$env{ROOT}//var/spool/$env{ROOT}/$env{AAA}");
        assert_eq!(expanded.missing, vec!["AAA".to_string(), "ROOT".to_string()]);
    }

    #[test]
    fn test_expand_ignores_malformed_references() {
        let text = "$env{1BAD} $env{} $SPOOL env{SPOOL}";
        let expanded = expand_with(text, lookup);
        assert_eq!(expanded.text, text);
        assert!(expanded.missing.is_empty());
    }

    #[test]
    fn test_expand_tilde_forms() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~")), home);
            assert_eq!(expand_tilde(Path::new("~/spool/in")), home.join("spool/in"));
        }
        assert_eq!(expand_tilde(Path::new("~other/x")), Path::new("~other/x"));
        assert_eq!(expand_tilde(Path::new("/srv/~/x")), Path::new("/srv/~/x"));
    }

    #[test]
    fn test_search_prefers_flag_then_env() {
        let dir = TempDir::new().unwrap();
        let present = dir.path().join("present.yml");
        std::fs::write(&present, "collector: {}\n").unwrap();

        let flag = PathBuf::from("/opt/flag.yml");
        let env = PathBuf::from("/opt/env.yml");

        let search = ConfigSearch::new(Some(flag.clone()), Some(env.clone()), vec![present.clone()]);
        assert_eq!(search.resolve(), Some(flag));

        let search = ConfigSearch::new(None, Some(env.clone()), vec![present]);
        assert_eq!(search.resolve(), Some(env));
    }

    #[test]
    fn test_search_takes_first_existing_default() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("user.yml");
        let system = dir.path().join("system.yml");
        std::fs::write(&system, "collector: {}\n").unwrap();
        // A directory at a default location is not a config file
        let shadow = dir.path().join("shadow.yml");
        std::fs::create_dir(&shadow).unwrap();

        let search = ConfigSearch::new(None, None, vec![missing.clone(), shadow, system.clone()]);
        assert_eq!(search.resolve(), Some(system));

        let search = ConfigSearch::new(None, None, vec![missing]);
        assert_eq!(search.resolve(), None);
    }

    #[test]
    fn test_searched_locations_names_system_path() {
        assert!(searched_locations().contains(SYSTEM_CONFIG_PATH));
    }
}
