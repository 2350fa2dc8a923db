//! Configuration for the `pty-relay` binary
//!
//! Settings come from, in increasing priority:
//! - built-in defaults
//! - a TOML file (`--config FILE`, else `$XDG_CONFIG_HOME/pty-session/relay.toml`)
//! - environment variables (`PTY_RELAY_PROGRAM`, `PTY_RELAY_CWD`)
//! - command-line overrides

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pty::{SpawnOptions, WindowSize};

/// Program used when neither config nor `$SHELL` names one
const FALLBACK_PROGRAM: &str = "/bin/sh";

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config error in '{field}': {message}")]
    Invalid { field: String, message: String },
}

/// Terminal geometry; unset values follow the caller's terminal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// The program to run on the PTY
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Defaults to `$SHELL`, then `/bin/sh`
    pub program: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// One environment assignment; order in the file is kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Relay configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub terminal: TerminalConfig,
    pub command: CommandConfig,
    pub env: Vec<EnvVar>,
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cols: Option<u16>,
    pub rows: Option<u16>,
    pub cwd: Option<PathBuf>,
    /// Appended after the file's assignments, so they win
    pub env: Vec<EnvVar>,
    /// Program followed by its arguments; replaces the file's command
    pub command: Vec<String>,
}

impl RelayConfig {
    /// Load configuration with precedence: CLI > env > file > defaults
    ///
    /// An explicitly given file must exist; the default file may be absent.
    pub fn load(config_path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_config_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env_vars(|name| env::var_os(name));
        config.apply_overrides(overrides);
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "loaded relay config");
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pty-session").join("relay.toml"))
    }

    /// Apply `PTY_RELAY_PROGRAM` and `PTY_RELAY_CWD` as seen through `var`
    fn apply_env_vars(&mut self, var: impl Fn(&str) -> Option<OsString>) {
        if let Some(program) = var("PTY_RELAY_PROGRAM").and_then(|p| p.into_string().ok()) {
            self.command.program = Some(program);
            self.command.args.clear();
        }
        if let Some(cwd) = var("PTY_RELAY_CWD") {
            self.command.cwd = Some(PathBuf::from(cwd));
        }
    }

    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(cols) = overrides.cols {
            self.terminal.cols = Some(cols);
        }
        if let Some(rows) = overrides.rows {
            self.terminal.rows = Some(rows);
        }
        if let Some(cwd) = &overrides.cwd {
            self.command.cwd = Some(cwd.clone());
        }
        if let Some((program, args)) = overrides.command.split_first() {
            self.command.program = Some(program.clone());
            self.command.args = args.to_vec();
        }
        self.env.extend(overrides.env.iter().cloned());
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.terminal.cols == Some(0) {
            return Err(invalid("terminal.cols", "must be at least 1"));
        }
        if self.terminal.rows == Some(0) {
            return Err(invalid("terminal.rows", "must be at least 1"));
        }
        if matches!(&self.command.program, Some(p) if p.is_empty()) {
            return Err(invalid("command.program", "must not be empty"));
        }
        for (i, var) in self.env.iter().enumerate() {
            if var.name.is_empty() || var.name.contains('=') {
                return Err(invalid(
                    &format!("env[{i}].name"),
                    &format!("'{}' is not a valid variable name", var.name),
                ));
            }
        }
        Ok(())
    }

    /// The program to run, falling back to `$SHELL` and then `/bin/sh`
    pub fn program(&self) -> String {
        self.command
            .program
            .clone()
            .or_else(|| env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| FALLBACK_PROGRAM.to_string())
    }

    /// Geometry to spawn with; unset dimensions come from `fallback`
    pub fn window_size(&self, fallback: WindowSize) -> WindowSize {
        WindowSize::new(
            self.terminal.cols.unwrap_or(fallback.cols),
            self.terminal.rows.unwrap_or(fallback.rows),
        )
    }

    /// Build the spawn request described by this configuration
    pub fn spawn_options(&self, fallback: WindowSize) -> SpawnOptions {
        let mut options = SpawnOptions::new(self.program())
            .args(&self.command.args)
            .envs(self.env.iter().map(|var| (&var.name, &var.value)))
            .size(self.window_size(fallback));
        if let Some(cwd) = &self.command.cwd {
            options = options.current_dir(cwd);
        }
        options
    }
}

/// Parse a `NAME=VALUE` assignment
pub fn parse_env_assignment(s: &str) -> Result<EnvVar, String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok(EnvVar {
            name: name.to_string(),
            value: value.to_string(),
        }),
        _ => Err(format!("expected NAME=VALUE, got '{s}'")),
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::ffi::OsStr;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_full_file() {
        let file = write_config(
            r#"
[terminal]
cols = 120
rows = 40

[command]
program = "/bin/bash"
args = ["-l"]
cwd = "/tmp"

[[env]]
name = "TERM"
value = "xterm-256color"

[[env]]
name = "LANG"
value = "C.UTF-8"
"#,
        );

        let config = RelayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.terminal.cols, Some(120));
        assert_eq!(config.terminal.rows, Some(40));
        assert_eq!(config.command.program.as_deref(), Some("/bin/bash"));
        assert_eq!(config.command.args, vec!["-l"]);
        assert_eq!(config.command.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(config.env.len(), 2);
        assert_eq!(config.env[0].name, "TERM");
        assert_eq!(config.env[1].name, "LANG");
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = write_config("");
        let config = RelayConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_parse_error_names_file() {
        let file = write_config("[terminal]\ncols = \"wide\"\n");
        let err = RelayConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = RelayConfig::load(
            Some(Path::new("/nonexistent/pty-session/relay.toml")),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let file = write_config(
            r#"
[terminal]
cols = 120
rows = 40

[command]
program = "/bin/bash"
args = ["-l"]

[[env]]
name = "MODE"
value = "file"
"#,
        );

        let overrides = Overrides {
            cols: Some(100),
            command: vec!["/bin/echo".into(), "hi".into()],
            env: vec![EnvVar {
                name: "MODE".into(),
                value: "cli".into(),
            }],
            ..Overrides::default()
        };

        let config = RelayConfig::load(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.terminal.cols, Some(100));
        assert_eq!(config.terminal.rows, Some(40));
        assert_eq!(config.program(), "/bin/echo");
        assert_eq!(config.command.args, vec!["hi"]);
        // The CLI assignment comes last, so it wins in the child
        assert_eq!(config.env.last().unwrap().value, "cli");
    }

    #[test]
    fn test_env_layer_sits_between_file_and_cli() {
        let file = write_config(
            r#"
[command]
program = "/bin/bash"
args = ["-l"]
cwd = "/srv"
"#,
        );
        let mut config = RelayConfig::load_from_file(file.path()).unwrap();

        let vars: HashMap<&str, &str> =
            HashMap::from([("PTY_RELAY_PROGRAM", "/bin/zsh"), ("PTY_RELAY_CWD", "/tmp")]);
        config.apply_env_vars(|name| vars.get(name).map(OsString::from));

        // The file's arguments belonged to the file's program
        assert_eq!(config.program(), "/bin/zsh");
        assert!(config.command.args.is_empty());
        assert_eq!(config.command.cwd, Some(PathBuf::from("/tmp")));

        config.apply_overrides(&Overrides {
            cwd: Some(PathBuf::from("/var")),
            command: vec!["/bin/dash".into()],
            ..Overrides::default()
        });
        assert_eq!(config.program(), "/bin/dash");
        assert_eq!(config.command.cwd, Some(PathBuf::from("/var")));
    }

    #[test]
    fn test_unset_env_layer_keeps_file_values() {
        let mut config = RelayConfig {
            command: CommandConfig {
                program: Some("/bin/bash".into()),
                args: vec!["-l".into()],
                cwd: None,
            },
            ..RelayConfig::default()
        };
        config.apply_env_vars(|_| None);
        assert_eq!(config.program(), "/bin/bash");
        assert_eq!(config.command.args, vec!["-l"]);
        assert_eq!(config.command.cwd, None);
    }

    #[test]
    fn test_validation() {
        let file = write_config("[terminal]\ncols = 0\n");
        let err = RelayConfig::load(Some(file.path()), &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "terminal.cols"));

        let file = write_config("[[env]]\nname = \"A=B\"\nvalue = \"x\"\n");
        let err = RelayConfig::load(Some(file.path()), &Overrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_spawn_options() {
        let config = RelayConfig {
            terminal: TerminalConfig {
                cols: Some(100),
                rows: None,
            },
            command: CommandConfig {
                program: Some("/bin/cat".into()),
                args: vec!["-u".into()],
                cwd: Some(PathBuf::from("/tmp")),
            },
            env: vec![EnvVar {
                name: "A".into(),
                value: "1".into(),
            }],
        };

        let options = config.spawn_options(WindowSize::new(80, 30));
        assert_eq!(options.get_program(), OsStr::new("/bin/cat"));
        assert_eq!(options.get_args().collect::<Vec<_>>(), vec![OsStr::new("-u")]);
        assert_eq!(options.get_size(), WindowSize::new(100, 30));
        assert_eq!(options.get_current_dir(), Some(Path::new("/tmp")));
        assert_eq!(
            options.get_envs().collect::<Vec<_>>(),
            vec![(OsStr::new("A"), OsStr::new("1"))]
        );
    }

    #[test]
    fn test_parse_env_assignment() {
        let var = parse_env_assignment("FOO=bar=baz").unwrap();
        assert_eq!(var.name, "FOO");
        assert_eq!(var.value, "bar=baz");
        assert!(parse_env_assignment("FOO").is_err());
        assert!(parse_env_assignment("=bar").is_err());
    }
}
