use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::template::Variables;

/// Top-level keys that never describe a command.
pub const RESERVED_KEYS: [&str; 2] = ["stages", "config"];

pub const DEFAULT_CONFIG_FILE: &str = "req.yaml";
pub const DEFAULT_STAGE: &str = "default";
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Tool-level settings from the `config` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    /// Path of the dotenv file loaded before variables are resolved
    #[serde(default)]
    pub env_file: Option<String>,
    /// Total request timeout in seconds
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Connection timeout in seconds
    #[serde(default)]
    pub conn_timeout: Option<f64>,
}

/// One invocable request template.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandDefinition {
    pub name: String,
    /// The definition exactly as written; substitution runs over this.
    pub raw: Value,
    /// Flags accepted on the command line, each becoming a CLI variable.
    pub params: Vec<String>,
}

impl CommandDefinition {
    #[must_use]
    pub fn new(name: &str, raw: Value) -> Self {
        let params = declared_params(&raw);
        Self {
            name: name.to_string(),
            raw,
            params,
        }
    }

    /// True when the definition carries a non-empty `url`.
    #[must_use]
    pub fn has_url(&self) -> bool {
        match self.raw.get("url") {
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }
}

/// The loaded request file: a command table plus stages and settings.
#[derive(Debug, Clone, Default)]
pub struct ReqFile {
    /// Where the document came from, used in messages.
    pub source: String,
    pub commands: BTreeMap<String, CommandDefinition>,
    pub stages: BTreeMap<String, Variables>,
    pub settings: Settings,
}

impl ReqFile {
    /// Look up a command by name.
    pub fn command(&self, name: &str) -> Result<&CommandDefinition> {
        self.commands.get(name).ok_or_else(|| Error::CommandNotFound {
            command: name.to_string(),
            config_file: self.source.clone(),
        })
    }

    /// Variables for `stage`; empty when the stage is not defined.
    #[must_use]
    pub fn stage_variables(&self, stage: &str) -> Variables {
        self.stages.get(stage).cloned().unwrap_or_default()
    }
}

/// Render a configuration value as a variable string.
#[must_use]
pub fn value_to_var_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn declared_params(raw: &Value) -> Vec<String> {
    match (raw.get("params"), raw.get("param")) {
        (Some(Value::Array(items)), _) => items
            .iter()
            .map(value_to_var_string)
            .filter(|p| !p.is_empty())
            .collect(),
        (_, Some(Value::String(p))) if !p.is_empty() => vec![p.clone()],
        _ => Vec::new(),
    }
}

fn parse_stages(value: Option<&Value>) -> BTreeMap<String, Variables> {
    let Some(Value::Object(stages)) = value else {
        return BTreeMap::new();
    };
    stages
        .iter()
        .map(|(name, vars)| {
            let vars = match vars {
                Value::Object(map) => map
                    .iter()
                    .map(|(k, v)| (k.clone(), value_to_var_string(v)))
                    .collect(),
                _ => Variables::new(),
            };
            (name.clone(), vars)
        })
        .collect()
}

/// Parse a request file from YAML (or JSON) text.
pub fn parse_req_file(text: &str, source: &str) -> Result<ReqFile> {
    let doc: Value = serde_yaml::from_str(text)?;
    let Value::Object(top) = doc else {
        return Err(Error::ConfigParse(format!(
            "{source}: top level must be a mapping of command names"
        )));
    };

    let settings = match top.get("config") {
        Some(Value::Null) | None => Settings::default(),
        Some(cfg) => serde_json::from_value(cfg.clone())
            .map_err(|e| Error::ConfigParse(format!("{source}: invalid 'config' section: {e}")))?,
    };
    let stages = parse_stages(top.get("stages"));
    let commands = top
        .iter()
        .filter(|(name, _)| !RESERVED_KEYS.contains(&name.as_str()))
        .map(|(name, raw)| (name.clone(), CommandDefinition::new(name, raw.clone())))
        .collect();

    Ok(ReqFile {
        source: source.to_string(),
        commands,
        stages,
        settings,
    })
}

/// Resolve `path` against the current directory unless it is absolute.
#[must_use]
pub fn resolve_path(path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(p))
            .unwrap_or_else(|_| p.to_path_buf())
    }
}

/// Load and parse the request file at `path`.
pub fn load_req_file(path: &str) -> Result<ReqFile> {
    let full = resolve_path(path);
    let text = match std::fs::read_to_string(&full) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ConfigNotFound(full.display().to_string()));
        }
        Err(e) => {
            return Err(Error::ConfigParse(format!(
                "Error loading config file '{}': {e}",
                full.display()
            )));
        }
    };
    log::debug!("loaded config file {}", full.display());
    parse_req_file(&text, path)
}

/// Load the dotenv file named by `settings` (or `.env`) into the process
/// environment. Variables already set are left alone.
///
/// Returns the path that was loaded, if any.
pub fn load_env_file(settings: &Settings) -> Result<Option<PathBuf>> {
    let explicit = settings.env_file.is_some();
    let path = resolve_path(settings.env_file.as_deref().unwrap_or(DEFAULT_ENV_FILE));
    match dotenvy::from_path(&path) {
        Ok(()) => {
            log::debug!("loaded env file {}", path.display());
            Ok(Some(path))
        }
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            if explicit {
                log::warn!("env file {} not found", path.display());
            }
            Ok(None)
        }
        Err(e) => Err(Error::ConfigParse(format!(
            "Error loading env file '{}': {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
config:
  env_file: .env.test
  timeout: 5

stages:
  default:
    host: api.example.com
    id: 42
    debug: true
    empty: ~
  prod:
    host: prod.example.com

users:
  url: https://{{host}}/users/{{id}}
  value: $.name

create:
  url: https://{{host}}/users
  method: POST
  params: [name, email]
  body:
    name: "{{name}}"

legacy:
  url: https://{{host}}/legacy
  param: token

broken:
  method: GET
"#;

    // ==================== parse_req_file tests ====================

    #[test]
    fn test_parse_skips_reserved_keys() {
        let file = parse_req_file(SAMPLE, "req.yaml").unwrap();
        let names: Vec<&str> = file.commands.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["broken", "create", "legacy", "users"]);
    }

    #[test]
    fn test_parse_params_array() {
        let file = parse_req_file(SAMPLE, "req.yaml").unwrap();
        assert_eq!(file.commands["create"].params, vec!["name", "email"]);
    }

    #[test]
    fn test_parse_legacy_param() {
        let file = parse_req_file(SAMPLE, "req.yaml").unwrap();
        assert_eq!(file.commands["legacy"].params, vec!["token"]);
    }

    #[test]
    fn test_params_array_wins_over_param() {
        let def = CommandDefinition::new("x", json!({"params": ["a"], "param": "b"}));
        assert_eq!(def.params, vec!["a"]);
    }

    #[test]
    fn test_parse_settings() {
        let file = parse_req_file(SAMPLE, "req.yaml").unwrap();
        assert_eq!(file.settings.env_file.as_deref(), Some(".env.test"));
        assert_eq!(file.settings.timeout, Some(5.0));
        assert_eq!(file.settings.conn_timeout, None);
    }

    #[test]
    fn test_parse_stage_values_rendered_as_strings() {
        let file = parse_req_file(SAMPLE, "req.yaml").unwrap();
        let vars = file.stage_variables("default");
        assert_eq!(vars.get("id"), Some(&"42".to_string()));
        assert_eq!(vars.get("debug"), Some(&"true".to_string()));
        assert_eq!(vars.get("empty"), Some(&String::new()));
    }

    #[test]
    fn test_stage_variables_unknown_stage_is_empty() {
        let file = parse_req_file(SAMPLE, "req.yaml").unwrap();
        assert!(file.stage_variables("staging").is_empty());
    }

    #[test]
    fn test_stage_variables_without_stages_section() {
        let file = parse_req_file("ping:\n  url: http://localhost\n", "req.yaml").unwrap();
        assert!(file.stage_variables(DEFAULT_STAGE).is_empty());
    }

    #[test]
    fn test_parse_non_mapping_top_level() {
        let err = parse_req_file("- a\n- b\n", "req.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = parse_req_file("users: [not: valid: yaml", "req.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_parse_json_document() {
        let file = parse_req_file(r#"{"ping": {"url": "http://localhost"}}"#, "req.json").unwrap();
        assert!(file.commands["ping"].has_url());
    }

    // ==================== command lookup tests ====================

    #[test]
    fn test_command_not_found_names_command() {
        let file = parse_req_file(SAMPLE, "req.yaml").unwrap();
        let err = file.command("nope").unwrap_err();
        assert_eq!(err.to_string(), "Command 'nope' not found in req.yaml");
    }

    #[test]
    fn test_has_url() {
        let file = parse_req_file(SAMPLE, "req.yaml").unwrap();
        assert!(file.commands["users"].has_url());
        assert!(!file.commands["broken"].has_url());
        assert!(!CommandDefinition::new("s", json!("text")).has_url());
        assert!(!CommandDefinition::new("e", json!({"url": ""})).has_url());
    }

    // ==================== value_to_var_string tests ====================

    #[test]
    fn test_value_to_var_string() {
        assert_eq!(value_to_var_string(&json!("s")), "s");
        assert_eq!(value_to_var_string(&json!(1.5)), "1.5");
        assert_eq!(value_to_var_string(&json!(false)), "false");
        assert_eq!(value_to_var_string(&Value::Null), "");
        assert_eq!(value_to_var_string(&json!([1, 2])), "[1,2]");
    }

    // ==================== file loading tests ====================

    #[test]
    fn test_load_req_file_missing() {
        let err = load_req_file("/definitely/not/here/req.yaml").unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_req_file_from_disk() {
        let path = std::env::temp_dir().join(format!("reqlib-mapping-{}.yaml", std::process::id()));
        std::fs::write(&path, "ping:\n  url: http://localhost/ping\n").unwrap();
        let file = load_req_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(file.commands.contains_key("ping"));
    }

    #[test]
    fn test_load_env_file_missing_explicit_is_ok() {
        let settings = Settings {
            env_file: Some("/definitely/not/here/.env".to_string()),
            ..Settings::default()
        };
        assert_eq!(load_env_file(&settings).unwrap(), None);
    }

    #[test]
    fn test_load_env_file_sets_unset_variables() {
        let path = std::env::temp_dir().join(format!("reqlib-env-{}.env", std::process::id()));
        std::fs::write(&path, "REQLIB_TEST_FROM_DOTENV=loaded\n").unwrap();
        let settings = Settings {
            env_file: Some(path.to_str().unwrap().to_string()),
            ..Settings::default()
        };
        let loaded = load_env_file(&settings).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(loaded.is_some());
        assert_eq!(
            std::env::var("REQLIB_TEST_FROM_DOTENV").as_deref(),
            Ok("loaded")
        );
    }
}
