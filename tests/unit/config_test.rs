use ai_assistant::config::{Config, ConfigError};
use ai_assistant::providers::{ChatMessage, ProviderKind};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

// The process environment is shared by every test in this binary
static ENV_LOCK: Mutex<()> = Mutex::new(());

const ENV_VARS: [&str; 6] = [
    "OPENAI_API_KEY",
    "OPENAI_MODEL",
    "OPENAI_DEFAULT_ROLE",
    "ASSISTANT__OPENAI_API_KEY",
    "ASSISTANT__OPENAI_MODEL",
    "ASSISTANT__OPENAI_TIMEOUT_SECS",
];

/// Holds the lock and clears the variables again when dropped.
struct EnvGuard {
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    fn set(vars: &[(&str, &str)]) -> Self {
        let lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        for name in ENV_VARS {
            std::env::remove_var(name);
        }
        for (name, value) in vars {
            std::env::set_var(name, value);
        }
        Self { _lock: lock }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for name in ENV_VARS {
            std::env::remove_var(name);
        }
    }
}

fn toml_file(lines: &[&str]) -> NamedTempFile {
    let mut file: NamedTempFile = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

fn load(path: &Path) -> Result<Config, ConfigError> {
    Config::load_from_file(path)
}

#[test]
fn test_from_toml_uses_defaults_for_missing_fields() {
    let cfg = Config::from_toml_str("database_url = \"sqlite::memory:\"").unwrap();

    assert_eq!(cfg.database_url, "sqlite::memory:");
    assert_eq!(cfg.max_connections, 5);
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.provider, ProviderKind::OpenAi);
    assert_eq!(cfg.openai_api_base, "https://api.openai.com");
    assert_eq!(cfg.openai_timeout_secs, 600);
    assert!(cfg.openai_api_key.is_none());
    assert!(cfg.openai_default_role.is_none());
}

#[test]
fn test_from_toml_reads_provider_settings() {
    let cfg = Config::from_toml_str(
        r#"
        time_zone = "+09:00"
        openai_api_key = "sk-file"
        openai_model = "gpt-4o"

        [openai_default_role]
        role = "developer"
        content = "You are a helpful assistant."
        "#,
    )
    .unwrap();

    assert_eq!(cfg.time_zone_offset().local_minus_utc(), 9 * 3600);
    assert_eq!(cfg.openai_model.as_deref(), Some("gpt-4o"));
    assert_eq!(
        cfg.openai_default_role,
        Some(ChatMessage::new("developer", "You are a helpful assistant."))
    );
}

#[test]
fn test_invalid_time_zone_rejected() {
    let result = Config::from_toml_str("time_zone = \"Mars/Olympus\"");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_max_connections_out_of_range_rejected() {
    let result = Config::from_toml_str("max_connections = 0");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));

    let result = Config::from_toml_str("max_connections = 101");
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_unknown_provider_rejected() {
    let result = Config::from_toml_str("provider = \"llamafile\"");
    assert!(matches!(result, Err(ConfigError::Source(_))));
}

#[test]
fn test_load_from_file() {
    let _env = EnvGuard::set(&[]);
    let file = toml_file(&["log_level = \"debug\"", "openai_timeout_secs = 30"]);

    let cfg = load(file.path()).unwrap();
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.openai_timeout_secs, 30);
    assert!(cfg.openai_api_key.is_none());
}

#[test]
fn test_load_from_missing_file_fails() {
    let _env = EnvGuard::set(&[]);
    let dir = tempfile::tempdir().unwrap();
    let result = load(&dir.path().join("absent.toml"));
    assert!(result.is_err());
}

#[test]
fn test_openai_env_vars_are_read() {
    let _env = EnvGuard::set(&[
        ("OPENAI_API_KEY", "sk-env"),
        ("OPENAI_MODEL", "gpt-4o"),
        (
            "OPENAI_DEFAULT_ROLE",
            r#"{"role": "developer", "content": "Be nice"}"#,
        ),
        ("ASSISTANT__OPENAI_TIMEOUT_SECS", "7"),
    ]);
    let file = toml_file(&["openai_timeout_secs = 30"]);

    let cfg = load(file.path()).unwrap();
    assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-env"));
    assert_eq!(cfg.openai_model.as_deref(), Some("gpt-4o"));
    assert_eq!(cfg.openai_timeout_secs, 7);
    assert_eq!(
        cfg.openai_default_role,
        Some(ChatMessage::new("developer", "Be nice"))
    );
}

#[test]
fn test_plain_openai_vars_win_over_prefixed_and_file() {
    let _env = EnvGuard::set(&[
        ("ASSISTANT__OPENAI_MODEL", "from-prefixed"),
        ("ASSISTANT__OPENAI_API_KEY", "sk-prefixed"),
        ("OPENAI_MODEL", "from-plain"),
        (
            "OPENAI_DEFAULT_ROLE",
            r#"{"role": "system", "content": "from env"}"#,
        ),
    ]);
    let file = toml_file(&[
        "openai_model = \"from-file\"",
        "openai_api_key = \"sk-file\"",
        "[openai_default_role]",
        "role = \"developer\"",
        "content = \"from file\"",
    ]);

    let cfg = load(file.path()).unwrap();
    assert_eq!(cfg.openai_model.as_deref(), Some("from-plain"));
    // No plain OPENAI_API_KEY, so the prefixed variable beats the file
    assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-prefixed"));
    assert_eq!(
        cfg.openai_default_role,
        Some(ChatMessage::new("system", "from env"))
    );
}

#[test]
fn test_malformed_default_role_rejected() {
    let _env = EnvGuard::set(&[("OPENAI_DEFAULT_ROLE", "not json")]);
    let file = toml_file(&["log_level = \"info\""]);

    let result = load(file.path());
    match result {
        Err(ConfigError::DefaultRole(err)) => {
            let message = ConfigError::DefaultRole(err).to_string();
            assert!(message.starts_with("OPENAI_DEFAULT_ROLE is not a valid"));
        }
        other => panic!("expected default role error, got {:?}", other),
    }
}

#[test]
fn test_blank_default_role_ignored() {
    let _env = EnvGuard::set(&[("OPENAI_DEFAULT_ROLE", "   ")]);
    let file = toml_file(&[]);

    let cfg = load(file.path()).unwrap();
    assert!(cfg.openai_default_role.is_none());
}
