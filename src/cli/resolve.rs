//! Locating the espanso executable and composing shell command lines.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable that pins the executable, ahead of everything else.
pub const ENV_OVERRIDE: &str = "ESPANSO_CLI";

/// Used when neither the override nor a PATH search yields anything.
pub const DEFAULT_EXECUTABLE: &str = "espanso";

/// Base names treated as "the espanso executable" in a leading argument.
pub const KNOWN_NAMES: &[&str] = &["espanso", "espanso.exe", "espanso.cmd"];

#[cfg(windows)]
const CANDIDATES: &[&str] = &["espanso.exe", "espanso.cmd", "espanso"];
#[cfg(not(windows))]
const CANDIDATES: &[&str] = &["espanso"];

/// Resolve the executable from the process environment and `PATH`.
pub fn resolve_executable(configured: Option<&str>) -> String {
    resolve_with(env::var_os(ENV_OVERRIDE), configured, find_in_path)
}

/// Resolution with the environment and search injected.
///
/// Precedence: environment override, configured path, first candidate found
/// by `search`, then the bare default name.
pub fn resolve_with<F>(env_override: Option<OsString>, configured: Option<&str>, search: F) -> String
where
    F: Fn(&str) -> Option<PathBuf>,
{
    if let Some(value) = env_override {
        let value = value.to_string_lossy().trim().to_string();
        if !value.is_empty() {
            return value;
        }
    }

    if let Some(path) = configured.map(str::trim).filter(|p| !p.is_empty()) {
        return path.to_string();
    }

    CANDIDATES
        .iter()
        .find_map(|name| search(name))
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string())
}

/// First executable called `name` on `PATH` (honours `PATHEXT` on Windows).
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// `.cmd` and `.bat` scripts can only be launched through the shell.
pub fn needs_shell(executable: &str) -> bool {
    let lower = executable.to_lowercase();
    lower.ends_with(".cmd") || lower.ends_with(".bat")
}

/// Full token list for an invocation: the resolved executable followed by
/// the subcommand arguments. A leading `espanso` token is replaced rather
/// than duplicated.
pub fn normalize_command(executable: &str, args: &[&str]) -> Vec<String> {
    let mut tokens = vec![executable.to_string()];
    let rest = match args.first() {
        Some(first) if is_known_name(first) => &args[1..],
        _ => args,
    };
    tokens.extend(rest.iter().map(|a| a.to_string()));
    tokens
}

fn is_known_name(token: &str) -> bool {
    Path::new(token)
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| KNOWN_NAMES.contains(&name.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Quote a token for `cmd.exe`: always wrapped, embedded quotes doubled.
pub fn quote_cmd(token: &str) -> String {
    format!("\"{}\"", token.replace('"', "\"\""))
}

/// Quote a token for a POSIX shell: always single-quoted.
pub fn quote_posix(token: &str) -> String {
    format!("'{}'", token.replace('\'', r"'\''"))
}

/// Join tokens into one command line for the platform shell.
pub fn shell_command_line(tokens: &[String]) -> String {
    let quote = if cfg!(windows) { quote_cmd } else { quote_posix };
    tokens
        .iter()
        .map(|t| quote(t))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_search(_: &str) -> Option<PathBuf> {
        None
    }

    #[test]
    fn test_env_override_preferred() {
        let resolved = resolve_with(
            Some(OsString::from("/tmp/custom/espanso")),
            Some("/opt/espanso"),
            |_| Some(PathBuf::from("/usr/bin/espanso")),
        );
        assert_eq!(resolved, "/tmp/custom/espanso");
    }

    #[test]
    fn test_blank_env_override_ignored() {
        let resolved = resolve_with(Some(OsString::from("  ")), None, |_| {
            Some(PathBuf::from("/usr/bin/espanso"))
        });
        assert_eq!(resolved, "/usr/bin/espanso");
    }

    #[test]
    fn test_configured_before_search() {
        let resolved = resolve_with(None, Some("/opt/espanso"), |_| {
            Some(PathBuf::from("/usr/bin/espanso"))
        });
        assert_eq!(resolved, "/opt/espanso");
    }

    #[test]
    fn test_search_path_used() {
        let resolved = resolve_with(None, None, |name| {
            (name == CANDIDATES[0]).then(|| PathBuf::from(format!("/path/to/{}", name)))
        });
        assert!(resolved.starts_with("/path/to/espanso"));
    }

    #[test]
    fn test_falls_back_to_default() {
        assert_eq!(resolve_with(None, None, no_search), "espanso");
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path_requires_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let plain = dir.path().join("espanso-companion-plain");
        std::fs::write(&plain, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o644)).unwrap();

        let path = std::env::join_paths([dir.path().to_path_buf()]).unwrap();
        let found = which::which_in("espanso-companion-plain", Some(path.clone()), dir.path());
        assert!(found.is_err());

        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o755)).unwrap();
        let found = which::which_in("espanso-companion-plain", Some(path), dir.path()).unwrap();
        assert_eq!(found.file_name(), plain.file_name());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path_finds_shell() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("espanso-companion-definitely-missing").is_none());
    }

    #[test]
    fn test_normalize_prepends_executable() {
        let tokens = normalize_command("/usr/bin/espanso", &["status"]);
        assert_eq!(tokens, vec!["/usr/bin/espanso", "status"]);
    }

    #[test]
    fn test_normalize_replaces_leading_name() {
        let tokens = normalize_command("/usr/bin/espanso", &["espanso", "status"]);
        assert_eq!(tokens, vec!["/usr/bin/espanso", "status"]);

        let tokens = normalize_command("C:/bin/espanso.cmd", &["C:/old/Espanso.exe", "start"]);
        assert_eq!(tokens, vec!["C:/bin/espanso.cmd", "start"]);
    }

    #[test]
    fn test_normalize_empty_args() {
        assert_eq!(normalize_command("espanso", &[]), vec!["espanso"]);
    }

    #[test]
    fn test_needs_shell() {
        assert!(needs_shell("C:/tools/espanso.cmd"));
        assert!(needs_shell("C:/tools/ESPANSO.BAT"));
        assert!(!needs_shell("/usr/bin/espanso"));
        assert!(!needs_shell("C:/tools/espanso.exe"));
    }

    #[test]
    fn test_quote_cmd() {
        assert_eq!(quote_cmd("match"), "\"match\"");
        assert_eq!(quote_cmd("say \"hi\" & exit"), "\"say \"\"hi\"\" & exit\"");
    }

    #[test]
    fn test_quote_posix() {
        assert_eq!(quote_posix("status"), "'status'");
        assert_eq!(quote_posix("it's; rm -rf"), "'it'\\''s; rm -rf'");
    }

    #[test]
    fn test_shell_command_line_quotes_every_token() {
        let line = shell_command_line(&["espanso.cmd".into(), "match".into(), "a b".into()]);
        if cfg!(windows) {
            assert_eq!(line, "\"espanso.cmd\" \"match\" \"a b\"");
        } else {
            assert_eq!(line, "'espanso.cmd' 'match' 'a b'");
        }
    }
}
