//! Integration tests for CLI commands
//!
//! Nothing here needs a reachable cluster: commands either fail before
//! connecting or, like `create`, never connect.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: kind-lash
clusters:
- name: kind-lash
  cluster:
    server: https://127.0.0.1:6443
contexts:
- name: kind-lash
  context:
    cluster: kind-lash
    user: admin
users:
- name: admin
  user:
    token: test
"#;

/// Run lash inside `home`, isolated from the caller's config and environment
fn lash_in(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lash"))
        .args(args)
        .current_dir(home)
        .env("HOME", home)
        .env_remove("KUBECONFIG")
        .env_remove("LASH_CONFIG")
        .env_remove("LASH_KUBECONFIG")
        .env_remove("LASH_CONTEXT")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute lash")
}

fn lash(args: &[&str]) -> (TempDir, Output) {
    let home = TempDir::new().unwrap();
    let output = lash_in(home.path(), args);
    (home, output)
}

fn write_kubeconfig(dir: &Path, content: &str) -> String {
    let path = dir.join("kubeconfig");
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

mod help {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let (_home, output) = lash(&["--help"]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        for command in ["init", "uninstall", "create"] {
            assert!(stdout.contains(command), "missing {} in help", command);
        }
    }

    #[test]
    fn test_version() {
        let (_home, output) = lash(&["--version"]);
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_uninstall_help_shows_dry_run() {
        let (_home, output) = lash(&["uninstall", "--help"]);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("--dry-run"));
        assert!(stdout.contains("--kubeconfig"));
    }

    #[test]
    fn test_set_is_hidden() {
        let (_home, output) = lash(&["init", "--help"]);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("--no-crossplane"));
        assert!(stdout.contains("--management-cluster"));
        assert!(!stdout.contains("--set"));
    }
}

mod usage_errors {
    use super::*;

    #[test]
    fn test_unknown_command() {
        let (_home, output) = lash(&["deploy"]);
        assert_eq!(output.status.code(), Some(64));
    }

    #[test]
    fn test_missing_explicit_config() {
        let (_home, output) = lash(&["--config", "/nonexistent/lash.yaml", "create"]);
        assert_eq!(output.status.code(), Some(64));
        assert!(String::from_utf8_lossy(&output.stderr).contains("config file not found"));
    }

    #[test]
    fn test_malformed_set_value() {
        let (_home, output) = lash(&["init", "--set", "domain"]);
        assert_eq!(output.status.code(), Some(64));
        assert!(String::from_utf8_lossy(&output.stderr).contains("invalid --set value 'domain'"));
    }
}

mod credentials {
    use super::*;

    #[test]
    fn test_missing_kubeconfig_is_io_error() {
        let (_home, output) = lash(&["uninstall", "--kubeconfig", "/nonexistent/kubeconfig"]);
        assert_eq!(output.status.code(), Some(5));
    }

    #[test]
    fn test_malformed_kubeconfig() {
        let home = TempDir::new().unwrap();
        let path = write_kubeconfig(home.path(), "clusters: [unterminated");

        let output = lash_in(home.path(), &["uninstall", "--dry-run", "--kubeconfig", &path]);
        assert_eq!(output.status.code(), Some(4));
    }

    #[test]
    fn test_unknown_context() {
        let home = TempDir::new().unwrap();
        let path = write_kubeconfig(home.path(), KUBECONFIG);

        let output = lash_in(
            home.path(),
            &["create", "--kubeconfig", &path, "--context", "prod"],
        );
        assert_eq!(output.status.code(), Some(4));
        assert!(String::from_utf8_lossy(&output.stderr).contains("prod"));
    }
}

mod create_command {
    use super::*;

    #[test]
    fn test_create_publishes_done() {
        let home = TempDir::new().unwrap();
        let path = write_kubeconfig(home.path(), KUBECONFIG);

        let output = lash_in(home.path(), &["create", "--kubeconfig", &path]);
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("Created"));
    }

    #[test]
    fn test_kubeconfig_from_config_file() {
        let home = TempDir::new().unwrap();
        let path = write_kubeconfig(home.path(), KUBECONFIG);
        std::fs::write(
            home.path().join("config.yaml"),
            format!("kubeconfig: {}\ncontext: kind-lash\n", path),
        )
        .unwrap();

        let output = lash_in(home.path(), &["create"]);
        assert!(output.status.success());
    }
}
