//! Shared test infrastructure for integration tests.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Runs the `cfde` binary against an isolated home directory.
pub struct CfdeFixture {
    pub home: TempDir,
    config_url: String,
}

/// Captured result of one invocation.
#[derive(Debug)]
pub struct CfdeRun {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CfdeRun {
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

impl CfdeFixture {
    /// `config_url` is where the binary fetches its remote configuration.
    pub fn new(config_url: &str) -> Self {
        Self {
            home: tempfile::tempdir().expect("temp home"),
            config_url: config_url.to_string(),
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.home.path().join("state.json")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.home.path().join(name)
    }

    pub fn run(&self, args: &[&str]) -> CfdeRun {
        let output = self.command(args).output().expect("spawn cfde");
        CfdeRun::from(output)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_cfde"));
        command
            .args(args)
            .env("HOME", self.home.path())
            .env("CFDE_CONFIG_URL", &self.config_url)
            .env("CFDE_STATE_FILE", self.state_file())
            .env("CFDE_TOKEN_FILE", token_file(self.home.path()))
            .env_remove("RUST_LOG");
        command
    }
}

fn token_file(home: &Path) -> PathBuf {
    home.join("tokens.json")
}

impl From<Output> for CfdeRun {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}
