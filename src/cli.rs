//! CLI argument parsing for CFDE submissions.
//!
//! The CLI stays thin: it collects flags and hands them to the workflow
//! commands, which own all policy.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "cfde",
    version,
    about = "Package, validate, and submit datasets to the CFDE ingest pipeline",
    after_help = "Commands:\n  run <DATA_PATH>   Bag, validate, upload, and start the ingest flow\n  status            Report on the last (or a given) ingest flow\n  check             Confirm the client is current and can reach the flow\n\nExamples:\n  cfde run ./my-dataset --author-email me@example.org\n  cfde run ./my-dataset --dry-run\n  cfde status\n  cfde status --flow-id <ID> --flow-instance-id <ID> --raw",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Status(StatusArgs),
    Check(CheckArgs),
}

/// Run command inputs for one submission.
#[derive(Parser, Debug, Clone)]
#[command(about = "Start the ingest flow for a dataset")]
pub struct RunArgs {
    /// Directory, Git checkout, bag, or archive to submit
    #[arg(value_name = "DATA_PATH")]
    pub data_path: PathBuf,

    /// Email of the submitting author
    #[arg(long, short = 'e', visible_alias = "email", value_name = "EMAIL")]
    pub author_email: Option<String>,

    /// Catalog to ingest into (implies that catalog's schema)
    #[arg(long, value_name = "CATALOG")]
    pub catalog: Option<String>,

    /// Schema to validate the descriptor against
    #[arg(long, value_name = "SCHEMA")]
    pub schema: Option<String>,

    /// JSON file with dataset ACLs forwarded to the flow
    #[arg(long, value_name = "PATH")]
    pub acl_file: Option<PathBuf>,

    /// Copy the data here and bag the copy instead of the source directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Delete the bagged copy after archiving
    #[arg(long, overrides_with = "keep_dir")]
    pub delete_dir: bool,

    /// Keep the bagged copy after archiving (default)
    #[arg(long, overrides_with = "delete_dir")]
    pub keep_dir: bool,

    /// Treat a Git checkout like any other directory
    #[arg(long, overrides_with = "handle_git")]
    pub ignore_git: bool,

    /// Bag Git checkouts from the repository root, tagged with HEAD (default)
    #[arg(long, overrides_with = "ignore_git")]
    pub handle_git: bool,

    /// Validate only; do not upload or start the flow
    #[arg(long)]
    pub dry_run: bool,

    /// Emit debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Discard stored tokens before logging in
    #[arg(long)]
    pub force_login: bool,

    #[arg(long, hide = true)]
    pub no_browser: bool,

    /// DERIVA server to ingest into
    #[arg(long, hide = true, value_name = "HOST")]
    pub server: Option<String>,

    /// Upload over HTTPS even when a local endpoint exists
    #[arg(long, hide = true)]
    pub force_http: bool,

    /// JSON file with extra bag-info metadata
    #[arg(long, hide = true, value_name = "PATH")]
    pub bag_kwargs_file: Option<PathBuf>,

    #[arg(long, hide = true, value_name = "PATH")]
    pub client_state_file: Option<PathBuf>,

    #[arg(long, hide = true, value_name = "NAME")]
    pub service_instance: Option<String>,
}

impl RunArgs {
    pub fn delete_dir(&self) -> bool {
        self.delete_dir && !self.keep_dir
    }

    pub fn handle_git(&self) -> bool {
        !self.ignore_git
    }
}

/// Status command inputs.
#[derive(Parser, Debug, Clone)]
#[command(about = "Report the status of an ingest flow")]
pub struct StatusArgs {
    #[arg(long, value_name = "ID")]
    pub flow_id: Option<String>,

    #[arg(long, value_name = "ID")]
    pub flow_instance_id: Option<String>,

    /// Print the full status document as JSON
    #[arg(long)]
    pub raw: bool,

    /// Emit debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[arg(long, hide = true, value_name = "PATH")]
    pub client_state_file: Option<PathBuf>,

    #[arg(long, hide = true, value_name = "NAME")]
    pub service_instance: Option<String>,
}

/// Check command inputs.
#[derive(Parser, Debug, Clone)]
#[command(about = "Check that the client is up to date and can access the ingest flow")]
pub struct CheckArgs {
    /// Emit debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[arg(long, hide = true, value_name = "NAME")]
    pub service_instance: Option<String>,
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Self::Run(args) => args.verbose,
            Self::Status(args) => args.verbose,
            Self::Check(args) => args.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> RootArgs {
        RootArgs::try_parse_from(args).expect("valid arguments")
    }

    #[test]
    fn email_aliases_are_accepted() {
        for flag in ["--author-email", "--email", "-e"] {
            let root = parse(&["cfde", "run", "data", flag, "me@example.org"]);
            let Command::Run(run) = root.command else {
                panic!("expected run");
            };
            assert_eq!(run.author_email.as_deref(), Some("me@example.org"));
        }
    }

    #[test]
    fn last_directory_and_git_flags_win() {
        let root = parse(&["cfde", "run", "data", "--delete-dir", "--keep-dir"]);
        let Command::Run(run) = root.command else {
            panic!("expected run");
        };
        assert!(!run.delete_dir());
        assert!(run.handle_git());

        let root = parse(&["cfde", "run", "data", "--keep-dir", "--delete-dir", "--ignore-git"]);
        let Command::Run(run) = root.command else {
            panic!("expected run");
        };
        assert!(run.delete_dir());
        assert!(!run.handle_git());
    }

    #[test]
    fn catalog_and_schema_both_reach_the_workflow() {
        let root = parse(&["cfde", "run", "data", "--catalog", "1", "--schema", "s.json"]);
        let Command::Run(run) = root.command else {
            panic!("expected run");
        };
        assert_eq!(run.catalog.as_deref(), Some("1"));
        assert_eq!(run.schema.as_deref(), Some("s.json"));
    }

    #[test]
    fn hidden_flags_still_parse() {
        let root = parse(&[
            "cfde",
            "status",
            "--raw",
            "--client-state-file",
            "/tmp/state.json",
            "--service-instance",
            "dev",
        ]);
        let Command::Status(status) = root.command else {
            panic!("expected status");
        };
        assert!(status.raw);
        assert_eq!(status.service_instance.as_deref(), Some("dev"));
    }
}
