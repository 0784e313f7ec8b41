use std::path::PathBuf;

use clap::Parser;

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(short = 's', long = "src", help = "Source directory (local path or host:/path)", display_order = 1)]
    pub src: String,
    #[clap(short = 'd', long = "dest", help = "Local destination directory", display_order = 2)]
    pub dest: PathBuf,
    #[clap(short = 'p', long = "processes", help = "Number of parallel transfers (default 4)", display_order = 3)]
    pub processes: Option<usize>,
    #[clap(short = 'a', long = "ascending", help = "Process names in ascending order (default descending)")]
    pub ascending: bool,
    #[clap(long = "before", value_name = "BOUND", help = "Only names whose prefix sorts before BOUND")]
    pub before: Option<String>,
    #[clap(long = "after", value_name = "BOUND", help = "Only names whose prefix sorts after BOUND")]
    pub after: Option<String>,

    #[clap(short = 'u', long = "user", help = "SSH user name (default: current user)")]
    pub user: Option<String>,
    #[clap(short = 'k', long = "key", help = "SSH private key (default ~/.ssh/id_rsa)")]
    pub key: Option<PathBuf>,
    #[clap(long = "port", help = "SSH port (default 22)")]
    pub port: Option<u16>,
    #[clap(long = "timeout", value_name = "SECS", help = "SSH connect and I/O timeout (default 30)")]
    pub timeout: Option<u64>,
    #[clap(long = "rsync-path", value_name = "PATH", help = "Copy program (default rsync)")]
    pub rsync_path: Option<PathBuf>,
    #[clap(long = "config", value_name = "PATH", help = "Config file (default ~/.runsync/config.json)")]
    pub config: Option<PathBuf>,

    #[clap(long = "no-size", help = "Skip size reconciliation; records carry no size fields")]
    pub no_size: bool,
    #[clap(long = "list", help = "Print the selected names and exit without copying")]
    pub list: bool,
    #[clap(long = "json", help = "Print a one-line JSON run summary on stdout")]
    pub json: bool,
    #[clap(short = 'q', long = "quiet", help = "No progress bar or summary table")]
    pub quiet: bool,
    #[clap(long = "failures", value_name = "PATH", help = "Append failed units to PATH as JSON lines")]
    pub failures: Option<PathBuf>,
    #[clap(short, long, help = "Print verbose diagnostic logs for debugging")]
    pub verbose: bool,
    #[clap(long = "log-file", value_name = "PATH", help = "Also write logs to PATH")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            processes: self.processes,
            username: self.user.clone(),
            key_path: self.key.clone(),
            port: self.port,
            timeout_secs: self.timeout,
            rsync_path: self.rsync_path.clone(),
        }
    }
}
