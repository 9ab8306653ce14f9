use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::ConfigLoadOption;

use super::args::{BackupPolicyArg, StrategyArg};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, disable_help_subcommand = true)]
pub struct Command {
    /// kubeconfig path
    #[arg(short = 'C', long, display_order = 1000)]
    pub kubeconfig: Option<PathBuf>,

    /// Context
    #[arg(short, long, display_order = 1000)]
    pub context: Option<String>,

    /// Gateways to upgrade (e.g. -g ns1/gw1,gw2 | -g "*")
    #[arg(short, long, display_order = 1000)]
    pub gateways: String,

    /// Only upgrade gateways currently at this app version
    #[arg(long, display_order = 1000)]
    pub specific_app_version: Option<String>,

    /// App version to upgrade to
    #[arg(long, display_order = 1000)]
    pub target_version: Option<String>,

    /// Back up gateways before upgrading
    #[arg(long, display_order = 1000)]
    pub backup_enabled: bool,

    /// Backup directory (file policy)
    #[arg(long, display_order = 1000)]
    pub backup_dir: Option<PathBuf>,

    /// Where backups are stored
    #[arg(
        long,
        value_name = "file|configmap",
        default_value_t = BackupPolicyArg::File,
        value_enum,
        display_order = 1000
    )]
    pub backup_policy: BackupPolicyArg,

    /// How the gateway CR is applied
    #[arg(
        long,
        value_name = "update|recreate",
        default_value_t = StrategyArg::Update,
        value_enum,
        display_order = 1000
    )]
    pub strategy: StrategyArg,

    /// Config file path
    #[arg(long, display_order = 1000)]
    pub config_file: Option<PathBuf>,

    /// Logging
    #[arg(short = 'l', long, display_order = 1000)]
    pub logging: bool,
}

impl Command {
    pub fn init() -> Self {
        Self::parse()
    }

    pub fn config_load_option(&self) -> Result<ConfigLoadOption> {
        let option = if let Some(path) = &self.config_file {
            match path.try_exists() {
                Ok(true) => ConfigLoadOption::Path(path.clone()),
                Ok(false) => {
                    eprintln!("Config file not found: {:?}", path);

                    ConfigLoadOption::Default
                }
                Err(err) => {
                    eprintln!("Failed to check config file exists: {}", err);

                    ConfigLoadOption::Default
                }
            }
        } else {
            ConfigLoadOption::Default
        };

        Ok(option)
    }
}
