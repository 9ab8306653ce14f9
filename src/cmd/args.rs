use clap::ValueEnum;

use crate::upgrade::{ApplyStrategy, BackupPolicy};

#[derive(Debug, Default, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum BackupPolicyArg {
    #[default]
    File,
    Configmap,
}

impl std::fmt::Display for BackupPolicyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_possible_value()
            .expect("no values are skipped")
            .get_name()
            .fmt(f)
    }
}

impl BackupPolicyArg {
    pub fn to_policy(self, dir: std::path::PathBuf) -> BackupPolicy {
        match self {
            Self::File => BackupPolicy::File { dir },
            Self::Configmap => BackupPolicy::ConfigMap,
        }
    }
}

#[derive(Debug, Default, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    #[default]
    Update,
    Recreate,
}

impl std::fmt::Display for StrategyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_possible_value()
            .expect("no values are skipped")
            .get_name()
            .fmt(f)
    }
}

impl From<StrategyArg> for ApplyStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Update => Self::UpdateInPlace,
            StrategyArg::Recreate => Self::RecreateWithIngressCleanup,
        }
    }
}
