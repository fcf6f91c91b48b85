//! Copilot account plans.
//!
//! Each plan is served from its own API host. Users pick a plan by name on the
//! command line and the preset fills in the base URL.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Individual,
    Business,
    Enterprise,
}

#[derive(Debug, Clone)]
pub struct AccountPreset {
    pub account_type: AccountType,
    pub name: &'static str,
    pub base_url: &'static str,
}

const PRESETS: &[AccountPreset] = &[
    AccountPreset {
        account_type: AccountType::Individual,
        name: "individual",
        base_url: "https://api.githubcopilot.com",
    },
    AccountPreset {
        account_type: AccountType::Business,
        name: "business",
        base_url: "https://api.business.githubcopilot.com",
    },
    AccountPreset {
        account_type: AccountType::Enterprise,
        name: "enterprise",
        base_url: "https://api.enterprise.githubcopilot.com",
    },
];

impl AccountType {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        PRESETS
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.account_type)
    }

    /// Parse a plan name, falling back to `individual` for anything unknown.
    #[must_use]
    pub fn from_name_or_default(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            tracing::warn!(
                account_type = name,
                "Unknown account type. Falling back to \"individual\"."
            );
            Self::Individual
        })
    }

    #[must_use]
    pub fn preset(self) -> &'static AccountPreset {
        PRESETS
            .iter()
            .find(|p| p.account_type == self)
            .unwrap_or(&PRESETS[0])
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.preset().name
    }

    #[must_use]
    pub fn base_url(self) -> &'static str {
        self.preset().base_url
    }
}
