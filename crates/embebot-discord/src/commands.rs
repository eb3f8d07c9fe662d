//! Slash command definitions registered with Discord.

use serde::Serialize;

pub mod option_type {
    pub const SUB_COMMAND: u8 = 1;
    pub const STRING: u8 = 3;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionDefinition>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptionDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub autocomplete: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionDefinition>,
}

impl OptionDefinition {
    fn string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: option_type::STRING,
            required: true,
            autocomplete: false,
            options: Vec::new(),
        }
    }

    fn service(description: &'static str) -> Self {
        Self {
            autocomplete: true,
            ..Self::string("service", description)
        }
    }

    fn subcommand(
        name: &'static str,
        description: &'static str,
        options: Vec<OptionDefinition>,
    ) -> Self {
        Self {
            name,
            description,
            kind: option_type::SUB_COMMAND,
            required: false,
            autocomplete: false,
            options,
        }
    }
}

pub fn definitions() -> Vec<CommandDefinition> {
    vec![
        CommandDefinition {
            name: "enable",
            description: "Enable an embed service for this server",
            options: vec![OptionDefinition::service("The service to enable")],
        },
        CommandDefinition {
            name: "disable",
            description: "Disable an embed service for this server",
            options: vec![OptionDefinition::service("The service to disable")],
        },
        CommandDefinition {
            name: "settings",
            description: "Show the embed settings for this server",
            options: Vec::new(),
        },
        CommandDefinition {
            name: "endpoint",
            description: "Configure the embed endpoint used for a service",
            options: vec![
                OptionDefinition::subcommand(
                    "set",
                    "Use a custom endpoint for a service",
                    vec![
                        OptionDefinition::service("The service to configure"),
                        OptionDefinition::string("url", "Endpoint host, e.g. fxtwitter.com"),
                    ],
                ),
                OptionDefinition::subcommand(
                    "reset",
                    "Restore the default endpoint for a service",
                    vec![OptionDefinition::service("The service to reset")],
                ),
            ],
        },
        CommandDefinition {
            name: "domain",
            description: "Manage custom domain rewrites for this server",
            options: vec![
                OptionDefinition::subcommand(
                    "add",
                    "Rewrite links on one domain to another",
                    vec![
                        OptionDefinition::string("match", "Domain to look for, e.g. bsky.app"),
                        OptionDefinition::string("replace", "Domain to substitute, e.g. bskyx.app"),
                    ],
                ),
                OptionDefinition::subcommand(
                    "remove",
                    "Stop rewriting a domain",
                    vec![OptionDefinition::string("match", "Domain to stop rewriting")],
                ),
            ],
        },
    ]
}
