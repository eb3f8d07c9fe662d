//! Slash command and autocomplete handling.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument};

use embebot_core::ids::GuildId;
use embebot_core::model::{
    interaction_type, AutocompleteChoice, CommandData, CommandOption, Embed, EmbedField,
    Interaction, InteractionResponse,
};
use embebot_gateway::{DispatchContext, HandlerError, InteractionHandler};
use embebot_store::{GuildSettings, GuildSettingsRepo, StoreError};

use crate::matcher::{normalize_endpoint, service, service_names, SERVICES};
use crate::rest::DiscordApi;

pub const SUCCESS_COLOR: u32 = 0x82ff8c;
pub const ERROR_COLOR: u32 = 0xff0000;

const ALL: &str = "all";
const UPDATE_FAILED: &str = "Failed to update settings. Please try again.";

pub struct SettingsCommands {
    api: Arc<dyn DiscordApi>,
    settings: GuildSettingsRepo,
}

impl SettingsCommands {
    pub fn new(api: Arc<dyn DiscordApi>, settings: GuildSettingsRepo) -> Self {
        Self { api, settings }
    }

    /// The callback body for one interaction.
    pub fn respond(&self, interaction: &Interaction) -> InteractionResponse {
        match interaction.kind {
            interaction_type::PING => InteractionResponse::pong(),
            interaction_type::AUTOCOMPLETE => match &interaction.data {
                Some(data) => autocomplete(data),
                None => InteractionResponse::choices(Vec::new()),
            },
            interaction_type::APPLICATION_COMMAND => {
                let Some(guild) = &interaction.guild_id else {
                    return failure("This command can only be used in a server");
                };
                match &interaction.data {
                    Some(data) => self.command(guild, data),
                    None => failure("Unknown command"),
                }
            }
            _ => failure("Unknown interaction type"),
        }
    }

    fn command(&self, guild: &GuildId, data: &CommandData) -> InteractionResponse {
        match data.name.as_str() {
            "enable" => self.toggle(guild, &data.options, false),
            "disable" => self.toggle(guild, &data.options, true),
            "settings" => self.show(guild),
            "endpoint" => self.endpoint(guild, &data.options),
            "domain" => self.domain(guild, &data.options),
            _ => failure("Unknown command"),
        }
    }

    fn toggle(&self, guild: &GuildId, options: &[CommandOption], disable: bool) -> InteractionResponse {
        let requested = string_option(options, "service").unwrap_or_default();
        let targets: Vec<&str> = if requested == ALL {
            service_names().collect()
        } else if let Some(svc) = service(requested) {
            vec![svc.name]
        } else {
            return invalid_service(true);
        };

        if let Err(e) = self.settings.set_disabled(guild, &targets, disable) {
            return store_failure(&e, UPDATE_FAILED);
        }
        let verb = if disable { "disabled" } else { "enabled" };
        info!(guild_id = %guild, service = requested, verb, "service toggled");
        success(format!(
            "Successfully {verb} **{requested}** embed service(s) for this server."
        ))
    }

    fn show(&self, guild: &GuildId) -> InteractionResponse {
        match self.settings.load(guild) {
            Ok(settings) => InteractionResponse::embed(settings_embed(&settings)),
            Err(e) => store_failure(&e, "Failed to load settings. Please try again."),
        }
    }

    fn endpoint(&self, guild: &GuildId, options: &[CommandOption]) -> InteractionResponse {
        let Some(sub) = options.first() else {
            return failure("Unknown subcommand");
        };
        let Some(svc) = string_option(&sub.options, "service").and_then(service) else {
            return invalid_service(false);
        };

        match sub.name.as_str() {
            "set" => {
                let endpoint = string_option(&sub.options, "url")
                    .map(normalize_endpoint)
                    .unwrap_or_default();
                if endpoint.is_empty() {
                    return failure("Please provide an endpoint URL");
                }
                if let Err(e) = self.settings.set_endpoint(guild, svc.name, Some(&endpoint)) {
                    return store_failure(&e, UPDATE_FAILED);
                }
                success(format!("Set **{}** endpoint to `{endpoint}`", svc.name))
            }
            "reset" => {
                if let Err(e) = self.settings.set_endpoint(guild, svc.name, None) {
                    return store_failure(&e, UPDATE_FAILED);
                }
                success(format!(
                    "Reset **{}** endpoint to default (`{}`)",
                    svc.name, svc.default_endpoint
                ))
            }
            _ => failure("Unknown subcommand"),
        }
    }

    fn domain(&self, guild: &GuildId, options: &[CommandOption]) -> InteractionResponse {
        let Some(sub) = options.first() else {
            return failure("Unknown subcommand");
        };
        let matched = string_option(&sub.options, "match")
            .map(normalize_endpoint)
            .unwrap_or_default();
        if matched.is_empty() {
            return failure("Please provide a domain");
        }

        match sub.name.as_str() {
            "add" => {
                let replace = string_option(&sub.options, "replace")
                    .map(normalize_endpoint)
                    .unwrap_or_default();
                if replace.is_empty() {
                    return failure("Please provide a replacement domain");
                }
                if let Err(e) = self.settings.add_domain(guild, &matched, &replace) {
                    return store_failure(&e, UPDATE_FAILED);
                }
                success(format!("Now rewriting `{matched}` links to `{replace}`"))
            }
            "remove" => match self.settings.remove_domain(guild, &matched) {
                Ok(true) => success(format!("Stopped rewriting `{matched}` links")),
                Ok(false) => failure(&format!("No custom rule for `{matched}`")),
                Err(e) => store_failure(&e, UPDATE_FAILED),
            },
            _ => failure("Unknown subcommand"),
        }
    }
}

#[async_trait]
impl InteractionHandler for SettingsCommands {
    #[instrument(skip_all, fields(interaction_id = %interaction.id, kind = interaction.kind))]
    async fn on_interaction(
        &self,
        _ctx: DispatchContext,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let response = self.respond(&interaction);
        self.api
            .respond_to_interaction(&interaction.id, &interaction.token, &response)
            .await?;
        Ok(())
    }
}

fn string_option<'a>(options: &'a [CommandOption], name: &str) -> Option<&'a str> {
    options
        .iter()
        .find(|o| o.name == name)
        .and_then(CommandOption::str_value)
}

fn focused(options: &[CommandOption]) -> Option<&CommandOption> {
    options
        .iter()
        .find(|o| o.focused)
        .or_else(|| options.iter().find_map(|o| o.options.iter().find(|n| n.focused)))
}

fn autocomplete(data: &CommandData) -> InteractionResponse {
    let query = focused(&data.options)
        .and_then(CommandOption::str_value)
        .unwrap_or_default()
        .to_lowercase();

    let with_all = data.name != "endpoint";
    let all = with_all.then_some(("All", ALL));
    let choices = all
        .into_iter()
        .chain(SERVICES.iter().map(|s| (s.display, s.name)))
        .filter(|(display, _)| display.to_lowercase().starts_with(&query))
        .map(|(display, value)| AutocompleteChoice {
            name: display.to_string(),
            value: value.to_string(),
        })
        .collect();
    InteractionResponse::choices(choices)
}

fn settings_embed(settings: &GuildSettings) -> Embed {
    let (enabled, disabled): (Vec<&str>, Vec<&str>) =
        service_names().partition(|s| settings.is_enabled(s));

    let endpoints = SERVICES
        .iter()
        .map(|svc| match settings.endpoint(svc.name) {
            Some(custom) => format!("**{}**: {custom} (custom)", svc.name),
            None => format!("**{}**: {}", svc.name, svc.default_endpoint),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut fields = vec![
        field("Enabled Services", listing(&enabled)),
        field("Disabled Services", listing(&disabled)),
        field("Endpoints", endpoints),
    ];
    if !settings.domains.is_empty() {
        let domains = settings
            .domains
            .iter()
            .map(|d| {
                let state = if d.enabled { "" } else { " (disabled)" };
                format!("`{}` -> `{}`{state}", d.match_domain, d.replace_domain)
            })
            .collect::<Vec<_>>()
            .join("\n");
        fields.push(field("Custom Domains", domains));
    }

    Embed {
        title: Some("Embed Settings for this Server".into()),
        color: Some(SUCCESS_COLOR),
        fields,
        ..Default::default()
    }
}

fn listing(names: &[&str]) -> String {
    if names.is_empty() {
        "None".into()
    } else {
        names.join(", ")
    }
}

fn field(name: &str, value: String) -> EmbedField {
    EmbedField {
        name: name.into(),
        value,
        inline: None,
    }
}

fn invalid_service(with_all: bool) -> InteractionResponse {
    let mut valid: Vec<&str> = service_names().collect();
    if with_all {
        valid.insert(0, ALL);
    }
    failure(&format!("Invalid service. Valid options: {}", valid.join(", ")))
}

fn store_failure(e: &StoreError, message: &str) -> InteractionResponse {
    error!(error = %e, "settings store failed");
    failure(message)
}

fn success(description: String) -> InteractionResponse {
    InteractionResponse::embed(Embed {
        description: Some(description),
        color: Some(SUCCESS_COLOR),
        ..Default::default()
    })
}

fn failure(description: &str) -> InteractionResponse {
    InteractionResponse::embed(Embed {
        title: Some("Error".into()),
        description: Some(description.into()),
        color: Some(ERROR_COLOR),
        ..Default::default()
    })
}
