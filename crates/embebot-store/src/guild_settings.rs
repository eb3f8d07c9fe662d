use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use embebot_core::ids::GuildId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A guild-defined host rewrite, applied after the built-in services.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDomain {
    pub match_domain: String,
    pub replace_domain: String,
    pub enabled: bool,
}

/// Everything the message handler needs to know about one guild.
///
/// A service absent from `disabled` is enabled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuildSettings {
    pub disabled: BTreeSet<String>,
    pub endpoints: BTreeMap<String, String>,
    pub domains: Vec<CustomDomain>,
}

impl GuildSettings {
    pub fn is_enabled(&self, service: &str) -> bool {
        !self.disabled.contains(service)
    }

    pub fn endpoint(&self, service: &str) -> Option<&str> {
        self.endpoints.get(service).map(String::as_str)
    }
}

pub struct GuildSettingsRepo {
    db: Database,
}

impl GuildSettingsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(guild_id = %guild))]
    pub fn load(&self, guild: &GuildId) -> Result<GuildSettings, StoreError> {
        self.db.with_conn(|conn| {
            let mut settings = GuildSettings::default();

            let mut stmt = conn.prepare(
                "SELECT service, disabled, endpoint FROM service_settings WHERE guild_id = ?1",
            )?;
            let mut rows = stmt.query([guild.as_str()])?;
            while let Some(row) = rows.next()? {
                let service: String = row_helpers::get(row, 0, "service_settings", "service")?;
                let disabled: bool = row_helpers::get(row, 1, "service_settings", "disabled")?;
                let endpoint: Option<String> =
                    row_helpers::get_opt(row, 2, "service_settings", "endpoint")?;
                if let Some(endpoint) = endpoint {
                    settings.endpoints.insert(service.clone(), endpoint);
                }
                if disabled {
                    settings.disabled.insert(service);
                }
            }

            settings.domains = query_domains(conn, guild)?;
            Ok(settings)
        })
    }

    #[instrument(skip(self), fields(guild_id = %guild))]
    pub fn disabled_services(&self, guild: &GuildId) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.load(guild)?.disabled)
    }

    #[instrument(skip(self), fields(guild_id = %guild))]
    pub fn custom_endpoints(&self, guild: &GuildId) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(self.load(guild)?.endpoints)
    }

    /// Toggle a set of services in one transaction.
    #[instrument(skip(self, services), fields(guild_id = %guild, count = services.len()))]
    pub fn set_disabled(
        &self,
        guild: &GuildId,
        services: &[&str],
        disabled: bool,
    ) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            for service in services {
                tx.execute(
                    "INSERT INTO service_settings (guild_id, service, disabled) VALUES (?1, ?2, ?3)
                     ON CONFLICT(guild_id, service) DO UPDATE SET disabled = excluded.disabled",
                    rusqlite::params![guild.as_str(), service, disabled],
                )?;
            }
            Ok(())
        })
    }

    /// Set or clear (`None`) the custom endpoint of one service.
    #[instrument(skip(self), fields(guild_id = %guild))]
    pub fn set_endpoint(
        &self,
        guild: &GuildId,
        service: &str,
        endpoint: Option<&str>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO service_settings (guild_id, service, endpoint) VALUES (?1, ?2, ?3)
                 ON CONFLICT(guild_id, service) DO UPDATE SET endpoint = excluded.endpoint",
                rusqlite::params![guild.as_str(), service, endpoint],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(guild_id = %guild))]
    pub fn custom_domains(&self, guild: &GuildId) -> Result<Vec<CustomDomain>, StoreError> {
        self.db.with_conn(|conn| query_domains(conn, guild))
    }

    /// Insert or replace the rule for `match_domain`.
    #[instrument(skip(self), fields(guild_id = %guild))]
    pub fn add_domain(
        &self,
        guild: &GuildId,
        match_domain: &str,
        replace_domain: &str,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO custom_domains (guild_id, match_domain, replace_domain, enabled)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(guild_id, match_domain) DO UPDATE SET
                    replace_domain = excluded.replace_domain, enabled = 1",
                rusqlite::params![guild.as_str(), match_domain, replace_domain],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(guild_id = %guild))]
    pub fn remove_domain(&self, guild: &GuildId, match_domain: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM custom_domains WHERE guild_id = ?1 AND match_domain = ?2",
                rusqlite::params![guild.as_str(), match_domain],
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_domains(
    conn: &rusqlite::Connection,
    guild: &GuildId,
) -> Result<Vec<CustomDomain>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT match_domain, replace_domain, enabled FROM custom_domains
         WHERE guild_id = ?1 ORDER BY match_domain",
    )?;
    let mut rows = stmt.query([guild.as_str()])?;
    let mut domains = Vec::new();
    while let Some(row) = rows.next()? {
        domains.push(CustomDomain {
            match_domain: row_helpers::get(row, 0, "custom_domains", "match_domain")?,
            replace_domain: row_helpers::get(row, 1, "custom_domains", "replace_domain")?,
            enabled: row_helpers::get(row, 2, "custom_domains", "enabled")?,
        });
    }
    Ok(domains)
}
