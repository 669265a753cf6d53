use std::collections::HashMap;

use relaygate_core::{TokenEntry, TokenSnapshot};
use relaygate_provider_core::{Channel, ChannelConfig, ChannelStatus, ChannelType};
use relaygate_storage::StorageSnapshot;
use tracing::warn;

/// Tokens whose account is missing are skipped; a disabled account disables
/// all of its tokens.
pub(crate) fn build_token_snapshot(snapshot: &StorageSnapshot) -> TokenSnapshot {
    let accounts: HashMap<i64, bool> = snapshot
        .accounts
        .iter()
        .map(|account| (account.id, account.enabled))
        .collect();

    let mut tokens_by_key = HashMap::new();
    for token in &snapshot.tokens {
        let Some(account_enabled) = accounts.get(&token.account_id) else {
            warn!(token_id = token.id, account_id = token.account_id, "token without account");
            continue;
        };
        tokens_by_key.insert(
            token.key.clone(),
            TokenEntry {
                token_id: token.id,
                account_id: token.account_id,
                name: token.name.clone(),
                enabled: token.enabled && *account_enabled,
            },
        );
    }
    TokenSnapshot { tokens_by_key }
}

pub(crate) fn account_balances(snapshot: &StorageSnapshot) -> Vec<(i64, i64)> {
    snapshot
        .accounts
        .iter()
        .map(|account| (account.id, account.quota))
        .collect()
}

pub(crate) fn build_channels(snapshot: &StorageSnapshot) -> Vec<Channel> {
    snapshot
        .channels
        .iter()
        .filter_map(|row| {
            let Some(channel_type) = ChannelType::parse(&row.channel_type) else {
                warn!(channel_id = row.id, channel_type = %row.channel_type, "unknown channel type");
                return None;
            };
            let config = if row.config_json.is_null() {
                ChannelConfig::default()
            } else {
                match serde_json::from_value::<ChannelConfig>(row.config_json.clone()) {
                    Ok(config) => config,
                    Err(err) => {
                        warn!(channel_id = row.id, error = %err, "invalid channel config");
                        ChannelConfig::default()
                    }
                }
            };
            Some(Channel {
                id: row.id,
                name: row.name.clone(),
                channel_type,
                base_url: row.base_url.clone().unwrap_or_default(),
                key: row.key.clone(),
                config,
                ratio: row.ratio,
                weight: row.weight.max(0) as u32,
                priority: row.priority,
                status: ChannelStatus::from_i32(row.status),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use relaygate_storage::{AccountRow, ChannelRow, TokenRow};
    use serde_json::json;
    use time::OffsetDateTime;

    use super::*;

    fn snapshot() -> StorageSnapshot {
        StorageSnapshot {
            accounts: vec![
                AccountRow {
                    id: 1,
                    name: "active".to_string(),
                    quota: 500,
                    used_quota: 0,
                    enabled: true,
                },
                AccountRow {
                    id: 2,
                    name: "frozen".to_string(),
                    quota: 900,
                    used_quota: 10,
                    enabled: false,
                },
            ],
            tokens: vec![
                TokenRow {
                    id: 10,
                    account_id: 1,
                    key: "sk-a".to_string(),
                    name: "a".to_string(),
                    enabled: true,
                },
                TokenRow {
                    id: 11,
                    account_id: 2,
                    key: "sk-b".to_string(),
                    name: "b".to_string(),
                    enabled: true,
                },
                TokenRow {
                    id: 12,
                    account_id: 99,
                    key: "sk-orphan".to_string(),
                    name: "orphan".to_string(),
                    enabled: true,
                },
            ],
            channels: vec![
                ChannelRow {
                    id: 7,
                    name: "azure".to_string(),
                    channel_type: "azure".to_string(),
                    base_url: Some("https://res.openai.azure.com".to_string()),
                    key: "k".to_string(),
                    config_json: json!({ "api_version": "2024-02-01", "models": ["gpt-4o"] }),
                    ratio: 2.0,
                    weight: -3,
                    priority: 5,
                    status: 3,
                    updated_at: OffsetDateTime::UNIX_EPOCH,
                },
                ChannelRow {
                    id: 8,
                    name: "mystery".to_string(),
                    channel_type: "palm".to_string(),
                    base_url: None,
                    key: "k".to_string(),
                    config_json: serde_json::Value::Null,
                    ratio: 1.0,
                    weight: 1,
                    priority: 0,
                    status: 1,
                    updated_at: OffsetDateTime::UNIX_EPOCH,
                },
            ],
        }
    }

    #[test]
    fn disabled_account_disables_its_tokens() {
        let tokens = build_token_snapshot(&snapshot());
        assert_eq!(tokens.tokens_by_key.len(), 2);
        assert!(tokens.tokens_by_key["sk-a"].enabled);
        assert!(!tokens.tokens_by_key["sk-b"].enabled);
        assert!(!tokens.tokens_by_key.contains_key("sk-orphan"));
        assert_eq!(account_balances(&snapshot()), vec![(1, 500), (2, 900)]);
    }

    #[test]
    fn channels_skip_unknown_types() {
        let channels = build_channels(&snapshot());
        assert_eq!(channels.len(), 1);
        let channel = &channels[0];
        assert_eq!(channel.channel_type, ChannelType::Azure);
        assert_eq!(channel.config.api_version.as_deref(), Some("2024-02-01"));
        assert_eq!(channel.weight, 0);
        assert_eq!(channel.status, ChannelStatus::AutoDisabled);
    }
}
