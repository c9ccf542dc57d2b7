// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User profile facts consumed by the access guard.

use chrono::{DateTime, Utc};
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Store, StoreResult};

/// `user_id -> StoredProfile` (JSON).
pub(super) const PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("profiles");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StoredProfile {
    pub user_id: String,
    pub onboarding_completed: bool,
    #[serde(default)]
    pub onboarding_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct ProfileStore<'a> {
    store: &'a Store,
}

impl<'a> ProfileStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn get(&self, user_id: &str) -> StoreResult<Option<StoredProfile>> {
        let read_txn = self.store.db().begin_read()?;
        let table = read_txn.open_table(PROFILES)?;
        match table.get(user_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Missing profile means onboarding has not been completed.
    pub fn onboarding_completed(&self, user_id: &str) -> StoreResult<bool> {
        Ok(self
            .get(user_id)?
            .is_some_and(|profile| profile.onboarding_completed))
    }

    /// Set the onboarding flag. Only ever flips false -> true; the original
    /// completion time is kept on repeat calls.
    pub fn mark_onboarding_completed(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<StoredProfile> {
        let write_txn = self.store.db().begin_write()?;
        let profile = {
            let mut table = write_txn.open_table(PROFILES)?;
            let existing = table.get(user_id)?.map(|value| value.value().to_vec());
            let mut profile = match existing {
                Some(bytes) => serde_json::from_slice::<StoredProfile>(&bytes)?,
                None => StoredProfile {
                    user_id: user_id.to_string(),
                    onboarding_completed: false,
                    onboarding_completed_at: None,
                    created_at: now,
                },
            };
            if !profile.onboarding_completed {
                profile.onboarding_completed = true;
                profile.onboarding_completed_at = Some(now);
                table.insert(user_id, serde_json::to_vec(&profile)?.as_slice())?;
            }
            profile
        };
        write_txn.commit()?;
        Ok(profile)
    }
}
