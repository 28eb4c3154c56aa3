// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile updates and name/email availability.

use crate::db::{user_doc, users, FirestoreDb, Query, StoredDoc, Write};
use crate::error::{AppError, Result};
use crate::services::propagation::{PropagationReport, PropagationService};
use crate::time_utils::server_timestamp;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

/// Requested profile change. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 30, message = "name must be 1-30 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 2048))]
    pub profile_image: Option<String>,
    /// Replace the image with the default one
    #[serde(default)]
    pub reset_image: bool,
}

impl ProfileUpdate {
    fn trimmed(&self) -> Self {
        Self {
            name: self.name.as_deref().map(|n| n.trim().to_string()),
            profile_image: self
                .profile_image
                .as_deref()
                .map(str::trim)
                .filter(|i| !i.is_empty())
                .map(str::to_string),
            reset_image: self.reset_image,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileOutcome {
    pub name: String,
    pub profile_image: Option<String>,
    /// Set when the name changed and was propagated
    pub propagated: Option<PropagationReport>,
}

#[derive(Deserialize)]
struct ProfileFields {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "profileImage")]
    profile_image: Option<String>,
}

#[derive(Clone)]
pub struct ProfileService {
    db: FirestoreDb,
    propagation: PropagationService,
}

impl ProfileService {
    pub fn new(db: FirestoreDb, propagation: PropagationService) -> Self {
        Self { db, propagation }
    }

    /// Whether `name` is unused by any account other than `requester`.
    pub async fn name_available(&self, name: &str, requester: Option<&str>) -> Result<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidPayload("name is required".to_string()));
        }
        self.unused("name", name, requester).await
    }

    /// Whether `email` is unused by any account other than `requester`.
    pub async fn email_available(&self, email: &str, requester: Option<&str>) -> Result<bool> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AppError::InvalidPayload("email is required".to_string()));
        }
        self.unused("email", email, requester).await
    }

    async fn unused(&self, field: &str, value: &str, requester: Option<&str>) -> Result<bool> {
        let holders: Vec<StoredDoc<IgnoredAny>> = self
            .db
            .query(&Query::new(users()).eq(field, value).limit(2))
            .await?;
        Ok(holders.iter().all(|doc| Some(doc.id.as_str()) == requester))
    }

    /// Apply `update` to the user document, then propagate a changed name.
    ///
    /// The user document is written first; a failed propagation leaves the
    /// new name in place and can be repeated by saving the profile again.
    pub async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
        default_image: &str,
    ) -> Result<ProfileOutcome> {
        let update = update.trimmed();
        update
            .validate()
            .map_err(|e| AppError::InvalidPayload(e.to_string()))?;

        let current: ProfileFields = self
            .db
            .get(&user_doc(user_id))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        let new_name = update.name.filter(|n| *n != current.name);
        if let Some(name) = &new_name {
            if !self.name_available(name, Some(user_id)).await? {
                return Err(AppError::Conflict(format!("name {} is already taken", name)));
            }
        }

        let new_image = if update.reset_image {
            Some(default_image.to_string())
        } else {
            update.profile_image
        };

        let mut data = Map::new();
        let mut fields = vec!["lastUpdatedAt"];
        data.insert("lastUpdatedAt".to_string(), Value::String(server_timestamp()));
        if let Some(name) = &new_name {
            data.insert("name".to_string(), Value::String(name.clone()));
            fields.push("name");
        }
        if let Some(image) = &new_image {
            data.insert("profileImage".to_string(), Value::String(image.clone()));
            fields.push("profileImage");
        }

        self.db
            .commit(vec![Write::merge(user_doc(user_id), Value::Object(data), &fields)])
            .await?;

        let propagated = match &new_name {
            Some(name) => Some(self.propagation.rename_author(user_id, name).await?),
            None => None,
        };

        tracing::info!(user_id, renamed = new_name.is_some(), "Profile updated");
        Ok(ProfileOutcome {
            name: new_name.unwrap_or(current.name),
            profile_image: new_image.or(current.profile_image),
            propagated,
        })
    }
}
