//! Instance settings, editable by admins

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use url::Url;

use crate::data::{Database, SiteSettings, User};
use crate::error::AppError;

/// Submitted settings form
///
/// Unchecked checkboxes are absent from form posts, so the flags default
/// to false.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteSettingsForm {
    pub name: String,
    #[serde(default)]
    pub instance_tagline: String,
    #[serde(default)]
    pub instance_description: String,
    #[serde(default)]
    pub code_of_conduct: String,
    #[serde(default)]
    pub privacy_policy: String,
    #[serde(default)]
    pub support_link: Option<String>,
    #[serde(default)]
    pub support_title: Option<String>,
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default)]
    pub allow_registration: bool,
    #[serde(default)]
    pub allow_invite_requests: bool,
    #[serde(default)]
    pub registration_closed_text: String,
}

impl SiteSettingsForm {
    fn validate(self) -> Result<SiteSettings, AppError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }

        let admin_email = blank_to_none(self.admin_email);
        if let Some(email) = admin_email.as_deref()
            && !looks_like_email(email)
        {
            return Err(AppError::Validation(format!("invalid email: {email}")));
        }

        let support_link = blank_to_none(self.support_link);
        if let Some(link) = support_link.as_deref()
            && !looks_like_url(link)
        {
            return Err(AppError::Validation(format!("invalid url: {link}")));
        }

        Ok(SiteSettings {
            name: name.to_string(),
            instance_tagline: self.instance_tagline,
            instance_description: self.instance_description,
            code_of_conduct: self.code_of_conduct,
            privacy_policy: self.privacy_policy,
            support_link,
            support_title: blank_to_none(self.support_title),
            admin_email,
            allow_registration: self.allow_registration,
            allow_invite_requests: self.allow_invite_requests,
            registration_closed_text: self.registration_closed_text,
            updated_at: Utc::now(),
        })
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && !value.chars().any(char::is_whitespace)
                && domain
                    .split('.')
                    .filter(|part| !part.is_empty())
                    .count()
                    >= 2
        }
        None => false,
    }
}

fn looks_like_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

/// Site settings service
pub struct SiteService {
    db: Arc<Database>,
}

impl SiteService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn require_admin(viewer: Option<&User>) -> Result<&User, AppError> {
        let viewer = viewer.ok_or(AppError::Unauthorized)?;
        if !viewer.is_admin {
            return Err(AppError::Forbidden);
        }
        Ok(viewer)
    }

    pub async fn get(&self, viewer: Option<&User>) -> Result<SiteSettings, AppError> {
        Self::require_admin(viewer)?;
        self.db.get_site_settings().await
    }

    pub async fn update(
        &self,
        viewer: Option<&User>,
        form: SiteSettingsForm,
    ) -> Result<SiteSettings, AppError> {
        let admin = Self::require_admin(viewer)?;
        let settings = form.validate()?;
        self.db.update_site_settings(&settings).await?;
        tracing::info!(admin = %admin.username, "Updated site settings");
        Ok(settings)
    }
}
