use crate::config::{AppSettings, StressSensitivity};
use crate::storage::{LocalStore, StoreError, SETTINGS_KEY};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSettingsPatch {
    pub health_sync_enabled: Option<bool>,
    pub notifications_enabled: Option<bool>,
    pub stress_sensitivity: Option<StressSensitivity>,
}

pub fn load_or_default(store: &LocalStore) -> AppSettings {
    let contents = match store.read(SETTINGS_KEY) {
        Ok(Some(contents)) => contents,
        Ok(None) => return AppSettings::default(),
        Err(error) => {
            warn!(%error, "stored settings unreadable; using defaults");
            return AppSettings::default();
        }
    };
    match serde_json::from_str::<AppSettings>(&contents) {
        Ok(settings) => settings,
        Err(error) => {
            warn!(%error, "stored settings unparsable; using defaults");
            AppSettings::default()
        }
    }
}

pub fn save(store: &LocalStore, settings: &AppSettings) -> Result<(), StoreError> {
    let contents = serde_json::to_string_pretty(settings)?;
    store.write(SETTINGS_KEY, &contents)?;
    info!(
        health_sync = settings.health_sync_enabled,
        notifications = settings.notifications_enabled,
        sensitivity = settings.stress_sensitivity.as_str(),
        "settings saved"
    );
    Ok(())
}

/// Health sync gates notifications: turning it on enables them, turning it
/// off disables both.
pub fn with_health_sync(settings: &AppSettings, enabled: bool) -> AppSettings {
    AppSettings {
        health_sync_enabled: enabled,
        notifications_enabled: enabled,
        stress_sensitivity: settings.stress_sensitivity,
    }
}

/// Notification and sensitivity changes only take effect while health sync is on.
pub fn apply_patch(settings: &AppSettings, patch: AppSettingsPatch) -> AppSettings {
    let base = match patch.health_sync_enabled {
        Some(enabled) if enabled != settings.health_sync_enabled => {
            with_health_sync(settings, enabled)
        }
        _ => settings.clone(),
    };

    if !base.health_sync_enabled {
        return base;
    }

    AppSettings {
        health_sync_enabled: true,
        notifications_enabled: patch
            .notifications_enabled
            .unwrap_or(base.notifications_enabled),
        stress_sensitivity: patch
            .stress_sensitivity
            .unwrap_or(base.stress_sensitivity),
    }
}
