//! Mapping products and hints to prefix configurations

use anyhow::Result;
use tracing::{error, info};

use crate::config::{PrefixConfiguration, SettingsDocument, SettingsStore, player_prefix_model, studio_prefix_model};
use crate::errors::ResolveError;
use crate::products::{PrefixHint, Product};

/// The highest-priority prefix carrying any of `hints`
pub fn resolve_prefix<'a>(
    settings: &'a SettingsDocument,
    hints: &[PrefixHint],
) -> Result<&'a PrefixConfiguration, ResolveError> {
    let mut candidates: Vec<&PrefixConfiguration> = settings.wineprefixes.iter().collect();
    candidates.sort_by_key(|prefix| prefix.sort_priority());

    candidates
        .into_iter()
        .find(|prefix| hints.iter().any(|hint| prefix.has_hint(*hint)))
        .ok_or_else(|| ResolveError::NoPrefixForHints(hints.to_vec()))
}

pub fn resolve_for_product(settings: &SettingsDocument, product: Product) -> Result<&PrefixConfiguration, ResolveError> {
    resolve_prefix(settings, &[product.hint()])
}

pub fn find_prefix<'a>(settings: &'a SettingsDocument, id: &str) -> Result<&'a PrefixConfiguration, ResolveError> {
    settings
        .find_prefix(id)
        .ok_or_else(|| ResolveError::PrefixNotFound(id.to_string()))
}

/// Creates the player and studio prefixes when nothing resolves for them
pub fn run_first_time_setup(store: &mut SettingsStore) -> Result<()> {
    let defaults: [(PrefixHint, fn() -> PrefixConfiguration); 2] =
        [(PrefixHint::Player, player_prefix_model), (PrefixHint::Studio, studio_prefix_model)];

    for (hint, model) in defaults {
        match resolve_prefix(store.document(), &[hint]) {
            Ok(existing) => info!(hint = hint.as_str(), prefix = %existing.display_name, "Prefix already configured"),
            Err(ResolveError::NoPrefixForHints(_)) => {
                let prefix = model();
                info!(hint = hint.as_str(), prefix = %prefix.display_name, id = %prefix.id, "Creating prefix");
                store.save_prefix(prefix)?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let complete = [PrefixHint::Player, PrefixHint::Studio]
        .iter()
        .all(|hint| resolve_prefix(store.document(), &[*hint]).is_ok());

    if complete {
        store.update(|document| document.performed_first_time_setup = true)?;
        info!("Completed first time setup");
    } else {
        error!("First time setup could not create every prefix");
    }
    Ok(())
}

/// Runs first-time setup unless the settings say it already happened
pub fn ensure_first_time_setup(store: &mut SettingsStore) -> Result<()> {
    if store.document().performed_first_time_setup {
        return Ok(());
    }
    run_first_time_setup(store)
}
