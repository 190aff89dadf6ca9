//! Indicator-guarded prefix mutations
//!
//! A [`Recipe`] is satisfied when every one of its indicators holds for the prefix.
//! Callers check [`Recipe::exists_in`] first and only call [`Recipe::make_in`] when it
//! returns false; `make_in` never skips on its own. Nothing here locks the prefix, so
//! callers must not run two recipes against the same prefix at once.

pub mod dxvk;
pub mod edge_update;
pub mod webview;

use std::fmt;
use std::sync::mpsc::Sender;

use tracing::{debug, info};

use crate::config::PrefixConfiguration;
use crate::errors::RecipeError;
use crate::net::Fetch;
use crate::tasks::BackgroundTask;
use crate::wine::Prefix;

/// Predicate deciding whether part of a recipe's effect is present
pub type Indicator<T> = fn(&T) -> bool;

/// True iff every indicator holds; an empty list never holds
pub fn indicators_hold<T>(indicators: &[Indicator<T>], target: &T) -> bool {
    !indicators.is_empty() && indicators.iter().all(|indicator| indicator(target))
}

/// Collaborators a recipe may need while making itself
#[derive(Clone, Copy)]
pub struct RecipeContext<'a> {
    pub fetcher: &'a dyn Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipe {
    DeleteEdgeUpdateService,
    RestoreEdgeUpdateService,
    InstallDxvk,
    UninstallDxvk,
    InstallWebview2,
}

impl Recipe {
    pub fn name(&self) -> &'static str {
        match self {
            Recipe::DeleteEdgeUpdateService => "delete_edge_update_service",
            Recipe::RestoreEdgeUpdateService => "restore_edge_update_service",
            Recipe::InstallDxvk => "install_dxvk",
            Recipe::UninstallDxvk => "uninstall_dxvk",
            Recipe::InstallWebview2 => "install_webview2",
        }
    }

    /// The edge update recipe matching a prefix's `disable_edge_update` flag
    pub fn edge_update_for(disable_edge_update: bool) -> Self {
        if disable_edge_update {
            Recipe::DeleteEdgeUpdateService
        } else {
            Recipe::RestoreEdgeUpdateService
        }
    }

    pub fn indicators(&self) -> Vec<Indicator<Prefix>> {
        match self {
            Recipe::DeleteEdgeUpdateService => vec![edge_update::service_absent],
            Recipe::RestoreEdgeUpdateService => vec![edge_update::service_present],
            Recipe::InstallDxvk => vec![dxvk::any_installation_present],
            Recipe::UninstallDxvk => vec![dxvk::no_installation_present],
            Recipe::InstallWebview2 => vec![webview::never_installed],
        }
    }

    /// True when there is nothing left to do
    pub fn exists_in(&self, prefix: &Prefix) -> bool {
        let satisfied = indicators_hold(&self.indicators(), prefix);
        debug!(recipe = self.name(), prefix = %prefix.configuration().display_name, satisfied, "Checked recipe");
        satisfied
    }

    /// Whether the prefix meets the recipe's requirements
    pub fn can_make_in(&self, prefix: &Prefix) -> bool {
        match self {
            Recipe::InstallDxvk => dxvk::system_directories_present(prefix),
            _ => true,
        }
    }

    /// Applies the recipe's mutation
    ///
    /// Fails with [`RecipeError::CannotMake`] without touching the prefix when
    /// [`can_make_in`](Self::can_make_in) is false.
    pub fn make_in(&self, prefix: &mut Prefix, ctx: RecipeContext<'_>) -> Result<(), RecipeError> {
        if !self.can_make_in(prefix) {
            return Err(RecipeError::CannotMake {
                recipe: self.name(),
                prefix: prefix.configuration().display_name.clone(),
            });
        }

        info!(recipe = self.name(), prefix = %prefix.configuration().display_name, "Making recipe");
        match self {
            Recipe::DeleteEdgeUpdateService => edge_update::delete_service(prefix),
            Recipe::RestoreEdgeUpdateService => edge_update::restore_service(prefix),
            Recipe::InstallDxvk => dxvk::install(prefix, ctx.fetcher),
            Recipe::UninstallDxvk => dxvk::uninstall(prefix),
            Recipe::InstallWebview2 => webview::install(prefix, ctx.fetcher),
        }
    }

    /// Makes the recipe unless it already exists; returns whether anything ran
    pub fn ensure_in(&self, prefix: &mut Prefix, ctx: RecipeContext<'_>) -> Result<bool, RecipeError> {
        if self.exists_in(prefix) {
            return Ok(false);
        }
        self.make_in(prefix, ctx)?;
        Ok(true)
    }
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs one recipe off the main loop
///
/// The prefix configuration is sent back once the recipe succeeded, since recipes such
/// as the DXVK install record their results in it and the caller owns the settings store.
pub struct RecipeTask {
    recipe: Recipe,
    prefix: Prefix,
    fetcher: Box<dyn Fetch>,
    updated: Sender<PrefixConfiguration>,
    task_name: String,
}

impl RecipeTask {
    pub fn new(recipe: Recipe, prefix: Prefix, fetcher: Box<dyn Fetch>, updated: Sender<PrefixConfiguration>) -> Self {
        let task_name = format!("{} ({})", recipe, prefix.configuration().display_name);
        Self {
            recipe,
            prefix,
            fetcher,
            updated,
            task_name,
        }
    }
}

impl BackgroundTask for RecipeTask {
    fn name(&self) -> &str {
        &self.task_name
    }

    fn work(self: Box<Self>) -> anyhow::Result<()> {
        let RecipeTask {
            recipe,
            mut prefix,
            fetcher,
            updated,
            ..
        } = *self;

        let ctx = RecipeContext { fetcher: fetcher.as_ref() };
        if !recipe.ensure_in(&mut prefix, ctx)? {
            info!(recipe = %recipe, "Recipe already satisfied");
        }
        let _ = updated.send(prefix.configuration().clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrefixConfiguration;
    use crate::net::tests::FakeFetcher;
    use crate::wine::control::tests::fixture;

    #[derive(Default)]
    struct Target {
        a: bool,
        b: bool,
    }

    fn f1(t: &Target) -> bool {
        t.a
    }

    fn f2(t: &Target) -> bool {
        t.b
    }

    #[test]
    fn test_indicators_are_conjunctive() {
        let indicators: [Indicator<Target>; 2] = [f1, f2];
        for (a, b) in [(false, false), (true, false), (false, true), (true, true)] {
            assert_eq!(indicators_hold(&indicators, &Target { a, b }), a && b);
        }
    }

    #[test]
    fn test_empty_indicators_never_hold() {
        assert!(!indicators_hold::<Target>(&[], &Target { a: true, b: true }));
    }

    #[test]
    fn test_install_dxvk_cannot_be_made_without_system_directories() {
        let mut fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let fetcher = FakeFetcher::default();

        let err = Recipe::InstallDxvk
            .make_in(&mut fx.prefix, RecipeContext { fetcher: &fetcher })
            .unwrap_err();
        assert!(matches!(err, RecipeError::CannotMake { recipe: "install_dxvk", .. }));
        assert!(fetcher.requested.lock().unwrap().is_empty());
        assert!(!fx.prefix.paths().dxvk_directory().exists());
    }

    #[test]
    fn test_recipe_task_sends_configuration_back() {
        let fx = fixture(PrefixConfiguration::new("Player", 0, vec![]));
        let (tx, rx) = std::sync::mpsc::channel();
        let fetcher = FakeFetcher::default().with(crate::constants::webview::BOOTSTRAPPER_URL, "MZ");

        let task = RecipeTask::new(Recipe::InstallWebview2, fx.prefix.clone(), Box::new(fetcher), tx);
        assert_eq!(task.name(), "install_webview2 (Player)");
        Box::new(task).work().unwrap();

        assert_eq!(rx.try_recv().unwrap().display_name, "Player");
        assert_eq!(fx.calls().len(), 1);
    }

    #[test]
    fn test_backup_conflict_stays_presentable_through_main_loop() {
        use crate::errors::find_presentable;
        use crate::main_loop::{LoopExit, MainLoop};
        use crate::process::{LogDirectory, ProcessRunner};

        let fx = dxvk::tests::wine_prefix();
        let syswow64 = fx.prefix.paths().syswow64().unwrap();
        std::fs::write(syswow64.join("dxgi.dll.old"), "stale").unwrap();

        let mut main_loop = MainLoop::new(ProcessRunner::new(LogDirectory::new(fx.dir.path().join("loop-logs")))).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        main_loop.spawn_task(Box::new(RecipeTask::new(
            Recipe::InstallDxvk,
            fx.prefix.clone(),
            Box::new(dxvk::tests::fetcher()),
            tx,
        )));
        assert_eq!(main_loop.run_until_idle(), LoopExit::Idle);

        let mut reports = main_loop.take_task_reports();
        assert_eq!(reports.len(), 1);
        let err = reports.remove(0).into_result().unwrap_err();

        let presentable = find_presentable(&err).expect("presentable error survives the task");
        assert_eq!(presentable.title, "Backup files already exist");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_edge_update_recipe_follows_flag() {
        assert_eq!(Recipe::edge_update_for(true), Recipe::DeleteEdgeUpdateService);
        assert_eq!(Recipe::edge_update_for(false), Recipe::RestoreEdgeUpdateService);
    }
}
