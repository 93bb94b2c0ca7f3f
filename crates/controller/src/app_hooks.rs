// SPDX-License-Identifier: Apache-2.0

//! The app-level lifecycle hook registry (§4.7).
//!
//! A standard app's `app_module` names a Rust type the same way a component's `component_module`
//! names one in [`crate::flow`] — a static [`AppHookFactory`] registered once via
//! [`APP_HOOK_FACTORIES`], looked up by name at `App::start` time. Unlike component modules, most
//! apps never set `app_module` at all, so lookup falls back to a no-op rather than erroring.

use std::time::Duration;

/// Overridable app-level lifecycle hook. The default `pre_stop` is a no-op; an `app_module`
/// overrides it to do things like unsubscribe from request topics or drain in-flight work before
/// the stop signal is set.
pub trait AppHooks: Send {
    /// Runs while the app's components are still processing, before the stop signal is set.
    /// `timeout` is the caller's budget for this phase; hooks that exceed it are not interrupted,
    /// but a slow hook eats into the join budget of the phase that follows.
    fn pre_stop(&mut self, timeout: Duration) {
        let _ = timeout;
    }
}

struct NoopHooks;

impl AppHooks for NoopHooks {}

/// A named constructor for an `app_module`, registered once per module via
/// [`APP_HOOK_FACTORIES`].
pub struct AppHookFactory {
    /// The `app_module` string this factory answers to.
    pub name: &'static str,
    /// Builds a fresh hook instance. Called once per `App::start` (including restarts), since a
    /// hook may hold per-run state.
    pub create: fn() -> Box<dyn AppHooks>,
}

/// The process-wide registry of app hook factories, populated by `#[distributed_slice(APP_HOOK_FACTORIES)]`.
#[linkme::distributed_slice]
pub static APP_HOOK_FACTORIES: [AppHookFactory] = [..];

/// Looks up a registered `app_module`'s factory, falling back to a no-op hook when `name` is
/// `None` or unregistered.
#[must_use]
pub fn lookup(name: Option<&str>) -> Box<dyn AppHooks> {
    name.and_then(|name| APP_HOOK_FACTORIES.iter().find(|factory| factory.name == name))
        .map_or_else(|| Box::new(NoopHooks) as Box<dyn AppHooks>, |factory| (factory.create)())
}
