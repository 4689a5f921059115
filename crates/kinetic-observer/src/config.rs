#![forbid(unsafe_code)]

//! Per-thread reactivity configuration.
//!
//! The engine is single-threaded (`Rc` everywhere), so configuration lives in
//! thread-locals: a [`ReactivityConfig`] installed with [`install`], and the
//! conversion switch that decides whether newly stored composites are made
//! reactive.
//!
//! # Environment
//!
//! [`ReactivityConfig::from_env`] honours:
//!
//! | variable | effect |
//! |---|---|
//! | `KINETIC_DIAGNOSTICS` | report usage violations and unsupported targets |
//! | `KINETIC_SILENT` | suppress the default `tracing` sink for diagnostics |
//! | `KINETIC_SERVER_RENDERING` | never create Observers |
//! | `KINETIC_MAX_ARRAY_LEN` | longest array [`set`](crate::set) may grow |
//!
//! Flag values `1`, `true`, `yes`, `on` enable; `0`, `false`, `no`, `off`
//! disable. Anything unparsable keeps the default.

use std::cell::{Cell, RefCell};

/// Reactivity switches for the current thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactivityConfig {
    /// Emit diagnostics for refused or skipped operations. Defaults to on in
    /// debug builds.
    pub diagnostics: bool,
    /// Drop diagnostics that have no installed handler instead of logging
    /// them.
    pub silent: bool,
    /// Non-reactive execution mode: `observe` never creates Observers.
    pub server_rendering: bool,
    /// Upper bound on the length an index write through `set` may grow an
    /// array to. Arrays are dense, so a far index allocates every hole.
    pub max_array_len: usize,
}

/// Default for [`ReactivityConfig::max_array_len`].
pub const DEFAULT_MAX_ARRAY_LEN: usize = 1 << 24;

impl Default for ReactivityConfig {
    fn default() -> Self {
        Self {
            diagnostics: cfg!(debug_assertions),
            silent: false,
            server_rendering: false,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }
}

impl ReactivityConfig {
    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    #[must_use]
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    #[must_use]
    pub fn with_server_rendering(mut self, enabled: bool) -> Self {
        self.server_rendering = enabled;
        self
    }

    #[must_use]
    pub fn with_max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }

    /// Defaults overridden by `KINETIC_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup("KINETIC_DIAGNOSTICS").as_deref().and_then(parse_flag) {
            config.diagnostics = v;
        }
        if let Some(v) = lookup("KINETIC_SILENT").as_deref().and_then(parse_flag) {
            config.silent = v;
        }
        if let Some(v) = lookup("KINETIC_SERVER_RENDERING")
            .as_deref()
            .and_then(parse_flag)
        {
            config.server_rendering = v;
        }
        if let Some(v) = lookup("KINETIC_MAX_ARRAY_LEN").and_then(|raw| raw.trim().parse::<usize>().ok()) {
            config.max_array_len = v;
        }
        config
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

thread_local! {
    static CONFIG: RefCell<ReactivityConfig> = RefCell::new(ReactivityConfig::default());
    static SHOULD_CONVERT: Cell<bool> = const { Cell::new(true) };
}

/// Replace the configuration for this thread; returns the previous one.
pub fn install(config: ReactivityConfig) -> ReactivityConfig {
    tracing::debug!(?config, "reactivity config installed");
    CONFIG.with(|c| c.replace(config))
}

/// Snapshot of the configuration for this thread.
#[must_use]
pub fn current() -> ReactivityConfig {
    CONFIG.with(|c| c.borrow().clone())
}

/// Run `f` under `config`, restoring the previous configuration afterwards.
pub fn scoped<R>(config: ReactivityConfig, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<ReactivityConfig>);
    impl Drop for Restore {
        fn drop(&mut self) {
            if let Some(previous) = self.0.take() {
                CONFIG.with(|c| c.replace(previous));
            }
        }
    }
    let _restore = Restore(Some(CONFIG.with(|c| c.replace(config))));
    f()
}

#[must_use]
pub fn is_server_rendering() -> bool {
    CONFIG.with(|c| c.borrow().server_rendering)
}

/// Whether values stored into reactive slots are currently converted.
#[must_use]
pub fn should_convert() -> bool {
    SHOULD_CONVERT.with(Cell::get)
}

/// Set the conversion switch; returns the previous setting.
pub fn set_should_convert(enabled: bool) -> bool {
    SHOULD_CONVERT.with(|c| c.replace(enabled))
}

/// RAII guard suspending conversion, e.g. while passing down values that
/// belong to frozen or externally owned data.
#[must_use = "conversion resumes as soon as the guard is dropped"]
pub struct ConversionPause {
    previous: bool,
}

impl ConversionPause {
    pub fn new() -> Self {
        Self {
            previous: set_should_convert(false),
        }
    }
}

impl Default for ConversionPause {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConversionPause {
    fn drop(&mut self) {
        set_should_convert(self.previous);
    }
}

/// Run `f` with conversion suspended.
pub fn without_conversion<R>(f: impl FnOnce() -> R) -> R {
    let _pause = ConversionPause::new();
    f()
}
