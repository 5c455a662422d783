// Copyright (C) 2024 Infinite Athlete, Inc. <av-eng@infiniteathlete.ai>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backend capability detection and selection.
//!
//! Hardware capabilities are probed once per process. Everything else lives
//! in a [`BackendConfig`], which conversions consult through a
//! [`crate::Converter`]. The free conversion functions use
//! [`BackendConfig::global`].
//!
//! Configuration methods are atomic, but changing the selection while other
//! threads are converting only affects calls that start afterwards; set the
//! configuration once at startup or serialize changes against conversions.
//!
//! ```
//! use pixconv::backend::{Backend, BackendConfig};
//! let config = BackendConfig::new();
//! assert!(config.set_backend(Backend::Scalar));
//! assert_eq!(config.backend(), Backend::Scalar);
//!
//! assert!(config.set_backend(Backend::Automatic));
//! assert_ne!(config.backend(), Backend::Automatic);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;

use tracing::{debug, info, warn};

use crate::ConversionError;

/// Environment variable read by [`BackendConfig::global`] to pick the initial backend.
pub const BACKEND_ENV: &str = "PIXCONV_BACKEND";

/// A conversion backend.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Backend {
    /// Resolves to the best usable concrete backend. Never returned by
    /// [`BackendConfig::backend`].
    #[default]
    Automatic = 0,

    /// Portable per-pixel code. Always available.
    Scalar = 1,

    /// Explicit SIMD: AVX2 on `x86_64`, NEON on `aarch64`.
    Vector = 2,

    /// Row bands converted in parallel on the `rayon` pool.
    Accelerated = 3,
}

impl Backend {
    /// Concrete backends in descending order of preference.
    pub const CONCRETE: [Backend; 3] = [Backend::Accelerated, Backend::Vector, Backend::Scalar];

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Backend::Scalar,
            2 => Backend::Vector,
            3 => Backend::Accelerated,
            _ => Backend::Automatic,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Backend::Automatic => "automatic",
            Backend::Scalar => "scalar",
            Backend::Vector => "vector",
            Backend::Accelerated => "accelerated",
        })
    }
}

impl std::str::FromStr for Backend {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "automatic" => Ok(Backend::Automatic),
            "scalar" | "cpu" => Ok(Backend::Scalar),
            "vector" | "simd" | "avx2" | "neon" => Ok(Backend::Vector),
            "accelerated" | "parallel" => Ok(Backend::Accelerated),
            _ => Err(ConversionError::UnknownBackend(s.to_owned())),
        }
    }
}

/// Hardware-level availability of the optional backends.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub vector: bool,
    pub accelerated: bool,
}

impl Capabilities {
    /// A machine with neither vector nor parallel support.
    pub const NONE: Self = Self {
        vector: false,
        accelerated: false,
    };

    /// Probes the machine. The probe runs once; later calls return the cached answer.
    pub fn detect() -> Self {
        static DETECTED: OnceLock<Capabilities> = OnceLock::new();
        *DETECTED.get_or_init(|| {
            let caps = Capabilities {
                vector: crate::row::vector_supported(),
                accelerated: cfg!(feature = "rayon")
                    && std::thread::available_parallelism().is_ok_and(|n| n.get() > 1),
            };
            debug!(
                vector = caps.vector,
                accelerated = caps.accelerated,
                "detected conversion capabilities"
            );
            caps
        })
    }

    #[inline]
    pub fn supports(self, backend: Backend) -> bool {
        match backend {
            Backend::Automatic | Backend::Scalar => true,
            Backend::Vector => self.vector,
            Backend::Accelerated => self.accelerated,
        }
    }
}

/// Backend selection and usability toggles.
#[derive(Debug)]
pub struct BackendConfig {
    hardware: Capabilities,
    vector_enabled: AtomicBool,
    accelerated_enabled: AtomicBool,
    selected: AtomicU8,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendConfig {
    /// Returns a config for this machine with everything enabled and
    /// [`Backend::Automatic`] selected.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::detect())
    }

    /// Returns a config which behaves as though the hardware offered only `hardware`.
    ///
    /// Claiming a capability the machine lacks is clamped away; this can
    /// only hide hardware, not invent it.
    pub fn with_capabilities(hardware: Capabilities) -> Self {
        let detected = Capabilities::detect();
        Self {
            hardware: Capabilities {
                vector: hardware.vector && detected.vector,
                accelerated: hardware.accelerated && detected.accelerated,
            },
            vector_enabled: AtomicBool::new(true),
            accelerated_enabled: AtomicBool::new(true),
            selected: AtomicU8::new(Backend::Automatic as u8),
        }
    }

    /// Returns [`BackendConfig::new`] with the selection taken from
    /// [`BACKEND_ENV`] when it is set to a usable backend.
    pub fn from_env() -> Self {
        let config = Self::new();
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            match value.parse::<Backend>() {
                Ok(backend) => {
                    config.set_backend(backend);
                }
                Err(e) => warn!(%e, "ignoring {BACKEND_ENV}"),
            }
        }
        config
    }

    /// Returns the process-wide config used by the free conversion functions.
    pub fn global() -> &'static BackendConfig {
        static INSTANCE: OnceLock<BackendConfig> = OnceLock::new();
        INSTANCE.get_or_init(BackendConfig::from_env)
    }

    /// Returns the hardware capabilities this config was built with.
    #[inline]
    pub fn hardware(&self) -> Capabilities {
        self.hardware
    }

    fn enabled_flag(&self, backend: Backend) -> Option<&AtomicBool> {
        match backend {
            Backend::Vector => Some(&self.vector_enabled),
            Backend::Accelerated => Some(&self.accelerated_enabled),
            Backend::Automatic | Backend::Scalar => None,
        }
    }

    /// Returns true if `backend` is currently usable: present in hardware and
    /// not disabled. Scalar and automatic are always usable.
    pub fn query(&self, backend: Backend) -> bool {
        self.hardware.supports(backend)
            && self
                .enabled_flag(backend)
                .map_or(true, |f| f.load(Ordering::Acquire))
    }

    /// Allows or forbids use of `backend`, returning whether it is now usable.
    ///
    /// Scalar and automatic can't be toggled.
    pub fn enable(&self, backend: Backend, enabled: bool) -> bool {
        if let Some(flag) = self.enabled_flag(backend) {
            flag.store(enabled, Ordering::Release);
            debug!(%backend, enabled, "backend usability changed");
        }
        self.query(backend)
    }

    /// Inverse of [`BackendConfig::enable`]; returns whether `backend` is still usable.
    pub fn disable(&self, backend: Backend, disabled: bool) -> bool {
        self.enable(backend, !disabled)
    }

    /// Selects `backend`. Fails and keeps the previous selection if it isn't usable.
    pub fn set_backend(&self, backend: Backend) -> bool {
        if !self.query(backend) {
            warn!(%backend, previous = %self.selected(), "backend is not usable");
            return false;
        }
        self.selected.store(backend as u8, Ordering::Release);
        info!(%backend, "selected conversion backend");
        true
    }

    /// Returns the stored selection, which may be [`Backend::Automatic`].
    #[inline]
    pub fn selected(&self) -> Backend {
        Backend::from_u8(self.selected.load(Ordering::Acquire))
    }

    /// Returns the concrete backend conversions will use.
    ///
    /// [`Backend::Automatic`], or a selection that has since been disabled,
    /// resolves to the most preferred usable backend.
    pub fn backend(&self) -> Backend {
        let selected = self.selected();
        if selected != Backend::Automatic && self.query(selected) {
            return selected;
        }
        Backend::CONCRETE
            .into_iter()
            .find(|&b| self.query(b))
            .unwrap_or(Backend::Scalar)
    }
}
