//! VST3 plugin discovery
//!
//! Finds `.vst3` bundles below a directory, loads each one just long enough
//! to enumerate its classes and reports one [`PluginInfo`] per audio-module
//! class.

use crate::{
    error::{Error, Result},
    module::{BinaryModule, ClassDescriptor},
};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sub-category keywords that mark an instrument
const INSTRUMENT_KEYWORDS: &[&str] = &[
    "instrument",
    "synth",
    "sampler",
    "drum",
    "piano",
    "soundgenerator",
    "generator",
];

/// Sub-category keywords that mark an effect
const EFFECT_KEYWORDS: &[&str] = &["fx", "effect"];

/// Information about one discovered plugin class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Class display name
    pub name: String,
    /// Vendor/manufacturer name
    pub vendor: String,
    /// Class version, empty if the factory does not report one
    pub version: String,
    /// Sub-category string (e.g. `"Instrument|Synth"`)
    pub category: String,
    /// Absolute path to the bundle
    pub path: PathBuf,
    /// Class id as 32 hex digits
    pub class_id: String,
    /// Classified as an instrument
    pub is_instrument: bool,
    /// Classified as an effect
    pub is_effect: bool,
}

impl PluginInfo {
    /// Build the record for one class of a loaded module
    pub fn from_class(module: &BinaryModule, class: &ClassDescriptor) -> Self {
        let kind = classify(&class.name, &class.sub_categories);
        let path = module.path();
        Self {
            name: class.name.clone(),
            vendor: if class.vendor.is_empty() {
                module.vendor()
            } else {
                class.vendor.clone()
            },
            version: class.version.clone(),
            category: class.sub_categories.clone(),
            path: path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
            class_id: class.id.to_string(),
            is_instrument: kind == PluginKind::Instrument,
            is_effect: kind == PluginKind::Effect,
        }
    }
}

/// Result of [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    /// Produces sound from note input
    Instrument,
    /// Processes an audio input
    Effect,
}

/// Classify a class by its name and `|`-separated sub-categories
///
/// A name containing `" FX"` always means effect. Otherwise instrument
/// keywords win over effect keywords, and anything unrecognized is treated
/// as an instrument.
///
/// ```
/// use vst3_bridge::discovery::{classify, PluginKind};
///
/// assert_eq!(classify("Serum 2 FX", "Instrument|Synth"), PluginKind::Effect);
/// assert_eq!(classify("Serum 2", "Instrument|Synth"), PluginKind::Instrument);
/// assert_eq!(classify("Delay", "Fx|Delay"), PluginKind::Effect);
/// assert_eq!(classify("Mystery", ""), PluginKind::Instrument);
/// ```
pub fn classify(name: &str, sub_categories: &str) -> PluginKind {
    if name.to_uppercase().contains(" FX") {
        return PluginKind::Effect;
    }

    let tokens: Vec<String> = sub_categories
        .split('|')
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty())
        .collect();
    let matches = |keywords: &[&str]| {
        tokens
            .iter()
            .any(|token| keywords.iter().any(|keyword| token.contains(keyword)))
    };

    if matches(INSTRUMENT_KEYWORDS) {
        PluginKind::Instrument
    } else if matches(EFFECT_KEYWORDS) {
        PluginKind::Effect
    } else {
        PluginKind::Instrument
    }
}

/// Loads a bundle for inspection
pub type ModuleLoader = Box<dyn Fn(&Path) -> Result<Arc<BinaryModule>> + Send + Sync>;

/// Bundle scanner with a replaceable module loader
pub struct Scanner {
    loader: ModuleLoader,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    /// Scanner that loads real VST3 binaries
    pub fn new() -> Self {
        Self::with_loader(|path| BinaryModule::load(path))
    }

    /// Scanner using a custom loader
    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn(&Path) -> Result<Arc<BinaryModule>> + Send + Sync + 'static,
    {
        Self {
            loader: Box::new(loader),
        }
    }

    /// Scan `dir` recursively and call `callback` for every audio-module
    /// class found. Returns the number of classes reported.
    pub fn scan_directory<F>(&self, dir: &Path, mut callback: F) -> Result<usize>
    where
        F: FnMut(&PluginInfo),
    {
        self.scan_into(dir, &mut callback)
    }

    /// Scan several directories, skipping those that do not exist
    pub fn scan_locations<F>(&self, dirs: &[PathBuf], mut callback: F) -> usize
    where
        F: FnMut(&PluginInfo),
    {
        let mut total = 0;
        for dir in dirs {
            if !dir.is_dir() {
                log::debug!("Skipping missing plugin directory {}", dir.display());
                continue;
            }
            match self.scan_into(dir, &mut callback) {
                Ok(count) => total += count,
                Err(e) => log::warn!("Failed to scan {}: {}", dir.display(), e),
            }
        }
        total
    }

    /// Scan `dir` and collect the results
    pub fn collect(&self, dir: &Path) -> Result<Vec<PluginInfo>> {
        let mut plugins = Vec::new();
        self.scan_directory(dir, |info| plugins.push(info.clone()))?;
        Ok(plugins)
    }

    fn scan_into(&self, dir: &Path, callback: &mut dyn FnMut(&PluginInfo)) -> Result<usize> {
        let bundles = find_bundles(dir)?;
        log::debug!("Found {} bundles in {}", bundles.len(), dir.display());

        let mut count = 0;
        for bundle in bundles {
            let module = match (self.loader)(&bundle) {
                Ok(module) => module,
                Err(e) => {
                    log::warn!("Skipping {}: {}", bundle.display(), e);
                    continue;
                }
            };
            for class in module.audio_classes() {
                let info = PluginInfo::from_class(&module, class);
                log::debug!(
                    "Found '{}' ({}) instrument={} effect={}",
                    info.name,
                    info.category,
                    info.is_instrument,
                    info.is_effect
                );
                callback(&info);
                count += 1;
            }
        }
        Ok(count)
    }
}

/// All `.vst3` bundles below `dir`, sorted. Bundles are not descended into.
pub fn find_bundles(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::IoFailure(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }
    let mut bundles = Vec::new();
    walk(dir, &mut bundles)?;
    bundles.sort();
    Ok(bundles)
}

fn walk(dir: &Path, bundles: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.extension() == Some(OsStr::new("vst3")) {
            bundles.push(path);
        } else if path.is_dir() {
            if let Err(e) = walk(&path, bundles) {
                log::debug!("Cannot read {}: {}", path.display(), e);
            }
        }
    }
    Ok(())
}

/// Platform-conventional VST3 directories
pub fn standard_locations() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let dirs = directories::BaseDirs::new();

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/Library/Audio/Plug-Ins/VST3"));
        if let Some(dirs) = &dirs {
            paths.push(dirs.home_dir().join("Library/Audio/Plug-Ins/VST3"));
        }
    }

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\Program Files\Common Files\VST3"));
        paths.push(PathBuf::from(r"C:\Program Files (x86)\Common Files\VST3"));
        if let Some(dirs) = &dirs {
            paths.push(dirs.data_local_dir().join("Programs").join("Common").join("VST3"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/lib/vst3"));
        paths.push(PathBuf::from("/usr/local/lib/vst3"));
        if let Some(dirs) = &dirs {
            paths.push(dirs.home_dir().join(".vst3"));
        }
    }

    paths
}
