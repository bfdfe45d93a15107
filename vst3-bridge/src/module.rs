//! Loaded plugin bundles and their class descriptors

use crate::{
    error::{Error, Result},
    interfaces::PluginFactory,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Category tag of instantiable audio processing classes
pub const AUDIO_MODULE_CLASS: &str = "Audio Module Class";

/// 16-byte class identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClassId(pub [u8; 16]);

impl ClassId {
    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassId({})", self)
    }
}

/// Metadata of one class a factory can instantiate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    /// Class identifier
    pub id: ClassId,
    /// Category tag, e.g. `"Audio Module Class"`
    pub category: String,
    /// Display name
    pub name: String,
    /// `|`-separated sub-categories, e.g. `"Instrument|Synth"`
    pub sub_categories: String,
    /// Vendor, empty when the factory has no extended class info
    pub vendor: String,
    /// Version, empty when the factory has no extended class info
    pub version: String,
}

impl ClassDescriptor {
    /// Whether this class is an instantiable processing unit
    pub fn is_audio_module(&self) -> bool {
        self.category == AUDIO_MODULE_CLASS
    }
}

/// One loaded plugin bundle
///
/// Shared by every instance created from it; the library stays mapped until
/// the last `Arc` is dropped.
pub struct BinaryModule {
    path: PathBuf,
    classes: Vec<ClassDescriptor>,
    factory: Box<dyn PluginFactory>,
}

impl BinaryModule {
    /// Load a `.vst3` bundle (or the binary inside one)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "plugin bundle {} does not exist",
                path.display()
            )));
        }

        let binary_path = get_vst3_binary_path(path)?;
        log::info!("Loading VST3 module {}", binary_path.display());
        let factory = crate::internal::vst3::load_factory(&binary_path)?;
        Ok(Self::from_factory(path, factory))
    }

    /// Wrap an already available factory
    pub fn from_factory<P: AsRef<Path>>(path: P, factory: Box<dyn PluginFactory>) -> Arc<Self> {
        let classes = factory.classes();
        log::debug!(
            "Module {} exposes {} classes",
            path.as_ref().display(),
            classes.len()
        );
        Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            classes,
            factory,
        })
    }

    /// Path the module was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Vendor reported by the factory
    pub fn vendor(&self) -> String {
        self.factory.vendor()
    }

    /// All class descriptors
    pub fn classes(&self) -> &[ClassDescriptor] {
        &self.classes
    }

    /// Audio module classes only
    pub fn audio_classes(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.iter().filter(|class| class.is_audio_module())
    }

    /// Look up a class by id
    pub fn find_class(&self, id: &ClassId) -> Option<&ClassDescriptor> {
        self.classes.iter().find(|class| class.id == *id)
    }

    pub(crate) fn factory(&self) -> &dyn PluginFactory {
        self.factory.as_ref()
    }
}

impl fmt::Debug for BinaryModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryModule")
            .field("path", &self.path)
            .field("classes", &self.classes.len())
            .finish()
    }
}

/// Resolve the platform binary inside a `.vst3` bundle
pub fn get_vst3_binary_path(bundle_path: &Path) -> Result<PathBuf> {
    if bundle_path.is_file() {
        return Ok(bundle_path.to_path_buf());
    }

    #[cfg(target_os = "macos")]
    {
        let contents_path = bundle_path.join("Contents").join("MacOS");
        if let Ok(entries) = std::fs::read_dir(&contents_path) {
            for entry in entries.flatten() {
                let file_path = entry.path();
                let Some(name) = file_path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if file_path.is_file()
                    && !name.starts_with('.')
                    && !name.ends_with(".plist")
                    && !name.ends_with(".txt")
                {
                    return Ok(file_path);
                }
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let contents_path = bundle_path.join("Contents");
        for arch in ["x86_64-win", "x86-win"] {
            if let Some(found) = find_with_extension(&contents_path.join(arch), "vst3") {
                return Ok(found);
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let contents_path = bundle_path.join("Contents");
        for arch in ["x86_64-linux", "aarch64-linux", "i386-linux"] {
            if let Some(found) = find_with_extension(&contents_path.join(arch), "so") {
                return Ok(found);
            }
        }
    }

    Err(Error::NotFound(format!(
        "could not find a VST3 binary in bundle {}",
        bundle_path.display()
    )))
}

#[cfg(any(target_os = "windows", target_os = "linux"))]
fn find_with_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.extension() == Some(std::ffi::OsStr::new(extension)))
}
