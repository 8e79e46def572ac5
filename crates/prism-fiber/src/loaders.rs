//! Built-in [`Loader`]s.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::Context;
use prism_engine::device::ImageData;

use crate::resource::Loader;

/// Decodes image files into RGBA8 [`ImageData`].
///
/// The result can go straight into a texture or uniform prop through
/// `Value::from(Rc<ImageData>)`.
#[derive(Debug, Clone, Default)]
pub struct ImageLoader {
    base_dir: Option<PathBuf>,
}

impl ImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative keys against `dir`.
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: Some(dir.into()) }
    }

    /// Decodes an in-memory image (PNG, JPEG, ...).
    pub fn decode(bytes: &[u8]) -> anyhow::Result<ImageData> {
        let rgba = image::load_from_memory(bytes).context("decoding image")?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(ImageData::new(width, height, rgba.into_raw()))
    }

    fn resolve(&self, key: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if key.is_relative() => base.join(key),
            _ => key.to_path_buf(),
        }
    }
}

impl Loader for ImageLoader {
    type Key = PathBuf;
    type Output = ImageData;

    fn load(&self, key: &PathBuf) -> anyhow::Result<ImageData> {
        let path = self.resolve(key);
        let rgba = image::open(&path).with_context(|| format!("opening {}", path.display()))?.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("loaded {}x{} image from {}", width, height, path.display());
        Ok(ImageData::new(width, height, rgba.into_raw()))
    }
}

/// Raw file contents, for data the caller decodes itself.
#[derive(Debug, Clone, Default)]
pub struct BytesLoader {
    base_dir: Option<PathBuf>,
}

impl BytesLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: Some(dir.into()) }
    }
}

impl Loader for BytesLoader {
    type Key = PathBuf;
    type Output = Vec<u8>;

    fn load(&self, key: &PathBuf) -> anyhow::Result<Vec<u8>> {
        let path = match &self.base_dir {
            Some(base) if key.is_relative() => base.join(key),
            _ => key.clone(),
        };
        std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
    }
}

/// Loader backed by a function.
///
/// ```rust,ignore
/// let squares = FnLoader::new(|n: &u32| Ok(n * n));
/// let four = scope.use_resource(&squares, 2)?;
/// ```
pub struct FnLoader<K, V, F> {
    f: F,
    _types: PhantomData<fn(&K) -> V>,
}

impl<K, V, F> FnLoader<K, V, F>
where
    F: Fn(&K) -> anyhow::Result<V>,
{
    pub fn new(f: F) -> Self {
        Self { f, _types: PhantomData }
    }
}

impl<K, V, F: Clone> Clone for FnLoader<K, V, F> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone(), _types: PhantomData }
    }
}

impl<K, V, F> Loader for FnLoader<K, V, F>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
    V: Send + 'static,
    F: Fn(&K) -> anyhow::Result<V> + Clone + Send + 'static,
{
    type Key = K;
    type Output = V;

    fn load(&self, key: &K) -> anyhow::Result<V> {
        (self.f)(key)
    }
}
