//! 読み込み済みモデルのキャッシュ
//!
//! 解決済みパスごとに読み込みを高々1回に抑え、以降は同じハンドルを返します。
//! パスごとのロックで、同時に来た初回呼び出しも1回の読み込みを待ち合わせます。
//! 読み込みに失敗した場合は何も記録しないので、ファイル差し替え後に再試行できます。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ml::{ModelHandle, ModelLoader};

type Slot = Arc<Mutex<Option<ModelHandle>>>;

pub struct ModelCache<L: ModelLoader> {
    loader: L,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl<L: ModelLoader> ModelCache<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// モデルハンドルを取得する（初回のみ読み込み）
    pub fn get_model(&self, resolved_path: &Path) -> Result<ModelHandle> {
        let slot = self.slot_for(resolved_path);

        // マップ全体のロックは解放済み。以降は同じパスの呼び出しだけが待ち合わせる
        let mut guard = lock(&slot);
        if let Some(handle) = guard.as_ref() {
            debug!("Model cache hit: {}", resolved_path.display());
            return Ok(Arc::clone(handle));
        }

        info!("Loading model: {}", resolved_path.display());
        match self.loader.load(resolved_path) {
            Ok(handle) => {
                *guard = Some(Arc::clone(&handle));
                Ok(handle)
            }
            Err(e) => {
                warn!("Model load failed for {}: {}", resolved_path.display(), e);
                Err(e)
            }
        }
    }

    /// キャッシュ済みのハンドルを破棄し、次回呼び出しで読み直させる
    ///
    /// 既に配布済みのハンドルはそのまま使い続けられる。
    pub fn invalidate(&self, resolved_path: &Path) -> bool {
        let Some(slot) = lock(&self.slots).remove(resolved_path) else {
            return false;
        };
        let had_model = lock(&slot).take().is_some();
        had_model
    }

    /// 読み込み済みモデルの数
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_for(&self, resolved_path: &Path) -> Slot {
        let mut slots = lock(&self.slots);
        Arc::clone(slots.entry(resolved_path.to_path_buf()).or_default())
    }
}

/// ロックを取得する
///
/// 読み込み中のパニックでロックが汚染されても、中身は `None` か完成したハンドルのどちらかなので継続して使う。
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, InspectionError};
    use crate::ml::{BinaryClassifier, ImageTensor};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedModel(f32);

    impl BinaryClassifier for FixedModel {
        fn predict(&self, _input: &ImageTensor) -> Result<Vec<f32>> {
            Ok(vec![self.0])
        }
    }

    /// 読み込み回数を数えるローダー（`broken` の間は失敗する）
    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        broken: AtomicBool,
        delay: Option<Duration>,
    }

    impl CountingLoader {
        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, path: &Path) -> Result<ModelHandle> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.broken.load(Ordering::SeqCst) {
                return Err(InspectionError::load(path, "corrupt bundle"));
            }
            Ok(Arc::new(FixedModel(0.25)))
        }
    }

    #[test]
    fn test_loads_once_per_path() {
        let cache = ModelCache::new(CountingLoader::default());
        let path = Path::new("models/a.tar.gz");

        let first = cache.get_model(path).unwrap();
        for _ in 0..10 {
            let again = cache.get_model(path).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }

        assert_eq!(cache.loader().loads(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_paths_load_separately() {
        let cache = ModelCache::new(CountingLoader::default());
        cache.get_model(Path::new("a.tar.gz")).unwrap();
        cache.get_model(Path::new("b.tar.gz")).unwrap();
        cache.get_model(Path::new("a.tar.gz")).unwrap();
        assert_eq!(cache.loader().loads(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_load_is_retryable() {
        let loader = CountingLoader::default();
        loader.broken.store(true, Ordering::SeqCst);
        let cache = ModelCache::new(loader);
        let path = Path::new("models/broken.tar.gz");

        let err = cache.get_model(path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelLoad);
        assert!(cache.is_empty());

        // ファイル差し替え後
        cache.loader().broken.store(false, Ordering::SeqCst);
        cache.get_model(path).unwrap();
        cache.get_model(path).unwrap();
        assert_eq!(cache.loader().loads(), 2);
    }

    #[test]
    fn test_invalidate_forces_reload() {
        let cache = ModelCache::new(CountingLoader::default());
        let path = Path::new("models/a.tar.gz");

        let old = cache.get_model(path).unwrap();
        assert!(cache.invalidate(path));
        assert!(!cache.invalidate(path));
        let new = cache.get_model(path).unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(cache.loader().loads(), 2);
    }

    #[test]
    fn test_concurrent_first_calls_load_once() {
        let cache = Arc::new(ModelCache::new(CountingLoader {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        }));
        let path = PathBuf::from("models/shared.tar.gz");

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let path = path.clone();
                std::thread::spawn(move || cache.get_model(&path).unwrap())
            })
            .collect();

        let handles: Vec<ModelHandle> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert_eq!(cache.loader().loads(), 1);
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }
}
