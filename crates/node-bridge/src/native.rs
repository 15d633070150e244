//! Handle to the native peer-node library.
//!
//! The library exports two C functions:
//!
//! ```c
//! int32_t aeon_start_node(int64_t seed);                  // blocks for the node's lifetime
//! int32_t aeon_send_message(const char *peer, const char *body);
//! ```
//!
//! Nothing else in the crate touches the native boundary. Callers get a
//! [`NativeNodeHandle`] whose variant is decided once at load time.

use crate::error::{DispatchError, NativeError};
use libloading::Library;
use std::ffi::{c_char, CStr, CString};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

const START_SYMBOL: &str = "aeon_start_node";
const SEND_SYMBOL: &str = "aeon_send_message";

type StartFn = unsafe extern "C" fn(i64) -> i32;
type SendFn = unsafe extern "C" fn(*const c_char, *const c_char) -> i32;

/// The two native calls the bridge is allowed to make.
pub trait NodeLibrary: Send + Sync + 'static {
    /// Run the node. Blocks for as long as the node runs.
    fn start_node(&self, seed: i64) -> i32;

    /// Hand a message to the node. `None` when the library has no send call.
    fn send_message(&self, peer: &CStr, body: &CStr) -> Option<i32>;

    /// Whether `send_message` reaches the node.
    fn can_send(&self) -> bool {
        true
    }
}

/// Symbols resolved from a dynamically loaded library.
struct DynamicLibrary {
    start: StartFn,
    send: Option<SendFn>,
    // Keeps the symbols above valid; never unloaded before process exit
    _library: Library,
}

impl DynamicLibrary {
    fn open(path: &Path) -> Result<Self, NativeError> {
        // SAFETY: loading runs the library's initializers. The path is the
        // operator-configured node library.
        let library = unsafe { Library::new(path) }.map_err(|source| NativeError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: symbol types match the exported C signatures above.
        let start: StartFn = unsafe { library.get::<StartFn>(START_SYMBOL.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|source| NativeError::Symbol {
                name: START_SYMBOL,
                source,
            })?;

        // SAFETY: as above.
        let send: Option<SendFn> = match unsafe { library.get::<SendFn>(SEND_SYMBOL.as_bytes()) } {
            Ok(symbol) => Some(*symbol),
            Err(e) => {
                warn!("{} unavailable, sending disabled: {}", SEND_SYMBOL, e);
                None
            }
        };

        Ok(Self {
            start,
            send,
            _library: library,
        })
    }
}

impl NodeLibrary for DynamicLibrary {
    fn start_node(&self, seed: i64) -> i32 {
        // SAFETY: resolved from the library kept alive by `self`.
        unsafe { (self.start)(seed) }
    }

    fn send_message(&self, peer: &CStr, body: &CStr) -> Option<i32> {
        let send = self.send?;
        // SAFETY: both pointers are NUL-terminated and outlive the call.
        Some(unsafe { send(peer.as_ptr(), body.as_ptr()) })
    }

    fn can_send(&self) -> bool {
        self.send.is_some()
    }
}

/// Result of a send through the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The native call ran and returned this status (0 = success)
    Sent(i32),
    /// No native send capability; the message was dropped
    Disabled,
}

/// A loaded node library.
pub struct EnabledNode {
    library: Arc<dyn NodeLibrary>,
    started: AtomicBool,
    /// Serializes sends into the native call surface
    send_lock: Arc<Mutex<()>>,
}

/// The bridge's only way into the native node.
pub enum NativeNodeHandle {
    Enabled(EnabledNode),
    /// Library could not be used; the bridge relays logs only
    Disabled,
}

impl NativeNodeHandle {
    /// Load the node library at `path`.
    ///
    /// A missing file is an error. A file that exists but cannot be loaded,
    /// or lacks the start symbol, yields [`NativeNodeHandle::Disabled`].
    pub fn load(path: &Path) -> Result<Self, NativeError> {
        if !path.exists() {
            return Err(NativeError::LibraryNotFound(path.to_path_buf()));
        }

        match DynamicLibrary::open(path) {
            Ok(library) => {
                info!("Native library loaded from {}", path.display());
                Ok(Self::from_library(Arc::new(library)))
            }
            Err(e) => {
                warn!("{}; continuing in log-only mode", e);
                Ok(Self::Disabled)
            }
        }
    }

    /// Wrap an already-resolved library.
    pub fn from_library(library: Arc<dyn NodeLibrary>) -> Self {
        Self::Enabled(EnabledNode {
            library,
            started: AtomicBool::new(false),
            send_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn disabled() -> Self {
        Self::Disabled
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Start the node on its own thread.
    ///
    /// Runs at most once per handle; returns false if the node was already
    /// started, the handle is disabled, or the thread could not be spawned.
    /// The thread is never joined.
    pub fn spawn(&self, seed: i64) -> bool {
        let Self::Enabled(node) = self else {
            debug!("Native node disabled, not starting");
            return false;
        };

        if node.started.swap(true, Ordering::SeqCst) {
            warn!("Native node already started");
            return false;
        }

        let library = Arc::clone(&node.library);
        let spawned = std::thread::Builder::new()
            .name("native-node".into())
            .spawn(move || {
                let status = library.start_node(seed);
                if status == 0 {
                    info!("Native node exited");
                } else {
                    warn!("Native node exited with status {}", status);
                }
            });

        match spawned {
            Ok(_) => {
                info!("Native node starting with seed {}", seed);
                true
            }
            Err(e) => {
                warn!("Failed to spawn native node thread: {}", e);
                false
            }
        }
    }

    /// Send `body` to `peer` through the node.
    ///
    /// The native call runs on the blocking pool so the caller's task is not
    /// held up. A non-zero status is logged, never retried.
    pub async fn send(&self, peer: &str, body: &str) -> Result<SendStatus, DispatchError> {
        let Self::Enabled(node) = self else {
            return Ok(SendStatus::Disabled);
        };

        let peer_c = CString::new(peer)?;
        let body_c = CString::new(body)?;
        let library = Arc::clone(&node.library);
        let send_lock = Arc::clone(&node.send_lock);

        let status = tokio::task::spawn_blocking(move || {
            let _serialized = send_lock.lock().unwrap_or_else(PoisonError::into_inner);
            library.send_message(&peer_c, &body_c)
        })
        .await?;

        match status {
            Some(0) => Ok(SendStatus::Sent(0)),
            Some(code) => {
                warn!("Native send to {} returned status {}", peer, code);
                Ok(SendStatus::Sent(code))
            }
            None => Ok(SendStatus::Disabled),
        }
    }

    /// Short state label for status envelopes.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled(node) => {
                if !node.started.load(Ordering::SeqCst) {
                    "idle"
                } else if node.library.can_send() {
                    "running"
                } else {
                    "send-disabled"
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    /// In-process stand-in for the node library.
    #[derive(Default)]
    pub(crate) struct FakeLibrary {
        pub sends: Mutex<Vec<(String, String)>>,
        pub starts: Mutex<Vec<i64>>,
        pub send_status: i32,
        pub without_send: bool,
    }

    impl FakeLibrary {
        pub fn sends(&self) -> Vec<(String, String)> {
            self.sends.lock().unwrap().clone()
        }
    }

    impl NodeLibrary for FakeLibrary {
        fn start_node(&self, seed: i64) -> i32 {
            self.starts.lock().unwrap().push(seed);
            0
        }

        fn send_message(&self, peer: &CStr, body: &CStr) -> Option<i32> {
            if self.without_send {
                return None;
            }
            self.sends.lock().unwrap().push((
                peer.to_string_lossy().into_owned(),
                body.to_string_lossy().into_owned(),
            ));
            Some(self.send_status)
        }

        fn can_send(&self) -> bool {
            !self.without_send
        }
    }

    /// Library whose start call blocks until released, like a real node.
    struct BlockingStart {
        release: Mutex<mpsc::Receiver<()>>,
        sends: Mutex<usize>,
    }

    impl NodeLibrary for BlockingStart {
        fn start_node(&self, _seed: i64) -> i32 {
            let _ = self.release.lock().unwrap().recv();
            0
        }

        fn send_message(&self, _peer: &CStr, _body: &CStr) -> Option<i32> {
            *self.sends.lock().unwrap() += 1;
            Some(0)
        }
    }

    #[test]
    fn test_missing_library_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libmissing.so");

        match NativeNodeHandle::load(&path) {
            Err(NativeError::LibraryNotFound(p)) => assert_eq!(p, path),
            Err(e) => panic!("Expected LibraryNotFound, got {}", e),
            Ok(_) => panic!("Expected LibraryNotFound, got a handle"),
        }
    }

    #[test]
    fn test_unloadable_library_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libgarbage.so");
        std::fs::write(&path, b"definitely not an ELF file").unwrap();

        let handle = NativeNodeHandle::load(&path).unwrap();
        assert!(!handle.is_enabled());
        assert_eq!(handle.describe(), "disabled");
    }

    #[tokio::test]
    async fn test_disabled_send_is_noop() {
        let handle = NativeNodeHandle::disabled();
        assert_eq!(handle.send("p1", "hello").await.unwrap(), SendStatus::Disabled);
        assert!(!handle.spawn(1));
    }

    #[tokio::test]
    async fn test_send_passes_arguments() {
        let library = Arc::new(FakeLibrary::default());
        let handle = NativeNodeHandle::from_library(library.clone());

        let status = handle.send("p1", "hello").await.unwrap();

        assert_eq!(status, SendStatus::Sent(0));
        assert_eq!(library.sends(), vec![("p1".to_string(), "hello".to_string())]);
    }

    #[tokio::test]
    async fn test_nonzero_status_is_reported_not_retried() {
        let library = Arc::new(FakeLibrary {
            send_status: -3,
            ..Default::default()
        });
        let handle = NativeNodeHandle::from_library(library.clone());

        assert_eq!(handle.send("p1", "x").await.unwrap(), SendStatus::Sent(-3));
        assert_eq!(library.sends().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_send_symbol_disables_send() {
        let library = Arc::new(FakeLibrary {
            without_send: true,
            ..Default::default()
        });
        let handle = NativeNodeHandle::from_library(library);

        assert_eq!(handle.send("p1", "x").await.unwrap(), SendStatus::Disabled);
        assert!(handle.spawn(7));
        assert_eq!(handle.describe(), "send-disabled");
    }

    #[tokio::test]
    async fn test_interior_nul_rejected() {
        let library = Arc::new(FakeLibrary::default());
        let handle = NativeNodeHandle::from_library(library.clone());

        let err = handle.send("p\01", "x").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument(_)));
        assert!(library.sends().is_empty());
    }

    #[test]
    fn test_spawn_only_once() {
        let library = Arc::new(FakeLibrary::default());
        let handle = NativeNodeHandle::from_library(library.clone());
        assert_eq!(handle.describe(), "idle");

        assert!(handle.spawn(123456789));
        assert!(!handle.spawn(123456789));
        assert_eq!(handle.describe(), "running");

        // The start thread records its call shortly after spawning
        for _ in 0..100 {
            if !library.starts.lock().unwrap().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(*library.starts.lock().unwrap(), vec![123456789]);
    }

    #[tokio::test]
    async fn test_send_while_start_is_running() {
        let (release_tx, release_rx) = mpsc::channel();
        let library = Arc::new(BlockingStart {
            release: Mutex::new(release_rx),
            sends: Mutex::new(0),
        });
        let handle = NativeNodeHandle::from_library(library.clone());

        assert!(handle.spawn(1));
        for _ in 0..3 {
            assert_eq!(handle.send("p", "m").await.unwrap(), SendStatus::Sent(0));
        }
        assert_eq!(*library.sends.lock().unwrap(), 3);

        release_tx.send(()).unwrap();
    }
}
