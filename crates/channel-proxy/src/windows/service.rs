use super::{Recent, RecentlyOpened, WindowEvent};
use crate::channel::EventStream;
use crate::config::WindowsConfig;
use crate::event::Emitter;
use crate::value::{Uri, Value};
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use tracing::{debug, info};

/// Window management operations.
#[async_trait::async_trait]
pub trait WindowsService: Send + Sync {
    /// Record entries at the front of the recently opened list.
    async fn add_recently_opened(&self, recents: Vec<Recent>) -> Result<()>;

    /// Drop every entry located at one of `paths`.
    async fn remove_from_recently_opened(&self, paths: Vec<Uri>) -> Result<()>;

    async fn clear_recently_opened(&self) -> Result<()>;

    async fn get_recently_opened(&self, window_id: Option<u64>) -> Result<RecentlyOpened>;

    async fn is_focused(&self, window_id: u64) -> Result<bool>;

    /// Launch a window hosting an extension under development.
    async fn open_extension_development_host_window(
        &self,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Push-style window events of a local service.
pub trait WindowEventSource: Send + Sync {
    /// Subscribe to `event`. Values fired before subscribing are not replayed.
    fn subscribe(&self, event: WindowEvent) -> EventStream;
}

#[derive(Default)]
struct WindowsState {
    windows: BTreeSet<u64>,
    focused: Option<u64>,
    next_window_id: u64,
    recently_opened: RecentlyOpened,
    extension_host_launches: Vec<(Vec<String>, BTreeMap<String, String>)>,
}

/// In-memory windows service for the main process.
///
/// Window lifecycle is driven by the host through [`open_window`],
/// [`focus_window`] and friends, each of which fires the matching event.
///
/// [`open_window`]: LocalWindowsService::open_window
/// [`focus_window`]: LocalWindowsService::focus_window
pub struct LocalWindowsService {
    state: Mutex<WindowsState>,
    emitters: [Emitter; 6],
}

impl Default for LocalWindowsService {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalWindowsService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WindowsState {
                next_window_id: 1,
                ..WindowsState::default()
            }),
            emitters: std::array::from_fn(|_| Emitter::new()),
        }
    }

    /// Open a new window and return its id.
    pub fn open_window(&self) -> u64 {
        let id = {
            let mut state = self.state.lock().expect("windows state lock poisoned");
            let id = state.next_window_id;
            state.next_window_id += 1;
            state.windows.insert(id);
            id
        };
        info!("Opened window {}", id);
        self.fire(WindowEvent::Open, Value::from(id));
        id
    }

    /// Focus `window_id`, blurring the previously focused window.
    pub fn focus_window(&self, window_id: u64) {
        let previous = {
            let mut state = self.state.lock().expect("windows state lock poisoned");
            state.focused.replace(window_id)
        };
        if let Some(previous) = previous.filter(|&p| p != window_id) {
            self.fire(WindowEvent::Blur, Value::from(previous));
        }
        if previous != Some(window_id) {
            self.fire(WindowEvent::Focus, Value::from(window_id));
        }
    }

    pub fn blur_window(&self, window_id: u64) {
        let was_focused = {
            let mut state = self.state.lock().expect("windows state lock poisoned");
            if state.focused == Some(window_id) {
                state.focused = None;
                true
            } else {
                false
            }
        };
        if was_focused {
            self.fire(WindowEvent::Blur, Value::from(window_id));
        }
    }

    pub fn maximize_window(&self, window_id: u64) {
        self.fire(WindowEvent::Maximize, Value::from(window_id));
    }

    pub fn unmaximize_window(&self, window_id: u64) {
        self.fire(WindowEvent::Unmaximize, Value::from(window_id));
    }

    /// Close `window_id`. Returns false if no such window was open.
    pub fn close_window(&self, window_id: u64) -> bool {
        let (closed, was_focused) = {
            let mut state = self.state.lock().expect("windows state lock poisoned");
            let closed = state.windows.remove(&window_id);
            let was_focused = state.focused == Some(window_id);
            if was_focused {
                state.focused = None;
            }
            (closed, was_focused)
        };
        if was_focused {
            self.fire(WindowEvent::Blur, Value::from(window_id));
        }
        if closed {
            info!("Closed window {}", window_id);
        }
        closed
    }

    pub fn has_window(&self, window_id: u64) -> bool {
        let state = self.state.lock().expect("windows state lock poisoned");
        state.windows.contains(&window_id)
    }

    /// Ids of the open windows, ascending.
    pub fn windows(&self) -> Vec<u64> {
        let state = self.state.lock().expect("windows state lock poisoned");
        state.windows.iter().copied().collect()
    }

    /// Arguments of every extension development host launch so far.
    pub fn extension_host_launches(&self) -> Vec<(Vec<String>, BTreeMap<String, String>)> {
        let state = self.state.lock().expect("windows state lock poisoned");
        state.extension_host_launches.clone()
    }

    fn fire(&self, event: WindowEvent, payload: Value) {
        debug!("Firing {}", event.name());
        self.emitters[event.index()].fire(payload);
    }

    fn update_recent<F>(&self, update: F)
    where
        F: FnOnce(&mut RecentlyOpened) -> bool,
    {
        let changed = {
            let mut state = self.state.lock().expect("windows state lock poisoned");
            update(&mut state.recently_opened)
        };
        if changed {
            self.fire(WindowEvent::RecentlyOpenedChange, Value::Null);
        }
    }
}

#[async_trait::async_trait]
impl WindowsService for LocalWindowsService {
    async fn add_recently_opened(&self, recents: Vec<Recent>) -> Result<()> {
        if recents.is_empty() {
            return Ok(());
        }
        self.update_recent(|recent| {
            for entry in recents {
                let list = if entry.is_file() {
                    &mut recent.files
                } else {
                    &mut recent.workspaces
                };
                list.retain(|existing| existing.location() != entry.location());
                list.insert(0, entry);
                list.truncate(WindowsConfig::MAX_RECENT_ENTRIES);
            }
            true
        });
        Ok(())
    }

    async fn remove_from_recently_opened(&self, paths: Vec<Uri>) -> Result<()> {
        self.update_recent(|recent| {
            let before = recent.workspaces.len() + recent.files.len();
            let keep = |entry: &Recent| !paths.contains(entry.location());
            recent.workspaces.retain(keep);
            recent.files.retain(keep);
            before != recent.workspaces.len() + recent.files.len()
        });
        Ok(())
    }

    async fn clear_recently_opened(&self) -> Result<()> {
        self.update_recent(|recent| {
            *recent = RecentlyOpened::default();
            true
        });
        Ok(())
    }

    async fn get_recently_opened(&self, window_id: Option<u64>) -> Result<RecentlyOpened> {
        debug!("Recently opened requested by window {:?}", window_id);
        let state = self.state.lock().expect("windows state lock poisoned");
        Ok(state.recently_opened.clone())
    }

    async fn is_focused(&self, window_id: u64) -> Result<bool> {
        let state = self.state.lock().expect("windows state lock poisoned");
        Ok(state.focused == Some(window_id))
    }

    async fn open_extension_development_host_window(
        &self,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().expect("windows state lock poisoned");
            state.extension_host_launches.push((args, env));
        }
        self.open_window();
        Ok(())
    }
}

impl WindowEventSource for LocalWindowsService {
    fn subscribe(&self, event: WindowEvent) -> EventStream {
        self.emitters[event.index()].subscribe()
    }
}
