//! Window management over a channel.
//!
//! A purpose-built channel rather than the generic adapter: commands go
//! through an explicit switch ([`WindowsCommand`]) that revives each
//! command's argument shapes, and the service's window events are buffered so
//! a renderer that subscribes late still sees the notifications fired while
//! it was starting up.
//!
//! - [`WindowsService`]: the service contract, implemented by
//!   [`LocalWindowsService`] in the main process and by [`WindowsClient`]
//!   everywhere else.
//! - [`WindowsChannel`]: exposes a local service as a [`ServerChannel`](crate::ServerChannel).

mod channel;
mod client;
mod service;

pub use channel::{WindowsChannel, WindowsCommand};
pub use client::WindowsClient;
pub use service::{LocalWindowsService, WindowEventSource, WindowsService};

use crate::value::{Map, Uri, Value};
use crate::{ChannelError, Result};

/// Events published by a windows service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowEvent {
    Open,
    Focus,
    Blur,
    Maximize,
    Unmaximize,
    RecentlyOpenedChange,
}

impl WindowEvent {
    pub const ALL: [WindowEvent; 6] = [
        WindowEvent::Open,
        WindowEvent::Focus,
        WindowEvent::Blur,
        WindowEvent::Maximize,
        WindowEvent::Unmaximize,
        WindowEvent::RecentlyOpenedChange,
    ];

    /// Channel event name.
    pub fn name(self) -> &'static str {
        match self {
            WindowEvent::Open => "onWindowOpen",
            WindowEvent::Focus => "onWindowFocus",
            WindowEvent::Blur => "onWindowBlur",
            WindowEvent::Maximize => "onWindowMaximize",
            WindowEvent::Unmaximize => "onWindowUnmaximize",
            WindowEvent::RecentlyOpenedChange => "onRecentlyOpenedChange",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.name() == name)
    }

    /// Position in [`WindowEvent::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Identifies a multi-root workspace by its configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceIdentifier {
    pub id: String,
    pub config_path: Uri,
}

impl WorkspaceIdentifier {
    pub fn new(id: impl Into<String>, config_path: Uri) -> Self {
        Self {
            id: id.into(),
            config_path,
        }
    }

    pub fn revive(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(invalid_recent("workspace must be an object"));
        };
        let id = match map.remove("id") {
            Some(Value::String(id)) => id,
            _ => return Err(invalid_recent("workspace is missing its id")),
        };
        let config_path = map
            .remove("configPath")
            .ok_or_else(|| invalid_recent("workspace is missing its configPath"))
            .and_then(Uri::revive)?;
        Ok(Self { id, config_path })
    }

    pub fn to_value(&self) -> Value {
        Value::object([
            ("id", Value::from(self.id.as_str())),
            ("configPath", Value::Uri(self.config_path.clone())),
        ])
    }
}

/// One entry of the recently opened list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recent {
    File {
        file_uri: Uri,
        label: Option<String>,
    },
    Folder {
        folder_uri: Uri,
        label: Option<String>,
    },
    Workspace {
        workspace: WorkspaceIdentifier,
        label: Option<String>,
    },
}

impl Recent {
    pub fn file(file_uri: Uri) -> Self {
        Recent::File {
            file_uri,
            label: None,
        }
    }

    pub fn folder(folder_uri: Uri) -> Self {
        Recent::Folder {
            folder_uri,
            label: None,
        }
    }

    pub fn workspace(workspace: WorkspaceIdentifier) -> Self {
        Recent::Workspace {
            workspace,
            label: None,
        }
    }

    pub fn with_label(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Recent::File { label, .. } | Recent::Folder { label, .. } | Recent::Workspace { label, .. } => {
                *label = Some(text.into());
            }
        }
        self
    }

    /// Reconstruct an entry from plain data.
    ///
    /// The variant is chosen by discriminant field: `fileUri`, then
    /// `folderUri`, otherwise the entry must carry a `workspace`.
    pub fn revive(value: Value) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(invalid_recent(format!(
                    "expected an object, got {}",
                    other.kind()
                )))
            }
        };
        let label = match map.remove("label") {
            Some(Value::String(label)) => Some(label),
            _ => None,
        };

        if let Some(file_uri) = map.remove("fileUri") {
            Ok(Recent::File {
                file_uri: Uri::revive(file_uri)?,
                label,
            })
        } else if let Some(folder_uri) = map.remove("folderUri") {
            Ok(Recent::Folder {
                folder_uri: Uri::revive(folder_uri)?,
                label,
            })
        } else {
            let workspace = map
                .remove("workspace")
                .ok_or_else(|| invalid_recent("entry has no fileUri, folderUri or workspace"))?;
            Ok(Recent::Workspace {
                workspace: WorkspaceIdentifier::revive(workspace)?,
                label,
            })
        }
    }

    /// The location that identifies this entry in the list.
    pub fn location(&self) -> &Uri {
        match self {
            Recent::File { file_uri, .. } => file_uri,
            Recent::Folder { folder_uri, .. } => folder_uri,
            Recent::Workspace { workspace, .. } => &workspace.config_path,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Recent::File { label, .. } | Recent::Folder { label, .. } | Recent::Workspace { label, .. } => {
                label.as_deref()
            }
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Recent::File { .. })
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match self {
            Recent::File { file_uri, .. } => {
                map.insert("fileUri".to_string(), Value::Uri(file_uri.clone()));
            }
            Recent::Folder { folder_uri, .. } => {
                map.insert("folderUri".to_string(), Value::Uri(folder_uri.clone()));
            }
            Recent::Workspace { workspace, .. } => {
                map.insert("workspace".to_string(), workspace.to_value());
            }
        }
        if let Some(label) = self.label() {
            map.insert("label".to_string(), Value::from(label));
        }
        Value::Object(map)
    }
}

impl From<Recent> for Value {
    fn from(recent: Recent) -> Self {
        recent.to_value()
    }
}

/// Snapshot of the recently opened list, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentlyOpened {
    /// Folders and workspaces.
    pub workspaces: Vec<Recent>,
    pub files: Vec<Recent>,
}

impl RecentlyOpened {
    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty() && self.files.is_empty()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(invalid_recent(format!(
                    "expected recently opened object, got {}",
                    other.kind()
                )))
            }
        };
        Ok(Self {
            workspaces: revive_list(map.remove("workspaces"))?,
            files: revive_list(map.remove("files"))?,
        })
    }

    pub fn to_value(&self) -> Value {
        let list = |entries: &[Recent]| Value::Array(entries.iter().map(Recent::to_value).collect());
        Value::object([
            ("workspaces", list(&self.workspaces)),
            ("files", list(&self.files)),
        ])
    }
}

impl From<RecentlyOpened> for Value {
    fn from(recent: RecentlyOpened) -> Self {
        recent.to_value()
    }
}

fn revive_list(value: Option<Value>) -> Result<Vec<Recent>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => entries.into_iter().map(Recent::revive).collect(),
        Some(other) => Err(invalid_recent(format!(
            "expected a list of entries, got {}",
            other.kind()
        ))),
    }
}

fn invalid_recent(message: impl Into<String>) -> ChannelError {
    ChannelError::Validation {
        field: "recent".to_string(),
        message: message.into(),
    }
}
