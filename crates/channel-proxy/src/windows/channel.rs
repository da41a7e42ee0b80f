use super::{Recent, WindowEvent, WindowEventSource, WindowsService};
use crate::channel::{EventStream, ServerChannel};
use crate::event::BufferedEvent;
use crate::service::Arguments;
use crate::value::{Uri, Value};
use crate::{ChannelError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Commands understood by [`WindowsChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowsCommand {
    AddRecentlyOpened,
    RemoveFromRecentlyOpened,
    ClearRecentlyOpened,
    GetRecentlyOpened,
    IsFocused,
    OpenExtensionDevelopmentHostWindow,
}

impl WindowsCommand {
    pub const ALL: [WindowsCommand; 6] = [
        WindowsCommand::AddRecentlyOpened,
        WindowsCommand::RemoveFromRecentlyOpened,
        WindowsCommand::ClearRecentlyOpened,
        WindowsCommand::GetRecentlyOpened,
        WindowsCommand::IsFocused,
        WindowsCommand::OpenExtensionDevelopmentHostWindow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WindowsCommand::AddRecentlyOpened => "addRecentlyOpened",
            WindowsCommand::RemoveFromRecentlyOpened => "removeFromRecentlyOpened",
            WindowsCommand::ClearRecentlyOpened => "clearRecentlyOpened",
            WindowsCommand::GetRecentlyOpened => "getRecentlyOpened",
            WindowsCommand::IsFocused => "isFocused",
            WindowsCommand::OpenExtensionDevelopmentHostWindow => {
                "openExtensionDevelopmentHostWindow"
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.name() == name)
    }
}

/// Server channel for a windows service.
///
/// Every window event is buffered from construction on, so the first
/// subscriber to each event also receives what fired before it attached.
pub struct WindowsChannel<S> {
    service: Arc<S>,
    events: Vec<BufferedEvent>,
}

impl<S> WindowsChannel<S>
where
    S: WindowsService + WindowEventSource + 'static,
{
    pub fn new(service: Arc<S>) -> Self {
        let events = WindowEvent::ALL
            .into_iter()
            .map(|event| BufferedEvent::new(event.name(), service.subscribe(event)))
            .collect();
        Self { service, events }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    async fn dispatch(&self, command: WindowsCommand, args: Arguments) -> Result<Value> {
        match command {
            WindowsCommand::AddRecentlyOpened => {
                let recents = args
                    .array(0)?
                    .iter()
                    .cloned()
                    .map(Recent::revive)
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| invalid(&args, 0, e))?;
                self.service.add_recently_opened(recents).await?;
                Ok(Value::Null)
            }
            WindowsCommand::RemoveFromRecentlyOpened => {
                let paths = args
                    .array(0)?
                    .iter()
                    .cloned()
                    .map(Uri::revive)
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| invalid(&args, 0, e))?;
                self.service.remove_from_recently_opened(paths).await?;
                Ok(Value::Null)
            }
            WindowsCommand::ClearRecentlyOpened => {
                self.service.clear_recently_opened().await?;
                Ok(Value::Null)
            }
            WindowsCommand::GetRecentlyOpened => {
                let window_id = match args.optional(0) {
                    Some(_) => Some(args.u64(0)?),
                    None => None,
                };
                let recent = self.service.get_recently_opened(window_id).await?;
                Ok(recent.into())
            }
            WindowsCommand::IsFocused => {
                let focused = self.service.is_focused(args.u64(0)?).await?;
                Ok(Value::Bool(focused))
            }
            WindowsCommand::OpenExtensionDevelopmentHostWindow => {
                let launch_args: Vec<String> = args.decode(0)?;
                let env: BTreeMap<String, String> = match args.optional(1) {
                    Some(_) => args.decode(1)?,
                    None => BTreeMap::new(),
                };
                self.service
                    .open_extension_development_host_window(launch_args, env)
                    .await?;
                Ok(Value::Null)
            }
        }
    }
}

fn invalid(args: &Arguments, index: usize, err: ChannelError) -> ChannelError {
    ChannelError::invalid_param(args.command(), index, err)
}

#[async_trait::async_trait]
impl<S> ServerChannel for WindowsChannel<S>
where
    S: WindowsService + WindowEventSource + 'static,
{
    async fn call(&self, command: &str, args: Vec<Value>) -> Result<Value> {
        let Some(parsed) = WindowsCommand::from_name(command) else {
            warn!("Call not found: {}", command);
            return Err(ChannelError::CallNotFound {
                command: command.to_string(),
            });
        };

        debug!("Windows call {} with {} argument(s)", command, args.len());
        self.dispatch(parsed, Arguments::new(command, args)).await
    }

    /// Subscribe to a buffered window event. The first subscription to each
    /// event needs a tokio runtime and fails with `NoRuntime` outside one.
    fn listen(&self, event: &str) -> Result<EventStream> {
        match WindowEvent::from_name(event) {
            Some(known) => self.events[known.index()].subscribe(),
            None => {
                warn!("Event not found: {}", event);
                Err(ChannelError::EventNotFound {
                    event: event.to_string(),
                })
            }
        }
    }
}
