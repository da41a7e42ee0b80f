use super::{Recent, RecentlyOpened, WindowEvent, WindowsCommand, WindowsService};
use crate::channel::{Channel, EventStream};
use crate::proxy::ChannelProxy;
use crate::value::{self, Uri, Value};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// [`WindowsService`] backed by a remote [`WindowsChannel`](super::WindowsChannel).
#[derive(Debug, Clone)]
pub struct WindowsClient {
    proxy: ChannelProxy,
}

impl WindowsClient {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            proxy: ChannelProxy::new(channel),
        }
    }

    /// Subscribe to a window event. Payloads are window ids, except for
    /// [`WindowEvent::RecentlyOpenedChange`] which carries null.
    pub async fn listen(&self, event: WindowEvent) -> Result<EventStream> {
        self.proxy.listen(event.name()).await
    }

    async fn call(&self, command: WindowsCommand, args: Vec<Value>) -> Result<Value> {
        self.proxy.call(command.name(), args).await
    }
}

#[async_trait::async_trait]
impl WindowsService for WindowsClient {
    async fn add_recently_opened(&self, recents: Vec<Recent>) -> Result<()> {
        let recents = recents.into_iter().map(Value::from).collect::<Vec<_>>();
        self.call(WindowsCommand::AddRecentlyOpened, vec![Value::Array(recents)])
            .await?;
        Ok(())
    }

    async fn remove_from_recently_opened(&self, paths: Vec<Uri>) -> Result<()> {
        let paths = paths.into_iter().map(Value::Uri).collect::<Vec<_>>();
        self.call(WindowsCommand::RemoveFromRecentlyOpened, vec![Value::Array(paths)])
            .await?;
        Ok(())
    }

    async fn clear_recently_opened(&self) -> Result<()> {
        self.call(WindowsCommand::ClearRecentlyOpened, vec![]).await?;
        Ok(())
    }

    async fn get_recently_opened(&self, window_id: Option<u64>) -> Result<RecentlyOpened> {
        let args = window_id.map(Value::from).into_iter().collect();
        let result = self.call(WindowsCommand::GetRecentlyOpened, args).await?;
        RecentlyOpened::from_value(result)
    }

    async fn is_focused(&self, window_id: u64) -> Result<bool> {
        let result = self
            .call(WindowsCommand::IsFocused, vec![Value::from(window_id)])
            .await?;
        value::from_value(result)
    }

    async fn open_extension_development_host_window(
        &self,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Result<()> {
        let args = args.into_iter().map(Value::from).collect::<Vec<_>>();
        let env = env
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect::<BTreeMap<_, _>>();
        self.call(
            WindowsCommand::OpenExtensionDevelopmentHostWindow,
            vec![Value::Array(args), Value::Object(env)],
        )
        .await?;
        Ok(())
    }
}
