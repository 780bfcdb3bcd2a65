use std::sync::Arc;

use anyhow::{Context, Result};
use tb_channel::{ChannelHost, ChannelType, ControllerClient};
use tb_core::EndpointId;

/// Where the controller listens.
pub struct Target {
    pub address: String,
    pub channel_type: ChannelType,
}

impl Target {
    /// Dial the controller with a fresh client host.
    pub async fn connect(&self) -> Result<ControllerClient> {
        let host = ChannelHost::new(EndpointId::for_client());
        self.connect_with(host).await
    }

    pub async fn connect_with(&self, host: Arc<ChannelHost>) -> Result<ControllerClient> {
        let controller = tb_channel::connect(&host, self.channel_type, &self.address)
            .await
            .with_context(|| {
                format!(
                    "failed to reach controller at {} ({})",
                    self.address, self.channel_type
                )
            })?;
        Ok(ControllerClient::new(host, controller))
    }
}
