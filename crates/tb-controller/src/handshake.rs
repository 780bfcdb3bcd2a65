use std::time::Duration;

use tb_channel::{Capability, ChannelHost};
use tb_core::EndpointId;
use tracing::{info, warn};

use crate::error::{ControllerError, Result};

/// Wait until `endpoint` has signed in both its command and its
/// notification capability, in either order.
pub async fn await_sign_on(host: &ChannelHost, endpoint: &EndpointId, timeout: Duration) -> Result<()> {
    let commands = host.registry(Capability::Commands);
    let notifications = host.registry(Capability::Notifications);
    let both = async {
        tokio::join!(commands.wait_for(endpoint), notifications.wait_for(endpoint));
    };

    match tokio::time::timeout(timeout, both).await {
        Ok(()) => {
            info!(endpoint = %endpoint, "worker signed on");
            Ok(())
        }
        Err(_) => {
            warn!(
                endpoint = %endpoint,
                commands = commands.is_signed_in(endpoint),
                notifications = notifications.is_signed_in(endpoint),
                timeout_ms = timeout.as_millis() as u64,
                "worker sign-on timed out"
            );
            Err(ControllerError::HandshakeTimeout {
                endpoint: endpoint.clone(),
                timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn host() -> Arc<ChannelHost> {
        ChannelHost::new(EndpointId::for_controller(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_when_both_capabilities_sign_in() {
        let host = host();
        let worker = EndpointId::for_worker(10);
        let signer = {
            let host = host.clone();
            let worker = worker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                host.registry(Capability::Notifications).sign_in(worker.clone());
                tokio::time::sleep(Duration::from_secs(3)).await;
                host.registry(Capability::Commands).sign_in(worker);
            })
        };

        let start = Instant::now();
        await_sign_on(&host, &worker, Duration::from_secs(60)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        signer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_sign_ins_are_not_missed() {
        let host = host();
        let worker = EndpointId::for_worker(11);
        host.registry(Capability::Commands).sign_in(worker.clone());
        host.registry(Capability::Notifications).sign_in(worker.clone());

        await_sign_on(&host, &worker, Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_capability_is_not_enough() {
        let host = host();
        let worker = EndpointId::for_worker(12);
        host.registry(Capability::Commands).sign_in(worker.clone());

        let start = Instant::now();
        let err = await_sign_on(&host, &worker, Duration::from_millis(60_000))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::HandshakeTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_millis(60_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_endpoints_do_not_count() {
        let host = host();
        let worker = EndpointId::for_worker(13);
        let imposter = EndpointId::for_worker(14);
        host.registry(Capability::Commands).sign_in(imposter.clone());
        host.registry(Capability::Notifications).sign_in(imposter);

        let err = await_sign_on(&host, &worker, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ControllerError::HandshakeTimeout { .. }));
    }
}
