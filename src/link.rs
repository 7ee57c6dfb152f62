//! Periodic reachability and firmware generation probing

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parse_display::Display;
use reqwest::StatusCode;
use tokio::{
    select,
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{device::DeviceApi, models::LinkSettings};

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    #[display("disconnected")]
    Disconnected,
    #[display("connected")]
    ConnectedCurrent,
    #[display("connected (legacy firmware)")]
    ConnectedLegacy,
}

impl LinkState {
    pub fn is_current(self) -> bool {
        self == Self::ConnectedCurrent
    }

    pub fn is_legacy(self) -> bool {
        self == Self::ConnectedLegacy
    }
}

/// Clears the in-flight flag when the probe ends, however it ends
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct LinkMonitor {
    device: Arc<dyn DeviceApi>,
    interval: Duration,
    timeout: Duration,
    state: Arc<watch::Sender<LinkState>>,
    in_flight: Arc<AtomicBool>,
}

impl LinkMonitor {
    pub fn new(device: Arc<dyn DeviceApi>, settings: &LinkSettings) -> Self {
        let (state, _) = watch::channel(LinkState::default());

        Self {
            device,
            interval: settings.probe_interval(),
            timeout: settings.probe_timeout(),
            state: Arc::new(state),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Probe the device once and classify the result
    ///
    /// Any failure of the primary probe falls back to the legacy probe.
    pub async fn classify(device: &dyn DeviceApi, timeout: Duration) -> LinkState {
        match time::timeout(timeout, device.ping()).await {
            Ok(Ok(StatusCode::OK)) => return LinkState::ConnectedCurrent,
            Ok(Ok(status)) => trace!(status = %status, "unexpected ping status"),
            Ok(Err(error)) => trace!(error = %error, "ping failed"),
            Err(_) => trace!("ping timed out"),
        }

        match time::timeout(timeout, device.system_info()).await {
            Ok(Ok(StatusCode::OK)) => LinkState::ConnectedLegacy,
            Ok(Ok(status)) => {
                trace!(status = %status, "unexpected system info status");
                LinkState::Disconnected
            }
            Ok(Err(error)) => {
                trace!(error = %error, "legacy probe failed");
                LinkState::Disconnected
            }
            Err(_) => {
                trace!("legacy probe timed out");
                LinkState::Disconnected
            }
        }
    }

    /// Start a probe, unless one is still running
    pub fn tick(&self) -> Option<JoinHandle<()>> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            trace!("probe still in flight, skipping");
            return None;
        }

        let guard = InFlight(self.in_flight.clone());
        let device = self.device.clone();
        let state = self.state.clone();
        let timeout = self.timeout;

        Some(tokio::spawn(async move {
            let _guard = guard;
            let new_state = Self::classify(&*device, timeout).await;

            // Receivers are only woken up by actual transitions
            state.send_if_modified(|current| {
                if *current == new_state {
                    return false;
                }

                info!(from = %*current, to = %new_state, "link state changed");
                *current = new_state;
                true
            });
        }))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        debug!("link monitor stopped");
    }
}

impl std::fmt::Debug for LinkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkMonitor")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::device::DeviceError;

    /// Scripted probe results; `None` never answers
    #[derive(Default)]
    struct ScriptedDevice {
        ping: Mutex<VecDeque<Option<StatusCode>>>,
        system_info: Mutex<VecDeque<Option<StatusCode>>>,
        hang: bool,
    }

    impl ScriptedDevice {
        async fn answer(
            &self,
            queue: &Mutex<VecDeque<Option<StatusCode>>>,
        ) -> Result<StatusCode, DeviceError> {
            if self.hang {
                futures::future::pending::<()>().await;
            }

            match queue.lock().unwrap().pop_front().flatten() {
                Some(status) => Ok(status),
                None => Err(DeviceError::Timeout),
            }
        }
    }

    #[async_trait]
    impl DeviceApi for ScriptedDevice {
        async fn ping(&self) -> Result<StatusCode, DeviceError> {
            self.answer(&self.ping).await
        }

        async fn system_info(&self) -> Result<StatusCode, DeviceError> {
            self.answer(&self.system_info).await
        }

        async fn post_picture(&self, _payload: Bytes) -> Result<StatusCode, DeviceError> {
            Ok(StatusCode::OK)
        }
    }

    fn monitor(device: ScriptedDevice) -> LinkMonitor {
        LinkMonitor::new(Arc::new(device), &LinkSettings::default())
    }

    #[tokio::test]
    async fn fails_then_connects() {
        let device = ScriptedDevice {
            ping: Mutex::new(vec![None, None, Some(StatusCode::OK)].into()),
            ..Default::default()
        };
        let monitor = monitor(device);
        let mut states = Vec::new();

        for _ in 0..3 {
            monitor.tick().expect("probe skipped").await.unwrap();
            states.push(monitor.state());
        }

        assert_eq!(
            states,
            vec![
                LinkState::Disconnected,
                LinkState::Disconnected,
                LinkState::ConnectedCurrent
            ]
        );
    }

    #[tokio::test]
    async fn legacy_endpoint_marks_legacy() {
        let device = ScriptedDevice {
            ping: Mutex::new(vec![None].into()),
            system_info: Mutex::new(vec![Some(StatusCode::OK)].into()),
            ..Default::default()
        };
        let monitor = monitor(device);

        monitor.tick().unwrap().await.unwrap();
        assert_eq!(monitor.state(), LinkState::ConnectedLegacy);
    }

    #[tokio::test]
    async fn non_ok_ping_falls_back_to_legacy_probe() {
        let device = ScriptedDevice {
            ping: Mutex::new(vec![Some(StatusCode::NOT_FOUND), Some(StatusCode::OK)].into()),
            system_info: Mutex::new(vec![Some(StatusCode::OK)].into()),
            ..Default::default()
        };
        let monitor = monitor(device);

        monitor.tick().unwrap().await.unwrap();
        assert_eq!(monitor.state(), LinkState::ConnectedLegacy);

        // Recomputed from scratch on every probe
        monitor.tick().unwrap().await.unwrap();
        assert_eq!(monitor.state(), LinkState::ConnectedCurrent);
    }

    #[tokio::test]
    async fn legacy_probe_rejects_non_ok() {
        let device = ScriptedDevice {
            ping: Mutex::new(vec![None].into()),
            system_info: Mutex::new(vec![Some(StatusCode::INTERNAL_SERVER_ERROR)].into()),
            ..Default::default()
        };
        let monitor = monitor(device);

        monitor.tick().unwrap().await.unwrap();
        assert_eq!(monitor.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_suppresses_next_tick() {
        let monitor = monitor(ScriptedDevice {
            hang: true,
            ..Default::default()
        });

        let handle = monitor.tick().expect("first probe should start");
        assert!(monitor.tick().is_none());

        // Both probes time out after 3 seconds each
        let start = time::Instant::now();
        handle.await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert_eq!(monitor.state(), LinkState::Disconnected);

        assert!(monitor.tick().is_some());
    }

    #[tokio::test]
    async fn aborted_probe_clears_flag() {
        let monitor = monitor(ScriptedDevice {
            hang: true,
            ..Default::default()
        });

        let handle = monitor.tick().unwrap();
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert!(monitor.tick().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_probes_every_interval() {
        let device = ScriptedDevice {
            ping: Mutex::new(vec![None, Some(StatusCode::OK)].into()),
            ..Default::default()
        };
        let monitor = monitor(device);
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor.run(cancel.clone()));

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LinkState::ConnectedCurrent);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_state_does_not_notify() {
        let device = ScriptedDevice {
            ping: Mutex::new(vec![None, None, Some(StatusCode::OK), Some(StatusCode::OK)].into()),
            ..Default::default()
        };
        let monitor = monitor(device);
        let mut rx = monitor.subscribe();

        for _ in 0..2 {
            monitor.tick().unwrap().await.unwrap();
            assert!(!rx.has_changed().unwrap());
        }

        monitor.tick().unwrap().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), LinkState::ConnectedCurrent);

        monitor.tick().unwrap().await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }
}
