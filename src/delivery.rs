//! Pushing encoded content to the badge
//!
//! Small payloads are sent in one request. Payloads at or above the bulk limit, or payloads
//! the device refuses with an internal error, switch the controller to streaming: the caller
//! then forwards every preview frame through [DeliveryController::stream_frame] until
//! [DeliveryController::stop_streaming] is called.

use std::sync::Arc;

use bytes::Bytes;
use parse_display::Display;
use reqwest::StatusCode;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    device::DeviceApi,
    link::LinkState,
    models::{DeliverySettings, Grid, GridSequence},
    wire,
};

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[display(style = "lowercase")]
pub enum DeliveryOutcome {
    /// The device accepted the whole payload
    Sent,
    /// Delivery continues frame by frame
    Streaming,
    /// The request failed, the failure has been logged
    Failed,
    /// The badge is not reachable with the current firmware
    Unavailable,
}

pub struct DeliveryController {
    device: Arc<dyn DeviceApi>,
    link: watch::Receiver<LinkState>,
    bulk_limit: usize,
    streaming: bool,
    /// Index of the last frame pushed while streaming
    streamed: Option<usize>,
}

impl DeliveryController {
    pub fn new(
        device: Arc<dyn DeviceApi>,
        link: watch::Receiver<LinkState>,
        settings: &DeliverySettings,
    ) -> Self {
        Self {
            device,
            link,
            bulk_limit: settings.bulk_limit,
            streaming: false,
            streamed: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn stop_streaming(&mut self) {
        if self.streaming {
            info!("streaming stopped");
        }

        self.streaming = false;
        self.streamed = None;
    }

    fn start_streaming(&mut self) {
        self.streaming = true;
        self.streamed = None;
    }

    pub async fn deliver(&mut self, sequence: &GridSequence) -> DeliveryOutcome {
        self.deliver_payload(wire::encode(sequence)).await
    }

    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn deliver_payload(&mut self, payload: Bytes) -> DeliveryOutcome {
        let state = *self.link.borrow();
        if !state.is_current() {
            debug!(link = %state, "badge unavailable, not delivering");
            return DeliveryOutcome::Unavailable;
        }

        if payload.len() >= self.bulk_limit {
            info!(limit = %self.bulk_limit, "payload too large, streaming instead");
            self.start_streaming();
            return DeliveryOutcome::Streaming;
        }

        match self.device.post_picture(payload).await {
            Ok(StatusCode::INTERNAL_SERVER_ERROR) => {
                info!("badge rejected the payload, streaming instead");
                self.start_streaming();
                DeliveryOutcome::Streaming
            }
            Ok(status) if status.is_client_error() || status.is_server_error() => {
                warn!(status = %status, "badge refused the payload");
                DeliveryOutcome::Failed
            }
            Ok(status) => {
                debug!(status = %status, "payload delivered");
                DeliveryOutcome::Sent
            }
            Err(error) => {
                warn!(error = %error, "error sending data to badge");
                DeliveryOutcome::Failed
            }
        }
    }

    /// Send `grid`, shown at preview `index`, as a one-frame picture without waiting for
    /// the result
    ///
    /// Returns `None` when not streaming, or when `index` is the frame pushed last.
    pub fn stream_frame(&mut self, index: usize, grid: &Grid) -> Option<JoinHandle<()>> {
        if !self.streaming || self.streamed == Some(index) {
            return None;
        }

        self.streamed = Some(index);

        let device = self.device.clone();
        let payload = wire::encode_single(grid);

        Some(tokio::spawn(async move {
            match device.post_picture(payload).await {
                Ok(status) if status.is_success() => {
                    trace!(status = %status, "streamed frame");
                }
                Ok(status) => {
                    warn!(status = %status, "badge refused streamed frame");
                }
                Err(error) => {
                    warn!(error = %error, "error sending streaming data to badge");
                }
            }
        }))
    }
}

impl std::fmt::Debug for DeliveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryController")
            .field("bulk_limit", &self.bulk_limit)
            .field("streaming", &self.streaming)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        device::DeviceError,
        models::Color,
        raster::{Rasterizer, Source},
        wire::FRAME_UNIT,
    };

    struct RecordingDevice {
        status: Option<StatusCode>,
        posted: Mutex<Vec<Bytes>>,
    }

    impl RecordingDevice {
        fn new(status: Option<StatusCode>) -> Arc<Self> {
            Arc::new(Self {
                status,
                posted: Mutex::new(Vec::new()),
            })
        }

        fn posted(&self) -> Vec<Bytes> {
            self.posted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceApi for RecordingDevice {
        async fn ping(&self) -> Result<StatusCode, DeviceError> {
            Ok(StatusCode::OK)
        }

        async fn system_info(&self) -> Result<StatusCode, DeviceError> {
            Ok(StatusCode::NOT_FOUND)
        }

        async fn post_picture(&self, payload: Bytes) -> Result<StatusCode, DeviceError> {
            self.posted.lock().unwrap().push(payload);
            self.status.ok_or(DeviceError::Timeout)
        }
    }

    fn connected(
        device: Arc<RecordingDevice>,
        state: LinkState,
    ) -> (DeliveryController, watch::Sender<LinkState>) {
        let (tx, rx) = watch::channel(state);
        (
            DeliveryController::new(device, rx, &DeliverySettings::default()),
            tx,
        )
    }

    #[tokio::test]
    async fn bulk_limit_boundary() {
        let device = RecordingDevice::new(Some(StatusCode::OK));
        let (mut controller, _tx) = connected(device.clone(), LinkState::ConnectedCurrent);

        let below = Bytes::from(vec![0; 32 * 1024 - 1]);
        assert_eq!(
            controller.deliver_payload(below).await,
            DeliveryOutcome::Sent
        );
        assert_eq!(device.posted().len(), 1);
        assert!(!controller.is_streaming());

        let at = Bytes::from(vec![0; 32 * 1024]);
        assert_eq!(
            controller.deliver_payload(at).await,
            DeliveryOutcome::Streaming
        );
        // No bulk attempt for the large payload
        assert_eq!(device.posted().len(), 1);
        assert!(controller.is_streaming());
    }

    #[tokio::test]
    async fn long_sequences_stream() {
        let device = RecordingDevice::new(Some(StatusCode::OK));
        let (mut controller, _tx) = connected(device.clone(), LinkState::ConnectedCurrent);

        // 109 frames is the shortest sequence at or above the limit
        let seq = GridSequence::new(vec![Grid::default(); 109], 30).unwrap();
        assert!(109 * FRAME_UNIT >= 32 * 1024);
        assert!(108 * FRAME_UNIT < 32 * 1024);
        assert_eq!(controller.deliver(&seq).await, DeliveryOutcome::Streaming);
        assert!(device.posted().is_empty());
    }

    #[tokio::test]
    async fn pattern_is_sent_in_bulk() {
        let device = RecordingDevice::new(Some(StatusCode::OK));
        let (mut controller, _tx) = connected(device.clone(), LinkState::ConnectedCurrent);

        let seq = Rasterizer::from(Source::Pattern)
            .sequence()
            .unwrap();
        assert_eq!(seq.len(), 100);
        assert_eq!(controller.deliver(&seq).await, DeliveryOutcome::Sent);

        let posted = device.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].len(), 100 * FRAME_UNIT);
        assert!(!controller.is_streaming());
    }

    #[tokio::test]
    async fn internal_error_falls_back_to_streaming() {
        let device = RecordingDevice::new(Some(StatusCode::INTERNAL_SERVER_ERROR));
        let (mut controller, _tx) = connected(device.clone(), LinkState::ConnectedCurrent);

        let seq = GridSequence::single(Grid::filled(Color::new(1, 2, 3)));
        assert_eq!(controller.deliver(&seq).await, DeliveryOutcome::Streaming);
        assert!(controller.is_streaming());
        assert_eq!(device.posted().len(), 1);
    }

    #[tokio::test]
    async fn network_failure_is_swallowed() {
        let device = RecordingDevice::new(None);
        let (mut controller, _tx) = connected(device.clone(), LinkState::ConnectedCurrent);

        let seq = GridSequence::single(Grid::default());
        assert_eq!(controller.deliver(&seq).await, DeliveryOutcome::Failed);
        assert!(!controller.is_streaming());

        let device = RecordingDevice::new(Some(StatusCode::BAD_REQUEST));
        let (mut controller, _tx) = connected(device, LinkState::ConnectedCurrent);
        assert_eq!(controller.deliver(&seq).await, DeliveryOutcome::Failed);
        assert!(!controller.is_streaming());
    }

    #[tokio::test]
    async fn unavailable_unless_current_firmware() {
        let device = RecordingDevice::new(Some(StatusCode::OK));
        let (mut controller, tx) = connected(device.clone(), LinkState::Disconnected);
        let seq = GridSequence::single(Grid::default());

        assert_eq!(controller.deliver(&seq).await, DeliveryOutcome::Unavailable);
        tx.send_replace(LinkState::ConnectedLegacy);
        assert_eq!(controller.deliver(&seq).await, DeliveryOutcome::Unavailable);
        assert!(device.posted().is_empty());

        tx.send_replace(LinkState::ConnectedCurrent);
        assert_eq!(controller.deliver(&seq).await, DeliveryOutcome::Sent);
    }

    #[tokio::test]
    async fn streamed_frames_are_single_frame_payloads() {
        let device = RecordingDevice::new(Some(StatusCode::OK));
        let (mut controller, tx) = connected(device.clone(), LinkState::ConnectedCurrent);
        let grid = Grid::filled(Color::new(0, 255, 0));

        assert!(controller.stream_frame(0, &grid).is_none());

        controller.deliver_payload(Bytes::from(vec![0; 40_000])).await;
        // Streaming continues regardless of link state
        tx.send_replace(LinkState::Disconnected);
        controller.stream_frame(0, &grid).unwrap().await.unwrap();

        let posted = device.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0], wire::encode_single(&grid));
        assert_eq!(&posted[0][..2], &[0x03, 0xE8]);

        controller.stop_streaming();
        assert!(controller.stream_frame(0, &grid).is_none());
    }

    #[tokio::test]
    async fn unchanged_index_is_not_streamed_again() {
        let device = RecordingDevice::new(Some(StatusCode::OK));
        let (mut controller, _tx) = connected(device.clone(), LinkState::ConnectedCurrent);
        let grid = Grid::filled(Color::new(0, 0, 255));

        controller.deliver_payload(Bytes::from(vec![0; 40_000])).await;

        // A single-frame sequence keeps the preview at index 0
        controller.stream_frame(0, &grid).unwrap().await.unwrap();
        assert!(controller.stream_frame(0, &grid).is_none());
        assert!(controller.stream_frame(0, &grid).is_none());
        assert_eq!(device.posted().len(), 1);

        // Wrapping around pushes again
        controller.stream_frame(1, &grid).unwrap().await.unwrap();
        controller.stream_frame(0, &grid).unwrap().await.unwrap();
        assert_eq!(device.posted().len(), 3);

        // A new streaming session starts from scratch
        controller.stop_streaming();
        controller.deliver_payload(Bytes::from(vec![0; 40_000])).await;
        controller.stream_frame(0, &grid).unwrap().await.unwrap();
        assert_eq!(device.posted().len(), 4);
    }

    #[tokio::test]
    async fn streaming_failures_are_logged_only() {
        let device = RecordingDevice::new(None);
        let (mut controller, _tx) = connected(device.clone(), LinkState::ConnectedCurrent);

        controller.deliver_payload(Bytes::from(vec![0; 40_000])).await;
        let handle = controller.stream_frame(0, &Grid::default()).unwrap();
        assert!(handle.await.is_ok());
        assert!(controller.is_streaming());
    }
}
