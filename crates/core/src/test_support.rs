//! Inert transport for unit tests

use crate::config::DataChannelMode;
use crate::media::LocalTrack;
use crate::transport::{
    DataChannel, PeerTransport, SelectedPath, TransportEventSink, TransportFactory,
};
use crate::{Error, PeerId, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct NullTransportFactory {
    pub created: AtomicUsize,
}

#[async_trait]
impl TransportFactory for NullTransportFactory {
    async fn create(
        &self,
        _remote: &PeerId,
        _sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(NullTransport))
    }
}

pub struct NullTransport;

#[async_trait]
impl PeerTransport for NullTransport {
    async fn create_data_channel(
        &self,
        _label: &str,
        _mode: DataChannelMode,
    ) -> Result<Arc<dyn DataChannel>> {
        Err(Error::DataChannelError("null transport".to_string()))
    }

    async fn create_offer(&self) -> Result<String> {
        Ok(r#"{"type":"offer","sdp":""}"#.to_string())
    }

    async fn create_answer(&self) -> Result<String> {
        Ok(r#"{"type":"answer","sdp":""}"#.to_string())
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        Ok(())
    }

    async fn apply_offer(&self, _payload: &str) -> Result<()> {
        Ok(())
    }

    async fn apply_answer(&self, _payload: &str) -> Result<()> {
        Ok(())
    }

    async fn add_ice_candidate(&self, _payload: &str) -> Result<()> {
        Ok(())
    }

    async fn add_local_track(&self, _track: &LocalTrack) -> Result<()> {
        Ok(())
    }

    async fn selected_path(&self) -> Option<SelectedPath> {
        None
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
