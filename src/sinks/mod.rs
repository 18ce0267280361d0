//! Delivery sinks.
//!
//! - [`messaging`]: Bot API, direct below a threshold, serialized heavy path above it
//! - [`object_store`]: external sync tool
//!
//! [`SinkDispatcher`] routes a file to the sink named by the item. A sink that is not
//! configured is never constructed; delivering to it fails with `NotConfigured`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::packager::MediaTools;
use crate::types::SinkKind;
use crate::{Error, Result};

pub mod heavy;
pub mod messaging;
pub mod object_store;
pub mod preview;

pub use heavy::{HeavySession, HeavyUploadHandle, UploadRequest};
pub use messaging::{BotApiSession, MessagingSink};
pub use object_store::ObjectStoreSink;

/// A delivery destination
#[async_trait]
pub trait Sink: Send + Sync {
    /// Which sink this is
    fn kind(&self) -> SinkKind;

    /// Largest single object accepted (`None` = unlimited)
    fn max_object_size(&self) -> Option<u64>;

    /// Deliver one file; `owner_ref` is the requester (chat id for messaging)
    async fn deliver(&self, file: &Path, owner_ref: Option<&str>) -> Result<()>;
}

/// Routes deliveries by [`SinkKind`]
#[derive(Clone, Default)]
pub struct SinkDispatcher {
    messaging: Option<Arc<dyn Sink>>,
    object_store: Option<Arc<dyn Sink>>,
}

impl SinkDispatcher {
    /// Dispatcher over explicit sinks
    pub fn new(messaging: Option<Arc<dyn Sink>>, object_store: Option<Arc<dyn Sink>>) -> Self {
        Self {
            messaging,
            object_store,
        }
    }

    /// Construct every configured sink
    pub fn from_config(config: &Config, tools: MediaTools) -> Result<Self> {
        let messaging = match &config.messaging {
            Some(messaging) => Some(Arc::new(MessagingSink::new(messaging, tools)?) as Arc<dyn Sink>),
            None => {
                tracing::info!("Messaging sink not configured");
                None
            }
        };
        let object_store = match &config.object_store {
            Some(store) => Some(
                Arc::new(ObjectStoreSink::from_config(store, &config.tools)) as Arc<dyn Sink>,
            ),
            None => {
                tracing::info!("Object storage sink not configured");
                None
            }
        };
        Ok(Self::new(messaging, object_store))
    }

    /// The sink for `kind`
    pub fn sink(&self, kind: SinkKind) -> Result<&Arc<dyn Sink>> {
        let sink = match kind {
            SinkKind::Messaging => self.messaging.as_ref(),
            SinkKind::ObjectStorage => self.object_store.as_ref(),
        };
        sink.ok_or_else(|| Error::NotConfigured(format!("{} sink", kind)))
    }

    /// Single-object limit of the sink for `kind`
    pub fn max_object_size(&self, kind: SinkKind) -> Result<Option<u64>> {
        Ok(self.sink(kind)?.max_object_size())
    }

    /// Deliver `file` to the sink for `kind`
    pub async fn deliver(&self, file: &Path, owner_ref: Option<&str>, kind: SinkKind) -> Result<()> {
        self.sink(kind)?.deliver(file, owner_ref).await
    }
}
