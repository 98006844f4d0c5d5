use super::{BatchCursor, CursorPosition};
use crate::corpus::CorpusEntity;
use crate::error::{LaanaError, Result};
use crate::vector::VectorField;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// One page of a server-held scroll session
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollPage {
    pub scroll_id: String,
    pub entities: Vec<CorpusEntity>,
}

/// A store with scroll sessions; each fetch renews the lease for `keep_alive`
#[async_trait]
pub trait ScrollSource: Send + Sync {
    async fn open_scroll(&self, field: VectorField, batch_size: usize, keep_alive: &str) -> Result<ScrollPage>;

    /// Fails with `CursorExpired` when the session is gone
    async fn continue_scroll(&self, scroll_id: &str, keep_alive: &str) -> Result<ScrollPage>;

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;
}

/// Scroll-session cursor over entities missing a vector field
///
/// A lost or timed-out lease ends the run; it is never reopened, since a new
/// session would start the scan over.
pub struct LeasedCursor {
    source: Arc<dyn ScrollSource>,
    field: VectorField,
    batch_size: usize,
    keep_alive: String,
    lease_timeout: Duration,
    scroll_id: Option<String>,
    exhausted: bool,
}

impl LeasedCursor {
    pub fn new(
        source: Arc<dyn ScrollSource>,
        field: VectorField,
        batch_size: usize,
        keep_alive: impl Into<String>,
        lease_timeout: Duration,
    ) -> Self {
        Self {
            source,
            field,
            batch_size: batch_size.max(1),
            keep_alive: keep_alive.into(),
            lease_timeout,
            scroll_id: None,
            exhausted: false,
        }
    }

    async fn leased<F>(&self, call: F) -> Result<ScrollPage>
    where
        F: Future<Output = Result<ScrollPage>> + Send,
    {
        match timeout(self.lease_timeout, call).await {
            Ok(page) => page,
            Err(_) => Err(LaanaError::CursorExpired(format!(
                "lease renewal exceeded {:?}",
                self.lease_timeout
            ))),
        }
    }
}

#[async_trait]
impl BatchCursor for LeasedCursor {
    async fn next_batch(&mut self) -> Result<Option<Vec<CorpusEntity>>> {
        if self.exhausted {
            return Err(LaanaError::CursorExhausted);
        }

        let page = match &self.scroll_id {
            None => {
                self.leased(self.source.open_scroll(self.field, self.batch_size, &self.keep_alive))
                    .await?
            }
            Some(id) => {
                self.leased(self.source.continue_scroll(id, &self.keep_alive))
                    .await?
            }
        };

        self.scroll_id = Some(page.scroll_id);
        if page.entities.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        debug!("Scroll page of {} for {}", page.entities.len(), self.field.key());
        Ok(Some(page.entities))
    }

    async fn release(&mut self) -> Result<()> {
        if let Some(id) = self.scroll_id.take() {
            if let Err(e) = self.source.clear_scroll(&id).await {
                warn!("Failed to release scroll {}: {}", id, e);
                return Err(e);
            }
            debug!("Released scroll {}", id);
        }
        Ok(())
    }

    fn position(&self) -> CursorPosition {
        match &self.scroll_id {
            Some(id) => CursorPosition::Lease(id.clone()),
            None => CursorPosition::Start,
        }
    }
}
