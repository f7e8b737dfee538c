use crate::render::{Rendered, Renderer};
use crate::types::{DigestGroup, MessageSink, OutboundMessage, RawItem, SinkError, Statistics};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Turns items and reports into sink messages and applies the delivery rules:
/// one honoured backpressure wait per call, photo to text fallback, HTML to plain fallback.
pub struct Deliverer {
    sink: Arc<dyn MessageSink>,
    renderer: Renderer,
}

impl Deliverer {
    pub fn new(sink: Arc<dyn MessageSink>, renderer: Renderer) -> Self {
        Self { sink, renderer }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// True when the item reached the sink in some form.
    pub async fn deliver(&self, destination: &str, item: &RawItem) -> bool {
        let rendered = self.renderer.item(item);
        let delivered = self.send(destination, &rendered, item.image_url.as_deref()).await;
        if delivered {
            info!("Delivered: {}", item.title);
        } else {
            warn!("Delivery failed for {} ({})", item.title, item.link);
        }
        delivered
    }

    /// An empty digest sends nothing and counts as delivered.
    pub async fn deliver_digest(&self, destination: &str, groups: &[DigestGroup]) -> bool {
        let Some(rendered) = self.renderer.digest(groups) else {
            info!("No items for the daily digest");
            return true;
        };
        let delivered = self.send(destination, &rendered, None).await;
        if delivered {
            info!("Daily digest delivered ({} categories)", groups.len());
        }
        delivered
    }

    pub async fn deliver_statistics(&self, destination: &str, stats: &Statistics) -> bool {
        let rendered = self.renderer.statistics(stats);
        let delivered = self.send(destination, &rendered, None).await;
        if delivered {
            info!("Statistics delivered");
        }
        delivered
    }

    /// Best effort. A failure here is only logged.
    pub async fn deliver_error_notice(&self, destination: &str, message: &str) -> bool {
        let rendered = self.renderer.error_notice(message);
        let delivered = self.send(destination, &rendered, None).await;
        if !delivered {
            error!("Could not deliver error notice: {}", message);
        }
        delivered
    }

    pub async fn deliver_startup_notice(&self, destination: &str) -> bool {
        let rendered = self.renderer.startup_notice();
        self.send(destination, &rendered, None).await
    }

    pub async fn deliver_shutdown_notice(&self, destination: &str) -> bool {
        let rendered = self.renderer.shutdown_notice();
        self.send(destination, &rendered, None).await
    }

    async fn send(&self, destination: &str, rendered: &Rendered, image_url: Option<&str>) -> bool {
        let mut backpressure_spent = false;

        if let Some(image_url) = image_url {
            let photo = OutboundMessage::rich(rendered.html.clone()).with_image(image_url);
            let sent = self
                .send_honouring_backpressure(destination, &photo, &mut backpressure_spent)
                .await;
            match sent {
                Ok(()) => return true,
                Err(SinkError::RetryAfter(wait)) => {
                    warn!("Sink still throttling after one wait ({:?}); giving up", wait);
                    return false;
                }
                Err(e) => warn!("Photo send failed, falling back to text: {}", e),
            }
        }

        let rich = OutboundMessage::rich(rendered.html.clone());
        match self.send_honouring_backpressure(destination, &rich, &mut backpressure_spent).await {
            Ok(()) => true,
            Err(SinkError::RetryAfter(wait)) => {
                warn!("Sink still throttling after one wait ({:?}); giving up", wait);
                false
            }
            Err(SinkError::Rejected { code, description }) => {
                warn!("Rich text rejected ({}): {}; retrying as plain text", code, description);
                let plain = OutboundMessage::plain(rendered.plain.clone());
                let sent = self
                    .send_honouring_backpressure(destination, &plain, &mut backpressure_spent)
                    .await;
                match sent {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Plain text send failed: {}", e);
                        false
                    }
                }
            }
            Err(e) => {
                error!("Send via {} failed: {}", self.sink.sink_name(), e);
                false
            }
        }
    }

    /// Waits out the first backpressure signal of the call and repeats the same send once.
    /// Any later backpressure is returned as the error.
    async fn send_honouring_backpressure(
        &self,
        destination: &str,
        message: &OutboundMessage,
        backpressure_spent: &mut bool,
    ) -> Result<(), SinkError> {
        match self.sink.send(destination, message).await {
            Err(SinkError::RetryAfter(wait)) if !*backpressure_spent => {
                *backpressure_spent = true;
                warn!("Sink requested a pause of {:?}; waiting before retrying", wait);
                tokio::time::sleep(wait).await;
                debug!("Retrying send after backpressure");
                self.sink.send(destination, message).await
            }
            other => other,
        }
    }
}
