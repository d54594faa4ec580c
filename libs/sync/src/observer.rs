//! Transfer diagnostics.
//!
//! Observers see every blob and manifest a pull or push touches, tagged with
//! the artifact kind derived from its media type. They cannot influence the
//! transfer.

use onmetal_oci::{ArtifactKind, Descriptor};
use tracing::{debug, info};

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Pull,
    Push,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pull => "pull",
            Direction::Push => "push",
        }
    }
}

/// Stage of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Started,
    /// Already present on the receiving side.
    Skipped,
    Completed { bytes: u64 },
}

/// One observed transfer step.
#[derive(Debug, Clone, Copy)]
pub struct TransferEvent<'a> {
    pub direction: Direction,
    pub stage: Stage,
    pub descriptor: &'a Descriptor,
}

impl TransferEvent<'_> {
    pub fn kind(&self) -> ArtifactKind {
        self.descriptor.kind()
    }

    /// Diagnostic key, e.g. `layer-sha256:ab12...`.
    pub fn key(&self) -> String {
        format!("{}{}", self.kind().key_prefix(), self.descriptor.digest)
    }
}

/// Receives transfer events.
pub trait TransferObserver: Send + Sync {
    fn on_event(&self, event: &TransferEvent<'_>);
}

/// Logs transfer events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn on_event(&self, event: &TransferEvent<'_>) {
        let direction = event.direction.as_str();
        let kind = event.kind().as_str();
        let media_type = event.descriptor.media_type.as_str();

        match event.stage {
            Stage::Started => debug!(
                direction,
                kind,
                media_type,
                key = %event.key(),
                size = event.descriptor.size,
                "Transfer started"
            ),
            Stage::Skipped => debug!(
                direction,
                kind,
                media_type,
                key = %event.key(),
                "Transfer skipped, already present"
            ),
            Stage::Completed { bytes } => info!(
                direction,
                kind,
                media_type,
                key = %event.key(),
                bytes,
                "Transfer completed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use onmetal_oci::media_type;

    use super::*;

    #[test]
    fn test_event_key_uses_kind_prefix() {
        let layer = Descriptor::for_content(media_type::INITRAMFS_LAYER, b"initrd");
        let event = TransferEvent {
            direction: Direction::Pull,
            stage: Stage::Started,
            descriptor: &layer,
        };
        assert_eq!(event.key(), format!("layer-{}", layer.digest));

        let config = Descriptor::for_content(media_type::CONFIG, b"{}");
        let event = TransferEvent {
            descriptor: &config,
            ..event
        };
        assert!(event.key().starts_with("config-sha256:"));
    }
}
