//! API-neutral barrier description and batching.
//!
//! The graph collects the state transitions of one pass phase into a
//! [`BarrierBatch`], then hands the whole batch to the recorder as a single
//! pipeline barrier command.

use bitflags::bitflags;

use crate::graph::{ResourceHandle, ResourceState};
use crate::types::{ImageAspects, ImageHandle};

bitflags! {
    /// Pipeline stages a barrier synchronizes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const EARLY_FRAGMENT_TESTS = 1 << 1;
        const FRAGMENT_SHADER = 1 << 2;
        const LATE_FRAGMENT_TESTS = 1 << 3;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 4;
        const TRANSFER = 1 << 5;
        const BOTTOM_OF_PIPE = 1 << 6;
    }
}

bitflags! {
    /// Memory accesses a barrier makes available or visible.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const SHADER_READ = 1 << 0;
        const COLOR_ATTACHMENT_READ = 1 << 1;
        const COLOR_ATTACHMENT_WRITE = 1 << 2;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 3;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 4;
        const TRANSFER_READ = 1 << 5;
        const TRANSFER_WRITE = 1 << 6;
    }
}

/// A single image state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Graph resource being transitioned.
    pub resource: ResourceHandle,
    /// Image the transition applies to.
    pub image: ImageHandle,
    /// Aspects covered by the transition.
    pub aspects: ImageAspects,
    /// State before the barrier.
    pub old_state: ResourceState,
    /// State after the barrier.
    pub new_state: ResourceState,
    /// Stages that must complete before the transition.
    pub src_stages: PipelineStages,
    /// Stages that wait for the transition.
    pub dst_stages: PipelineStages,
    /// Writes made available by the transition.
    pub src_access: AccessFlags,
    /// Accesses made visible by the transition.
    pub dst_access: AccessFlags,
}

impl ImageBarrier {
    /// Build a transition with stages and access masks derived from the
    /// two states.
    pub fn transition(
        resource: ResourceHandle,
        image: ImageHandle,
        aspects: ImageAspects,
        old_state: ResourceState,
        new_state: ResourceState,
    ) -> Self {
        Self {
            resource,
            image,
            aspects,
            old_state,
            new_state,
            src_stages: old_state.src_stages(),
            dst_stages: new_state.dst_stages(),
            src_access: old_state.src_access(),
            dst_access: new_state.dst_access(),
        }
    }
}

/// A batch of image barriers submitted together.
///
/// Barriers keep insertion order. Transitions where the old and new state
/// are equal are skipped.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    barriers: Vec<ImageBarrier>,
}

impl BarrierBatch {
    /// Create a new empty barrier batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image state transition.
    ///
    /// Returns `false` when no transition is needed.
    pub fn add_transition(
        &mut self,
        resource: ResourceHandle,
        image: ImageHandle,
        aspects: ImageAspects,
        old_state: ResourceState,
        new_state: ResourceState,
    ) -> bool {
        if old_state == new_state {
            return false;
        }

        self.barriers.push(ImageBarrier::transition(
            resource, image, aspects, old_state, new_state,
        ));
        true
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Get the number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// Barriers in insertion order.
    pub fn barriers(&self) -> &[ImageBarrier] {
        &self.barriers
    }

    /// Union of all source stages in the batch.
    pub fn src_stages(&self) -> PipelineStages {
        self.barriers
            .iter()
            .fold(PipelineStages::empty(), |acc, b| acc | b.src_stages)
    }

    /// Union of all destination stages in the batch.
    pub fn dst_stages(&self) -> PipelineStages {
        self.barriers
            .iter()
            .fold(PipelineStages::empty(), |acc, b| acc | b.dst_stages)
    }

    /// Clear all barriers from the batch.
    pub fn clear(&mut self) {
        self.barriers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(index: u32) -> ResourceHandle {
        ResourceHandle::new(index)
    }

    #[test]
    fn test_same_state_is_skipped() {
        let mut batch = BarrierBatch::new();
        let added = batch.add_transition(
            handle(0),
            ImageHandle::from_raw(1),
            ImageAspects::COLOR,
            ResourceState::ShaderReadOnly,
            ResourceState::ShaderReadOnly,
        );
        assert!(!added);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_color_to_shader_read_masks() {
        let barrier = ImageBarrier::transition(
            handle(0),
            ImageHandle::from_raw(1),
            ImageAspects::COLOR,
            ResourceState::ColorAttachment,
            ResourceState::ShaderReadOnly,
        );
        assert_eq!(barrier.src_stages, PipelineStages::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(barrier.src_access, AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(barrier.dst_stages, PipelineStages::FRAGMENT_SHADER);
        assert_eq!(barrier.dst_access, AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_batch_keeps_order_and_unions_stages() {
        let mut batch = BarrierBatch::new();
        batch.add_transition(
            handle(0),
            ImageHandle::from_raw(1),
            ImageAspects::COLOR,
            ResourceState::Undefined,
            ResourceState::ColorAttachment,
        );
        batch.add_transition(
            handle(1),
            ImageHandle::from_raw(2),
            ImageAspects::DEPTH,
            ResourceState::Undefined,
            ResourceState::DepthAttachment,
        );

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.barriers()[0].resource, handle(0));
        assert_eq!(batch.barriers()[1].resource, handle(1));
        assert_eq!(batch.src_stages(), PipelineStages::TOP_OF_PIPE);
        assert!(
            batch
                .dst_stages()
                .contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT | PipelineStages::EARLY_FRAGMENT_TESTS)
        );

        batch.clear();
        assert!(batch.is_empty());
    }
}
