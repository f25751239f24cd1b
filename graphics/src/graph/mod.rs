//! Per-frame render graph.
//!
//! The graph is cleared and repopulated every frame. Rendering code imports
//! externally owned images under a name, then declares passes that read
//! and write those names. [`RenderGraph::execute`] runs the passes in
//! declaration order and inserts the state transitions between them:
//!
//! 1. read phase: every read target moves to [`ResourceState::ShaderReadOnly`]
//! 2. write phase: every write target moves to its attachment state
//!    (depth formats to [`ResourceState::DepthAttachment`], others to
//!    [`ResourceState::ColorAttachment`])
//! 3. a rendering scope opens over the first color and first depth target
//! 4. the pass's execute closure records its commands
//! 5. the rendering scope closes
//!
//! After the last pass the backbuffer moves to
//! [`ResourceState::PresentSource`].
//!
//! Passes are never reordered and reads are not checked against earlier
//! writes. A read of a resource nothing has written yet is logged.
//!
//! A freshly constructed graph is already in [`GraphPhase::Populating`], so
//! the first frame may populate it without calling [`RenderGraph::clear`].
//! Every later frame must clear it first; `execute` on an executed graph
//! fails with [`GraphError::OutOfOrder`].
//!
//! # Example
//!
//! ```
//! use lantern_graphics::backend::DummyRecorder;
//! use lantern_graphics::graph::RenderGraph;
//! use lantern_graphics::types::{Extent2d, ImageHandle, ImageViewHandle, TextureFormat};
//!
//! let extent = Extent2d::new(1280, 720);
//! let mut graph = RenderGraph::new();
//! graph.clear();
//! graph.import_texture(
//!     "SceneColor",
//!     ImageHandle::from_raw(1),
//!     ImageViewHandle::from_raw(2),
//!     extent,
//!     TextureFormat::Rgba16Float,
//! );
//! graph.import_backbuffer(
//!     "BackBuffer",
//!     ImageHandle::from_raw(3),
//!     ImageViewHandle::from_raw(4),
//!     extent,
//!     TextureFormat::Bgra8UnormSrgb,
//! );
//!
//! graph.add_pass("scene", |pass| { pass.writes("SceneColor"); }, |_ctx| {});
//! graph.add_pass(
//!     "tonemap",
//!     |pass| { pass.reads("SceneColor").writes("BackBuffer"); },
//!     |_ctx| {},
//! );
//!
//! let mut recorder = DummyRecorder::new();
//! let stats = graph.execute(&mut recorder).unwrap();
//! assert_eq!(stats.passes_executed, 2);
//! ```

mod pass;
mod resource;
mod target;

pub use pass::{ExecuteFn, Pass, PassBuilder, PassContext};
pub use resource::{Resource, ResourceHandle, ResourceState};
pub use target::{Attachment, ClearValue, LoadOp, RenderingInfo, StoreOp};

use resource::{ImportDesc, ResourceTable};
use thiserror::Error;

use crate::backend::{BarrierBatch, CommandRecorder};
use crate::config::FrameConfig;
use crate::profile_scope;
use crate::types::{ClearValues, Extent2d, ImageHandle, ImageViewHandle, TextureFormat};

/// Handle to a pass in the render graph.
///
/// Only valid within the population that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassHandle(u32);

impl PassHandle {
    fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of the pass in declaration order.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where the graph is in its clear / populate / execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphPhase {
    /// Accepting imports and passes.
    Populating,
    /// Executed; must be cleared before the next execution.
    Executed,
}

/// Errors from render graph operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// `execute` was called without a fresh population.
    #[error("{operation} called out of order (graph phase is {phase:?}); call clear() first")]
    OutOfOrder {
        operation: &'static str,
        phase: GraphPhase,
    },
}

/// Summary of one [`RenderGraph::execute`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Number of passes whose execute closure ran.
    pub passes_executed: usize,
    /// Number of individual image transitions recorded.
    pub barriers_emitted: usize,
    /// Number of rendering scopes opened.
    pub rendering_scopes: usize,
    /// Whether the final present transition was recorded.
    pub present_transition: bool,
}

/// Declarative per-frame render graph.
///
/// `'a` bounds what pass execute closures may borrow.
pub struct RenderGraph<'a> {
    resources: ResourceTable,
    passes: Vec<Pass<'a>>,
    phase: GraphPhase,
    clear_values: ClearValues,
}

impl<'a> RenderGraph<'a> {
    /// Create an empty graph, ready to be populated.
    ///
    /// The graph starts in [`GraphPhase::Populating`]: one population and
    /// one [`execute`](Self::execute) are accepted before the first
    /// [`clear`](Self::clear) is required.
    pub fn new() -> Self {
        Self::with_clear_values(ClearValues::default())
    }

    /// Create an empty graph using the configured clear values.
    pub fn from_config(config: &FrameConfig) -> Self {
        Self::with_clear_values(config.clear_values)
    }

    /// Create an empty graph with custom clear values.
    pub fn with_clear_values(clear_values: ClearValues) -> Self {
        Self {
            resources: ResourceTable::default(),
            passes: Vec::new(),
            phase: GraphPhase::Populating,
            clear_values,
        }
    }

    /// Empty the pass list and resource table for a new frame.
    pub fn clear(&mut self) {
        self.passes.clear();
        self.resources.clear();
        self.phase = GraphPhase::Populating;
    }

    /// Register (or overwrite) a named image for this frame.
    ///
    /// The resource starts in [`ResourceState::Undefined`]. Re-importing an
    /// existing name replaces its entry and keeps its handle.
    pub fn import_texture(
        &mut self,
        name: &str,
        image: ImageHandle,
        view: ImageViewHandle,
        extent: Extent2d,
        format: TextureFormat,
    ) -> ResourceHandle {
        self.import(name, image, view, extent, format, false)
    }

    /// Register the image that must end the frame ready for presentation.
    ///
    /// Only one backbuffer exists per frame; importing another one demotes
    /// the previous backbuffer to a regular texture.
    pub fn import_backbuffer(
        &mut self,
        name: &str,
        image: ImageHandle,
        view: ImageViewHandle,
        extent: Extent2d,
        format: TextureFormat,
    ) -> ResourceHandle {
        self.import(name, image, view, extent, format, true)
    }

    fn import(
        &mut self,
        name: &str,
        image: ImageHandle,
        view: ImageViewHandle,
        extent: Extent2d,
        format: TextureFormat,
        is_backbuffer: bool,
    ) -> ResourceHandle {
        self.warn_if_executed("import");
        let handle = self.resources.import(
            name,
            ImportDesc {
                image,
                view,
                extent,
                format,
                is_backbuffer,
            },
        );
        log::trace!(
            "Imported '{}' as {:?} ({}x{}, {:?}, backbuffer={})",
            name,
            handle,
            extent.width,
            extent.height,
            format,
            is_backbuffer
        );
        handle
    }

    /// Look up a resource by name.
    ///
    /// Returns [`ResourceHandle::INVALID`] (and logs an error) if the name
    /// was not imported this frame.
    pub fn get_resource_handle(&self, name: &str) -> ResourceHandle {
        match self.resources.lookup(name) {
            Some(handle) => handle,
            None => {
                log::error!("Render graph resource '{}' not found", name);
                ResourceHandle::INVALID
            }
        }
    }

    /// Get a resource by handle. `None` for the sentinel handle.
    pub fn resource(&self, handle: ResourceHandle) -> Option<&Resource> {
        self.resources.get(handle)
    }

    /// Get a resource by name without logging.
    pub fn resource_by_name(&self, name: &str) -> Option<&Resource> {
        self.resources
            .lookup(name)
            .and_then(|handle| self.resources.get(handle))
    }

    /// All resources in import order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Number of imported resources.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// The resource flagged as backbuffer, if any.
    pub fn backbuffer(&self) -> Option<&Resource> {
        self.resources
            .backbuffer()
            .and_then(|handle| self.resources.get(handle))
    }

    /// Set the extent of every tracked resource.
    ///
    /// Idempotent; calling it with unchanged dimensions is harmless.
    pub fn resize(&mut self, width: u32, height: u32) {
        log::debug!(
            "Render graph resize to {}x{} ({} resources)",
            width,
            height,
            self.resources.len()
        );
        self.resources.set_extent_all(Extent2d::new(width, height));
    }

    /// Declare a pass.
    ///
    /// `setup` runs immediately to record the pass's reads and writes;
    /// `execute` runs later, during [`execute`](Self::execute). Passes run in
    /// the order they are added.
    pub fn add_pass<S, E>(&mut self, name: &str, setup: S, execute: E) -> PassHandle
    where
        S: FnOnce(&mut PassBuilder),
        E: FnOnce(&mut PassContext<'_>) + 'a,
    {
        self.warn_if_executed("add_pass");

        let mut builder = PassBuilder::default();
        setup(&mut builder);

        let handle = PassHandle::new(self.passes.len() as u32);
        let pass = Pass::new(name.to_owned(), builder, Box::new(execute));
        log::trace!(
            "Added pass '{}' (reads {:?}, writes {:?})",
            name,
            pass.reads(),
            pass.writes()
        );
        self.passes.push(pass);
        handle
    }

    /// Passes in declaration order.
    pub fn passes(&self) -> &[Pass<'a>] {
        &self.passes
    }

    /// Get the number of passes in the graph.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Current phase.
    pub fn phase(&self) -> GraphPhase {
        self.phase
    }

    /// Clear values used for rendering scopes.
    pub fn clear_values(&self) -> ClearValues {
        self.clear_values
    }

    /// Set the clear values used for rendering scopes.
    pub fn set_clear_values(&mut self, clear_values: ClearValues) {
        self.clear_values = clear_values;
    }

    fn warn_if_executed(&self, operation: &str) {
        if self.phase == GraphPhase::Executed {
            log::warn!("{} on an executed render graph; call clear() first", operation);
        }
    }

    /// Record every pass into `recorder`.
    ///
    /// Runs each pass's execute closure exactly once. Afterwards the graph
    /// must be cleared before it can execute again.
    pub fn execute(
        &mut self,
        recorder: &mut dyn CommandRecorder,
    ) -> Result<ExecutionStats, GraphError> {
        profile_scope!("render_graph_execute");

        if self.phase != GraphPhase::Populating {
            return Err(GraphError::OutOfOrder {
                operation: "execute",
                phase: self.phase,
            });
        }
        self.phase = GraphPhase::Executed;

        let mut stats = ExecutionStats::default();
        let mut batch = BarrierBatch::new();
        let mut wrote_any = false;
        let mut passes = std::mem::take(&mut self.passes);

        for pass in &mut passes {
            let reads = self.resolve(pass.name(), pass.reads());
            let writes = self.resolve(pass.name(), pass.writes());

            // Read phase
            for &handle in &reads {
                self.transition(&mut batch, handle, ResourceState::ShaderReadOnly, pass.name());
            }
            stats.barriers_emitted += Self::flush(&mut batch, recorder);

            // Write phase
            for &handle in &writes {
                let Some(format) = self.resources.get(handle).map(Resource::format) else {
                    continue;
                };
                let target = ResourceState::attachment_for(format);
                self.transition(&mut batch, handle, target, pass.name());
            }
            stats.barriers_emitted += Self::flush(&mut batch, recorder);
            wrote_any |= !writes.is_empty();

            let rendering = self.rendering_info(pass.name(), &writes);
            if let Some(info) = &rendering {
                recorder.begin_rendering(info);
                stats.rendering_scopes += 1;
            }

            if let Some(execute) = pass.take_execute() {
                profile_scope!("pass_execute");
                log::trace!("Executing pass '{}'", pass.name());
                let mut ctx = PassContext::new(
                    &mut *recorder,
                    pass.name(),
                    rendering.as_ref().map(|info| info.extent),
                );
                execute(&mut ctx);
                stats.passes_executed += 1;
            }

            if rendering.is_some() {
                recorder.end_rendering();
            }
        }

        // Keep the declarations around for inspection until the next clear.
        self.passes = passes;

        if wrote_any && let Some(backbuffer) = self.resources.backbuffer() {
            self.transition(
                &mut batch,
                backbuffer,
                ResourceState::PresentSource,
                "present",
            );
            let emitted = Self::flush(&mut batch, recorder);
            stats.barriers_emitted += emitted;
            stats.present_transition = emitted > 0;
        }

        log::trace!(
            "Render graph executed: {} passes, {} barriers, {} rendering scopes",
            stats.passes_executed,
            stats.barriers_emitted,
            stats.rendering_scopes
        );
        Ok(stats)
    }

    /// Resolve names to handles once per pass, skipping unknown names.
    fn resolve(&self, pass: &str, names: &[String]) -> Vec<ResourceHandle> {
        names
            .iter()
            .filter_map(|name| {
                let handle = self.resources.lookup(name);
                if handle.is_none() {
                    log::error!("Pass '{}' uses unknown resource '{}'; skipped", pass, name);
                }
                handle
            })
            .collect()
    }

    fn transition(
        &mut self,
        batch: &mut BarrierBatch,
        handle: ResourceHandle,
        target: ResourceState,
        pass: &str,
    ) {
        let Some(resource) = self.resources.get_mut(handle) else {
            return;
        };

        let old = resource.state();
        if old == ResourceState::Undefined && target == ResourceState::ShaderReadOnly {
            log::warn!(
                "Pass '{}' reads '{}' before anything wrote it",
                pass,
                resource.name()
            );
        }

        if batch.add_transition(
            handle,
            resource.image(),
            resource.format().aspects(),
            old,
            target,
        ) {
            log::debug!(
                "Barrier for '{}' in '{}': {:?} -> {:?}",
                resource.name(),
                pass,
                old,
                target
            );
            resource.set_state(target);
        }
    }

    fn flush(batch: &mut BarrierBatch, recorder: &mut dyn CommandRecorder) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        recorder.pipeline_barrier(batch.barriers());
        batch.clear();
        count
    }

    /// Select at most one color and one depth target for the pass's
    /// rendering scope.
    fn rendering_info(&self, pass: &str, writes: &[ResourceHandle]) -> Option<RenderingInfo> {
        let mut color: Option<&Resource> = None;
        let mut depth: Option<&Resource> = None;

        for resource in writes.iter().filter_map(|&h| self.resources.get(h)) {
            let slot = if resource.format().is_depth_stencil() {
                &mut depth
            } else {
                &mut color
            };
            if let Some(first) = *slot {
                if first.handle() != resource.handle() {
                    log::warn!(
                        "Pass '{}' writes '{}' in addition to '{}'; only the first is attached",
                        pass,
                        resource.name(),
                        first.name()
                    );
                }
            } else {
                *slot = Some(resource);
            }
        }

        let extent = color.or(depth)?.extent();
        let clear = self.clear_values;

        Some(RenderingInfo {
            extent,
            color: color.map(|r| Attachment {
                image: r.image(),
                view: r.view(),
                format: r.format(),
                load_op: LoadOp::Clear(ClearValue::Color(clear.color)),
                store_op: StoreOp::Store,
            }),
            depth: depth.map(|r| Attachment {
                image: r.image(),
                view: r.view(),
                format: r.format(),
                load_op: LoadOp::Clear(ClearValue::DepthStencil {
                    depth: clear.depth,
                    stencil: clear.stencil,
                }),
                store_op: StoreOp::Store,
            }),
        })
    }
}

impl Default for RenderGraph<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RenderGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("resources", &self.resources.len())
            .field("passes", &self.passes)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyRecorder, RecordedCommand};
    use std::cell::Cell;

    fn import_color(graph: &mut RenderGraph<'_>, name: &str, raw: u64) -> ResourceHandle {
        graph.import_texture(
            name,
            ImageHandle::from_raw(raw),
            ImageViewHandle::from_raw(raw + 1000),
            Extent2d::new(640, 480),
            TextureFormat::Rgba8Unorm,
        )
    }

    #[test]
    fn test_add_pass_runs_setup_immediately() {
        let mut graph = RenderGraph::new();
        let mut setup_ran = false;
        let handle = graph.add_pass(
            "gbuffer",
            |pass| {
                setup_ran = true;
                pass.writes("Albedo");
            },
            |_| {},
        );
        assert!(setup_ran);
        assert_eq!(handle.index(), 0);
        assert_eq!(graph.pass_count(), 1);
        assert_eq!(graph.passes()[0].writes(), ["Albedo"]);
    }

    #[test]
    fn test_execute_twice_without_clear() {
        let mut graph = RenderGraph::new();
        let mut recorder = DummyRecorder::new();
        graph.execute(&mut recorder).unwrap();

        assert_eq!(
            graph.execute(&mut recorder),
            Err(GraphError::OutOfOrder {
                operation: "execute",
                phase: GraphPhase::Executed
            })
        );

        graph.clear();
        assert!(graph.execute(&mut recorder).is_ok());
    }

    #[test]
    fn test_new_graph_accepts_one_frame_before_clear() {
        let mut graph = RenderGraph::new();
        assert_eq!(graph.phase(), GraphPhase::Populating);

        import_color(&mut graph, "Color", 1);
        graph.add_pass(
            "main",
            |p| {
                p.writes("Color");
            },
            |_| {},
        );
        let mut recorder = DummyRecorder::new();
        assert_eq!(graph.execute(&mut recorder).unwrap().passes_executed, 1);
        assert_eq!(graph.phase(), GraphPhase::Executed);

        // The second frame must start from clear().
        assert!(matches!(
            graph.execute(&mut recorder),
            Err(GraphError::OutOfOrder { .. })
        ));
        graph.clear();
        assert_eq!(graph.phase(), GraphPhase::Populating);
        assert_eq!(graph.pass_count(), 0);
        assert_eq!(graph.resource_count(), 0);
    }

    #[test]
    fn test_duplicate_reads_emit_one_barrier() {
        let mut graph = RenderGraph::new();
        import_color(&mut graph, "Color", 1);
        graph.add_pass(
            "produce",
            |p| {
                p.writes("Color");
            },
            |_| {},
        );
        graph.add_pass(
            "consume",
            |p| {
                p.reads("Color").reads("Color");
            },
            |_| {},
        );

        let mut recorder = DummyRecorder::new();
        let stats = graph.execute(&mut recorder).unwrap();

        // Undefined -> color, then color -> shader read.
        assert_eq!(stats.barriers_emitted, 2);
        assert_eq!(
            graph.resource_by_name("Color").unwrap().state(),
            ResourceState::ShaderReadOnly
        );
    }

    #[test]
    fn test_unknown_names_are_skipped() {
        let mut graph = RenderGraph::new();
        graph.add_pass(
            "ghost",
            |p| {
                p.reads("Missing").writes("AlsoMissing");
            },
            |_| {},
        );

        let mut recorder = DummyRecorder::new();
        let stats = graph.execute(&mut recorder).unwrap();
        assert_eq!(stats.passes_executed, 1);
        assert_eq!(stats.barriers_emitted, 0);
        assert_eq!(stats.rendering_scopes, 0);
        assert!(recorder.commands().is_empty());
    }

    #[test]
    fn test_pass_without_writes_has_no_scope() {
        let seen_extent = Cell::new(Some(Extent2d::default()));
        let mut graph = RenderGraph::new();
        import_color(&mut graph, "Color", 1);

        graph.add_pass(
            "compute_like",
            |p| {
                p.reads("Color");
            },
            |ctx| seen_extent.set(ctx.render_extent()),
        );

        let mut recorder = DummyRecorder::new();
        graph.execute(&mut recorder).unwrap();
        assert_eq!(seen_extent.get(), None);
        assert!(
            !recorder
                .commands()
                .iter()
                .any(|c| matches!(c, RecordedCommand::BeginRendering(_)))
        );
    }

    #[test]
    fn test_extra_color_targets_are_not_attached() {
        let mut graph = RenderGraph::new();
        let first = import_color(&mut graph, "A", 1);
        import_color(&mut graph, "B", 2);
        graph.add_pass(
            "mrt",
            |p| {
                p.writes("A").writes("B");
            },
            |_| {},
        );

        let mut recorder = DummyRecorder::new();
        graph.execute(&mut recorder).unwrap();

        let info = recorder
            .commands()
            .iter()
            .find_map(|c| match c {
                RecordedCommand::BeginRendering(info) => Some(*info),
                _ => None,
            })
            .unwrap();
        assert_eq!(info.color.unwrap().image, graph.resource(first).unwrap().image());
        assert!(info.depth.is_none());
        // Both still transition.
        assert_eq!(recorder.barriers().count(), 2);
    }

    #[test]
    fn test_clear_values_applied() {
        let mut graph = RenderGraph::from_config(
            &FrameConfig::default()
                .with_clear_color([0.2, 0.3, 0.4, 1.0])
                .with_clear_depth(0.0),
        );
        import_color(&mut graph, "Color", 1);
        graph.import_texture(
            "Depth",
            ImageHandle::from_raw(2),
            ImageViewHandle::from_raw(3),
            Extent2d::new(640, 480),
            TextureFormat::Depth32Float,
        );
        graph.add_pass(
            "main",
            |p| {
                p.writes("Depth").writes("Color");
            },
            |_| {},
        );

        let mut recorder = DummyRecorder::new();
        graph.execute(&mut recorder).unwrap();

        let info = recorder
            .commands()
            .iter()
            .find_map(|c| match c {
                RecordedCommand::BeginRendering(info) => Some(*info),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            info.color.unwrap().load_op,
            LoadOp::Clear(ClearValue::Color([0.2, 0.3, 0.4, 1.0]))
        );
        assert_eq!(
            info.depth.unwrap().load_op,
            LoadOp::Clear(ClearValue::DepthStencil {
                depth: 0.0,
                stencil: 0
            })
        );
        assert_eq!(info.color.unwrap().store_op, StoreOp::Store);
    }

    #[test]
    fn test_get_resource_handle_unknown() {
        let graph = RenderGraph::new();
        let handle = graph.get_resource_handle("nope");
        assert_eq!(handle, ResourceHandle::INVALID);
        assert!(graph.resource(handle).is_none());
    }
}
