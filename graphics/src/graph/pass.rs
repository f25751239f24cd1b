//! Pass declaration and the context handed to pass execution.

use std::any::Any;

use crate::backend::CommandRecorder;
use crate::types::Extent2d;

/// Deferred recording work of a pass.
pub type ExecuteFn<'a> = Box<dyn FnOnce(&mut PassContext<'_>) + 'a>;

/// A pass in the render graph.
///
/// The setup closure has already run when a `Pass` exists; only the
/// execute closure is deferred until [`RenderGraph::execute`](super::RenderGraph::execute).
pub struct Pass<'a> {
    name: String,
    reads: Vec<String>,
    writes: Vec<String>,
    execute: Option<ExecuteFn<'a>>,
}

impl<'a> Pass<'a> {
    pub(crate) fn new(name: String, builder: PassBuilder, execute: ExecuteFn<'a>) -> Self {
        Self {
            name,
            reads: builder.reads,
            writes: builder.writes,
            execute: Some(execute),
        }
    }

    /// Get the pass name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names this pass reads, in declaration order.
    pub fn reads(&self) -> &[String] {
        &self.reads
    }

    /// Names this pass writes, in declaration order.
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    pub(crate) fn take_execute(&mut self) -> Option<ExecuteFn<'a>> {
        self.execute.take()
    }
}

impl std::fmt::Debug for Pass<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

/// Records which named resources a pass reads and writes.
///
/// Only lives for the duration of the setup closure. Duplicate
/// declarations are kept and are harmless.
#[derive(Debug, Default)]
pub struct PassBuilder {
    reads: Vec<String>,
    writes: Vec<String>,
}

impl PassBuilder {
    /// Declare a sampled read of `name`.
    pub fn reads(&mut self, name: impl Into<String>) -> &mut Self {
        self.reads.push(name.into());
        self
    }

    /// Declare an attachment write of `name`.
    pub fn writes(&mut self, name: impl Into<String>) -> &mut Self {
        self.writes.push(name.into());
        self
    }
}

/// Context passed to a pass's execute closure.
pub struct PassContext<'r> {
    recorder: &'r mut dyn CommandRecorder,
    pass_name: &'r str,
    render_extent: Option<Extent2d>,
}

impl<'r> PassContext<'r> {
    pub(crate) fn new(
        recorder: &'r mut dyn CommandRecorder,
        pass_name: &'r str,
        render_extent: Option<Extent2d>,
    ) -> Self {
        Self {
            recorder,
            pass_name,
            render_extent,
        }
    }

    /// Name of the executing pass.
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    /// Extent of the active rendering scope, if the pass has one.
    pub fn render_extent(&self) -> Option<Extent2d> {
        self.render_extent
    }

    /// The active command recorder.
    pub fn recorder(&mut self) -> &mut dyn CommandRecorder {
        &mut *self.recorder
    }

    /// Get the recorder as a concrete backend type.
    pub fn recorder_as<R: Any>(&mut self) -> Option<&mut R> {
        self.recorder.as_any_mut().downcast_mut::<R>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_order_and_duplicates() {
        let mut builder = PassBuilder::default();
        builder.reads("A").reads("B").writes("C").reads("A");

        let pass = Pass::new("p".into(), builder, Box::new(|_| {}));
        assert_eq!(pass.reads(), ["A", "B", "A"]);
        assert_eq!(pass.writes(), ["C"]);
        assert_eq!(pass.name(), "p");
    }

    #[test]
    fn test_execute_taken_once() {
        let mut pass = Pass::new("p".into(), PassBuilder::default(), Box::new(|_| {}));
        assert!(pass.take_execute().is_some());
        assert!(pass.take_execute().is_none());
    }
}
