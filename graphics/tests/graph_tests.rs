//! Render graph integration tests.
//!
//! Every test records into a [`DummyRecorder`] and checks the barriers,
//! rendering scopes and pass markers it captured.

mod common;

use rstest::rstest;

use common::{EXTENT, attachment_state, import, import_backbuffer, init_logging, trace};
use lantern_graphics::backend::{DummyRecorder, RecordedCommand};
use lantern_graphics::graph::{ClearValue, LoadOp, ResourceState};
use lantern_graphics::types::{ClearValues, Extent2d, TextureFormat};
use lantern_graphics::{GraphError, RenderGraph, ResourceHandle};

fn mark(label: &'static str) -> impl FnOnce(&mut lantern_graphics::graph::PassContext<'_>) {
    move |ctx| {
        if let Some(recorder) = ctx.recorder_as::<DummyRecorder>() {
            recorder.mark(label);
        }
    }
}

// ============================================================================
// Worked scenarios
// ============================================================================

#[test]
fn test_color_then_present_sequence() {
    init_logging();
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    import(&mut graph, "Color", 1, TextureFormat::Rgba16Float);
    import_backbuffer(&mut graph, 2);

    graph.add_pass(
        "P1",
        |p| {
            p.writes("Color");
        },
        mark("P1"),
    );
    graph.add_pass(
        "P2",
        |p| {
            p.reads("Color").writes("BackBuffer");
        },
        mark("P2"),
    );

    let stats = graph.execute(&mut recorder).unwrap();

    assert_eq!(
        trace(&graph, recorder.commands()),
        vec![
            "barrier[Color:Undefined->ColorAttachment]",
            "begin_rendering",
            "exec:P1",
            "end_rendering",
            "barrier[Color:ColorAttachment->ShaderReadOnly]",
            "barrier[BackBuffer:Undefined->ColorAttachment]",
            "begin_rendering",
            "exec:P2",
            "end_rendering",
            "barrier[BackBuffer:ColorAttachment->PresentSource]",
        ]
    );
    assert_eq!(stats.passes_executed, 2);
    assert_eq!(stats.barriers_emitted, 4);
    assert_eq!(stats.rendering_scopes, 2);
    assert!(stats.present_transition);
}

#[test]
fn test_empty_frame_records_nothing() {
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    import_backbuffer(&mut graph, 2);
    graph.clear();

    let stats = graph.execute(&mut recorder).unwrap();

    assert!(recorder.commands().is_empty());
    assert_eq!(stats.barriers_emitted, 0);
    assert_eq!(stats.rendering_scopes, 0);
    assert!(!stats.present_transition);
}

#[test]
fn test_backbuffer_untouched_without_writes() {
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    import(&mut graph, "Color", 1, TextureFormat::Rgba8Unorm);
    import_backbuffer(&mut graph, 2);
    graph.add_pass(
        "sample_only",
        |p| {
            p.reads("Color");
        },
        |_| {},
    );

    let stats = graph.execute(&mut recorder).unwrap();

    assert!(!stats.present_transition);
    assert_eq!(
        graph.resource_by_name("BackBuffer").unwrap().state(),
        ResourceState::Undefined
    );
}

#[test]
fn test_unwritten_backbuffer_presented_when_frame_wrote() {
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    import(&mut graph, "Color", 1, TextureFormat::Rgba8Unorm);
    import_backbuffer(&mut graph, 2);
    graph.add_pass(
        "offscreen",
        |p| {
            p.writes("Color");
        },
        |_| {},
    );

    let stats = graph.execute(&mut recorder).unwrap();

    // The backbuffer was never written but a pass wrote something, so it
    // still ends the frame presentable.
    assert!(stats.present_transition);
    assert_eq!(
        graph.resource_by_name("BackBuffer").unwrap().state(),
        ResourceState::PresentSource
    );
}

// ============================================================================
// Write-state invariant
// ============================================================================

#[rstest]
#[case::color(TextureFormat::Rgba8Unorm)]
#[case::hdr(TextureFormat::Rgba16Float)]
#[case::srgb(TextureFormat::Bgra8UnormSrgb)]
#[case::depth(TextureFormat::Depth32Float)]
#[case::depth_stencil(TextureFormat::Depth24PlusStencil8)]
fn test_written_resources_end_in_format_class_state(#[case] format: TextureFormat) {
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    import(&mut graph, "Target", 1, format);
    import_backbuffer(&mut graph, 2);
    graph.add_pass(
        "draw",
        |p| {
            p.writes("Target");
        },
        |_| {},
    );
    graph.add_pass(
        "compose",
        |p| {
            p.writes("BackBuffer");
        },
        |_| {},
    );

    graph.execute(&mut recorder).unwrap();

    assert_eq!(
        graph.resource_by_name("Target").unwrap().state(),
        attachment_state(format)
    );
    assert_eq!(
        graph.resource_by_name("BackBuffer").unwrap().state(),
        ResourceState::PresentSource
    );
}

#[test]
fn test_color_and_depth_share_one_scope() {
    let mut graph = RenderGraph::with_clear_values(ClearValues {
        color: [0.2, 0.3, 0.4, 1.0],
        depth: 0.0,
        stencil: 7,
    });
    let mut recorder = DummyRecorder::new();

    import(&mut graph, "Color", 1, TextureFormat::Rgba8Unorm);
    import(&mut graph, "Depth", 3, TextureFormat::Depth24PlusStencil8);
    graph.add_pass(
        "geometry",
        |p| {
            p.writes("Color").writes("Depth");
        },
        |_| {},
    );

    graph.execute(&mut recorder).unwrap();

    let commands = recorder.commands();
    assert_eq!(
        trace(&graph, commands),
        vec![
            "barrier[Color:Undefined->ColorAttachment,Depth:Undefined->DepthAttachment]",
            "begin_rendering",
            "end_rendering",
        ]
    );

    let RecordedCommand::BeginRendering(info) = &commands[1] else {
        panic!("expected a rendering scope");
    };
    assert_eq!(info.extent, EXTENT);
    let color = info.color.unwrap();
    let depth = info.depth.unwrap();
    assert_eq!(color.format, TextureFormat::Rgba8Unorm);
    assert_eq!(color.load_op, LoadOp::Clear(ClearValue::Color([0.2, 0.3, 0.4, 1.0])));
    assert_eq!(depth.format, TextureFormat::Depth24PlusStencil8);
    assert_eq!(
        depth.load_op,
        LoadOp::Clear(ClearValue::DepthStencil {
            depth: 0.0,
            stencil: 7
        })
    );
}

#[test]
fn test_depth_only_scope_uses_depth_extent() {
    let mut extent = None;
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    graph.import_texture(
        "Shadow",
        lantern_graphics::types::ImageHandle::from_raw(5),
        lantern_graphics::types::ImageViewHandle::from_raw(6),
        Extent2d::new(2048, 2048),
        TextureFormat::Depth32Float,
    );
    graph.add_pass(
        "shadow",
        |p| {
            p.writes("Shadow");
        },
        |ctx| extent = ctx.render_extent(),
    );

    graph.execute(&mut recorder).unwrap();
    drop(graph);

    assert_eq!(extent, Some(Extent2d::new(2048, 2048)));
}

#[test]
fn test_read_after_read_emits_no_barrier() {
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    import(&mut graph, "Color", 1, TextureFormat::Rgba8Unorm);
    import_backbuffer(&mut graph, 2);
    graph.add_pass(
        "produce",
        |p| {
            p.writes("Color");
        },
        |_| {},
    );
    for name in ["blur", "bloom"] {
        graph.add_pass(
            name,
            |p| {
                p.reads("Color");
            },
            |_| {},
        );
    }

    graph.execute(&mut recorder).unwrap();

    let to_shader_read = recorder
        .barriers()
        .filter(|b| b.new_state == ResourceState::ShaderReadOnly)
        .count();
    assert_eq!(to_shader_read, 1);
}

#[rstest]
#[case::color(TextureFormat::Rgba16Float, "barrier[Target:Undefined->ColorAttachment]")]
#[case::depth(TextureFormat::Depth32Float, "barrier[Target:Undefined->DepthAttachment]")]
fn test_duplicate_writes_emit_one_barrier(#[case] format: TextureFormat, #[case] barrier: &str) {
    init_logging();
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    let target = import(&mut graph, "Target", 1, format);
    graph.add_pass(
        "P",
        |p| {
            p.writes("Target").writes("Target");
        },
        mark("P"),
    );

    let stats = graph.execute(&mut recorder).unwrap();

    assert_eq!(
        trace(&graph, recorder.commands()),
        vec![barrier, "begin_rendering", "exec:P", "end_rendering"]
    );
    assert_eq!(stats.barriers_emitted, 1);
    assert_eq!(stats.rendering_scopes, 1);
    assert_eq!(
        graph.resource(target).unwrap().state(),
        attachment_state(format)
    );

    // The repeated name is the same target, so nothing counts as an extra attachment.
    let info = recorder
        .commands()
        .iter()
        .find_map(|c| match c {
            RecordedCommand::BeginRendering(info) => Some(*info),
            _ => None,
        })
        .unwrap();
    let image = graph.resource(target).unwrap().image();
    let attached: Vec<_> = info
        .color
        .iter()
        .chain(info.depth.iter())
        .map(|attachment| attachment.image)
        .collect();
    assert_eq!(attached, vec![image]);
}

// ============================================================================
// Lookup and resize
// ============================================================================

#[test]
fn test_import_then_lookup_returns_same_handle() {
    let mut graph = RenderGraph::new();

    let handle = import(&mut graph, "X", 1, TextureFormat::Rgba8Unorm);
    assert_eq!(graph.get_resource_handle("X"), handle);

    // Re-importing keeps the handle
    let again = import(&mut graph, "X", 9, TextureFormat::Rgba16Float);
    assert_eq!(again, handle);
    assert_eq!(graph.resource_count(), 1);
    assert_eq!(
        graph.resource(handle).unwrap().format(),
        TextureFormat::Rgba16Float
    );
}

#[rstest]
#[case("unregistered")]
#[case("")]
#[case("backbuffer")]
fn test_unknown_name_returns_sentinel(#[case] name: &str) {
    init_logging();
    let mut graph = RenderGraph::new();
    import_backbuffer(&mut graph, 2);

    let handle = graph.get_resource_handle(name);
    assert_eq!(handle, ResourceHandle::INVALID);
    assert!(!handle.is_valid());
    assert!(graph.resource(handle).is_none());
}

#[test]
fn test_clear_forgets_names() {
    let mut graph = RenderGraph::new();
    import(&mut graph, "Color", 1, TextureFormat::Rgba8Unorm);

    graph.clear();

    assert_eq!(graph.get_resource_handle("Color"), ResourceHandle::INVALID);
    assert_eq!(graph.resource_count(), 0);
    assert!(graph.backbuffer().is_none());
}

#[test]
fn test_resize_is_idempotent() {
    let mut graph = RenderGraph::new();
    import(&mut graph, "Color", 1, TextureFormat::Rgba8Unorm);
    import_backbuffer(&mut graph, 2);

    graph.resize(640, 480);
    let first: Vec<Extent2d> = graph.resources().map(|r| r.extent()).collect();
    graph.resize(640, 480);
    let second: Vec<Extent2d> = graph.resources().map(|r| r.extent()).collect();

    assert_eq!(first, second);
    assert!(first.iter().all(|&e| e == Extent2d::new(640, 480)));
}

#[test]
fn test_execute_out_of_order() {
    let mut graph = RenderGraph::new();
    let mut recorder = DummyRecorder::new();

    graph.execute(&mut recorder).unwrap();
    assert!(matches!(
        graph.execute(&mut recorder),
        Err(GraphError::OutOfOrder {
            operation: "execute",
            ..
        })
    ));

    graph.clear();
    assert!(graph.execute(&mut recorder).is_ok());
}

#[test]
fn test_each_execute_closure_runs_once_per_frame() {
    let mut recorder = DummyRecorder::new();
    let mut graph = RenderGraph::new();

    for _frame in 0..3 {
        graph.clear();
        import_backbuffer(&mut graph, 2);
        graph.add_pass(
            "final",
            |p| {
                p.writes("BackBuffer");
            },
            mark("final"),
        );
        graph.execute(&mut recorder).unwrap();
    }

    let markers = recorder
        .commands()
        .iter()
        .filter(|c| matches!(c, RecordedCommand::Marker(_)))
        .count();
    assert_eq!(markers, 3);
}
