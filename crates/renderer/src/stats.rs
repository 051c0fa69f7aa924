//! Per-frame statistics.

use crate::draw_batcher::DrawStats;

/// Timings (milliseconds) and counters for the most recent frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EngineStats {
    pub frame_time: f32,
    pub triangle_count: u32,
    pub drawcall_count: u32,
    /// Rebuilding the draw list from the scene graph.
    pub scene_update_time: f32,
    /// Recording the draw list into the command buffer.
    pub mesh_draw_time: f32,
}

impl EngineStats {
    pub(crate) fn record_draws(&mut self, draws: DrawStats) {
        self.triangle_count = draws.triangles;
        self.drawcall_count = draws.draw_calls;
    }
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frame {:.2}ms | scene {:.2}ms | draw {:.2}ms | {} draws, {} tris",
            self.frame_time,
            self.scene_update_time,
            self.mesh_draw_time,
            self.drawcall_count,
            self.triangle_count
        )
    }
}
