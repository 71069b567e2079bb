//! URScript command encoding.
//!
//! The controller parses these strings verbatim, so the layout is fixed:
//! five decimals per number, joint arrays without spaces, arguments joined
//! with `", "`.

use std::fmt::Write as _;

use binder_core::{ApproachMove, JointAngles, StreamSettings, Trajectory};
use thiserror::Error;

/// Name of the program rendered by [`render_program`].
pub const PROGRAM_NAME: &str = "binder_move";

/// Script building error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("No open block to end")]
    NoOpenBlock,
    #[error("{0} block(s) left open")]
    UnclosedBlocks(usize),
}

/// Format a number the way the controller expects.
#[must_use]
pub fn format_float(value: f64) -> String {
    format!("{value:.5}")
}

/// `[q0,q1,q2,q3,q4,q5]`
#[must_use]
pub fn joint_array(angles: &JointAngles) -> String {
    let parts: Vec<String> = angles.iter().map(|&a| format_float(a)).collect();
    format!("[{}]", parts.join(","))
}

/// Servo to `angles`, blocking for `t` seconds. Acceleration and velocity
/// are ignored by the controller for servoj and always sent as zero.
#[must_use]
pub fn servoj(angles: &JointAngles, t: f64, lookahead_time: f64, gain: f64) -> String {
    format!(
        "servoj({}, {}, {}, {}, {}, {})",
        joint_array(angles),
        format_float(0.0),
        format_float(0.0),
        format_float(t),
        format_float(lookahead_time),
        format_float(gain)
    )
}

/// Joint-space move with acceleration `a`, velocity `v`, time `t`, blend radius `r`.
#[must_use]
pub fn movej(angles: &JointAngles, a: f64, v: f64, t: f64, r: f64) -> String {
    format!(
        "movej({}, {}, {}, {}, {})",
        joint_array(angles),
        format_float(a),
        format_float(v),
        format_float(t),
        format_float(r)
    )
}

/// Decelerate every joint to a standstill at `a` rad/s² and hold.
#[must_use]
pub fn stopj(a: f64) -> String {
    format!("stopj({})", format_float(a))
}

/// Incremental URScript program builder with tab indentation.
#[derive(Debug, Default, Clone)]
pub struct UrScript {
    text: String,
    indent_level: usize,
}

impl UrScript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line at the current indentation.
    pub fn add_line(&mut self, line: &str) {
        for _ in 0..self.indent_level {
            self.text.push('\t');
        }
        self.text.push_str(line.trim());
        self.text.push('\n');
    }

    /// Open `def name(args):`.
    pub fn function(&mut self, name: &str, args: &[&str]) {
        self.add_line(&format!("def {name}({}):", args.join(", ")));
        self.indent_level += 1;
    }

    /// Open `while condition:`.
    pub fn while_loop(&mut self, condition: &str) {
        self.add_line(&format!("while {condition}:"));
        self.indent_level += 1;
    }

    /// Close the innermost block.
    ///
    /// # Errors
    /// Returns error if no block is open.
    pub fn end(&mut self) -> Result<(), ScriptError> {
        if self.indent_level == 0 {
            return Err(ScriptError::NoOpenBlock);
        }
        self.indent_level -= 1;
        self.add_line("end");
        Ok(())
    }

    pub fn servoj(&mut self, angles: &JointAngles, t: f64, lookahead_time: f64, gain: f64) {
        self.add_line(&servoj(angles, t, lookahead_time, gain));
    }

    pub fn movej(&mut self, angles: &JointAngles, a: f64, v: f64) {
        self.add_line(&movej(angles, a, v, 0.0, 0.0));
    }

    pub fn stopj(&mut self, a: f64) {
        self.add_line(&stopj(a));
    }

    pub fn set_tool_digital_out(&mut self, index: u8, state: bool) {
        let state = if state { "True" } else { "False" };
        self.add_line(&format!("set_tool_digital_out({index}, {state})"));
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Finished program text.
    ///
    /// # Errors
    /// Returns error if a block is still open.
    pub fn finish(self) -> Result<String, ScriptError> {
        if self.indent_level != 0 {
            return Err(ScriptError::UnclosedBlocks(self.indent_level));
        }
        Ok(self.text)
    }
}

/// Whole trajectory as one program: approach move, then one servoj per
/// frame, wrapped in `while True:` when looped.
#[must_use]
pub fn render_program(trajectory: &Trajectory, looped: bool, settings: &StreamSettings) -> String {
    let approach = settings.approach.unwrap_or_default();
    let t = trajectory.sample_interval();

    let mut script = UrScript::new();
    script.function(PROGRAM_NAME, &[]);
    script.movej(trajectory.first().angles(), approach.acceleration, approach.velocity);
    if looped {
        script.while_loop("True");
    }
    for frame in trajectory.frames() {
        script.servoj(frame.angles(), t, settings.lookahead_time, settings.gain);
    }
    if looped {
        close(&mut script);
    }
    close(&mut script);
    script.text
}

// Blocks opened above are always closed in order.
fn close(script: &mut UrScript) {
    if let Err(e) = script.end() {
        tracing::error!("Unbalanced program structure: {e}");
    }
}

/// Normalize script text for the controller: trailing whitespace stripped,
/// blank lines dropped, every line newline-terminated.
#[must_use]
pub fn clean_script(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .fold(String::with_capacity(text.len() + 1), |mut out, line| {
            let _ = writeln!(out, "{line}");
            out
        })
}

/// Approach move for the first frame of a trajectory.
#[must_use]
pub fn approach_command(angles: &JointAngles, approach: &ApproachMove) -> String {
    movej(angles, approach.acceleration, approach.velocity, 0.0, 0.0)
}
