use std::io::Write;

use parking_lot::Mutex;
use trendvisor_agents::AgentState;
use trendvisor_core::{PipelineObserver, StatusRecord};

const RULE_WIDTH: usize = 64;

/// Human-readable rendering of pipeline status records.
///
/// Log output goes to stderr through `tracing`; this renderer owns stdout.
pub struct ConsoleRenderer<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, text: &str) {
        let mut out = self.out.lock();
        // A closed stdout must not take the pipeline down.
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    pub fn header(&self, title: &str, subtitle: &str) {
        let bar = "=".repeat(RULE_WIDTH);
        self.emit(&format!("{bar}\n{title:^RULE_WIDTH$}\n{subtitle:^RULE_WIDTH$}\n{bar}"));
    }

    pub fn rule(&self, label: &str) {
        let label = format!(" {label} ");
        self.emit(&format!("{label:-^RULE_WIDTH$}"));
    }

    /// Table of agent states, printed at shutdown.
    pub fn agent_summary(&self, states: &[AgentState]) {
        let mut text = format!(
            "{:<20} {:<9} {:>7} {:>7} {:>7} {:>9}",
            "AGENT", "STATUS", "EVENTS", "FAULTS", "TOOLERR", "TIME(ms)"
        );
        for state in states {
            text.push_str(&format!(
                "\n{:<20} {:<9} {:>7} {:>7} {:>7} {:>9}",
                state.name,
                format!("{:?}", state.status).to_lowercase(),
                state.metrics.events_handled,
                state.metrics.faults,
                state.metrics.tool_failures,
                state.metrics.duration_ms
            ));
        }
        self.emit(&text);
    }

    /// Consumes the renderer and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> PipelineObserver for ConsoleRenderer<W> {
    fn notify(&self, record: StatusRecord) {
        let text = match record {
            StatusRecord::Status { category, message } => {
                format!("[{}] {message}", category.to_uppercase())
            }
            StatusRecord::EventReceived {
                agent,
                event_type,
                task_id,
            } => format!("  -> EVENT | Agent {agent} detected '{event_type}' for Task {task_id}"),
            StatusRecord::TaskSucceeded {
                task_id,
                report_path,
            } => format!(
                "+ ANALYSIS COMPLETE\n  Task complete: {task_id}\n  The analysis report has been generated at:\n  {report_path}"
            ),
            StatusRecord::TaskFailed {
                task_id,
                agent,
                error,
            } => format!("x ERROR\n  Task {task_id} failed in agent '{agent}':\n  {error}"),
            StatusRecord::Error { agent, message } => {
                format!("[{}] error: {message}", agent.to_uppercase())
            }
        };
        self.emit(&text);
    }
}
