//! Rendering of checker counterexamples.

use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::io::{self, Write};

use super::checker::Counterexample;
use super::model::Model;

/// Turns a counterexample into a persisted artifact.
pub trait Visualizer {
    /// File extension of the artifacts this visualizer produces.
    fn extension(&self) -> &'static str;

    fn render<M: Model, W: Write>(
        &self,
        model: &M,
        counterexample: &Counterexample<M::State, M::Input, M::Output>,
        sink: &mut W,
    ) -> io::Result<()>;
}

/// A self-contained HTML page: one lane per client with every operation drawn
/// as a bar over the round's time axis, the longest partial linearization
/// numbered in order, and the operations that could not be placed in red.
#[derive(Debug, Clone)]
pub struct HtmlVisualizer {
    title: String,
    /// Width of the time axis in pixels.
    width: u32,
}

impl Default for HtmlVisualizer {
    fn default() -> Self {
        Self {
            title: "Linearizability violation".to_owned(),
            width: 1200,
        }
    }
}

impl HtmlVisualizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width.max(100);
        self
    }

    pub fn render_string<M: Model>(
        &self,
        model: &M,
        counterexample: &Counterexample<M::State, M::Input, M::Output>,
    ) -> String {
        let mut html = String::with_capacity(16384);
        let operations = &counterexample.operations;

        let start = operations.iter().map(|op| op.call).min().unwrap_or(0);
        let end = operations.iter().map(|op| op.ret).max().unwrap_or(start);
        let span = end.saturating_sub(start).max(1) as f64;
        let scale = |t: u64| t.saturating_sub(start) as f64 / span * f64::from(self.width);

        let mut order: BTreeMap<usize, usize> = BTreeMap::new();
        for (position, &op) in counterexample.linearized.iter().enumerate() {
            order.insert(op, position);
        }
        let mut lanes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, op) in operations.iter().enumerate() {
            lanes.entry(op.client_id).or_default().push(i);
        }

        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        let _ = writeln!(html, "<title>{}</title>", escape(&self.title));
        html.push_str(STYLE);
        html.push_str("</head>\n<body>\n");
        let _ = writeln!(html, "<h1>{}</h1>", escape(&self.title));
        let _ = writeln!(
            html,
            "<p>{} operations from {} clients over {} ns. The longest linearizable prefix has {} operations; {} could not be placed after it.</p>",
            operations.len(),
            lanes.len(),
            end.saturating_sub(start),
            counterexample.linearized.len(),
            counterexample.stuck.len()
        );

        html.push_str("<div class=\"timeline\">\n");
        for (client, indices) in &lanes {
            let _ = write!(html, "<div class=\"lane\"><span class=\"client\">client {}</span><div class=\"track\" style=\"width:{}px\">", client, self.width);
            for &i in indices {
                let op = &operations[i];
                let left = scale(op.call);
                let width = (scale(op.ret) - left).max(2.0);
                let (class, badge) = match order.get(&i) {
                    Some(position) => ("op linearized", format!("{}", position + 1)),
                    None if counterexample.stuck.contains(&i) => ("op stuck", "!".to_owned()),
                    None => ("op", String::new()),
                };
                let label = model.describe_operation(&op.input, &op.output);
                let _ = write!(
                    html,
                    "<div class=\"{}\" style=\"left:{:.1}px;width:{:.1}px\" title=\"{} [{}, {}]\">{}</div>",
                    class,
                    left,
                    width,
                    escape(&label),
                    op.call,
                    op.ret,
                    escape(&badge)
                );
            }
            html.push_str("</div></div>\n");
        }
        html.push_str("</div>\n");

        html.push_str("<h2>Longest linearization</h2>\n<table>\n<tr><th>#</th><th>client</th><th>operation</th><th>state after</th></tr>\n");
        let initial = match counterexample.states.first() {
            Some(state) => model.describe_state(state),
            None => model.describe_state(&model.init()),
        };
        let _ = writeln!(html, "<tr><td>0</td><td></td><td>initial</td><td>{}</td></tr>", escape(&initial));
        for (position, &i) in counterexample.linearized.iter().enumerate() {
            let op = match operations.get(i) {
                Some(op) => op,
                None => continue,
            };
            let state = counterexample
                .states
                .get(position + 1)
                .map(|s| model.describe_state(s))
                .unwrap_or_default();
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                position + 1,
                op.client_id,
                escape(&model.describe_operation(&op.input, &op.output)),
                escape(&state)
            );
        }
        html.push_str("</table>\n");

        html.push_str("<h2>Could not be linearized next</h2>\n<ul>\n");
        for &i in &counterexample.stuck {
            let op = match operations.get(i) {
                Some(op) => op,
                None => continue,
            };
            let _ = writeln!(
                html,
                "<li class=\"stuck\">client {}: {} [{}, {}]</li>",
                op.client_id,
                escape(&model.describe_operation(&op.input, &op.output)),
                op.call,
                op.ret
            );
        }
        html.push_str("</ul>\n</body>\n</html>\n");

        html
    }
}

impl Visualizer for HtmlVisualizer {
    fn extension(&self) -> &'static str {
        "html"
    }

    fn render<M: Model, W: Write>(
        &self,
        model: &M,
        counterexample: &Counterexample<M::State, M::Input, M::Output>,
        sink: &mut W,
    ) -> io::Result<()> {
        let html = self.render_string(model, counterexample);
        sink.write_all(html.as_bytes())?;
        sink.flush()
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

const STYLE: &str = r#"<style>
body { font-family: sans-serif; margin: 2em; color: #222; }
.timeline { border: 1px solid #ccc; padding: 8px; overflow-x: auto; }
.lane { display: flex; align-items: center; height: 28px; }
.client { width: 90px; font-size: 12px; color: #555; }
.track { position: relative; height: 22px; background: #f6f6f6; }
.op { position: absolute; top: 2px; height: 18px; background: #9bb7d4; border-radius: 3px; font-size: 11px; text-align: center; overflow: hidden; }
.op.linearized { background: #6cbf84; }
.op.stuck { background: #e06666; color: #fff; }
table { border-collapse: collapse; margin-top: 1em; }
td, th { border: 1px solid #ccc; padding: 4px 8px; font-size: 13px; }
li.stuck { color: #b00; }
</style>
"#;
